use anyhow::{Context, Result};
use ch341_core::{Ch341Device, DeviceConfig, I2cSpeed};
use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "CH341 USB-I2C/GPIO adapter tool", long_about = None)]
struct Args {
    /// Which adapter to use when several are plugged in (0-indexed)
    #[arg(long)]
    index: Option<usize>,

    /// Bus clock in kHz (rounded down to 20/100/400/750)
    #[arg(long)]
    speed: Option<u32>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List connected adapters
    List,
    /// Show chip version, bus clock and pin status
    Status,
    /// Scan the bus for responding addresses
    Scan,
    /// Read bytes from a device
    Read {
        /// 7-bit target address (hex accepted, e.g. 0x50)
        #[arg(value_parser = parse_u8)]
        address: u8,
        /// Number of bytes to read
        count: usize,
        /// Register pointer written before the read (repeated START)
        #[arg(long, value_parser = parse_u8)]
        register: Option<u8>,
    },
    /// Write bytes to a device
    Write {
        /// 7-bit target address (hex accepted)
        #[arg(value_parser = parse_u8)]
        address: u8,
        /// Bytes to write (hex accepted)
        #[arg(value_parser = parse_u8, required = true)]
        data: Vec<u8>,
    },
    /// Get or set an auxiliary pin
    Gpio {
        #[command(subcommand)]
        command: GpioCommand,
    },
}

#[derive(Subcommand, Debug)]
enum GpioCommand {
    /// Read pin D0..D7
    Get { pin: u8 },
    /// Drive pin D0..D5
    Set {
        pin: u8,
        #[arg(value_parser = parse_level)]
        level: bool,
    },
}

fn parse_u8(s: &str) -> std::result::Result<u8, String> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (s, 10),
    };
    u8::from_str_radix(digits, radix).map_err(|e| e.to_string())
}

fn parse_level(s: &str) -> std::result::Result<bool, String> {
    match s {
        "0" | "low" | "off" => Ok(false),
        "1" | "high" | "on" => Ok(true),
        _ => Err(format!("invalid level '{s}', expected 0/1/low/high")),
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if matches!(args.command, Command::List) {
        let adapters = Ch341Device::list_devices()?;
        if adapters.is_empty() {
            println!("No adapters found");
        }
        for adapter in adapters {
            println!("{adapter}");
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => DeviceConfig::load_from_file(path)
            .with_context(|| format!("loading config from {path}"))?,
        None => DeviceConfig::default(),
    };
    if let Some(index) = args.index {
        config.index = index;
    }
    if let Some(khz) = args.speed {
        config.speed = I2cSpeed::from_khz(khz);
    }

    let device = Ch341Device::open_with_config(&config).context("opening adapter")?;

    match &args.command {
        Command::List => unreachable!("handled above"),
        Command::Status => {
            let (major, minor) = device.chip_version()?;
            println!("Chip version: {major}.{minor}");
            println!("Bus clock: {}", device.speed()?);
            println!("{}", device.gpio_snapshot()?);
        }
        Command::Scan => {
            let found = device.scan()?;
            if found.is_empty() {
                println!("No devices responded");
            }
            for address in found {
                println!("0x{address:02X}");
            }
        }
        Command::Read {
            address,
            count,
            register,
        } => {
            let mut buf = vec![0u8; *count];
            match register {
                Some(reg) => device.i2c_write_read(*address, &[*reg], &mut buf)?,
                None => device.i2c_read(*address, &mut buf)?,
            }
            let hex: Vec<String> = buf.iter().map(|b| format!("{b:02X}")).collect();
            println!("{}", hex.join(" "));
        }
        Command::Write { address, data } => {
            device.i2c_write(*address, data)?;
            info!(
                address = %format!("0x{address:02X}"),
                len = data.len(),
                "Write complete"
            );
        }
        Command::Gpio { command } => match command {
            GpioCommand::Get { pin } => {
                println!("{}", if device.gpio_get(*pin)? { "high" } else { "low" });
            }
            GpioCommand::Set { pin, level } => device.gpio_set(*pin, *level)?,
        },
    }

    Ok(())
}
