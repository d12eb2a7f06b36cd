//! Protocol module - CH341 command stream definitions.

pub mod command;
pub mod constants;
pub mod pins;

pub use command::{
    CommandFrame, I2cAddress, I2cSpeed, ProtocolError, ResponseKind, decode_ack_status,
    gpio_stream_frame, probe_frames, read_frames, set_speed_frame, write_frames,
    write_read_frames,
};
pub use constants::*;
pub use pins::PinSnapshot;
