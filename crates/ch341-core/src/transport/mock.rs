//! Mock USB transport for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{TransportError, UsbTransport};

const MOCK_TIMEOUT_MS: u64 = 1000;

/// Mock transport for unit testing codec and session logic.
///
/// Clones share state, modeling several handles onto the same physical
/// device: writes from any clone land in one log in global order, and the
/// exclusive-claim flag is shared.
#[derive(Clone)]
pub struct MockTransport {
    /// Queued responses served to bulk reads.
    bulk_responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Queued responses served to control reads.
    control_responses: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured bulk writes, in arrival order.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Whether the device is "connected".
    connected: Arc<Mutex<bool>>,
    /// Whether some handle holds the exclusive claim.
    claimed: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            bulk_responses: Arc::new(Mutex::new(VecDeque::new())),
            control_responses: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
            claimed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue a response to be returned by the next bulk read.
    pub fn queue_bulk(&self, bytes: &[u8]) {
        self.bulk_responses.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Queue a single ack-status byte.
    pub fn queue_ack(&self, status: u8) {
        self.queue_bulk(&[status]);
    }

    /// Queue a response to be returned by the next control read.
    pub fn queue_control(&self, bytes: &[u8]) {
        self.control_responses
            .lock()
            .unwrap()
            .push_back(bytes.to_vec());
    }

    /// Get all captured bulk writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate device disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }

    /// Take the exclusive claim, as the OS interface claim would.
    pub fn try_claim(&self) -> Result<(), TransportError> {
        let mut claimed = self.claimed.lock().unwrap();
        if *claimed {
            return Err(TransportError::ClaimInterfaceFailed {
                interface: 0,
                message: "Resource busy".into(),
            });
        }
        *claimed = true;
        Ok(())
    }

    /// Release the exclusive claim.
    pub fn release(&self) {
        *self.claimed.lock().unwrap() = false;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn bulk_write(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn bulk_read(&mut self, _len: usize) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.bulk_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: MOCK_TIMEOUT_MS,
            })
    }

    fn control_in(
        &mut self,
        _request: u8,
        _value: u16,
        _index: u16,
        length: u16,
    ) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        let mut response = self
            .control_responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout {
                timeout_ms: MOCK_TIMEOUT_MS,
            })?;
        response.truncate(length as usize);
        Ok(response)
    }

    fn control_out(
        &mut self,
        _request: u8,
        _value: u16,
        _index: u16,
        _data: &[u8],
    ) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_response_queue() {
        let mut mock = MockTransport::new();
        mock.queue_ack(0x00);
        mock.queue_bulk(&[0xDE, 0xAD]);

        assert_eq!(mock.bulk_read(1).unwrap(), vec![0x00]);
        assert_eq!(mock.bulk_read(2).unwrap(), vec![0xDE, 0xAD]);

        // Queue is empty now: simulated timeout.
        assert!(matches!(
            mock.bulk_read(1),
            Err(TransportError::Timeout { .. })
        ));
    }

    #[test]
    fn test_mock_write_capture() {
        let mut mock = MockTransport::new();
        mock.bulk_write(b"Hello").unwrap();
        mock.bulk_write(b"World").unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0], b"Hello");
        assert_eq!(writes[1], b"World");
    }

    #[test]
    fn test_mock_disconnect() {
        let mut mock = MockTransport::new();
        mock.disconnect();
        assert!(matches!(
            mock.bulk_write(b"test"),
            Err(TransportError::Disconnected)
        ));
        mock.reconnect();
        assert!(mock.bulk_write(b"test").is_ok());
    }

    #[test]
    fn test_second_claim_is_busy() {
        let first = MockTransport::new();
        let second = first.clone();

        first.try_claim().unwrap();
        assert!(matches!(
            second.try_claim(),
            Err(TransportError::ClaimInterfaceFailed { .. })
        ));

        first.release();
        second.try_claim().unwrap();
    }
}
