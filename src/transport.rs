use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::Duration;

use thiserror::Error;

mod uart;

pub use uart::UartTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not open serial device {0}")]
    Open(String, #[source] rppal::uart::Error),
    #[error("Could not configure serial device")]
    Configure(#[source] rppal::uart::Error),
    #[error("Could not read from serial device")]
    Read(#[source] rppal::uart::Error),
    #[error("Could not write to serial device")]
    Write(#[source] rppal::uart::Error),
    #[error("Only wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("Could not acquire serial port mutex")]
    Mutex,
    #[error("Serial link is down")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Byte link to the unit. Reads block for at most `timeout` and may return nothing.
pub trait Transport: Send + Sync {
    fn read(&self, timeout: Duration) -> Result<Vec<u8>>;

    fn write(&self, bytes: &[u8]) -> Result<()>;
}

/// In-process link: inbound chunks are queued by hand and every write is recorded.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    inbound: Mutex<VecDeque<Vec<u8>>>,
    written: Mutex<Vec<Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&self, bytes: &[u8]) -> Result<()> {
        self.inbound
            .lock()
            .map_err(|_| TransportError::Mutex)?
            .push_back(bytes.to_vec());
        Ok(())
    }

    pub fn written(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .written
            .lock()
            .map_err(|_| TransportError::Mutex)?
            .clone())
    }

    pub fn take_written(&self) -> Result<Vec<Vec<u8>>> {
        Ok(std::mem::take(
            &mut *self.written.lock().map_err(|_| TransportError::Mutex)?,
        ))
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        let chunk = self
            .inbound
            .lock()
            .map_err(|_| TransportError::Mutex)?
            .pop_front();
        match chunk {
            Some(chunk) => Ok(chunk),
            None => {
                sleep(timeout);
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.written
            .lock()
            .map_err(|_| TransportError::Mutex)?
            .push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_transport_round_trip() {
        let transport = MemoryTransport::new();
        transport.feed(&[0x7A, 0x7A]).unwrap();
        assert_eq!(
            transport.read(Duration::from_millis(1)).unwrap(),
            vec![0x7A, 0x7A]
        );
        assert!(transport
            .read(Duration::from_millis(1))
            .unwrap()
            .is_empty());

        transport.write(&[0x01]).unwrap();
        transport.write(&[0x02]).unwrap();
        assert_eq!(transport.written().unwrap(), vec![vec![0x01], vec![0x02]]);
        assert_eq!(transport.take_written().unwrap().len(), 2);
        assert!(transport.written().unwrap().is_empty());
    }

    #[test]
    fn injected_write_failure() {
        let transport = MemoryTransport::new();
        transport.set_fail_writes(true);
        assert!(matches!(
            transport.write(&[0x01]),
            Err(TransportError::Disconnected)
        ));
        assert!(transport.written().unwrap().is_empty());
        transport.set_fail_writes(false);
        assert!(transport.write(&[0x01]).is_ok());
    }
}
