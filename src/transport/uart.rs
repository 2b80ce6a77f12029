use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rppal::uart::{Parity, Uart};

use crate::transport::{Result, Transport, TransportError};

const DATA_BITS: u8 = 8;
const STOP_BITS: u8 = 1;
const READ_CHUNK: usize = 256;

struct Port {
    uart: Uart,
    read_timeout: Option<Duration>,
}

/// 8N1 serial link without flow control.
pub struct UartTransport {
    port: Mutex<Port>,
}

impl UartTransport {
    pub fn open<P: AsRef<Path>>(path: P, baud_rate: u32) -> Result<UartTransport> {
        let path = path.as_ref();
        let mut uart = Uart::with_path(path, baud_rate, Parity::None, DATA_BITS, STOP_BITS)
            .map_err(|e| TransportError::Open(path.display().to_string(), e))?;
        uart.set_hardware_flow_control(false)
            .map_err(TransportError::Configure)?;
        uart.set_write_mode(true).map_err(TransportError::Configure)?;
        info!("opened {} at {} baud", path.display(), baud_rate);
        Ok(UartTransport {
            port: Mutex::new(Port {
                uart,
                read_timeout: None,
            }),
        })
    }
}

impl Transport for UartTransport {
    fn read(&self, timeout: Duration) -> Result<Vec<u8>> {
        let mut port = self.port.lock().map_err(|_| TransportError::Mutex)?;
        if port.read_timeout != Some(timeout) {
            port.uart
                .set_read_mode(0, timeout)
                .map_err(TransportError::Configure)?;
            port.read_timeout = Some(timeout);
        }
        let mut buf = vec![0u8; READ_CHUNK];
        let read = port.uart.read(&mut buf).map_err(TransportError::Read)?;
        buf.truncate(read);
        Ok(buf)
    }

    fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut port = self.port.lock().map_err(|_| TransportError::Mutex)?;
        let written = port.uart.write(bytes).map_err(TransportError::Write)?;
        if written == bytes.len() {
            Ok(())
        } else {
            Err(TransportError::ShortWrite {
                written,
                expected: bytes.len(),
            })
        }
    }
}
