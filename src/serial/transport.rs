//! OS-facing side of the serial link.
//!
//! `PortProvider` enumerates and opens ports, `PortIo` is one open handle.
//! The production implementation wraps `serialport` and runs every blocking
//! call on tokio's blocking pool.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serialport::{ClearBuffer, DataBits, SerialPort};

use super::{LinkSettings, Parity, Result, SerialError, StopBits};

/// Byte-level access to one open port.
#[async_trait]
pub trait PortIo: Send {
    /// Write the whole buffer and flush it to the driver.
    async fn send_data(&mut self, data: &[u8]) -> Result<usize>;

    /// Return whatever is buffered, up to `max` bytes. Empty when nothing is pending.
    async fn read_data(&mut self, max: usize) -> Result<Vec<u8>>;

    /// Drop unread input held by the driver.
    async fn discard_input(&mut self) -> Result<()>;
}

/// Enumerates and opens serial ports.
pub trait PortProvider: Send + Sync {
    fn available_ports(&self) -> Result<Vec<String>>;

    fn open(&self, settings: &LinkSettings) -> Result<Box<dyn PortIo>>;
}

/// Ports as the operating system reports them.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortProvider for SystemPorts {
    fn available_ports(&self) -> Result<Vec<String>> {
        let ports = serialport::available_ports()?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    fn open(&self, settings: &LinkSettings) -> Result<Box<dyn PortIo>> {
        let data_bits = match settings.byte_size {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            other => {
                return Err(SerialError::DeviceError(format!(
                    "unsupported byte size {}",
                    other
                )))
            }
        };
        let parity = match settings.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Mark | Parity::Space => {
                return Err(SerialError::DeviceError(format!(
                    "parity {} is not supported by this platform driver",
                    settings.parity.code()
                )))
            }
        };
        let stop_bits = match settings.stop_bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
            StopBits::OnePointFive => {
                return Err(SerialError::DeviceError(
                    "1.5 stop bits are not supported by this platform driver".to_string(),
                ))
            }
        };

        let port = serialport::new(settings.port_name.as_str(), settings.baud_rate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| SerialError::DeviceError(e.to_string()))?;

        log::info!(
            "Opened {} at {} baud ({}{}{})",
            settings.port_name,
            settings.baud_rate,
            settings.byte_size,
            settings.parity.code(),
            settings.stop_bits.as_f64()
        );

        Ok(Box::new(NativePort {
            port: Arc::new(Mutex::new(port)),
        }))
    }
}

struct NativePort {
    port: Arc<Mutex<Box<dyn SerialPort>>>,
}

impl NativePort {
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Box<dyn SerialPort>) -> Result<T> + Send + 'static,
    {
        let port = Arc::clone(&self.port);
        tokio::task::spawn_blocking(move || {
            let mut guard = port
                .lock()
                .map_err(|_| SerialError::DeviceError("port handle poisoned".to_string()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| SerialError::DeviceError(format!("blocking task failed: {}", e)))?
    }
}

#[async_trait]
impl PortIo for NativePort {
    async fn send_data(&mut self, data: &[u8]) -> Result<usize> {
        let payload = data.to_vec();
        self.blocking(move |port| {
            port.write_all(&payload)?;
            port.flush()?;
            Ok(payload.len())
        })
        .await
    }

    async fn read_data(&mut self, max: usize) -> Result<Vec<u8>> {
        self.blocking(move |port| {
            let pending = port.bytes_to_read()? as usize;
            if pending == 0 {
                return Ok(Vec::new());
            }
            let mut buffer = vec![0u8; pending.min(max)];
            match port.read(&mut buffer) {
                Ok(n) => {
                    buffer.truncate(n);
                    Ok(buffer)
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Vec::new()),
                Err(e) => Err(SerialError::IoError(e)),
            }
        })
        .await
    }

    async fn discard_input(&mut self) -> Result<()> {
        self.blocking(|port| {
            port.clear(ClearBuffer::Input)?;
            Ok(())
        })
        .await
    }
}
