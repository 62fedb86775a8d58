//! Serial port transport implementation

use super::{LineEvent, LineSettings, Parity, Transport, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serialport::{ClearBuffer, DataBits, FlowControl, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::{Duration, Instant};

/// Bounded acquisition timeout when claiming a port that another process
/// still holds.
pub const OPEN_TIMEOUT_MS: u64 = 5_000;

const OPEN_RETRY_DELAY: Duration = Duration::from_millis(100);
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Last observed modem line levels, kept to report edges as [`LineEvent`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModemSnapshot {
    cts: bool,
    dsr: bool,
    cd: bool,
    ri: bool,
}

/// Transport over a physical or virtual serial port.
pub struct SerialTransport {
    name: String,
    port: Mutex<Option<Box<dyn SerialPort>>>,
    lines: Mutex<Option<ModemSnapshot>>,
}

impl SerialTransport {
    /// Open and claim `name`, apply `settings` and disable hardware flow
    /// control. A busy port is retried until [`OPEN_TIMEOUT_MS`] elapses.
    pub async fn open(name: &str, settings: &LineSettings) -> Result<Self, TransportError> {
        let deadline = Instant::now() + Duration::from_millis(OPEN_TIMEOUT_MS);
        let port = loop {
            match Self::try_open(name, settings) {
                Ok(port) => break port,
                Err(TransportError::PortBusy(_)) if Instant::now() < deadline => {
                    tokio::time::sleep(OPEN_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            port = name,
            baud = settings.baud_rate,
            data_bits = settings.data_bits,
            stop_bits = settings.stop_bits,
            parity = %settings.parity,
            "serial port opened"
        );

        Ok(Self {
            name: name.to_string(),
            port: Mutex::new(Some(port)),
            lines: Mutex::new(None),
        })
    }

    fn try_open(
        name: &str,
        settings: &LineSettings,
    ) -> Result<Box<dyn SerialPort>, TransportError> {
        serialport::new(name, settings.baud_rate)
            .data_bits(data_bits_of(settings.data_bits)?)
            .stop_bits(stop_bits_of(settings.stop_bits)?)
            .parity(parity_of(settings.parity))
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| map_open_error(name, &e))
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn reconfigure(&self, settings: &LineSettings) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;

        port.set_baud_rate(settings.baud_rate)
            .map_err(map_settings_error)?;
        port.set_data_bits(data_bits_of(settings.data_bits)?)
            .map_err(map_settings_error)?;
        port.set_stop_bits(stop_bits_of(settings.stop_bits)?)
            .map_err(map_settings_error)?;
        port.set_parity(parity_of(settings.parity))
            .map_err(map_settings_error)?;
        Ok(())
    }

    fn bytes_to_read(&self) -> Result<u32, TransportError> {
        let guard = self.port.lock();
        let port = guard.as_ref().ok_or(TransportError::NotOpen)?;
        port.bytes_to_read()
            .map_err(|e| TransportError::Device(e.to_string()))
    }

    fn read_byte(&self) -> Result<u8, TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        let mut buf = [0u8; 1];
        port.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    async fn write_all(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.port.lock();
        let port = guard.as_mut().ok_or(TransportError::NotOpen)?;
        port.write_all(data)?;
        port.flush()?;
        Ok(())
    }

    // The serialport API exposes modem lines only; break and error
    // conditions surface as read failures, so the remaining LineEvent
    // variants come from other Transport implementations.
    fn poll_line_events(&self) -> Vec<LineEvent> {
        let mut guard = self.port.lock();
        let Some(port) = guard.as_mut() else {
            return Vec::new();
        };
        let current = ModemSnapshot {
            cts: port.read_clear_to_send().unwrap_or(false),
            dsr: port.read_data_set_ready().unwrap_or(false),
            cd: port.read_carrier_detect().unwrap_or(false),
            ri: port.read_ring_indicator().unwrap_or(false),
        };
        drop(guard);

        let mut last = self.lines.lock();
        let mut events = Vec::new();
        if let Some(prev) = *last {
            if prev.cts != current.cts {
                events.push(LineEvent::ClearToSend);
            }
            if prev.dsr != current.dsr {
                events.push(LineEvent::DataSetReady);
            }
            if prev.cd != current.cd {
                events.push(LineEvent::CarrierDetect);
            }
            if prev.ri != current.ri {
                events.push(LineEvent::RingIndicator);
            }
        }
        *last = Some(current);
        events
    }

    fn close(&self) {
        let taken = self.port.lock().take();
        if let Some(mut port) = taken {
            // Output side, input side, handle, in that order.
            if let Err(e) = port.flush() {
                tracing::warn!(port = %self.name, error = %e, "flush on close failed");
            }
            if let Err(e) = port.clear(ClearBuffer::Input) {
                tracing::warn!(port = %self.name, error = %e, "input clear on close failed");
            }
            drop(port);
            tracing::info!(port = %self.name, "serial port closed");
        }
    }
}

/// List the names of serial ports visible on this machine.
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let ports =
        serialport::available_ports().map_err(|e| TransportError::Device(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

fn data_bits_of(bits: u8) -> Result<DataBits, TransportError> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(TransportError::InvalidSettings(format!(
            "data bits must be 5-8, got {other}"
        ))),
    }
}

fn stop_bits_of(bits: u8) -> Result<StopBits, TransportError> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        other => Err(TransportError::InvalidSettings(format!(
            "stop bits must be 1 or 2, got {other}"
        ))),
    }
}

fn parity_of(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn map_open_error(name: &str, e: &serialport::Error) -> TransportError {
    let text = e.to_string();
    let lowered = text.to_lowercase();
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(name.to_string()),
        serialport::ErrorKind::InvalidInput => TransportError::InvalidSettings(text),
        serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            TransportError::PermissionDenied(name.to_string())
        }
        _ if lowered.contains("busy") || lowered.contains("in use") => {
            TransportError::PortBusy(name.to_string())
        }
        _ => TransportError::Device(text),
    }
}

fn map_settings_error(e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::InvalidInput => TransportError::InvalidSettings(e.to_string()),
        _ => TransportError::Device(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_message_maps_to_port_busy() {
        let err = serialport::Error::new(
            serialport::ErrorKind::Io(std::io::ErrorKind::Other),
            "Device or resource busy",
        );
        assert!(matches!(
            map_open_error("/dev/ttyUSB0", &err),
            TransportError::PortBusy(_)
        ));
    }

    #[test]
    fn test_no_device_maps_to_not_found() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "no such device");
        assert!(matches!(
            map_open_error("COM9", &err),
            TransportError::PortNotFound(_)
        ));
    }

    #[test]
    fn test_data_bits_mapping_rejects_out_of_range() {
        assert!(data_bits_of(8).is_ok());
        assert!(matches!(
            data_bits_of(9),
            Err(TransportError::InvalidSettings(_))
        ));
    }

    #[test]
    fn test_stop_bits_mapping_rejects_out_of_range() {
        assert!(stop_bits_of(2).is_ok());
        assert!(stop_bits_of(0).is_err());
    }
}
