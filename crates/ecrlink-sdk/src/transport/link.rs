//! Physical serial link: port selection and the read/write halves handed to
//! the engine's reader and writer threads.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, SerialPort, SerialPortType, StopBits};

use ecrlink_core::error::{EcrError, Result};

use crate::config::{Parity, SerialSection, TimeoutMode};

/// Longest a blocking physical read waits before the reader re-checks for shutdown.
const READ_SLICE: Duration = Duration::from_millis(50);

/// Independent read and write handles onto one serial connection.
pub struct SerialLink {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
    /// Back-off applied by the reader when a read returns no data.
    pub idle_backoff: Option<Duration>,
}

impl SerialLink {
    /// Wrap arbitrary halves, e.g. a pty or an in-memory pipe.
    pub fn new(reader: Box<dyn Read + Send>, writer: Box<dyn Write + Send>) -> Self {
        Self {
            reader,
            writer,
            idle_backoff: None,
        }
    }

    /// Resolve and open the configured port.
    pub fn open(cfg: &SerialSection) -> Result<Self> {
        let name = resolve_port(&cfg.port)?;

        let mut writer = serialport::new(&name, cfg.baud_rate)
            .data_bits(data_bits(cfg.data_bits)?)
            .stop_bits(if cfg.stop_bits == 2 { StopBits::Two } else { StopBits::One })
            .parity(match cfg.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .flow_control(FlowControl::None)
            .timeout(cfg.write_timeout())
            .open()
            .map_err(|e| EcrError::Connection(format!("open serial port {name} failed: {e}")))?;

        let _ = writer.write_data_terminal_ready(true);

        let mut reader = writer
            .try_clone()
            .map_err(|e| EcrError::Connection(format!("clone serial port {name} failed: {e}")))?;

        let (read_timeout, idle_backoff) = match cfg.timeout_mode {
            TimeoutMode::Blocking => (READ_SLICE.min(cfg.write_timeout()), None),
            TimeoutMode::NonBlocking => (Duration::ZERO, Some(Duration::from_millis(5))),
        };
        reader
            .set_timeout(read_timeout)
            .map_err(|e| EcrError::Connection(format!("configure serial port {name} failed: {e}")))?;

        tracing::info!(port = %name, baud = cfg.baud_rate, "serial port opened");

        Ok(Self {
            reader: Box::new(PortHalf(reader)),
            writer: Box::new(PortHalf(writer)),
            idle_backoff,
        })
    }
}

struct PortHalf(Box<dyn SerialPort>);

impl Read for PortHalf {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for PortHalf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

fn data_bits(bits: u8) -> Result<DataBits> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        other => Err(EcrError::Config(format!("unsupported data bits: {other}"))),
    }
}

fn resolve_port(keyword: &str) -> Result<String> {
    let ports = serialport::available_ports()
        .map_err(|e| EcrError::Connection(format!("enumerate serial ports failed: {e}")))?;

    let candidates = ports.iter().map(|p| {
        let product = match &p.port_type {
            SerialPortType::UsbPort(usb) => usb.product.as_deref(),
            _ => None,
        };
        (p.port_name.as_str(), product)
    });

    if let Some(name) = select_port(keyword, candidates) {
        return Ok(name);
    }
    // Ports that do not enumerate (e.g. ptys) can still be opened by path.
    if keyword.starts_with('/') || keyword.to_ascii_uppercase().starts_with("COM") {
        return Ok(keyword.to_string());
    }
    Err(EcrError::Connection(format!(
        "no serial port matches '{keyword}'"
    )))
}

/// Pick a port by exact name, then by case-insensitive keyword in the name or
/// USB product string. An empty keyword takes the first port.
pub fn select_port<'a>(
    keyword: &str,
    candidates: impl IntoIterator<Item = (&'a str, Option<&'a str>)>,
) -> Option<String> {
    let candidates: Vec<_> = candidates.into_iter().collect();
    if keyword.is_empty() {
        return candidates.first().map(|(name, _)| name.to_string());
    }
    if let Some((name, _)) = candidates.iter().find(|(name, _)| *name == keyword) {
        return Some(name.to_string());
    }

    let needle = keyword.to_lowercase();
    candidates
        .iter()
        .find(|(name, product)| {
            name.to_lowercase().contains(&needle)
                || product.is_some_and(|p| p.to_lowercase().contains(&needle))
        })
        .map(|(name, _)| name.to_string())
}
