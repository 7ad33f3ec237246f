use std::time::Duration;

use serde::Deserialize;
use ecrlink_core::error::{EcrError, Result};
use ecrlink_core::protocol::envelope::EnvelopeHeader;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SdkConfig {
    pub version: u32,

    pub app_id: String,

    #[serde(default)]
    pub device: DeviceSection,

    #[serde(default)]
    pub serial: SerialSection,

    #[serde(default)]
    pub socket: SocketSection,

    #[serde(default)]
    pub cache: CacheSection,

    /// Interval between correlation cache checks while waiting for a reply.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl SdkConfig {
    /// Defaults for every section; `app_id` is the only required value.
    pub fn new(app_id: impl Into<String>) -> Self {
        Self {
            version: 1,
            app_id: app_id.into(),
            device: DeviceSection::default(),
            serial: SerialSection::default(),
            socket: SocketSection::default(),
            cache: CacheSection::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(EcrError::UnsupportedVersion);
        }
        if self.app_id.trim().is_empty() {
            return Err(EcrError::Config("app_id must not be empty".into()));
        }
        if !(1..=500).contains(&self.poll_interval_ms) {
            return Err(EcrError::Config(
                "poll_interval_ms must be between 1 and 500".into(),
            ));
        }

        self.serial.validate()?;
        self.socket.validate()?;
        self.cache.validate()?;

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Sender identity stamped on every request.
    pub fn envelope_header(&self) -> EnvelopeHeader {
        EnvelopeHeader {
            app_id: self.app_id.clone(),
            mac_address: self.device.mac_address.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceSection {
    /// Sent as `deviceData.macAddress` on every request.
    #[serde(default)]
    pub mac_address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutMode {
    /// Physical reads block up to `write_timeout_ms` waiting for bytes.
    Blocking,
    /// Physical reads return immediately; the reader backs off briefly.
    NonBlocking,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SerialSection {
    /// Exact port name, or a case-insensitive keyword matched against the
    /// enumerated ports' names and USB product strings.
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_data_bits")]
    pub data_bits: u8,

    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,

    #[serde(default = "default_parity")]
    pub parity: Parity,

    #[serde(default = "default_timeout_mode")]
    pub timeout_mode: TimeoutMode,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Default wait for a correlated reply.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_serial_write_timeout_ms")]
    pub write_timeout_ms: u64,

    #[serde(default = "default_handshake_interval_ms")]
    pub handshake_interval_ms: u64,

    /// 0 disables the heartbeat.
    #[serde(default)]
    pub heartbeat_interval_ms: u64,
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
            timeout_mode: default_timeout_mode(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_serial_write_timeout_ms(),
            handshake_interval_ms: default_handshake_interval_ms(),
            heartbeat_interval_ms: 0,
        }
    }
}

impl SerialSection {
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(EcrError::Config("serial.baud_rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(EcrError::Config("serial.data_bits must be between 5 and 8".into()));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(EcrError::Config("serial.stop_bits must be 1 or 2".into()));
        }
        if !(100..=120_000).contains(&self.connect_timeout_ms) {
            return Err(EcrError::Config(
                "serial.connect_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(100..=600_000).contains(&self.read_timeout_ms) {
            return Err(EcrError::Config(
                "serial.read_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.write_timeout_ms) {
            return Err(EcrError::Config(
                "serial.write_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        if !(10..=5_000).contains(&self.handshake_interval_ms) {
            return Err(EcrError::Config(
                "serial.handshake_interval_ms must be between 10 and 5000".into(),
            ));
        }
        if self.handshake_interval_ms >= self.connect_timeout_ms {
            return Err(EcrError::Config(
                "serial.handshake_interval_ms must be less than connect_timeout_ms".into(),
            ));
        }
        if self.heartbeat_interval_ms != 0 && self.heartbeat_interval_ms < 100 {
            return Err(EcrError::Config(
                "serial.heartbeat_interval_ms must be 0 or at least 100".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn handshake_interval(&self) -> Duration {
        Duration::from_millis(self.handshake_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_ms > 0).then(|| Duration::from_millis(self.heartbeat_interval_ms))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SocketSection {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Default wait for a correlated reply.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_socket_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// 0 binds an ephemeral port.
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Consumed by the discovery collaborator only.
    #[serde(default)]
    pub mdns_register: bool,

    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            write_timeout_ms: default_socket_write_timeout_ms(),
            server_port: default_server_port(),
            mdns_register: false,
            ping_interval_ms: default_ping_interval_ms(),
        }
    }
}

impl SocketSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=120_000).contains(&self.connect_timeout_ms) {
            return Err(EcrError::Config(
                "socket.connect_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(100..=600_000).contains(&self.read_timeout_ms) {
            return Err(EcrError::Config(
                "socket.read_timeout_ms must be between 100 and 600000".into(),
            ));
        }
        if !(1..=60_000).contains(&self.write_timeout_ms) {
            return Err(EcrError::Config(
                "socket.write_timeout_ms must be between 1 and 60000".into(),
            ));
        }
        if !(1_000..=120_000).contains(&self.ping_interval_ms) {
            return Err(EcrError::Config(
                "socket.ping_interval_ms must be between 1000 and 120000".into(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl CacheSection {
    pub fn validate(&self) -> Result<()> {
        if !(1..=1024).contains(&self.capacity) {
            return Err(EcrError::Config("cache.capacity must be between 1 and 1024".into()));
        }
        if !(1_000..=86_400_000).contains(&self.ttl_ms) {
            return Err(EcrError::Config(
                "cache.ttl_ms must be between 1000 and 86400000".into(),
            ));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    20
}
fn default_baud_rate() -> u32 {
    115_200
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_parity() -> Parity {
    Parity::None
}
fn default_timeout_mode() -> TimeoutMode {
    TimeoutMode::Blocking
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_read_timeout_ms() -> u64 {
    60_000
}
fn default_serial_write_timeout_ms() -> u64 {
    1_000
}
fn default_socket_write_timeout_ms() -> u64 {
    5_000
}
fn default_handshake_interval_ms() -> u64 {
    200
}
fn default_server_port() -> u16 {
    35_779
}
fn default_ping_interval_ms() -> u64 {
    20_000
}
fn default_cache_capacity() -> usize {
    25
}
fn default_cache_ttl_ms() -> u64 {
    600_000
}
