//! Byte transports and how sessions obtain them.
//!
//! The protocol core never talks to a serial driver directly. It reads and
//! writes through a [`Transport`], and asks a [`PortOpener`] to produce one
//! when connecting or reconnecting.
//!
//! ```text
//! +------------------+
//! |     Session      |
//! +--------+---------+
//!          |  PortOpener::open(name, baud)
//!          v
//! +--------+---------+
//! | Transport trait  |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use devlink::port::Transport;
//!
//! fn drain(transport: &mut dyn Transport) -> devlink::Result<Vec<u8>> {
//!     let mut buf = [0u8; 256];
//!     let n = transport.read_available(&mut buf)?;
//!     Ok(buf[..n].to_vec())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

/// Default read timeout for native ports.
///
/// Kept short: a read that times out is reported as "no data yet".
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: DEFAULT_READ_TIMEOUT,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    /// USB product ID (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    /// Product string (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Serial number (if available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

impl PortInfo {
    /// Whether this is a USB device.
    pub fn is_usb(&self) -> bool {
        self.vid.is_some()
    }

    /// One-line human-readable description.
    pub fn describe(&self) -> String {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => {
                let product = self
                    .product
                    .as_deref()
                    .or(self.manufacturer.as_deref())
                    .unwrap_or("USB serial");
                format!("{} ({product}, {vid:04x}:{pid:04x})", self.name)
            },
            _ => self.name.clone(),
        }
    }
}

/// Byte-in/byte-out channel to the device.
///
/// Implementations must not preserve or rely on message boundaries: a read
/// may return part of a frame, several frames, or nothing.
pub trait Transport: Send {
    /// Read whatever bytes are available into `buf`.
    ///
    /// Returns `Ok(0)` when no bytes are currently available; this is not an
    /// end-of-stream signal. Errors mean the link is gone.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes, returning once the medium has accepted them.
    fn write_all_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying resource.
    ///
    /// After calling this method, the transport cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;
}

/// Produces transports for a session.
pub trait PortOpener {
    /// Open `port_name` at `baud_rate`.
    fn open(&mut self, port_name: &str, baud_rate: u32) -> Result<Box<dyn Transport>>;

    /// Choose a port to connect to, prompting the user if necessary.
    fn select_port(&mut self) -> Result<String>;
}

/// Trait for listing available serial ports.
///
/// This is separated from [`Transport`] because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;

    /// Find ports matching the given VID/PID.
    fn find_by_vid_pid(vid: u16, pid: u16) -> Result<Vec<PortInfo>> {
        let ports = Self::list_ports()?;
        Ok(ports
            .into_iter()
            .filter(|p| p.vid == Some(vid) && p.pid == Some(pid))
            .collect())
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator, NativePortOpener};
