//! Device configuration.
//!
//! Device rows arrive from the laboratory database as loosely shaped text:
//! the same two columns (`comm_port`, `settings`) describe either a serial
//! line (`COM3` + `9600,N,8,1`) or a TCP listener (`5100` + `10.0.0.5`).
//! [`DeviceConfig::from_record`] is the single place where that shape is
//! interpreted; everything downstream works with [`TransportConfig`].
//!
//! # Examples
//!
//! ```
//! use labgate_core::{DeviceConfig, DeviceRecord, TransportConfig};
//!
//! let record = DeviceRecord::new("Sysmex", "COM3", "9600,N,8,1");
//! let config = DeviceConfig::from_record(&record).unwrap();
//!
//! match config.transport {
//!     TransportConfig::Serial(serial) => {
//!         assert_eq!(serial.port, "COM3");
//!         assert_eq!(serial.baud_rate, 9600);
//!     }
//!     TransportConfig::Tcp(_) => unreachable!(),
//! }
//! ```

use crate::{
    Protocol, Result,
    constants::DEFAULT_BIND_ADDRESS,
    error::Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw device row as stored in the machine registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Display name, unique within the registry.
    pub machine_name: String,

    /// Serial port name (`COM3`, `/dev/ttyUSB0`) or TCP port number.
    pub comm_port: String,

    /// Serial line settings (`9600,N,8,1`) or TCP bind address.
    pub settings: String,

    /// Identifier used for parameter mappings and stored results.
    pub machine_id: Option<String>,

    /// Optional protocol hint (`ASTM`, `HL7`).
    pub protocol: Option<String>,

    /// Zero-based field index of the analyte code in result records.
    pub result_code_field: Option<i64>,

    /// Reject frames whose checksum does not match.
    pub verify_checksum: Option<bool>,
}

impl DeviceRecord {
    /// Create a record with the three mandatory columns.
    pub fn new(
        machine_name: impl Into<String>,
        comm_port: impl Into<String>,
        settings: impl Into<String>,
    ) -> Self {
        Self {
            machine_name: machine_name.into(),
            comm_port: comm_port.into(),
            settings: settings.into(),
            ..Default::default()
        }
    }

    /// Set the machine id.
    pub fn machine_id(mut self, machine_id: impl Into<String>) -> Self {
        self.machine_id = Some(machine_id.into());
        self
    }

    /// Set the protocol hint.
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Machine id, falling back to the machine name.
    pub fn effective_id(&self) -> String {
        self.machine_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.machine_name.trim())
            .to_string()
    }
}

/// Transport family of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    Serial,
    Tcp,
}

impl TransportKind {
    /// Infer the transport from the shape of the registry columns.
    ///
    /// A comma-delimited settings string, a `COM` port name or a `/dev/`
    /// path means serial; anything else is a TCP listener.
    pub fn resolve(comm_port: &str, settings: &str) -> Self {
        let comm = comm_port.trim().to_uppercase();
        if settings.trim().contains(',') || comm.starts_with("COM") || comm.starts_with("/DEV/") {
            TransportKind::Serial
        } else {
            TransportKind::Tcp
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportKind::Serial => write!(f, "Serial"),
            TransportKind::Tcp => write!(f, "TCP/IP"),
        }
    }
}

/// Serial parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerialParity {
    None,
    Even,
    Odd,
}

/// Serial line parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialSettings {
    pub port: String,
    pub baud_rate: u32,
    pub parity: SerialParity,
    pub data_bits: u8,
    pub stop_bits: u8,
}

impl SerialSettings {
    /// Parse `baud,parity,data_bits,stop_bits` (e.g. `9600,N,8,1`).
    ///
    /// # Errors
    /// Returns `Error::Config` when a component is missing or out of range.
    pub fn parse(port: &str, settings: &str) -> Result<Self> {
        let port = format_serial_port(port);
        if port.is_empty() {
            return Err(Error::Config("Serial port not configured".to_string()));
        }

        let parts: Vec<&str> = settings.split(',').map(str::trim).collect();
        let [baud, parity, data_bits, stop_bits] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "Serial settings not configured (expected '9600,N,8,1'), got '{settings}'"
            )));
        };

        let baud_rate = baud
            .parse::<u32>()
            .map_err(|_| Error::Config(format!("Invalid baud rate: {baud}")))?;

        let parity = match parity.to_uppercase().as_str() {
            "N" => SerialParity::None,
            "E" => SerialParity::Even,
            "O" => SerialParity::Odd,
            other => return Err(Error::Config(format!("Invalid parity: {other}"))),
        };

        let data_bits = match data_bits.parse::<u8>() {
            Ok(bits @ 5..=8) => bits,
            _ => return Err(Error::Config(format!("Invalid data bits: {data_bits}"))),
        };

        let stop_bits = match stop_bits.parse::<u8>() {
            Ok(bits @ 1..=2) => bits,
            _ => return Err(Error::Config(format!("Invalid stop bits: {stop_bits}"))),
        };

        Ok(Self {
            port,
            baud_rate,
            parity,
            data_bits,
            stop_bits,
        })
    }
}

/// TCP listener parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSettings {
    pub bind_address: String,
    pub port: u16,
}

impl TcpSettings {
    /// Parse a bind address and port column pair.
    ///
    /// # Errors
    /// Returns `Error::Config` if the port is not a valid number.
    pub fn parse(comm_port: &str, settings: &str) -> Result<Self> {
        let port = comm_port
            .trim()
            .parse::<u16>()
            .map_err(|_| Error::Config(format!("Invalid TCP port: '{comm_port}'")))?;

        let bind_address = match settings.trim() {
            "" => DEFAULT_BIND_ADDRESS.to_string(),
            address => address.to_string(),
        };

        Ok(Self { bind_address, port })
    }

    /// `address:port` string suitable for `TcpListener::bind`.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Transport of one device, with only the fields relevant to its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    Serial(SerialSettings),
    Tcp(TcpSettings),
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Serial(_) => TransportKind::Serial,
            TransportConfig::Tcp(_) => TransportKind::Tcp,
        }
    }
}

impl fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportConfig::Serial(s) => write!(
                f,
                "{} {},{:?},{},{}",
                s.port, s.baud_rate, s.parity, s.data_bits, s.stop_bits
            ),
            TransportConfig::Tcp(t) => write!(f, "{}", t.socket_addr()),
        }
    }
}

/// Which field of a segment-framed result record carries the analyte code.
///
/// Instrument families disagree: some put the code in the second field
/// (`R|WBC||5.6`), others in the third (`R|1|^^^WBC|5.6`). The value is
/// always the fourth field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultCodeField {
    Second,
    #[default]
    Third,
}

impl ResultCodeField {
    /// Zero-based field index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            ResultCodeField::Second => 1,
            ResultCodeField::Third => 2,
        }
    }

    /// Build from a zero-based field index.
    ///
    /// # Errors
    /// Returns `Error::Config` for indexes other than 1 and 2.
    pub fn from_index(index: i64) -> Result<Self> {
        match index {
            1 => Ok(ResultCodeField::Second),
            2 => Ok(ResultCodeField::Third),
            other => Err(Error::Config(format!(
                "Result code field must be 1 or 2, got {other}"
            ))),
        }
    }
}

/// What to do with an inbound frame whose checksum does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChecksumPolicy {
    /// Log the mismatch and accept the frame.
    #[default]
    Permissive,
    /// Answer with NAK and discard the frame.
    Strict,
}

/// Normalized, immutable configuration of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub machine_id: String,
    pub name: String,
    pub transport: TransportConfig,
    pub protocol_hint: Option<Protocol>,
    pub result_code_field: ResultCodeField,
    pub checksum_policy: ChecksumPolicy,
}

impl DeviceConfig {
    /// Normalize a registry row into a device configuration.
    ///
    /// # Errors
    /// Returns `Error::Config` if the name is empty or the transport
    /// columns cannot be interpreted.
    pub fn from_record(record: &DeviceRecord) -> Result<Self> {
        let name = record.machine_name.trim();
        if name.is_empty() {
            return Err(Error::MissingConfig("machine_name".to_string()));
        }

        let transport = match TransportKind::resolve(&record.comm_port, &record.settings) {
            TransportKind::Serial => TransportConfig::Serial(SerialSettings::parse(
                &record.comm_port,
                &record.settings,
            )?),
            TransportKind::Tcp => {
                TransportConfig::Tcp(TcpSettings::parse(&record.comm_port, &record.settings)?)
            }
        };

        let result_code_field = record
            .result_code_field
            .map(ResultCodeField::from_index)
            .transpose()?
            .unwrap_or_default();

        let checksum_policy = if record.verify_checksum.unwrap_or(false) {
            ChecksumPolicy::Strict
        } else {
            ChecksumPolicy::Permissive
        };

        Ok(Self {
            machine_id: record.effective_id(),
            name: name.to_string(),
            transport,
            protocol_hint: record.protocol.as_deref().and_then(Protocol::from_hint),
            result_code_field,
            checksum_policy,
        })
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.transport.kind()
    }
}

/// Simplified device entry for the operator UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayRecord {
    pub name: String,
    pub protocol: String,
    pub protocol_type: String,
    pub port_display: String,
}

impl DisplayRecord {
    /// Build the display entry. Never fails; malformed rows still show up.
    pub fn from_record(record: &DeviceRecord) -> Self {
        let comm = record.comm_port.trim();
        let settings = record.settings.trim();
        let kind = TransportKind::resolve(comm, settings);

        let (protocol, port_display) = match kind {
            TransportKind::Serial => {
                let port = format_serial_port(comm);
                let display = match (comm.is_empty(), settings.is_empty()) {
                    (false, false) => format!("COM: {port} - {settings}"),
                    (false, true) => format!("COM: {port}"),
                    _ => format!("Serial settings: {settings}"),
                };
                ("AUTO-Serial", display)
            }
            TransportKind::Tcp => {
                let display = match (comm.is_empty(), settings.is_empty()) {
                    (false, false) => format!("IP: {settings} Port: {comm}"),
                    (true, false) => format!("IP: {settings}"),
                    _ => format!("Port: {comm}"),
                };
                ("AUTO-TCP", display)
            }
        };

        Self {
            name: record.machine_name.trim().to_string(),
            protocol: protocol.to_string(),
            protocol_type: kind.to_string(),
            port_display,
        }
    }
}

/// Canonical serial port name: `com3` → `COM3`, `3` → `COM3`,
/// other names (`/dev/ttyUSB0`) unchanged.
pub fn format_serial_port(value: &str) -> String {
    let port = value.trim();
    if port.is_empty() {
        return String::new();
    }
    if port.to_uppercase().starts_with("COM") {
        return port.to_uppercase();
    }
    if port.chars().all(|c| c.is_ascii_digit()) {
        return format!("COM{port}");
    }
    port.to_string()
}
