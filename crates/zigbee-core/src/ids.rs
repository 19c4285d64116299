use std::fmt;
use std::str::FromStr;

/// 64-bit IEEE extended unique identifier — the stable Zigbee device address.
///
/// The `uuid` used throughout the device service is the lowercase hex form
/// of this value with no separators; `Eui64` keeps both representations in
/// sync so the bijection required by the data model holds by construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Eui64(pub u64);

impl Eui64 {
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Eui64(u64::from_be_bytes(bytes))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Lowercase hex string with no separators, e.g. `000d6f000abcdef1`.
    pub fn to_uuid_string(self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn parse_uuid_string(s: &str) -> Result<Self, ParseEui64Error> {
        if s.len() != 16 {
            return Err(ParseEui64Error::BadLength(s.len()));
        }
        u64::from_str_radix(s, 16)
            .map(Eui64)
            .map_err(|_| ParseEui64Error::NotHex)
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", self.to_uuid_string())
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid_string())
    }
}

impl FromStr for Eui64 {
    type Err = ParseEui64Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Eui64::parse_uuid_string(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseEui64Error {
    #[error("eui64 string must be exactly 16 hex characters, got {0}")]
    BadLength(usize),
    #[error("eui64 string is not valid hex")]
    NotHex,
}

/// 8-bit Zigbee endpoint number. Stored as a decimal string on the wire
/// (mirrored into device metadata key `zigbee_epid`), but kept here as an
/// integer so arithmetic and comparisons don't round-trip through strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u8);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EndpointId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u8>().map(EndpointId)
    }
}

/// 16-bit ZCL cluster identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClusterId(pub u16);

impl ClusterId {
    pub const BASIC: ClusterId = ClusterId(0x0000);
    pub const POWER_CONFIGURATION: ClusterId = ClusterId(0x0001);
    pub const ON_OFF: ClusterId = ClusterId(0x0006);
    pub const COLOR_CONTROL: ClusterId = ClusterId(0x0300);
    pub const POLL_CONTROL: ClusterId = ClusterId(0x0020);
    pub const DIAGNOSTICS: ClusterId = ClusterId(0x0b05);
    pub const OTA_UPGRADE: ClusterId = ClusterId(0x0019);
    pub const TEMPERATURE_MEASUREMENT: ClusterId = ClusterId(0x0402);
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04x}", self.0)
    }
}
