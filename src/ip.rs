//! Version-agnostic IP values and closed ranges
//!
//! [`IpValue`] stores the raw big-endian bytes of an IPv4 (4 bytes) or IPv6
//! (16 bytes) address. Within one family values compare as unsigned
//! big-endian integers. Across families every IPv4 value sorts before every
//! IPv6 value, which gives the range index and the decorator sweep a single
//! total order covering both families.
//!
//! ```rust
//! use georange::ip::{IpRange, IpValue};
//!
//! let start: IpValue = "10.0.0.0".parse()?;
//! let end: IpValue = "10.0.0.255".parse()?;
//! let range = IpRange::new(start, end)?;
//!
//! assert!(range.contains(&"10.0.0.42".parse()?));
//! assert_eq!(end.successor(), Some("10.0.1.0".parse()?));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Address family of an [`IpValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    /// 4-byte addresses
    V4,
    /// 16-byte addresses
    V6,
}

impl IpFamily {
    /// Number of raw bytes for this family
    pub const fn byte_len(self) -> usize {
        match self {
            IpFamily::V4 => 4,
            IpFamily::V6 => 16,
        }
    }
}

/// An IPv4 or IPv6 address held as raw big-endian bytes
///
/// Variant order matters: the derived `Ord` places all `V4` values before
/// all `V6` values and compares same-family values bytewise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpValue {
    /// IPv4 address bytes
    V4([u8; 4]),
    /// IPv6 address bytes
    V6([u8; 16]),
}

impl IpValue {
    /// Build a value from a 4 or 16 byte slice
    ///
    /// Returns `None` for any other length.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            4 => bytes.try_into().ok().map(IpValue::V4),
            16 => bytes.try_into().ok().map(IpValue::V6),
            _ => None,
        }
    }

    /// IPv4 value from its integer form
    pub const fn from_u32(value: u32) -> Self {
        IpValue::V4(value.to_be_bytes())
    }

    /// IPv6 value from its integer form
    pub const fn from_u128(value: u128) -> Self {
        IpValue::V6(value.to_be_bytes())
    }

    /// Raw big-endian bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            IpValue::V4(b) => b,
            IpValue::V6(b) => b,
        }
    }

    /// Address family
    pub const fn family(&self) -> IpFamily {
        match self {
            IpValue::V4(_) => IpFamily::V4,
            IpValue::V6(_) => IpFamily::V6,
        }
    }

    /// Integer value, widened to 128 bits for IPv4
    pub fn to_u128(&self) -> u128 {
        match self {
            IpValue::V4(b) => u32::from_be_bytes(*b) as u128,
            IpValue::V6(b) => u128::from_be_bytes(*b),
        }
    }

    /// Next address in the same family, `None` at the family maximum
    pub fn successor(&self) -> Option<Self> {
        match self {
            IpValue::V4(b) => u32::from_be_bytes(*b).checked_add(1).map(Self::from_u32),
            IpValue::V6(b) => u128::from_be_bytes(*b).checked_add(1).map(Self::from_u128),
        }
    }

    /// Previous address in the same family, `None` at the family minimum
    pub fn predecessor(&self) -> Option<Self> {
        match self {
            IpValue::V4(b) => u32::from_be_bytes(*b).checked_sub(1).map(Self::from_u32),
            IpValue::V6(b) => u128::from_be_bytes(*b).checked_sub(1).map(Self::from_u128),
        }
    }

    /// Convert to a standard library address
    pub fn to_ip_addr(&self) -> IpAddr {
        match self {
            IpValue::V4(b) => IpAddr::V4(Ipv4Addr::from(*b)),
            IpValue::V6(b) => IpAddr::V6(Ipv6Addr::from(*b)),
        }
    }
}

impl From<IpAddr> for IpValue {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl From<Ipv4Addr> for IpValue {
    fn from(addr: Ipv4Addr) -> Self {
        IpValue::V4(addr.octets())
    }
}

impl From<Ipv6Addr> for IpValue {
    fn from(addr: Ipv6Addr) -> Self {
        IpValue::V6(addr.octets())
    }
}

impl From<IpValue> for IpAddr {
    fn from(value: IpValue) -> Self {
        value.to_ip_addr()
    }
}

impl FromStr for IpValue {
    type Err = AddrParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<IpAddr>().map(IpValue::from)
    }
}

impl fmt::Display for IpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.to_ip_addr().fmt(f)
    }
}

impl Serialize for IpValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// A closed interval `[start, end]` of same-family addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    /// First covered address
    pub start: IpValue,
    /// Last covered address
    pub end: IpValue,
}

impl IpRange {
    /// Create a range, rejecting reversed bounds and mixed families
    pub fn new(start: IpValue, end: IpValue) -> Result<Self> {
        if start.family() != end.family() || start > end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Whether `ip` lies inside the range
    pub fn contains(&self, ip: &IpValue) -> bool {
        self.start <= *ip && *ip <= self.end
    }

    /// Address family of both bounds
    pub fn family(&self) -> IpFamily {
        self.start.family()
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}
