//! Geolocation payload attached to every stored range

use crate::ip::{IpRange, IpValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Three-valued flag: not evaluated, evaluated true, evaluated false
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    /// The flag was never evaluated for this range
    #[default]
    Unknown,
    /// Evaluated and set
    True,
    /// Evaluated and not set
    False,
}

impl TriState {
    /// `Some(bool)` once evaluated, `None` while unknown
    pub fn as_bool(self) -> Option<bool> {
        match self {
            TriState::Unknown => None,
            TriState::True => Some(true),
            TriState::False => Some(false),
        }
    }

    /// Wire tag used by the payload codec
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            TriState::Unknown => 0,
            TriState::True => 1,
            TriState::False => 2,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(TriState::Unknown),
            1 => Some(TriState::True),
            2 => Some(TriState::False),
            _ => None,
        }
    }
}

impl From<bool> for TriState {
    fn from(value: bool) -> Self {
        if value {
            TriState::True
        } else {
            TriState::False
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriState::Unknown => "unknown",
            TriState::True => "true",
            TriState::False => "false",
        };
        f.write_str(s)
    }
}

/// Immutable location record for one range
///
/// The `[start, end]` bounds are denormalized onto the payload so a lookup
/// result reports the exact sub-range that matched, which differs from the
/// source range once decoration has split it.
///
/// ```rust
/// use georange::info::{InformationPayload, TriState};
/// use georange::ip::IpRange;
///
/// let range = IpRange::new("1.0.0.0".parse()?, "1.0.0.255".parse()?)?;
/// let info = InformationPayload::new(range)
///     .with_country_code("AU")
///     .with_city("Brisbane");
///
/// assert_eq!(info.country_code(), Some("AU"));
/// assert_eq!(info.vpn(), TriState::Unknown);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationPayload {
    range: IpRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    country_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geoname_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    most_specific_subdivision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    least_specific_subdivision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    original_line: Option<String>,
    #[serde(default)]
    vpn: TriState,
}

impl InformationPayload {
    /// Empty payload describing `range`
    pub fn new(range: IpRange) -> Self {
        Self {
            range,
            country_code: None,
            geoname_id: None,
            city: None,
            most_specific_subdivision: None,
            least_specific_subdivision: None,
            postal_code: None,
            original_line: None,
            vpn: TriState::Unknown,
        }
    }

    /// Set the ISO 3166-1 alpha-2 country code
    pub fn with_country_code(mut self, code: impl Into<String>) -> Self {
        self.country_code = Some(code.into());
        self
    }

    /// Set the geoname identifier
    pub fn with_geoname_id(mut self, id: u32) -> Self {
        self.geoname_id = Some(id);
        self
    }

    /// Set the city name
    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = Some(city.into());
        self
    }

    /// Set the most specific administrative division
    pub fn with_most_specific_subdivision(mut self, name: impl Into<String>) -> Self {
        self.most_specific_subdivision = Some(name.into());
        self
    }

    /// Set the least specific administrative division
    pub fn with_least_specific_subdivision(mut self, name: impl Into<String>) -> Self {
        self.least_specific_subdivision = Some(name.into());
        self
    }

    /// Set the postal code
    pub fn with_postal_code(mut self, code: impl Into<String>) -> Self {
        self.postal_code = Some(code.into());
        self
    }

    /// Keep the raw source text alongside the parsed fields
    pub fn with_original_line(mut self, line: impl Into<String>) -> Self {
        self.original_line = Some(line.into());
        self
    }

    /// Set the VPN / anonymizer flag
    pub fn with_vpn(mut self, vpn: TriState) -> Self {
        self.vpn = vpn;
        self
    }

    /// Rebind the payload to a (sub-)range
    pub fn with_range(mut self, start: IpValue, end: IpValue) -> Self {
        self.range = IpRange { start, end };
        self
    }

    /// Range this payload describes
    pub fn range(&self) -> IpRange {
        self.range
    }

    /// ISO country code
    pub fn country_code(&self) -> Option<&str> {
        self.country_code.as_deref()
    }

    /// Geoname identifier
    pub fn geoname_id(&self) -> Option<u32> {
        self.geoname_id
    }

    /// City name
    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    /// Most specific administrative division
    pub fn most_specific_subdivision(&self) -> Option<&str> {
        self.most_specific_subdivision.as_deref()
    }

    /// Least specific administrative division
    pub fn least_specific_subdivision(&self) -> Option<&str> {
        self.least_specific_subdivision.as_deref()
    }

    /// Postal code
    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code.as_deref()
    }

    /// Raw source line, only present when retention was requested
    pub fn original_line(&self) -> Option<&str> {
        self.original_line.as_deref()
    }

    /// VPN / anonymizer status
    pub fn vpn(&self) -> TriState {
        self.vpn
    }
}
