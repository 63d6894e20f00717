//! Line parsers: raw text line → range record
//!
//! Parsing is format specific, so it sits behind the [`LineParser`] trait.
//! [`CsvRangeParser`] covers the CSV range exports of the built-in providers
//! and any other CSV export whose columns can be described by a
//! [`CsvLayout`].
//!
//! Range bounds may be written either as address text (`1.0.0.0`,
//! `2001:db8::`) or as unsigned decimal integers (`16777216`).

use crate::info::InformationPayload;
use crate::ip::{IpRange, IpValue};
use crate::provider::ProviderKey;
use crate::record::{RangeRecord, RawLine};
use serde::{Deserialize, Serialize};

/// A single line could not be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {reason}: {text:?}")]
pub struct ParseError {
    /// Line number of the offending line
    pub line: u64,
    /// Raw text of the offending line
    pub text: String,
    /// What was wrong with it
    pub reason: String,
}

impl ParseError {
    /// Error for `raw` with the given reason
    pub fn new(raw: &RawLine, reason: impl Into<String>) -> Self {
        Self {
            line: raw.number,
            text: raw.text.clone(),
            reason: reason.into(),
        }
    }
}

/// Turns one raw line into a range record
///
/// Implementations must be shareable across parse workers.
pub trait LineParser: Send + Sync {
    /// Parse `line`; keep the raw text on the payload when `retain_original_line` is set
    fn parse(&self, line: &RawLine, retain_original_line: bool) -> Result<RangeRecord, ParseError>;
}

impl<F> LineParser for F
where
    F: Fn(&RawLine, bool) -> Result<RangeRecord, ParseError> + Send + Sync,
{
    fn parse(&self, line: &RawLine, retain_original_line: bool) -> Result<RangeRecord, ParseError> {
        self(line, retain_original_line)
    }
}

/// How integer-valued range bounds map to an address family
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegerFamily {
    /// IPv4 when the upper bound fits in 32 bits, IPv6 otherwise
    #[default]
    Auto,
    /// Always IPv4
    V4,
    /// Always IPv6
    V6,
}

/// Column positions of a CSV range export (0-indexed)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvLayout {
    /// Field delimiter
    pub delimiter: u8,
    /// Range start column
    pub start: usize,
    /// Range end column
    pub end: usize,
    /// Family for integer bounds
    pub integer_family: IntegerFamily,
    /// Country code column
    pub country_code: Option<usize>,
    /// Geoname identifier column
    pub geoname_id: Option<usize>,
    /// City column
    pub city: Option<usize>,
    /// Most specific subdivision column
    pub most_specific_subdivision: Option<usize>,
    /// Least specific subdivision column
    pub least_specific_subdivision: Option<usize>,
    /// Postal code column
    pub postal_code: Option<usize>,
}

impl Default for CsvLayout {
    fn default() -> Self {
        Self::ip2location()
    }
}

impl CsvLayout {
    /// IP2Location DB11 style export:
    /// `ip_from,ip_to,country_code,country_name,region,city,lat,lon,zip,tz`
    pub fn ip2location() -> Self {
        Self {
            delimiter: b',',
            start: 0,
            end: 1,
            integer_family: IntegerFamily::Auto,
            country_code: Some(2),
            geoname_id: None,
            city: Some(5),
            most_specific_subdivision: Some(4),
            least_specific_subdivision: None,
            postal_code: Some(8),
        }
    }

    /// IP2Location LITE DB3 style export:
    /// `ip_from,ip_to,country_code,country_name,region,city`
    pub fn ip2location_lite() -> Self {
        Self {
            postal_code: None,
            ..Self::ip2location()
        }
    }

    /// Layout used for a built-in provider key
    pub fn for_provider(key: &ProviderKey) -> Option<Self> {
        if *key == ProviderKey::IP2LOCATION {
            Some(Self::ip2location())
        } else if *key == ProviderKey::IP2LOCATION_LITE {
            Some(Self::ip2location_lite())
        } else {
            None
        }
    }
}

/// Parses CSV range exports described by a [`CsvLayout`]
#[derive(Debug, Clone, Default)]
pub struct CsvRangeParser {
    layout: CsvLayout,
}

impl CsvRangeParser {
    /// Parser for the given layout
    pub fn new(layout: CsvLayout) -> Self {
        Self { layout }
    }

    /// Layout in use
    pub fn layout(&self) -> &CsvLayout {
        &self.layout
    }
}

impl LineParser for CsvRangeParser {
    fn parse(&self, line: &RawLine, retain_original_line: bool) -> Result<RangeRecord, ParseError> {
        let fields = split_fields(line, self.layout.delimiter)?;
        let layout = &self.layout;

        let start_text = required(&fields, layout.start, "start", line)?;
        let end_text = required(&fields, layout.end, "end", line)?;
        let (start, end) = parse_bounds(start_text, end_text, layout.integer_family)
            .map_err(|reason| ParseError::new(line, reason))?;
        let range = IpRange::new(start, end).map_err(|e| ParseError::new(line, e.to_string()))?;

        let mut info = InformationPayload::new(range);
        if let Some(code) = optional(&fields, layout.country_code) {
            info = info.with_country_code(code.to_ascii_uppercase());
        }
        if let Some(id) = optional(&fields, layout.geoname_id) {
            let id = id
                .parse::<u32>()
                .map_err(|_| ParseError::new(line, format!("invalid geoname id {:?}", id)))?;
            info = info.with_geoname_id(id);
        }
        if let Some(city) = optional(&fields, layout.city) {
            info = info.with_city(city);
        }
        if let Some(name) = optional(&fields, layout.most_specific_subdivision) {
            info = info.with_most_specific_subdivision(name);
        }
        if let Some(name) = optional(&fields, layout.least_specific_subdivision) {
            info = info.with_least_specific_subdivision(name);
        }
        if let Some(code) = optional(&fields, layout.postal_code) {
            info = info.with_postal_code(code);
        }
        if retain_original_line {
            info = info.with_original_line(line.text.as_str());
        }

        RangeRecord::new(start, end, info, line.clone()).map_err(|e| ParseError::new(line, e.to_string()))
    }
}

/// Split one delimited line into fields
pub(crate) fn split_fields(raw: &RawLine, delimiter: u8) -> Result<csv::StringRecord, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(raw.text.as_bytes());
    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record),
        Ok(false) => Err(ParseError::new(raw, "empty line")),
        Err(e) => Err(ParseError::new(raw, format!("malformed csv: {}", e))),
    }
}

pub(crate) fn required<'a>(
    fields: &'a csv::StringRecord,
    column: usize,
    name: &str,
    line: &RawLine,
) -> Result<&'a str, ParseError> {
    match fields.get(column).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(ParseError::new(line, format!("missing {} field (column {})", name, column))),
    }
}

pub(crate) fn optional(fields: &csv::StringRecord, column: Option<usize>) -> Option<&str> {
    let value = fields.get(column?)?.trim();
    if value.is_empty() || value == "-" {
        None
    } else {
        Some(value)
    }
}

/// Parse a pair of range bounds written as address text or decimal integers
///
/// Integer bounds take their family from the upper bound under
/// [`IntegerFamily::Auto`], so both ends always share a family.
pub fn parse_bounds(start: &str, end: &str, family: IntegerFamily) -> Result<(IpValue, IpValue), String> {
    let is_text = |s: &str| s.contains('.') || s.contains(':');
    match (is_text(start), is_text(end)) {
        (true, true) => {
            let s = start.parse().map_err(|_| format!("invalid address {:?}", start))?;
            let e = end.parse().map_err(|_| format!("invalid address {:?}", end))?;
            Ok((s, e))
        }
        (false, false) => {
            let s = start
                .parse::<u128>()
                .map_err(|_| format!("invalid integer address {:?}", start))?;
            let e = end
                .parse::<u128>()
                .map_err(|_| format!("invalid integer address {:?}", end))?;
            let v4 = match family {
                IntegerFamily::Auto => e <= u32::MAX as u128,
                IntegerFamily::V4 => true,
                IntegerFamily::V6 => false,
            };
            if v4 {
                let s = u32::try_from(s).map_err(|_| format!("{} exceeds IPv4 range", s))?;
                let e = u32::try_from(e).map_err(|_| format!("{} exceeds IPv4 range", e))?;
                Ok((IpValue::from_u32(s), IpValue::from_u32(e)))
            } else {
                Ok((IpValue::from_u128(s), IpValue::from_u128(e)))
            }
        }
        _ => Err(format!("mixed bound notation {:?} / {:?}", start, end)),
    }
}
