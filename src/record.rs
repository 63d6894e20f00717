//! Raw lines and parsed range records

use crate::error::{Error, Result};
use crate::info::InformationPayload;
use crate::ip::{IpRange, IpValue};
use std::fmt;

/// One line of source text with its 1-based line number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// Line number in the source (1-indexed)
    pub number: u64,
    /// Line text without the terminator
    pub text: String,
}

impl RawLine {
    /// Create a raw line
    pub fn new(number: u64, text: impl Into<String>) -> Self {
        Self {
            number,
            text: text.into(),
        }
    }
}

impl fmt::Display for RawLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.number, self.text)
    }
}

/// A closed address range with its payload and the line it came from
///
/// Invariant: `start <= end` and both bounds share a family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRecord {
    start: IpValue,
    end: IpValue,
    info: InformationPayload,
    source: RawLine,
}

impl RangeRecord {
    /// Create a record, validating the bounds
    pub fn new(start: IpValue, end: IpValue, info: InformationPayload, source: RawLine) -> Result<Self> {
        IpRange::new(start, end)?;
        Ok(Self {
            start,
            end,
            info,
            source,
        })
    }

    /// Sub-range of a validated record; callers guarantee the bounds
    pub(crate) fn split_from(parent: &RangeRecord, start: IpValue, end: IpValue, info: InformationPayload) -> Self {
        debug_assert!(start <= end && parent.start <= start && end <= parent.end);
        Self {
            start,
            end,
            info,
            source: parent.source.clone(),
        }
    }

    /// First covered address
    pub fn start(&self) -> IpValue {
        self.start
    }

    /// Last covered address
    pub fn end(&self) -> IpValue {
        self.end
    }

    /// Bounds as a range
    pub fn range(&self) -> IpRange {
        IpRange {
            start: self.start,
            end: self.end,
        }
    }

    /// Payload
    pub fn info(&self) -> &InformationPayload {
        &self.info
    }

    /// Source line, for diagnostics
    pub fn source(&self) -> &RawLine {
        &self.source
    }

    /// Split into bounds and payload
    pub fn into_parts(self) -> (IpValue, IpValue, InformationPayload) {
        (self.start, self.end, self.info)
    }
}

impl TryFrom<(IpRange, InformationPayload, RawLine)> for RangeRecord {
    type Error = Error;

    fn try_from((range, info, source): (IpRange, InformationPayload, RawLine)) -> Result<Self> {
        RangeRecord::new(range.start, range.end, info, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_reversed_bounds() {
        let start: IpValue = "10.0.0.9".parse().unwrap();
        let end: IpValue = "10.0.0.1".parse().unwrap();
        let info = InformationPayload::new(IpRange { start, end });
        let result = RangeRecord::new(start, end, info, RawLine::new(1, "x"));
        assert!(matches!(result, Err(Error::InvalidRange { .. })));
    }

    #[test]
    fn test_accessors() {
        let start: IpValue = "10.0.0.1".parse().unwrap();
        let end: IpValue = "10.0.0.9".parse().unwrap();
        let range = IpRange::new(start, end).unwrap();
        let record =
            RangeRecord::try_from((range, InformationPayload::new(range), RawLine::new(7, "a,b"))).unwrap();
        assert_eq!(record.range(), range);
        assert_eq!(record.source().number, 7);
        assert_eq!(record.source().to_string(), "7: a,b");
    }
}
