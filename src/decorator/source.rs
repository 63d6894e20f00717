//! Lazy, forward-only decorator range sources
//!
//! A [`DecoratorReader`] presents one or more underlying range sources as a
//! single ascending sequence with one element of look-ahead. Sources are
//! merged by range start, so a v4 table and a v6 table may be given in any
//! order. Ranges that overlap or precede what the reader has already
//! produced are dropped with a warning.
//!
//! File-backed sources are read lazily through [`file_reader`](crate::file_reader),
//! so gzip tables work transparently. Lines a [`DecoratorLineParser`] cannot
//! parse, or whose status field does not match, are skipped.

use super::DecoratorRange;
use crate::error::Result;
use crate::info::TriState;
use crate::ip::IpValue;
use crate::parser::{optional, parse_bounds, required, split_fields, IntegerFamily, ParseError};
use crate::processing::RawLines;
use crate::record::RawLine;
use serde::{Deserialize, Serialize};
use std::iter::Peekable;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type BoxedRanges<T> = Box<dyn Iterator<Item = DecoratorRange<T>> + Send>;

/// Turns one decorator source line into a decorator range
pub trait DecoratorLineParser<T>: Send + Sync {
    /// `Ok(None)` when the line is well formed but does not match
    fn parse(&self, line: &RawLine) -> std::result::Result<Option<DecoratorRange<T>>, ParseError>;
}

/// Forward-only decorator range sequence with one element of look-ahead
pub struct DecoratorReader<T> {
    sources: Vec<Peekable<BoxedRanges<T>>>,
    head: Option<DecoratorRange<T>>,
    last_end: Option<IpValue>,
    dropped: u64,
}

impl<T> Default for DecoratorReader<T> {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            head: None,
            last_end: None,
            dropped: 0,
        }
    }
}

impl<T: Send + 'static> DecoratorReader<T> {
    /// Reader with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an ascending range source
    pub fn with_source<I>(mut self, ranges: I) -> Self
    where
        I: IntoIterator<Item = DecoratorRange<T>>,
        I::IntoIter: Send + 'static,
    {
        let boxed: BoxedRanges<T> = Box::new(ranges.into_iter());
        self.sources.push(boxed.peekable());
        self
    }

    /// Reader over an in-memory list
    pub fn from_ranges(ranges: Vec<DecoratorRange<T>>) -> Self {
        Self::new().with_source(ranges)
    }

    /// Reader over decorator files, one source per file
    ///
    /// Every file is opened up front so a missing file fails here; lines are
    /// read as the sweep advances.
    pub fn from_files<P>(paths: &[P], parser: Arc<dyn DecoratorLineParser<T>>) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let mut reader = Self::new();
        for path in paths {
            let source = FileRanges::open(path.as_ref(), Arc::clone(&parser))?;
            reader = reader.with_source(source);
        }
        Ok(reader)
    }
}

impl<T> DecoratorReader<T> {
    /// Next range without consuming it
    pub fn peek(&mut self) -> Option<&DecoratorRange<T>> {
        if self.head.is_none() {
            self.head = self.pull();
        }
        self.head.as_ref()
    }

    /// Ranges dropped so far for overlapping or preceding earlier ones
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn pull(&mut self) -> Option<DecoratorRange<T>> {
        loop {
            let index = self
                .sources
                .iter_mut()
                .enumerate()
                .filter_map(|(i, source)| source.peek().map(|d| (d.start, i)))
                .min()?
                .1;
            let range = self.sources[index].next()?;

            if let Some(last) = self.last_end {
                if range.start <= last {
                    log::warn!(
                        "dropping decorator range {}-{}: does not follow {}",
                        range.start,
                        range.end,
                        last
                    );
                    self.dropped += 1;
                    continue;
                }
            }
            self.last_end = Some(range.end);
            return Some(range);
        }
    }
}

impl<T> Iterator for DecoratorReader<T> {
    type Item = DecoratorRange<T>;

    fn next(&mut self) -> Option<DecoratorRange<T>> {
        self.head.take().or_else(|| self.pull())
    }
}

/// Parsed ranges of one decorator file
struct FileRanges<T> {
    path: PathBuf,
    lines: RawLines,
    parser: Arc<dyn DecoratorLineParser<T>>,
}

impl<T> FileRanges<T> {
    fn open(path: &Path, parser: Arc<dyn DecoratorLineParser<T>>) -> Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            lines: RawLines::open(path)?,
            parser,
        })
    }
}

impl<T> Iterator for FileRanges<T> {
    type Item = DecoratorRange<T>;

    fn next(&mut self) -> Option<DecoratorRange<T>> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    log::error!("{}: read failed, ignoring the rest: {}", self.path.display(), e);
                    return None;
                }
            };
            match self.parser.parse(&line) {
                Ok(Some(range)) => return Some(range),
                Ok(None) => {}
                Err(e) => log::debug!("{}: skipping {}", self.path.display(), e),
            }
        }
    }
}

/// Column layout of a VPN range table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VpnLayout {
    /// Field delimiter
    pub delimiter: u8,
    /// Range start column
    pub start: usize,
    /// Range end column
    pub end: usize,
    /// "Is VPN" column; every row counts as a VPN range when absent
    pub flag: Option<usize>,
    /// Family for integer bounds
    pub integer_family: IntegerFamily,
}

impl Default for VpnLayout {
    fn default() -> Self {
        Self {
            delimiter: b',',
            start: 0,
            end: 1,
            flag: Some(2),
            integer_family: IntegerFamily::Auto,
        }
    }
}

/// Parses VPN range tables, keeping only rows flagged as VPN
#[derive(Debug, Clone, Default)]
pub struct VpnCsvParser {
    layout: VpnLayout,
}

impl VpnCsvParser {
    /// Parser for the given layout
    pub fn new(layout: VpnLayout) -> Self {
        Self { layout }
    }
}

impl DecoratorLineParser<TriState> for VpnCsvParser {
    fn parse(&self, line: &RawLine) -> std::result::Result<Option<DecoratorRange<TriState>>, ParseError> {
        let fields = split_fields(line, self.layout.delimiter)?;

        if let Some(column) = self.layout.flag {
            let flagged = optional(&fields, Some(column)).is_some_and(is_truthy);
            if !flagged {
                return Ok(None);
            }
        }

        let start = required(&fields, self.layout.start, "start", line)?;
        let end = required(&fields, self.layout.end, "end", line)?;
        let (start, end) =
            parse_bounds(start, end, self.layout.integer_family).map_err(|reason| ParseError::new(line, reason))?;
        DecoratorRange::new(start, end, TriState::True)
            .map(Some)
            .map_err(|e| ParseError::new(line, e.to_string()))
    }
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ip(s: &str) -> IpValue {
        s.parse().unwrap()
    }

    fn range(start: &str, end: &str) -> DecoratorRange<TriState> {
        DecoratorRange::new(ip(start), ip(end), TriState::True).unwrap()
    }

    fn starts(reader: DecoratorReader<TriState>) -> Vec<String> {
        reader.map(|d| d.start.to_string()).collect()
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut reader = DecoratorReader::from_ranges(vec![range("1.0.0.0", "1.0.0.9"), range("1.0.0.20", "1.0.0.29")]);
        assert_eq!(reader.peek().unwrap().start, ip("1.0.0.0"));
        assert_eq!(reader.peek().unwrap().start, ip("1.0.0.0"));
        assert_eq!(reader.next().unwrap().start, ip("1.0.0.0"));
        assert_eq!(reader.peek().unwrap().start, ip("1.0.0.20"));
        assert_eq!(reader.next().unwrap().start, ip("1.0.0.20"));
        assert!(reader.peek().is_none());
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_sources_merge_by_key() {
        // v6 table registered before the v4 one
        let reader = DecoratorReader::new()
            .with_source(vec![range("2001:db8::", "2001:db8::ff")])
            .with_source(vec![range("1.0.0.0", "1.0.0.9"), range("2.0.0.0", "2.0.0.9")]);
        assert_eq!(starts(reader), vec!["1.0.0.0", "2.0.0.0", "2001:db8::"]);
    }

    #[test]
    fn test_overlapping_and_descending_ranges_dropped() {
        let mut reader = DecoratorReader::from_ranges(vec![
            range("1.0.0.0", "1.0.0.9"),
            range("1.0.0.5", "1.0.0.15"),
            range("0.0.0.0", "0.0.0.1"),
            range("1.0.0.10", "1.0.0.19"),
        ]);
        let mut seen = Vec::new();
        while let Some(d) = reader.next() {
            seen.push(d.start.to_string());
        }
        assert_eq!(seen, vec!["1.0.0.0", "1.0.0.10"]);
        assert_eq!(reader.dropped(), 2);
    }

    #[test]
    fn test_vpn_parser_filters_and_skips() {
        let parser = VpnCsvParser::default();
        let parse = |text: &str| parser.parse(&RawLine::new(1, text));

        assert_eq!(parse("1.0.0.0,1.0.0.255,1").unwrap(), Some(range("1.0.0.0", "1.0.0.255")));
        assert_eq!(parse("16777216,16777471,YES").unwrap(), Some(range("1.0.0.0", "1.0.0.255")));
        assert_eq!(parse("1.0.0.0,1.0.0.255,true").unwrap(), Some(range("1.0.0.0", "1.0.0.255")));
        assert_eq!(parse("1.0.0.0,1.0.0.255,0").unwrap(), None);
        assert_eq!(parse("1.0.0.0,1.0.0.255,").unwrap(), None);
        assert!(parse("start,end,1").is_err());
        assert!(parse("1.0.0.9,1.0.0.0,1").is_err());
    }

    #[test]
    fn test_vpn_parser_without_flag_column() {
        let parser = VpnCsvParser::new(VpnLayout {
            delimiter: b'\t',
            flag: None,
            ..VpnLayout::default()
        });
        let parsed = parser.parse(&RawLine::new(3, "::1\t::ff")).unwrap();
        assert_eq!(parsed, Some(range("::1", "::ff")));
    }

    #[test]
    fn test_from_files_skips_bad_lines() {
        let mut v6 = NamedTempFile::with_suffix(".csv.gz").unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        writeln!(encoder, "2001:db8::,2001:db8::ff,1").unwrap();
        v6.write_all(&encoder.finish().unwrap()).unwrap();
        v6.flush().unwrap();

        let mut v4 = NamedTempFile::new().unwrap();
        writeln!(v4, "ip_from,ip_to,is_vpn").unwrap();
        writeln!(v4, "1.0.0.0,1.0.0.9,1").unwrap();
        writeln!(v4, "1.0.0.10,1.0.0.19,0").unwrap();
        writeln!(v4, "garbage").unwrap();
        writeln!(v4, "1.0.0.20,1.0.0.29,1").unwrap();
        v4.flush().unwrap();

        let parser: Arc<dyn DecoratorLineParser<TriState>> = Arc::new(VpnCsvParser::default());
        let reader = DecoratorReader::from_files(&[v6.path(), v4.path()], parser).unwrap();
        assert_eq!(starts(reader), vec!["1.0.0.0", "1.0.0.20", "2001:db8::"]);
    }

    #[test]
    fn test_from_files_missing_file() {
        let parser: Arc<dyn DecoratorLineParser<TriState>> = Arc::new(VpnCsvParser::default());
        let result = DecoratorReader::from_files(&["/nonexistent/georange/vpn.csv"], parser);
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }
}
