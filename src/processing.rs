//! Line ingestion: raw source text → ordered builder inserts
//!
//! Building blocks for sequential or parallel provider ingestion:
//! - **LineBatch**: Pre-chunked source bytes with computed line offsets
//! - **LineFileReader**: Chunks files efficiently with gzip support
//! - **RawLines**: Sequential, numbered line iterator
//! - **Interrupt**: Cooperative cancellation token
//! - **ingest**: Parallel parse, in-order insert pipeline
//!
//! # Parallel pipeline
//!
//! ```text
//! Reader Thread → [LineBatch queue] → Parse Workers → [Result queue] → Reorder → Decorator → Builder
//! ```
//!
//! Parsing is CPU-bound and runs on a worker pool. Each batch carries the
//! sequence number the reader gave it; the consumer holds early batches back
//! until every batch before them has been inserted, so the builder sees
//! records in source order regardless of which worker finished first.
//!
//! # Example
//!
//! ```rust,no_run
//! use georange::builder::{DatabaseBuilder, StorageStrategy};
//! use georange::config::IngestConfig;
//! use georange::parser::{CsvLayout, CsvRangeParser};
//! use georange::processing::{self, Interrupt, LineFileReader};
//! use georange::ProviderKey;
//! use std::sync::Arc;
//!
//! let config = IngestConfig::default();
//! let mut builder = DatabaseBuilder::new(ProviderKey::IP2LOCATION_LITE, &config.storage)?;
//! let reader = LineFileReader::new("IP2LOCATION-LITE-DB3.CSV.gz", config.batch_bytes)?;
//! let parser = Arc::new(CsvRangeParser::new(CsvLayout::ip2location_lite()));
//!
//! processing::ingest(reader, parser, &mut builder, &config, None, &Interrupt::new())?;
//! let db = builder.finish()?;
//! # Ok::<(), georange::Error>(())
//! ```

use crate::builder::DatabaseBuilder;
use crate::config::IngestConfig;
use crate::decorator::RecordDecorator;
use crate::error::{Error, Result};
use crate::parser::{LineParser, ParseError};
use crate::record::{RangeRecord, RawLine};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::io::{self, BufRead, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Pre-chunked batch of line-oriented data ready for parallel parsing
///
/// Contains raw bytes with pre-computed newline positions to avoid
/// duplicate memchr scans in worker threads.
#[derive(Clone)]
pub struct LineBatch {
    /// Source file path
    pub source: PathBuf,
    /// Line number of the first line in this batch (1-indexed)
    pub starting_line_number: u64,
    /// Raw byte data for this batch
    pub data: Arc<Vec<u8>>,
    /// Pre-computed newline positions (offsets of '\n' bytes in data)
    pub line_offsets: Arc<Vec<usize>>,
}

impl LineBatch {
    /// Numbered, non-blank lines of this batch
    ///
    /// Trailing `\r` is stripped and invalid UTF-8 is replaced.
    pub fn lines(&self) -> Vec<RawLine> {
        let mut lines = Vec::with_capacity(self.line_offsets.len() + 1);
        let mut start = 0;
        let mut number = self.starting_line_number;
        for &newline in self.line_offsets.iter() {
            lines.extend(to_raw_line(number, &self.data[start..newline]));
            start = newline + 1;
            number += 1;
        }
        if start < self.data.len() {
            lines.extend(to_raw_line(number, &self.data[start..]));
        }
        lines
    }
}

/// Reads files in line-oriented chunks with compression support
///
/// Efficiently chunks files by reading fixed-size blocks and finding
/// line boundaries. Pre-computes newline offsets for workers.
///
/// Supports gzip-compressed files via extension detection.
pub struct LineFileReader {
    source_path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    read_buffer: Vec<u8>,
    current_line_number: u64,
    eof: bool,
    leftover: Vec<u8>, // Partial line from previous read
}

impl LineFileReader {
    /// Create a new line-oriented chunking reader
    ///
    /// # Arguments
    ///
    /// * `path` - File to read (supports .gz compression, `-` for stdin)
    /// * `chunk_size` - Target chunk size in bytes (typically 128KB)
    pub fn new<P: AsRef<Path>>(path: P, chunk_size: usize) -> io::Result<Self> {
        let path = path.as_ref();
        let reader = crate::file_reader::open(path)?;
        Ok(Self::from_reader(path, reader, chunk_size))
    }

    /// Chunk an already open reader; `source` only labels the batches
    pub fn from_reader(source: impl Into<PathBuf>, reader: Box<dyn BufRead + Send>, chunk_size: usize) -> Self {
        Self {
            source_path: source.into(),
            reader,
            read_buffer: vec![0u8; chunk_size.max(1)],
            current_line_number: 1,
            eof: false,
            leftover: Vec::new(),
        }
    }

    /// Source this reader was opened on
    pub fn source(&self) -> &Path {
        &self.source_path
    }

    /// Read next batch of lines
    ///
    /// Returns `None` when EOF is reached. Every batch ends on a line
    /// boundary except possibly the last one.
    pub fn next_batch(&mut self) -> io::Result<Option<LineBatch>> {
        loop {
            if self.eof {
                return Ok(None);
            }

            let bytes_read = self.reader.read(&mut self.read_buffer)?;

            if bytes_read == 0 {
                self.eof = true;
                if self.leftover.is_empty() {
                    return Ok(None);
                }
                let chunk = std::mem::take(&mut self.leftover);
                return Ok(Some(self.make_batch(chunk)));
            }

            let mut combined = std::mem::take(&mut self.leftover);
            combined.extend_from_slice(&self.read_buffer[..bytes_read]);

            // Find last newline using memchr (SIMD-accelerated)
            let Some(pos) = memchr::memrchr(b'\n', &combined) else {
                // No complete line yet
                self.leftover = combined;
                continue;
            };

            let chunk_end = pos + 1;
            if chunk_end < combined.len() {
                self.leftover = combined[chunk_end..].to_vec();
                combined.truncate(chunk_end);
            }
            return Ok(Some(self.make_batch(combined)));
        }
    }

    fn make_batch(&mut self, chunk: Vec<u8>) -> LineBatch {
        let line_offsets: Vec<usize> = memchr::memchr_iter(b'\n', &chunk).collect();
        let batch = LineBatch {
            source: self.source_path.clone(),
            starting_line_number: self.current_line_number,
            data: Arc::new(chunk),
            line_offsets: Arc::new(line_offsets),
        };
        self.current_line_number += batch.line_offsets.len() as u64;
        batch
    }

    /// Returns an iterator over line batches
    pub fn batches(self) -> LineBatchIter {
        LineBatchIter { reader: self }
    }
}

/// Iterator over line batches
pub struct LineBatchIter {
    reader: LineFileReader,
}

impl Iterator for LineBatchIter {
    type Item = io::Result<LineBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.reader.next_batch().transpose()
    }
}

/// Sequential numbered line source
///
/// Yields the same lines as [`LineBatch::lines`]: blank lines are skipped
/// but still counted.
pub struct RawLines {
    reader: Box<dyn BufRead + Send>,
    buffer: Vec<u8>,
    number: u64,
}

impl RawLines {
    /// Lines of an open reader
    pub fn new(reader: Box<dyn BufRead + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            number: 0,
        }
    }

    /// Lines of a file (supports .gz compression, `-` for stdin)
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(crate::file_reader::open(path)?))
    }
}

impl Iterator for RawLines {
    type Item = io::Result<RawLine>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buffer.clear();
            match self.reader.read_until(b'\n', &mut self.buffer) {
                Ok(0) => return None,
                Ok(_) => {
                    self.number += 1;
                    let text = self.buffer.strip_suffix(b"\n").unwrap_or(&self.buffer);
                    if let Some(line) = to_raw_line(self.number, text) {
                        return Some(Ok(line));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn to_raw_line(number: u64, bytes: &[u8]) -> Option<RawLine> {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    let bytes = if number == 1 {
        bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes)
    } else {
        bytes
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    Some(RawLine::new(number, String::from_utf8_lossy(bytes)))
}

/// Cooperative cancellation token
///
/// Clones share one flag. Ingestion checks it between records and aborts
/// the build once it is set.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// Unset token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether interruption was requested
    pub fn is_interrupted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

type ParsedBatch = (u64, Vec<std::result::Result<RangeRecord, ParseError>>);

/// Batches each worker may have read ahead of the insertion point
const IN_FLIGHT_PER_WORKER: usize = 4;

/// Upper bound on batches read but not yet inserted
pub fn in_flight_limit(workers: usize) -> usize {
    workers.max(1) * IN_FLIGHT_PER_WORKER
}

/// Parse `reader` on a worker pool and insert the records in source order
///
/// Parse failures go to [`DatabaseBuilder::report_parse_error`]; every
/// record passes through `decorator` when one is given. On an interrupt the
/// build is discarded and [`Error::Interrupted`] returned. The builder is
/// left open on success so the caller can inspect it before finishing.
pub fn ingest(
    reader: LineFileReader,
    parser: Arc<dyn LineParser>,
    builder: &mut DatabaseBuilder,
    config: &IngestConfig,
    decorator: Option<&mut (dyn RecordDecorator + '_)>,
    interrupt: &Interrupt,
) -> Result<()> {
    let workers = config.workers.max(1);
    let retain = config.retain_original_line;
    let source = reader.source().to_path_buf();
    log::debug!(
        "{}: ingesting {} with {} parse workers",
        builder.provider(),
        source.display(),
        workers
    );

    let (batch_tx, batch_rx) = bounded::<(u64, LineBatch)>(workers * 2);
    let (result_tx, result_rx) = bounded::<ParsedBatch>(workers * 2);

    // One permit per batch between reading and insertion; the consumer
    // hands it back once the batch is inserted, which caps the reorder buffer
    let limit = in_flight_limit(workers);
    let (permit_tx, permit_rx) = bounded::<()>(limit);
    for _ in 0..limit {
        // Cannot fail: the channel has room for every permit
        let _ = permit_tx.send(());
    }

    thread::scope(|scope| {
        let reader_interrupt = interrupt.clone();
        let reader_handle = scope.spawn(move || -> io::Result<()> {
            let mut reader = reader;
            let mut sequence = 0u64;
            // Ends once the consumer has dropped its sender and no permits remain
            while permit_rx.recv().is_ok() {
                let Some(batch) = reader.next_batch()? else {
                    break;
                };
                if reader_interrupt.is_interrupted() || batch_tx.send((sequence, batch)).is_err() {
                    break;
                }
                sequence += 1;
            }
            Ok(())
        });

        for _ in 0..workers {
            let batches = batch_rx.clone();
            let results = result_tx.clone();
            let parser = &parser;
            scope.spawn(move || {
                for (sequence, batch) in batches.iter() {
                    let parsed = batch.lines().iter().map(|line| parser.parse(line, retain)).collect();
                    if results.send((sequence, parsed)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(batch_rx);
        drop(result_tx);

        // Dropping the result receiver and the permits on failure unblocks the
        // workers and the reader
        consume(result_rx, permit_tx, builder, decorator, interrupt)?;

        match reader_handle.join() {
            Ok(read) => read.map_err(|e| {
                log::error!("{}: read failed: {}", source.display(), e);
                Error::Io(e)
            }),
            Err(_) => Err(Error::Io(io::Error::new(io::ErrorKind::Other, "line reader panicked"))),
        }
    })
}

fn consume(
    results: Receiver<ParsedBatch>,
    permits: Sender<()>,
    builder: &mut DatabaseBuilder,
    mut decorator: Option<&mut (dyn RecordDecorator + '_)>,
    interrupt: &Interrupt,
) -> Result<()> {
    let mut pending = BTreeMap::new();
    let mut next_sequence = 0u64;

    for (sequence, parsed) in results.iter() {
        pending.insert(sequence, parsed);
        while let Some(parsed) = pending.remove(&next_sequence) {
            next_sequence += 1;
            for result in parsed {
                if interrupt.is_interrupted() {
                    return Err(builder.interrupt());
                }
                match result {
                    Ok(record) => insert(builder, decorator.as_deref_mut(), record)?,
                    Err(e) => builder.report_parse_error(e)?,
                }
            }
            // The reader may already be gone after its last batch
            let _ = permits.send(());
        }
    }

    if interrupt.is_interrupted() {
        return Err(builder.interrupt());
    }
    Ok(())
}

/// Parse and insert lines one at a time on the calling thread
///
/// Same semantics as [`ingest`] without the worker pool, for small or
/// in-memory sources.
pub fn ingest_lines<I>(
    lines: I,
    parser: &dyn LineParser,
    builder: &mut DatabaseBuilder,
    retain_original_line: bool,
    mut decorator: Option<&mut (dyn RecordDecorator + '_)>,
    interrupt: &Interrupt,
) -> Result<()>
where
    I: IntoIterator<Item = io::Result<RawLine>>,
{
    for line in lines {
        if interrupt.is_interrupted() {
            return Err(builder.interrupt());
        }
        let line = line?;
        match parser.parse(&line, retain_original_line) {
            Ok(record) => insert(builder, decorator.as_deref_mut(), record)?,
            Err(e) => builder.report_parse_error(e)?,
        }
    }
    if interrupt.is_interrupted() {
        return Err(builder.interrupt());
    }
    Ok(())
}

fn insert(
    builder: &mut DatabaseBuilder,
    decorator: Option<&mut (dyn RecordDecorator + '_)>,
    record: RangeRecord,
) -> Result<()> {
    match decorator {
        Some(decorator) => decorator.decorate_record(&record, &mut |piece| builder.insert(piece)),
        None => builder.insert(record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StorageStrategy;
    use crate::database::IpDatabase;
    use crate::ip::IpRange;
    use crate::provider::ProviderKey;
    use crate::InformationPayload;
    use std::io::{Cursor, Write};
    use tempfile::NamedTempFile;

    fn reader_over(text: &str, chunk_size: usize) -> LineFileReader {
        LineFileReader::from_reader("mem", Box::new(Cursor::new(text.as_bytes().to_vec())), chunk_size)
    }

    #[test]
    fn test_line_file_reader_basic() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "line 1").unwrap();
        writeln!(file, "line 2").unwrap();
        writeln!(file, "line 3").unwrap();
        file.flush().unwrap();

        let mut reader = LineFileReader::new(file.path(), 1024).unwrap();
        let batch = reader.next_batch().unwrap().unwrap();

        assert_eq!(batch.starting_line_number, 1);
        assert_eq!(batch.line_offsets.len(), 3);
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn test_batches_keep_line_numbers() {
        let text: String = (1..=50).map(|i| format!("line {}\n", i)).collect();
        let batches: Vec<_> = reader_over(&text, 16).batches().collect::<io::Result<Vec<_>>>().unwrap();

        assert!(batches.len() > 1);
        let lines: Vec<RawLine> = batches.iter().flat_map(|b| b.lines()).collect();
        assert_eq!(lines.len(), 50);
        for (i, line) in lines.iter().enumerate() {
            assert_eq!(line.number, i as u64 + 1);
            assert_eq!(line.text, format!("line {}", i + 1));
        }
    }

    #[test]
    fn test_last_line_without_newline_and_blank_lines() {
        let batches: Vec<_> = reader_over("a\r\n\n  \nb", 4)
            .batches()
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        let lines: Vec<RawLine> = batches.iter().flat_map(|b| b.lines()).collect();
        assert_eq!(lines, vec![RawLine::new(1, "a"), RawLine::new(4, "b")]);
    }

    #[test]
    fn test_raw_lines_match_batches() {
        let text = "\u{feff}first\r\n\nsecond\nthird";
        let sequential: Vec<RawLine> = RawLines::new(Box::new(Cursor::new(text.as_bytes().to_vec())))
            .collect::<io::Result<Vec<_>>>()
            .unwrap();
        let batched: Vec<RawLine> = reader_over(text, 3)
            .batches()
            .flat_map(|b| b.unwrap().lines())
            .collect();

        assert_eq!(
            sequential,
            vec![RawLine::new(1, "first"), RawLine::new(3, "second"), RawLine::new(4, "third")]
        );
        assert_eq!(sequential, batched);
    }

    #[test]
    fn test_interrupt_is_shared() {
        let token = Interrupt::new();
        let clone = token.clone();
        assert!(!token.is_interrupted());
        clone.interrupt();
        assert!(token.is_interrupted());
    }

    fn number_parser() -> Arc<dyn LineParser> {
        Arc::new(|line: &RawLine, _retain: bool| -> std::result::Result<RangeRecord, ParseError> {
            let n: u32 = line.text.trim().parse().map_err(|_| ParseError::new(line, "not a number"))?;
            let start = crate::ip::IpValue::from_u32(n * 10);
            let end = crate::ip::IpValue::from_u32(n * 10 + 9);
            let range = IpRange::new(start, end).map_err(|e| ParseError::new(line, e.to_string()))?;
            RangeRecord::new(start, end, InformationPayload::new(range).with_geoname_id(n), line.clone())
                .map_err(|e| ParseError::new(line, e.to_string()))
        })
    }

    #[test]
    fn test_ingest_preserves_order_across_workers() {
        let text: String = (0..2000).map(|i| format!("{}\n", i)).collect();
        let config = IngestConfig {
            workers: 4,
            ..IngestConfig::default()
        };
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();

        ingest(reader_over(&text, 64), number_parser(), &mut builder, &config, None, &Interrupt::new()).unwrap();
        assert_eq!(builder.stats().inserted, 2000);

        let db = builder.finish().unwrap();
        let hit = db.get(&crate::ip::IpValue::from_u32(12345)).unwrap();
        assert_eq!(hit.geoname_id(), Some(1234));
    }

    #[test]
    fn test_ingest_reports_parse_errors() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let config = IngestConfig {
            workers: 2,
            ..IngestConfig::default()
        };

        ingest(reader_over("header\n1\n2\nbad\n3\n", 4), number_parser(), &mut builder, &config, None, &Interrupt::new())
            .unwrap();
        assert_eq!(builder.stats().inserted, 3);
        assert_eq!(builder.stats().parse_failures, 2);
    }

    #[test]
    fn test_ingest_out_of_order_fails() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let config = IngestConfig {
            workers: 3,
            ..IngestConfig::default()
        };

        let result = ingest(reader_over("5\n3\n", 2), number_parser(), &mut builder, &config, None, &Interrupt::new());
        assert!(matches!(result, Err(Error::OutOfOrder { line: 2, .. })));
    }

    #[test]
    fn test_ingest_interrupted() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let interrupt = Interrupt::new();
        interrupt.interrupt();

        let result = ingest(
            reader_over("1\n2\n3\n", 4),
            number_parser(),
            &mut builder,
            &IngestConfig::default(),
            None,
            &interrupt,
        );
        assert!(matches!(result, Err(Error::Interrupted { .. })));
        assert!(matches!(builder.finish(), Err(Error::Interrupted { .. })));
    }

    #[test]
    fn test_ingest_lines_sequential() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let lines = ["1", "2", "x", "3"].iter().enumerate().map(|(i, t)| Ok(RawLine::new(i as u64 + 1, *t)));
        let parser = number_parser();

        ingest_lines(lines, parser.as_ref(), &mut builder, false, None, &Interrupt::new()).unwrap();
        assert_eq!(builder.stats().inserted, 3);
        assert_eq!(builder.stats().parse_failures, 1);
    }

    fn vpn_engine() -> crate::decorator::DecoratorEngine<crate::info::TriState, crate::decorator::VpnDecoration> {
        use crate::decorator::source::DecoratorReader;
        use crate::decorator::{DecoratorEngine, DecoratorRange, VpnDecoration};
        let vpn = DecoratorRange::new(
            crate::ip::IpValue::from_u32(15),
            crate::ip::IpValue::from_u32(24),
            crate::info::TriState::True,
        )
        .unwrap();
        DecoratorEngine::new(vec![DecoratorReader::from_ranges(vec![vpn])], VpnDecoration)
    }

    #[test]
    fn test_decorator_reused_for_every_record() {
        let config = IngestConfig {
            workers: 3,
            ..IngestConfig::default()
        };
        let mut parallel = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let mut engine = vpn_engine();
        ingest(
            reader_over("0\n1\n2\n3\n4\n", 4),
            number_parser(),
            &mut parallel,
            &config,
            Some(&mut engine),
            &Interrupt::new(),
        )
        .unwrap();

        let mut sequential = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        let mut engine = vpn_engine();
        let lines = (0..5).map(|i| Ok(RawLine::new(i + 1, i.to_string())));
        let parser = number_parser();
        ingest_lines(lines, parser.as_ref(), &mut sequential, false, Some(&mut engine), &Interrupt::new()).unwrap();

        // Records 1 and 2 are each cut once by the decorator
        assert_eq!(parallel.stats().inserted, 7);
        assert_eq!(parallel.stats(), sequential.stats());

        let db = parallel.finish().unwrap();
        let inside = db.get(&crate::ip::IpValue::from_u32(22)).unwrap();
        assert_eq!(inside.vpn(), crate::info::TriState::True);
        assert_eq!(inside.range().to_string(), "0.0.0.20-0.0.0.24");
        let outside = db.get(&crate::ip::IpValue::from_u32(12)).unwrap();
        assert_eq!(outside.vpn(), crate::info::TriState::False);
        assert_eq!(outside.range().to_string(), "0.0.0.10-0.0.0.14");
    }

    #[test]
    fn test_slow_batch_bounds_read_ahead() {
        use std::sync::atomic::AtomicU64;
        use std::time::Duration;

        // Fixed-width lines so every batch holds at most ten of them
        let text: String = (0..2000).map(|i| format!("{:08}\n", i)).collect();
        let parsed = Arc::new(AtomicU64::new(0));
        let seen_while_blocked = Arc::new(AtomicU64::new(u64::MAX));

        let inner = number_parser();
        let (counter, seen) = (parsed.clone(), seen_while_blocked.clone());
        let parser: Arc<dyn LineParser> = Arc::new(move |line: &RawLine, retain: bool| {
            if line.number == 1 {
                thread::sleep(Duration::from_millis(300));
                seen.store(counter.load(Ordering::SeqCst), Ordering::SeqCst);
            } else {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            inner.parse(line, retain)
        });

        let workers = 2;
        let config = IngestConfig {
            workers,
            ..IngestConfig::default()
        };
        let mut builder = DatabaseBuilder::new(ProviderKey::new("numbers"), &StorageStrategy::InMemory).unwrap();
        ingest(reader_over(&text, 90), parser, &mut builder, &config, None, &Interrupt::new()).unwrap();
        assert_eq!(builder.stats().inserted, 2000);

        // Only the other in-flight batches can be parsed while the first one is stuck
        let bound = (in_flight_limit(workers) as u64 - 1) * 10;
        let seen = seen_while_blocked.load(Ordering::SeqCst);
        assert!(seen <= bound, "{} lines parsed ahead of a stalled batch (limit {})", seen, bound);
    }
}
