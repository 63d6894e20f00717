//! Range database builder
//!
//! A [`DatabaseBuilder`] consumes the range records of one provider in
//! ascending order and freezes them into an [`IpDatabase`]. Each record
//! must start strictly after the end of the previously inserted one.
//! Violations, parse failures and interruptions are reported to a
//! [`BuildListener`], which decides whether the build goes on.
//!
//! # Example
//!
//! ```rust
//! use georange::builder::{DatabaseBuilder, StorageStrategy};
//! use georange::parser::{CsvLayout, CsvRangeParser, LineParser};
//! use georange::provider::ProviderKey;
//! use georange::record::RawLine;
//!
//! let parser = CsvRangeParser::new(CsvLayout::ip2location_lite());
//! let mut builder = DatabaseBuilder::new(ProviderKey::IP2LOCATION_LITE, &StorageStrategy::InMemory)?;
//!
//! for (n, text) in ["16777216,16777471,AU,Australia,Queensland,Brisbane",
//!                   "16778240,16779263,AU,Australia,Victoria,Melbourne"].iter().enumerate() {
//!     builder.insert(parser.parse(&RawLine::new(n as u64 + 1, *text), false)?)?;
//! }
//!
//! let db = builder.finish()?;
//! let hit = db.get(&"1.0.4.1".parse()?).unwrap();
//! assert_eq!(hit.city(), Some("Melbourne"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::database::{IpDatabase, MemoryDatabase};
use crate::error::{Error, Result};
use crate::file_index::{FileDatabase, FileIndexWriter};
use crate::ip::IpValue;
use crate::parser::ParseError;
use crate::provider::ProviderKey;
use crate::record::{RangeRecord, RawLine};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Where a provider's index lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Entirely in process memory
    #[default]
    InMemory,
    /// Memory-mapped index file written sequentially during the build
    File {
        /// Index file path (created or truncated)
        path: PathBuf,
        /// Decoded payloads to keep in an LRU cache (0 disables it)
        #[serde(default)]
        cache_capacity: usize,
    },
}

/// Observer of a provider build
///
/// The defaults fail the build on ordering violations and log-and-skip
/// unparseable lines. Returning `Ok(())` from a hook continues the build;
/// returning an error aborts it with that error.
pub trait BuildListener: Send + Sync {
    /// A record was inserted
    fn line_added(&self, _provider: &ProviderKey, _record: &RangeRecord) {}

    /// A record did not start after the previous record's end
    fn line_out_of_order(&self, _provider: &ProviderKey, _line: &RawLine, cause: Error) -> Result<()> {
        Err(cause)
    }

    /// A raw line could not be parsed
    fn parse_failed(&self, provider: &ProviderKey, error: ParseError) -> Result<()> {
        log::warn!("{}: skipping unparseable {}", provider, error);
        Ok(())
    }

    /// The build was interrupted and has been discarded
    fn builder_interrupted(&self, provider: &ProviderKey, cause: &Error) {
        log::warn!("{}: {}", provider, cause);
    }
}

/// Default listener: any ordering violation fails the build
#[derive(Debug, Clone, Copy, Default)]
pub struct FailFastListener;

impl BuildListener for FailFastListener {}

/// Listener that logs and skips out-of-order records
#[derive(Debug, Clone, Copy, Default)]
pub struct SkippingListener;

impl BuildListener for SkippingListener {
    fn line_out_of_order(&self, provider: &ProviderKey, line: &RawLine, cause: Error) -> Result<()> {
        log::warn!("{}: skipping line {}: {}", provider, line.number, cause);
        Ok(())
    }
}

/// Counters for one provider build
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuilderStats {
    /// Records stored in the index
    pub inserted: u64,
    /// Out-of-order records the listener chose to skip
    pub skipped_out_of_order: u64,
    /// Lines that failed to parse
    pub parse_failures: u64,
}

enum IndexWriter {
    Memory(MemoryDatabase),
    File {
        writer: FileIndexWriter,
        cache_capacity: usize,
    },
}

impl IndexWriter {
    fn open(storage: &StorageStrategy) -> Result<Self> {
        Ok(match storage {
            StorageStrategy::InMemory => IndexWriter::Memory(MemoryDatabase::new()),
            StorageStrategy::File {
                path,
                cache_capacity,
            } => IndexWriter::File {
                writer: FileIndexWriter::create(path)?,
                cache_capacity: *cache_capacity,
            },
        })
    }

    fn append(&mut self, record: &RangeRecord) -> Result<()> {
        let (start, end) = (record.start(), record.end());
        let info = record.info().clone().with_range(start, end);
        match self {
            IndexWriter::Memory(db) => {
                db.push(start, end, info);
                Ok(())
            }
            IndexWriter::File { writer, .. } => writer.append(&start, &end, &info),
        }
    }

    fn freeze(self) -> Result<Arc<dyn IpDatabase>> {
        Ok(match self {
            IndexWriter::Memory(db) => Arc::new(db),
            IndexWriter::File {
                writer,
                cache_capacity,
            } => {
                let path = writer.finish()?;
                Arc::new(FileDatabase::open(path)?.with_cache(cache_capacity))
            }
        })
    }

    fn discard(self) {
        if let IndexWriter::File { writer, .. } = self {
            writer.abort();
        }
    }
}

enum State {
    Open(IndexWriter),
    Finished,
    Interrupted,
}

/// Builds one provider's range index from ascending records
///
/// Insertion is sequential. Parallel parsing upstream must hand records
/// over in source order (see [`processing`](crate::processing)).
pub struct DatabaseBuilder {
    provider: ProviderKey,
    strategy: StorageStrategy,
    listener: Arc<dyn BuildListener>,
    state: State,
    last: Option<IpValue>,
    stats: BuilderStats,
}

impl DatabaseBuilder {
    /// Builder for `provider` using the given storage strategy
    ///
    /// For `File` storage the index file is created immediately.
    pub fn new(provider: ProviderKey, storage: &StorageStrategy) -> Result<Self> {
        Ok(Self {
            provider,
            strategy: storage.clone(),
            listener: Arc::new(FailFastListener),
            state: State::Open(IndexWriter::open(storage)?),
            last: None,
            stats: BuilderStats::default(),
        })
    }

    /// Replace the default fail-fast listener
    pub fn with_listener(mut self, listener: Arc<dyn BuildListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Provider being built
    pub fn provider(&self) -> &ProviderKey {
        &self.provider
    }

    /// Listener in use
    pub fn listener(&self) -> &Arc<dyn BuildListener> {
        &self.listener
    }

    /// Build counters so far
    pub fn stats(&self) -> &BuilderStats {
        &self.stats
    }

    fn closed_error(&self) -> Error {
        match self.state {
            State::Interrupted => Error::Interrupted {
                provider: self.provider.clone(),
            },
            _ => Error::BuilderFinished {
                provider: self.provider.clone(),
            },
        }
    }

    /// Insert the next record
    ///
    /// # Errors
    ///
    /// - [`Error::BuilderFinished`] after [`finish`](Self::finish)
    /// - [`Error::Interrupted`] after [`interrupt`](Self::interrupt)
    /// - whatever the listener returns for an out-of-order record
    ///   ([`Error::OutOfOrder`] with the default listener)
    pub fn insert(&mut self, record: RangeRecord) -> Result<()> {
        let writer = match &mut self.state {
            State::Open(writer) => writer,
            _ => return Err(self.closed_error()),
        };

        if let Some(previous) = self.last {
            if record.start() <= previous {
                let cause = Error::OutOfOrder {
                    provider: self.provider.clone(),
                    line: record.source().number,
                    previous,
                    start: record.start(),
                };
                self.listener
                    .line_out_of_order(&self.provider, record.source(), cause)?;
                self.stats.skipped_out_of_order += 1;
                return Ok(());
            }
        }

        writer.append(&record)?;
        self.last = Some(record.end());
        self.stats.inserted += 1;
        self.listener.line_added(&self.provider, &record);
        Ok(())
    }

    /// Report a line that failed to parse
    ///
    /// Nothing is inserted; the listener decides whether the build continues.
    pub fn report_parse_error(&mut self, error: ParseError) -> Result<()> {
        if !matches!(self.state, State::Open(_)) {
            return Err(self.closed_error());
        }
        self.stats.parse_failures += 1;
        self.listener.parse_failed(&self.provider, error)
    }

    /// Abort the build after a cooperative interruption
    ///
    /// Notifies the listener, discards everything written so far and returns
    /// the [`Error::Interrupted`] to propagate.
    pub fn interrupt(&mut self) -> Error {
        let cause = Error::Interrupted {
            provider: self.provider.clone(),
        };
        if matches!(self.state, State::Open(_)) {
            if let State::Open(writer) = std::mem::replace(&mut self.state, State::Interrupted) {
                writer.discard();
            }
            self.listener.builder_interrupted(&self.provider, &cause);
        }
        cause
    }

    /// Freeze the index
    ///
    /// Further inserts fail with [`Error::BuilderFinished`].
    pub fn finish(&mut self) -> Result<Arc<dyn IpDatabase>> {
        let writer = match std::mem::replace(&mut self.state, State::Finished) {
            State::Open(writer) => writer,
            closed => {
                self.state = closed;
                return Err(self.closed_error());
            }
        };
        let db = writer.freeze()?;
        log::info!(
            "{}: built {} ranges ({:?}), skipped {} out of order, {} unparseable",
            self.provider,
            self.stats.inserted,
            self.strategy,
            self.stats.skipped_out_of_order,
            self.stats.parse_failures
        );
        Ok(db)
    }
}

impl Drop for DatabaseBuilder {
    fn drop(&mut self) {
        // An abandoned file build must not leave a half-written index behind
        if let State::Open(writer) = std::mem::replace(&mut self.state, State::Interrupted) {
            writer.discard();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::InformationPayload;
    use crate::ip::IpRange;
    use std::sync::Mutex;

    fn record(line: u64, start: u32, end: u32) -> RangeRecord {
        let (s, e) = (IpValue::from_u32(start), IpValue::from_u32(end));
        let range = IpRange::new(s, e).unwrap();
        RangeRecord::new(s, e, InformationPayload::new(range), RawLine::new(line, format!("{},{}", start, end)))
            .unwrap()
    }

    #[derive(Default)]
    struct Recording {
        added: Mutex<Vec<u64>>,
        out_of_order: Mutex<Vec<u64>>,
        interrupted: Mutex<u32>,
    }

    impl BuildListener for Recording {
        fn line_added(&self, _provider: &ProviderKey, record: &RangeRecord) {
            self.added.lock().unwrap().push(record.source().number);
        }

        fn line_out_of_order(&self, _provider: &ProviderKey, line: &RawLine, _cause: Error) -> Result<()> {
            self.out_of_order.lock().unwrap().push(line.number);
            Ok(())
        }

        fn builder_interrupted(&self, _provider: &ProviderKey, _cause: &Error) {
            *self.interrupted.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_descending_start_fails_by_default() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory).unwrap();
        builder.insert(record(1, 5, 5)).unwrap();
        let err = builder.insert(record(2, 3, 3)).unwrap_err();
        match err {
            Error::OutOfOrder { line, previous, start, .. } => {
                assert_eq!(line, 2);
                assert_eq!(previous, IpValue::from_u32(5));
                assert_eq!(start, IpValue::from_u32(3));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_overlap_is_out_of_order() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory).unwrap();
        builder.insert(record(1, 10, 20)).unwrap();
        assert!(matches!(builder.insert(record(2, 20, 30)), Err(Error::OutOfOrder { .. })));
    }

    #[test]
    fn test_custom_listener_skips_and_observes() {
        let listener = Arc::new(Recording::default());
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory)
            .unwrap()
            .with_listener(listener.clone());
        builder.insert(record(1, 10, 19)).unwrap();
        builder.insert(record(2, 5, 6)).unwrap();
        builder.insert(record(3, 20, 29)).unwrap();
        let db = builder.finish().unwrap();

        assert_eq!(*listener.added.lock().unwrap(), vec![1, 3]);
        assert_eq!(*listener.out_of_order.lock().unwrap(), vec![2]);
        assert_eq!(builder.stats().skipped_out_of_order, 1);
        assert_eq!(db.range_count(), Some(2));
        assert!(db.get(&IpValue::from_u32(5)).is_none());
    }

    #[test]
    fn test_insert_after_finish_fails() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory).unwrap();
        builder.insert(record(1, 1, 2)).unwrap();
        builder.finish().unwrap();
        assert!(matches!(builder.insert(record(2, 3, 4)), Err(Error::BuilderFinished { .. })));
        assert!(matches!(builder.finish(), Err(Error::BuilderFinished { .. })));
    }

    #[test]
    fn test_interrupt_discards_build() {
        let listener = Arc::new(Recording::default());
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory)
            .unwrap()
            .with_listener(listener.clone());
        builder.insert(record(1, 1, 2)).unwrap();
        assert!(matches!(builder.interrupt(), Error::Interrupted { .. }));
        assert!(matches!(builder.finish(), Err(Error::Interrupted { .. })));
        assert!(matches!(builder.insert(record(2, 3, 4)), Err(Error::Interrupted { .. })));
        assert_eq!(*listener.interrupted.lock().unwrap(), 1);
    }

    #[test]
    fn test_parse_errors_are_counted_and_skipped() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory).unwrap();
        let raw = RawLine::new(1, "garbage");
        builder.report_parse_error(ParseError::new(&raw, "bad")).unwrap();
        assert_eq!(builder.stats().parse_failures, 1);
        assert!(builder.finish().is_ok());
    }

    #[test]
    fn test_payload_range_tracks_record_bounds() {
        let mut builder = DatabaseBuilder::new(ProviderKey::new("t"), &StorageStrategy::InMemory).unwrap();
        let (s, e) = (IpValue::from_u32(100), IpValue::from_u32(200));
        let stale = InformationPayload::new(IpRange::new(IpValue::from_u32(0), e).unwrap());
        builder
            .insert(RangeRecord::new(s, e, stale, RawLine::new(1, "x")).unwrap())
            .unwrap();
        let db = builder.finish().unwrap();
        assert_eq!(db.get(&IpValue::from_u32(150)).unwrap().range().start, s);
    }

    #[test]
    fn test_file_strategy_matches_memory() {
        let dir = tempfile::TempDir::new().unwrap();
        let strategies = [
            StorageStrategy::InMemory,
            StorageStrategy::File {
                path: dir.path().join("p.idx"),
                cache_capacity: 8,
            },
        ];
        let dbs: Vec<_> = strategies
            .iter()
            .map(|s| {
                let mut b = DatabaseBuilder::new(ProviderKey::new("t"), s).unwrap();
                b.insert(record(1, 10, 19)).unwrap();
                b.insert(record(2, 30, 39)).unwrap();
                b.finish().unwrap()
            })
            .collect();
        for probe in 0..50u32 {
            let ip = IpValue::from_u32(probe);
            assert_eq!(dbs[0].get(&ip), dbs[1].get(&ip), "mismatch at {}", probe);
        }
    }

    #[test]
    fn test_dropped_file_build_leaves_no_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("dropped.idx");
        {
            let mut b = DatabaseBuilder::new(
                ProviderKey::new("t"),
                &StorageStrategy::File {
                    path: path.clone(),
                    cache_capacity: 0,
                },
            )
            .unwrap();
            b.insert(record(1, 1, 2)).unwrap();
        }
        assert!(!path.exists());
    }
}
