//! Disk-backed range index
//!
//! Provider datasets with tens of millions of ranges do not fit comfortably
//! in RAM, so the `File` storage strategy streams ranges to disk in
//! ascending order and serves lookups from a memory map.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Header (40 bytes, little-endian)    │
//! ├──────────────────────────────────────┤
//! │  Records, ascending by start         │
//! │    start key │ end key │ u32 len │   │
//! │    payload bytes                     │
//! ├──────────────────────────────────────┤
//! │  Offset table: u64 per record        │
//! └──────────────────────────────────────┘
//! ```
//!
//! Keys use the length-prefixed encoding from [`codec`](crate::codec), so
//! IPv4 and IPv6 records share one file. The offset table is fixed width,
//! which makes the floor search a plain binary search over record indices.
//!
//! Records are written to a private temporary file next to the index, and
//! offsets to a sidecar beside it so memory use stays flat regardless of the
//! range count. Finishing appends the sidecar and renames the temporary file
//! over the index path, so an existing index (and any mapping of it) is left
//! untouched until the new one is complete, and a failed build leaves it in
//! place.
//!
//! The format is private to this crate. Only the write contract (ascending
//! appends) and the read contract (floor lookup) are guaranteed.

use crate::codec::{self, ByteReader};
use crate::database::IpDatabase;
use crate::error::{Error, Result};
use crate::info::InformationPayload;
use crate::ip::IpValue;
use lru::LruCache;
use memmap2::Mmap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::mem;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Magic bytes identifying a georange index
pub const MAGIC: &[u8; 8] = b"GEORANGE";

/// Current format version
pub const VERSION: u32 = 1;

const HEADER_LEN: usize = mem::size_of::<IndexHeader>();
const OFFSET_LEN: usize = mem::size_of::<u64>();

/// Index header (40 bytes, no padding)
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct IndexHeader {
    /// Magic bytes: "GEORANGE"
    pub magic: [u8; 8],
    /// Format version
    pub version: u32,
    /// Reserved for future use
    pub reserved: u32,
    /// Number of stored ranges
    pub entry_count: u64,
    /// Offset of the first record
    pub records_offset: u64,
    /// Offset of the offset table
    pub index_offset: u64,
}

impl IndexHeader {
    fn new(entry_count: u64, index_offset: u64) -> Self {
        Self {
            magic: *MAGIC,
            version: VERSION.to_le(),
            reserved: 0,
            entry_count: entry_count.to_le(),
            records_offset: (HEADER_LEN as u64).to_le(),
            index_offset: index_offset.to_le(),
        }
    }

    fn validate(&self, file_len: usize) -> Result<()> {
        if &self.magic != MAGIC {
            return Err(Error::InvalidIndex(format!(
                "bad magic: expected {:?}, got {:?}",
                MAGIC, self.magic
            )));
        }
        let version = u32::from_le(self.version);
        if version != VERSION {
            return Err(Error::InvalidIndex(format!("unsupported version {}", version)));
        }
        let count = u64::from_le(self.entry_count);
        let records = u64::from_le(self.records_offset);
        let index = u64::from_le(self.index_offset);
        let expected_len = count
            .checked_mul(OFFSET_LEN as u64)
            .and_then(|table| table.checked_add(index));
        if records != HEADER_LEN as u64 || index < records || expected_len != Some(file_len as u64) {
            return Err(Error::InvalidIndex(format!(
                "section bounds do not match file size {} (records {}, index {}, entries {})",
                file_len, records, index, count
            )));
        }
        Ok(())
    }
}

/// Streams ascending ranges into an index file
pub struct FileIndexWriter {
    path: PathBuf,
    building_path: PathBuf,
    sidecar_path: PathBuf,
    records: BufWriter<File>,
    offsets: BufWriter<File>,
    position: u64,
    count: u64,
    scratch: Vec<u8>,
}

impl FileIndexWriter {
    /// Start an index that will replace `path` once finished
    ///
    /// Nothing at `path` is touched until [`finish`](Self::finish).
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let building_path = building_path_for(&path);
        let sidecar_path = sidecar_for(&building_path);

        let mut records = BufWriter::new(
            OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&building_path)?,
        );
        // Placeholder, rewritten on finish
        records.write_all(&[0u8; HEADER_LEN])?;
        let offsets = match File::create(&sidecar_path) {
            Ok(file) => BufWriter::new(file),
            Err(e) => {
                drop(records);
                let _ = fs::remove_file(&building_path);
                return Err(e.into());
            }
        };

        Ok(Self {
            path,
            building_path,
            sidecar_path,
            records,
            offsets,
            position: HEADER_LEN as u64,
            count: 0,
            scratch: Vec::with_capacity(2 * codec::MAX_KEY_LEN + 256),
        })
    }

    /// Append one range; callers guarantee ascending, non-overlapping order
    pub fn append(&mut self, start: &IpValue, end: &IpValue, info: &InformationPayload) -> Result<()> {
        self.scratch.clear();
        codec::encode_key(start, &mut self.scratch);
        codec::encode_key(end, &mut self.scratch);
        let len_at = self.scratch.len();
        self.scratch.extend_from_slice(&[0u8; 4]);
        codec::encode_payload(info, &mut self.scratch);
        let payload_len = (self.scratch.len() - len_at - 4) as u32;
        self.scratch[len_at..len_at + 4].copy_from_slice(&payload_len.to_le_bytes());

        self.offsets.write_all(&self.position.to_le_bytes())?;
        self.records.write_all(&self.scratch)?;
        self.position += self.scratch.len() as u64;
        self.count += 1;
        Ok(())
    }

    /// Number of ranges written so far
    pub fn len(&self) -> u64 {
        self.count
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append the offset table, write the header and move the index into place
    ///
    /// Returns the path of the finished index. On error the temporary files
    /// are removed and any previous index at the path is kept.
    pub fn finish(self) -> Result<PathBuf> {
        let FileIndexWriter {
            path,
            building_path,
            sidecar_path,
            records,
            offsets,
            position,
            count,
            ..
        } = self;

        let written = seal(records, offsets, &sidecar_path, IndexHeader::new(count, position))
            .and_then(|()| fs::rename(&building_path, &path).map_err(Error::from));
        if let Err(e) = written {
            remove_partial(&[&building_path, &sidecar_path]);
            return Err(e);
        }

        log::debug!("wrote {} ranges to {}", count, path.display());
        Ok(path)
    }

    /// Discard the partially written index, keeping whatever was at the path before
    pub fn abort(self) {
        let FileIndexWriter {
            building_path,
            sidecar_path,
            records,
            offsets,
            ..
        } = self;
        drop(records);
        drop(offsets);
        remove_partial(&[&building_path, &sidecar_path]);
    }
}

fn seal(records: BufWriter<File>, offsets: BufWriter<File>, sidecar_path: &Path, header: IndexHeader) -> Result<()> {
    offsets.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    let mut file = records.into_inner().map_err(|e| e.into_error())?;

    let mut sidecar = File::open(sidecar_path)?;
    io::copy(&mut sidecar, &mut file)?;
    drop(sidecar);
    fs::remove_file(sidecar_path)?;

    file.seek(SeekFrom::Start(0))?;
    file.write_all(header.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn remove_partial(paths: &[&Path]) {
    for p in paths {
        match fs::remove_file(p) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("failed to remove partial index {}: {}", p.display(), e),
        }
    }
}

/// Unique temporary path beside `path`, so concurrent builders never share one
fn building_path_for(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".{}.{}.building", std::process::id(), NEXT.fetch_add(1, Ordering::Relaxed)));
    PathBuf::from(name)
}

fn sidecar_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".offsets.tmp");
    PathBuf::from(name)
}

/// Memory-mapped, read-only range index
///
/// Safe for any number of concurrent readers. The optional LRU cache
/// memoizes decoded payloads by record index.
pub struct FileDatabase {
    mmap: Mmap,
    entry_count: usize,
    index_offset: usize,
    cache: Option<Mutex<LruCache<usize, InformationPayload>>>,
}

impl FileDatabase {
    /// Open and validate an index file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, is too small,
    /// or its header does not describe the file's actual layout.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: finished indexes are never written again; a rebuild renames a
        // new file over the path, which leaves this mapping's inode intact
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN {
            return Err(Error::InvalidIndex(format!(
                "file too small: {} bytes (need at least {})",
                mmap.len(),
                HEADER_LEN
            )));
        }
        let (header, _) = IndexHeader::read_from_prefix(&mmap[..])
            .map_err(|_| Error::InvalidIndex("unreadable header".to_string()))?;
        header.validate(mmap.len())?;

        let entry_count = usize::try_from(u64::from_le(header.entry_count))
            .map_err(|_| Error::InvalidIndex("entry count exceeds address space".to_string()))?;
        let index_offset = usize::try_from(u64::from_le(header.index_offset))
            .map_err(|_| Error::InvalidIndex("index offset exceeds address space".to_string()))?;

        Ok(Self {
            mmap,
            entry_count,
            index_offset,
            cache: None,
        })
    }

    /// Cache up to `capacity` decoded payloads; zero disables caching
    pub fn with_cache(mut self, capacity: usize) -> Self {
        self.cache = NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        self
    }

    /// Number of stored ranges
    pub fn len(&self) -> usize {
        self.entry_count
    }

    /// Whether no ranges are stored
    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    fn record_offset(&self, idx: usize) -> Result<usize> {
        let at = self.index_offset + idx * OFFSET_LEN;
        let bytes = self
            .mmap
            .get(at..at + OFFSET_LEN)
            .ok_or_else(|| Error::InvalidIndex(format!("offset slot {} out of bounds", idx)))?;
        let mut raw = [0u8; OFFSET_LEN];
        raw.copy_from_slice(bytes);
        let offset = u64::from_le_bytes(raw) as usize;
        if offset < HEADER_LEN || offset >= self.index_offset {
            return Err(Error::InvalidIndex(format!("record offset {} out of bounds", offset)));
        }
        Ok(offset)
    }

    fn record(&self, idx: usize) -> Result<ByteReader<'_>> {
        let offset = self.record_offset(idx)?;
        Ok(ByteReader::new(&self.mmap[offset..self.index_offset]))
    }

    fn start_of(&self, idx: usize) -> Result<IpValue> {
        self.record(idx)?.read_key()
    }

    /// Greatest record index whose start is `<= ip`
    fn floor(&self, ip: &IpValue) -> Result<Option<usize>> {
        let (mut lo, mut hi) = (0usize, self.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.start_of(mid)? <= *ip {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo.checked_sub(1))
    }

    fn lookup(&self, ip: &IpValue) -> Result<Option<InformationPayload>> {
        let idx = match self.floor(ip)? {
            Some(idx) => idx,
            None => return Ok(None),
        };

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(info) = cache.get(&idx) {
                return Ok(info.range().contains(ip).then(|| info.clone()));
            }
        }

        let mut reader = self.record(idx)?;
        let _start = reader.read_key()?;
        let end = reader.read_key()?;
        if *ip > end {
            return Ok(None);
        }
        let len = reader.read_u32()? as usize;
        let offset = self.record_offset(idx)? + reader.position();
        let payload = self
            .mmap
            .get(offset..offset + len)
            .filter(|_| offset + len <= self.index_offset)
            .ok_or_else(|| Error::InvalidIndex(format!("payload of record {} out of bounds", idx)))?;
        let info = codec::decode_payload(payload)?;

        if let Some(cache) = &self.cache {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            cache.put(idx, info.clone());
        }
        Ok(Some(info))
    }
}

impl IpDatabase for FileDatabase {
    fn get(&self, ip: &IpValue) -> Option<InformationPayload> {
        match self.lookup(ip) {
            Ok(found) => found,
            Err(e) => {
                log::error!("index lookup for {} failed: {}", ip, e);
                None
            }
        }
    }

    fn range_count(&self) -> Option<usize> {
        Some(self.entry_count)
    }
}

impl fmt::Debug for FileDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDatabase")
            .field("size", &self.mmap.len())
            .field("entry_count", &self.entry_count)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::TriState;
    use crate::ip::IpRange;
    use tempfile::TempDir;

    fn ip(s: &str) -> IpValue {
        s.parse().unwrap()
    }

    /// Files in `dir` other than finished `.idx` indexes
    fn leftovers(dir: &TempDir) -> Vec<String> {
        fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| !name.ends_with(".idx"))
            .collect()
    }

    fn write_index(dir: &TempDir, ranges: &[(&str, &str, &str)]) -> PathBuf {
        let mut writer = FileIndexWriter::create(dir.path().join("test.idx")).unwrap();
        for (start, end, cc) in ranges {
            let range = IpRange::new(ip(start), ip(end)).unwrap();
            let info = InformationPayload::new(range)
                .with_country_code(*cc)
                .with_vpn(TriState::False);
            writer.append(&range.start, &range.end, &info).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn test_write_and_lookup_mixed_families() {
        let dir = TempDir::new().unwrap();
        let path = write_index(
            &dir,
            &[
                ("1.0.0.0", "1.0.0.255", "AU"),
                ("1.0.4.0", "1.0.7.255", "AU"),
                ("2001:db8::", "2001:db8::ffff", "NL"),
            ],
        );
        assert_eq!(leftovers(&dir), Vec::<String>::new());

        let db = FileDatabase::open(&path).unwrap();
        assert_eq!(db.len(), 3);
        assert_eq!(db.get(&ip("1.0.0.7")).unwrap().country_code(), Some("AU"));
        assert!(db.get(&ip("1.0.1.0")).is_none());
        assert!(db.get(&ip("0.255.255.255")).is_none());
        let v6 = db.get(&ip("2001:db8::1")).unwrap();
        assert_eq!(v6.country_code(), Some("NL"));
        assert_eq!(v6.vpn(), TriState::False);
        assert!(db.get(&ip("2001:db8::1:0")).is_none());
    }

    #[test]
    fn test_cache_returns_same_results() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[("10.0.0.0", "10.0.0.9", "AA"), ("10.0.0.20", "10.0.0.29", "BB")]);
        let db = FileDatabase::open(&path).unwrap().with_cache(4);
        for _ in 0..3 {
            assert_eq!(db.get(&ip("10.0.0.5")).unwrap().country_code(), Some("AA"));
            assert!(db.get(&ip("10.0.0.15")).is_none());
            assert_eq!(db.get(&ip("10.0.0.29")).unwrap().country_code(), Some("BB"));
        }
    }

    #[test]
    fn test_empty_index() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[]);
        let db = FileDatabase::open(&path).unwrap();
        assert!(db.is_empty());
        assert!(db.get(&ip("1.1.1.1")).is_none());
    }

    #[test]
    fn test_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[("10.0.0.0", "10.0.0.9", "AA")]);
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(FileDatabase::open(&path), Err(Error::InvalidIndex(_))));

        fs::write(&path, &bytes[..10]).unwrap();
        assert!(matches!(FileDatabase::open(&path), Err(Error::InvalidIndex(_))));
    }

    #[test]
    fn test_rejects_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[("10.0.0.0", "10.0.0.9", "AA")]);
        let mut bytes = fs::read(&path).unwrap();
        bytes[0..8].copy_from_slice(b"NOTANIDX");
        fs::write(&path, &bytes).unwrap();
        assert!(matches!(FileDatabase::open(&path), Err(Error::InvalidIndex(_))));
    }

    #[test]
    fn test_abort_removes_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.idx");
        let mut writer = FileIndexWriter::create(&path).unwrap();
        let range = IpRange::new(ip("10.0.0.0"), ip("10.0.0.9")).unwrap();
        writer
            .append(&range.start, &range.end, &InformationPayload::new(range))
            .unwrap();
        writer.abort();
        assert!(!path.exists());
        assert_eq!(leftovers(&dir), Vec::<String>::new());
    }

    #[test]
    fn test_rebuild_keeps_live_mapping_valid() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[("10.0.0.0", "10.0.0.9", "AA"), ("10.0.0.20", "10.0.0.29", "BB")]);
        let live = FileDatabase::open(&path).unwrap();

        // Started but unfinished: the old file must not have been truncated
        let mut rebuild = FileIndexWriter::create(&path).unwrap();
        assert_eq!(live.get(&ip("10.0.0.25")).unwrap().country_code(), Some("BB"));

        let range = IpRange::new(ip("10.0.0.0"), ip("10.0.0.255")).unwrap();
        rebuild
            .append(&range.start, &range.end, &InformationPayload::new(range).with_country_code("CC"))
            .unwrap();
        rebuild.finish().unwrap();

        assert_eq!(live.len(), 2);
        assert_eq!(live.get(&ip("10.0.0.5")).unwrap().country_code(), Some("AA"));
        assert!(live.get(&ip("10.0.0.15")).is_none());

        let fresh = FileDatabase::open(&path).unwrap();
        assert_eq!(fresh.len(), 1);
        assert_eq!(fresh.get(&ip("10.0.0.15")).unwrap().country_code(), Some("CC"));
        assert_eq!(leftovers(&dir), Vec::<String>::new());
    }

    #[test]
    fn test_aborted_rebuild_keeps_previous_index() {
        let dir = TempDir::new().unwrap();
        let path = write_index(&dir, &[("10.0.0.0", "10.0.0.9", "AA")]);
        let before = fs::read(&path).unwrap();

        let mut rebuild = FileIndexWriter::create(&path).unwrap();
        let range = IpRange::new(ip("10.0.0.0"), ip("10.0.0.255")).unwrap();
        rebuild
            .append(&range.start, &range.end, &InformationPayload::new(range))
            .unwrap();
        rebuild.abort();

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(FileDatabase::open(&path).unwrap().get(&ip("10.0.0.3")).unwrap().country_code(), Some("AA"));
        assert_eq!(leftovers(&dir), Vec::<String>::new());
    }

    #[test]
    fn test_concurrent_writers_use_separate_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.idx");
        let first = FileIndexWriter::create(&path).unwrap();
        let second = FileIndexWriter::create(&path).unwrap();
        assert_ne!(first.building_path, second.building_path);
        first.abort();
        second.abort();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_nonexistent_file() {
        let result = FileDatabase::open("/nonexistent/path/to/index.georange");
        assert!(matches!(result, Err(Error::Io(_))));
    }
}
