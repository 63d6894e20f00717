//! Range database lookup API
//!
//! Every provider is queried through the [`IpDatabase`] trait, whether its
//! data was built by this crate ([`MemoryDatabase`],
//! [`FileDatabase`](crate::file_index::FileDatabase)) or comes from a
//! third-party reader wrapped by the caller.
//!
//! Lookups are a floor search: find the stored range with the greatest start
//! `<= ip`, then check `ip` against that range's end. Addresses falling in a
//! gap between ranges have no result.

use crate::info::InformationPayload;
use crate::ip::IpValue;
use std::sync::Arc;

/// A frozen, read-only IP → payload index
///
/// Lookups never fail: an address without a covering range is `None`.
pub trait IpDatabase: Send + Sync {
    /// Payload of the range covering `ip`
    fn get(&self, ip: &IpValue) -> Option<InformationPayload>;

    /// Number of stored ranges, when the implementation knows it
    fn range_count(&self) -> Option<usize> {
        None
    }
}

impl<T: IpDatabase + ?Sized> IpDatabase for Arc<T> {
    fn get(&self, ip: &IpValue) -> Option<InformationPayload> {
        (**self).get(ip)
    }

    fn range_count(&self) -> Option<usize> {
        (**self).range_count()
    }
}

impl<T: IpDatabase + ?Sized> IpDatabase for Box<T> {
    fn get(&self, ip: &IpValue) -> Option<InformationPayload> {
        (**self).get(ip)
    }

    fn range_count(&self) -> Option<usize> {
        (**self).range_count()
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    start: IpValue,
    end: IpValue,
    info: InformationPayload,
}

/// In-process sorted range index
///
/// Entries live in a `Vec` sorted by start; the builder appends them in
/// ascending order, so no sorting happens at freeze time.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    entries: Vec<MemoryEntry>,
}

impl MemoryDatabase {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve room for `additional` ranges
    pub fn reserve(&mut self, additional: usize) {
        self.entries.reserve(additional);
    }

    /// Append a range; callers guarantee `start` follows the previous end
    pub(crate) fn push(&mut self, start: IpValue, end: IpValue, info: InformationPayload) {
        debug_assert!(self.entries.last().map_or(true, |last| last.end < start));
        self.entries.push(MemoryEntry { start, end, info });
    }

    /// Number of stored ranges
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no ranges are stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate stored ranges in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (IpValue, IpValue, &InformationPayload)> {
        self.entries.iter().map(|e| (e.start, e.end, &e.info))
    }
}

impl IpDatabase for MemoryDatabase {
    fn get(&self, ip: &IpValue) -> Option<InformationPayload> {
        let idx = self.entries.partition_point(|e| e.start <= *ip);
        let entry = &self.entries[idx.checked_sub(1)?];
        if *ip <= entry.end {
            Some(entry.info.clone())
        } else {
            None
        }
    }

    fn range_count(&self) -> Option<usize> {
        Some(self.entries.len())
    }
}
