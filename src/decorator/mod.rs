//! Sweep-line range overlay
//!
//! A decorator overlays one or more secondary range collections (for example
//! a VPN exit-node list) onto the primary, sorted range stream of a provider.
//! Every primary range is cut wherever the coverage status of a decorator
//! collection changes, and each piece is rewritten by [`DecorationRules`]:
//! `on_match` for pieces inside an active decorator range, `on_miss` for the
//! rest.
//!
//! ```text
//! primary    [10 ...................................... 50]
//! decorator            [20 ........ 30]
//! output     [10 .. 19][20 ........ 30][31 ............ 50]
//!               miss        match            miss
//! ```
//!
//! The pieces of one primary range reconstruct its span exactly, and the
//! output stays ascending and non-overlapping because each decorator cursor
//! only moves forward.
//!
//! # Example
//!
//! ```rust
//! use georange::decorator::{DecoratorEngine, DecoratorRange, VpnDecoration};
//! use georange::decorator::source::DecoratorReader;
//! use georange::{InformationPayload, IpRange, RangeRecord, RawLine, TriState};
//!
//! let vpn = DecoratorReader::from_ranges(vec![DecoratorRange::new(
//!     "10.0.0.20".parse()?,
//!     "10.0.0.30".parse()?,
//!     TriState::True,
//! )?]);
//! let mut engine = DecoratorEngine::new(vec![vpn], VpnDecoration);
//!
//! let range = IpRange::new("10.0.0.10".parse()?, "10.0.0.50".parse()?)?;
//! let record = RangeRecord::new(range.start, range.end, InformationPayload::new(range), RawLine::new(1, ""))?;
//!
//! let pieces = engine.decorate(&record);
//! assert_eq!(pieces.len(), 3);
//! assert_eq!(pieces[1].info().vpn(), TriState::True);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod source;

use crate::error::Result;
use crate::info::{InformationPayload, TriState};
use crate::ip::{IpRange, IpValue};
use crate::record::RangeRecord;
use serde::{Deserialize, Serialize};
use source::DecoratorReader;
use std::collections::VecDeque;

/// One secondary range carrying decorator data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoratorRange<T> {
    /// First covered address
    pub start: IpValue,
    /// Last covered address
    pub end: IpValue,
    /// Decorator data handed to [`DecorationRules::on_match`]
    pub info: T,
}

impl<T> DecoratorRange<T> {
    /// Create a decorator range, validating the bounds
    pub fn new(start: IpValue, end: IpValue, info: T) -> Result<Self> {
        IpRange::new(start, end)?;
        Ok(Self { start, end, info })
    }

    /// Bounds as a range
    pub fn range(&self) -> IpRange {
        IpRange {
            start: self.start,
            end: self.end,
        }
    }
}

/// Payload rewrite applied to every emitted piece
pub trait DecorationRules<T> {
    /// Rewrite a piece covered by a decorator range
    fn on_match(&self, payload: InformationPayload, info: &T, start: IpValue, end: IpValue) -> InformationPayload;

    /// Rewrite a piece no decorator range covers
    fn on_miss(&self, payload: InformationPayload, start: IpValue, end: IpValue) -> InformationPayload;
}

/// Marks pieces covered by a VPN list
///
/// Covered pieces take the decorator's flag (normally [`TriState::True`]),
/// uncovered pieces become [`TriState::False`].
#[derive(Debug, Clone, Copy, Default)]
pub struct VpnDecoration;

impl DecorationRules<TriState> for VpnDecoration {
    fn on_match(&self, payload: InformationPayload, info: &TriState, start: IpValue, end: IpValue) -> InformationPayload {
        payload.with_vpn(*info).with_range(start, end)
    }

    fn on_miss(&self, payload: InformationPayload, start: IpValue, end: IpValue) -> InformationPayload {
        payload.with_vpn(TriState::False).with_range(start, end)
    }
}

/// How simultaneously active decorator collections combine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinePolicy {
    /// Any active collection marks the piece; the earliest registered supplies the data
    #[default]
    Union,
    /// Any active collection marks the piece; later collections override earlier ones
    Priority,
    /// Every collection must be active; the earliest registered supplies the data
    Intersection,
}

impl CombinePolicy {
    /// Pick the decorator data for a piece from the per-collection states
    pub fn select<'a, T>(&self, active: &[Option<&'a T>]) -> Option<&'a T> {
        match self {
            CombinePolicy::Union => active.iter().flatten().copied().next(),
            CombinePolicy::Priority => active.iter().rev().flatten().copied().next(),
            CombinePolicy::Intersection => {
                if active.is_empty() || active.iter().any(Option::is_none) {
                    None
                } else {
                    active.iter().flatten().copied().next()
                }
            }
        }
    }
}

/// Forward-only position of one decorator collection
struct Cursor<T> {
    reader: DecoratorReader<T>,
    active: Option<DecoratorRange<T>>,
}

impl<T> Cursor<T> {
    /// Move to `pos`, dropping every range that ends before it
    fn advance(&mut self, pos: IpValue) {
        if self.active.as_ref().is_some_and(|d| d.end < pos) {
            self.active = None;
        }
        if self.active.is_some() {
            return;
        }
        while self.reader.peek().is_some_and(|d| d.end < pos) {
            self.reader.next();
        }
        if self.reader.peek().is_some_and(|d| d.start <= pos) {
            self.active = self.reader.next();
        }
    }

    /// Decorator data covering `pos`, after [`advance`](Self::advance)
    fn covering(&self, pos: IpValue) -> Option<&T> {
        self.active.as_ref().filter(|d| d.start <= pos).map(|d| &d.info)
    }

    /// First address after `pos` at which the coverage status changes, `None` if never
    fn next_change(&mut self, pos: IpValue) -> Option<IpValue> {
        match &self.active {
            Some(d) if d.start > pos => Some(d.start),
            Some(d) => d.end.successor(),
            None => self.reader.peek().map(|d| d.start),
        }
    }
}

/// Sweep-line decorator over ascending primary records
///
/// Primary records must be fed in ascending, non-overlapping order. A record
/// that goes backwards only sees the decorator ranges the cursors have not
/// yet passed.
pub struct DecoratorEngine<T, R> {
    cursors: Vec<Cursor<T>>,
    rules: R,
    policy: CombinePolicy,
}

impl<T, R: DecorationRules<T>> DecoratorEngine<T, R> {
    /// Engine over the given decorator collections with the default [`CombinePolicy::Union`]
    pub fn new(collections: Vec<DecoratorReader<T>>, rules: R) -> Self {
        Self {
            cursors: collections
                .into_iter()
                .map(|reader| Cursor { reader, active: None })
                .collect(),
            rules,
            policy: CombinePolicy::default(),
        }
    }

    /// Use a different combination policy
    pub fn with_policy(mut self, policy: CombinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Combination policy in use
    pub fn policy(&self) -> CombinePolicy {
        self.policy
    }

    /// Split `record` at every decorator boundary, handing each piece to `sink` in order
    ///
    /// Stops at the first error returned by `sink`.
    pub fn decorate_into<F>(&mut self, record: &RangeRecord, mut sink: F) -> Result<()>
    where
        F: FnMut(RangeRecord) -> Result<()>,
    {
        let end = record.end();
        let mut pos = record.start();

        loop {
            for cursor in &mut self.cursors {
                cursor.advance(pos);
            }

            let cut = self
                .cursors
                .iter_mut()
                .filter_map(|c| c.next_change(pos))
                .filter(|b| *b > pos && *b <= end)
                .min();
            let piece_end = cut.and_then(|b| b.predecessor()).unwrap_or(end);

            let states: Vec<Option<&T>> = self.cursors.iter().map(|c| c.covering(pos)).collect();
            let payload = record.info().clone();
            let payload = match self.policy.select(&states) {
                Some(info) => self.rules.on_match(payload, info, pos, piece_end),
                None => self.rules.on_miss(payload, pos, piece_end),
            };

            sink(RangeRecord::split_from(
                record,
                pos,
                piece_end,
                payload.with_range(pos, piece_end),
            ))?;

            match piece_end.successor() {
                Some(next) if piece_end < end => pos = next,
                _ => return Ok(()),
            }
        }
    }

    /// Split `record` at every decorator boundary
    pub fn decorate(&mut self, record: &RangeRecord) -> Vec<RangeRecord> {
        let mut pieces = Vec::new();
        // The sink never fails
        let _ = self.decorate_into(record, |piece| {
            pieces.push(piece);
            Ok(())
        });
        pieces
    }

    /// Decorate an ascending record stream lazily
    pub fn decorate_iter<I>(self, records: I) -> Decorated<I::IntoIter, T, R>
    where
        I: IntoIterator<Item = RangeRecord>,
    {
        Decorated {
            inner: records.into_iter(),
            engine: self,
            pending: VecDeque::new(),
        }
    }
}

/// Type-erased decorator, as used by the ingest pipeline
pub trait RecordDecorator {
    /// Split `record`, handing each piece to `sink` in ascending order
    fn decorate_record(&mut self, record: &RangeRecord, sink: &mut dyn FnMut(RangeRecord) -> Result<()>) -> Result<()>;
}

impl<T, R: DecorationRules<T>> RecordDecorator for DecoratorEngine<T, R> {
    fn decorate_record(&mut self, record: &RangeRecord, sink: &mut dyn FnMut(RangeRecord) -> Result<()>) -> Result<()> {
        self.decorate_into(record, sink)
    }
}

/// Iterator returned by [`DecoratorEngine::decorate_iter`]
pub struct Decorated<I, T, R> {
    inner: I,
    engine: DecoratorEngine<T, R>,
    pending: VecDeque<RangeRecord>,
}

impl<I, T, R> Iterator for Decorated<I, T, R>
where
    I: Iterator<Item = RangeRecord>,
    R: DecorationRules<T>,
{
    type Item = RangeRecord;

    fn next(&mut self) -> Option<RangeRecord> {
        loop {
            if let Some(piece) = self.pending.pop_front() {
                return Some(piece);
            }
            let record = self.inner.next()?;
            self.pending.extend(self.engine.decorate(&record));
        }
    }
}
