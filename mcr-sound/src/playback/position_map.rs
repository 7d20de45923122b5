//! Piecewise-linear frame position map
//!
//! Translates positions between two frame counters that advance at related
//! but not identical rates. Each voice owns two maps:
//!
//! ```text
//! hardware frame ──[hardware→stream]──> stream frame ──[stream→source]──> source frame
//!   (device clock)     written by mix      (engine)     written by decode   (file position)
//! ```
//!
//! A map is an ordered run of segments `(base, frames, mapped, rate)`: keys in
//! `[base, base + frames)` map to `mapped + (key - base) * rate`. Lookups use
//! the last segment whose base is at or before the key and extrapolate past
//! its end by the same rate. A rate of 0.0 records a span during which the
//! mapped counter stood still (scheduled-start silence, pause, underrun).

use std::collections::VecDeque;
use tracing::warn;

/// Default segment capacity per map
pub const DEFAULT_MAP_CAPACITY: usize = 64;

/// One contiguous run of the map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapSegment {
    /// First key covered by this segment
    pub base: i64,

    /// Number of keys covered
    pub frames: i64,

    /// Value that `base` maps to
    pub mapped: i64,

    /// Mapped frames per key frame
    pub rate: f64,
}

impl MapSegment {
    /// One past the last key covered
    pub fn end(&self) -> i64 {
        self.base + self.frames
    }

    /// Map `key` through this segment, extrapolating outside its range
    pub fn map(&self, key: i64) -> i64 {
        self.mapped + ((key - self.base) as f64 * self.rate).round() as i64
    }

    fn continues(&self, base: i64, mapped: i64, rate: f64) -> bool {
        base == self.end() && (rate - self.rate).abs() < f64::EPSILON && mapped == self.map(base)
    }
}

/// Result of a map lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapLookup {
    /// Mapped frame
    pub frame: i64,

    /// True if the key fell inside a recorded segment, false if extrapolated
    pub exact: bool,
}

/// Bounded, append-only position map
#[derive(Debug, Clone)]
pub struct PositionMap {
    segments: VecDeque<MapSegment>,
    capacity: usize,
}

impl Default for PositionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionMap {
    /// Create a map holding up to [`DEFAULT_MAP_CAPACITY`] segments
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAP_CAPACITY)
    }

    /// Create a map holding up to `capacity` segments (minimum 1)
    ///
    /// Storage is allocated up front; inserts never allocate.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            segments: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a segment
    ///
    /// A segment that exactly continues the previous one is merged into it,
    /// so steady playback keeps a single segment. Keys must not go backwards;
    /// if they do, the history is discarded and the new segment starts a
    /// fresh map. When full, the oldest segment is evicted.
    pub fn insert(&mut self, base: i64, frames: i64, mapped: i64, rate: f64) {
        if frames <= 0 {
            return;
        }

        let held = self.segments.len();
        if let Some(last) = self.segments.back_mut() {
            if base < last.base {
                warn!(
                    "Position map key regressed ({} < {}), discarding {} segments",
                    base, last.base, held
                );
                self.segments.clear();
            } else if last.continues(base, mapped, rate) {
                last.frames += frames;
                return;
            }
        }

        if self.segments.len() == self.capacity {
            self.segments.pop_front();
        }

        self.segments.push_back(MapSegment {
            base,
            frames,
            mapped,
            rate,
        });
    }

    /// Map `key`, returning 0 when the map is empty
    pub fn search(&self, key: i64) -> i64 {
        self.lookup(key).map_or(0, |l| l.frame)
    }

    /// Map `key`, reporting whether it was inside a recorded segment
    ///
    /// Keys before the first segment extrapolate backwards from it.
    pub fn lookup(&self, key: i64) -> Option<MapLookup> {
        let idx = self.segments.partition_point(|s| s.base <= key);
        if idx == 0 {
            let first = self.segments.front()?;
            return Some(MapLookup {
                frame: first.map(key),
                exact: false,
            });
        }

        let seg = &self.segments[idx - 1];
        Some(MapLookup {
            frame: seg.map(key),
            exact: key < seg.end(),
        })
    }

    /// Drop segments that end at or before `key`
    ///
    /// The segment `key` resolves to (and everything after it) is kept, so
    /// lookups at or after `key` are unaffected.
    pub fn discard_before(&mut self, key: i64) {
        while self.segments.len() > 1 && self.segments[1].base <= key {
            if self.segments[0].end() > key {
                break;
            }
            self.segments.pop_front();
        }
    }

    /// Remove all segments
    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Number of stored segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Most recent segment
    pub fn last(&self) -> Option<&MapSegment> {
        self.segments.back()
    }

    /// Maximum number of stored segments
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
