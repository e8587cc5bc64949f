//! # Ring Sampler
//!
//! ## Responsibility
//! Holds the most recent audio meter readings for one tracked source and
//! reduces them to a per-scrape summary.
//!
//! ## Guarantees
//! - Bounded: every ring has a fixed number of slots chosen at creation time
//! - A fresh ring is filled with `-inf`, so an untouched ring never reports a
//!   real-looking level
//! - All three measurement kinds of a channel share one write cursor and are
//!   written to the same slot by a single [`SampleWindow::record`] call
//!
//! ## NOT Responsible For
//! - Locking (the owning [`TrackedEntity`](crate::registry::TrackedEntity)
//!   wraps the window in its own mutex)

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default number of slots per ring.
pub const DEFAULT_CAPACITY: usize = 32;

/// Value every slot holds before the first real sample lands in it.
pub const SENTINEL: f64 = f64::NEG_INFINITY;

// ---------------------------------------------------------------------------
// Measurement kinds
// ---------------------------------------------------------------------------

/// The three readings an audio meter reports per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasurementKind {
    Magnitude,
    Peak,
    InputPeak,
}

impl MeasurementKind {
    pub const ALL: [MeasurementKind; 3] = [
        MeasurementKind::Magnitude,
        MeasurementKind::Peak,
        MeasurementKind::InputPeak,
    ];

    fn index(self) -> usize {
        match self {
            MeasurementKind::Magnitude => 0,
            MeasurementKind::Peak => 1,
            MeasurementKind::InputPeak => 2,
        }
    }
}

impl std::fmt::Display for MeasurementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MeasurementKind::Magnitude => "magnitude",
            MeasurementKind::Peak => "peak",
            MeasurementKind::InputPeak => "input_peak",
        };
        write!(f, "{s}")
    }
}

/// One meter reading for one channel, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelLevels {
    pub magnitude: f64,
    pub peak: f64,
    pub input_peak: f64,
}

impl ChannelLevels {
    pub fn new(magnitude: f64, peak: f64, input_peak: f64) -> Self {
        Self { magnitude, peak, input_peak }
    }

    pub fn get(&self, kind: MeasurementKind) -> f64 {
        match kind {
            MeasurementKind::Magnitude => self.magnitude,
            MeasurementKind::Peak => self.peak,
            MeasurementKind::InputPeak => self.input_peak,
        }
    }
}

// ---------------------------------------------------------------------------
// RingSampler
// ---------------------------------------------------------------------------

/// Fixed-capacity circular buffer of `f64` samples.
///
/// The ring has no cursor of its own; the position is owned by the
/// [`SampleWindow`] so that sibling rings stay in lockstep.
#[derive(Debug, Clone)]
pub struct RingSampler {
    slots: Box<[f64]>,
}

impl RingSampler {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RingSampler capacity must be > 0");
        Self {
            slots: vec![SENTINEL; capacity].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Overwrite the slot at `pos` (taken modulo the capacity).
    pub fn write(&mut self, pos: usize, value: f64) {
        let cap = self.slots.len();
        self.slots[pos % cap] = value;
    }

    /// Maximum of the current contents. `-inf` until a real sample exceeds it.
    pub fn max(&self) -> f64 {
        self.slots.iter().copied().fold(SENTINEL, f64::max)
    }
}

// ---------------------------------------------------------------------------
// SampleWindow
// ---------------------------------------------------------------------------

/// Why a push was rejected by [`SampleWindow::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// Fewer channel readings than the window tracks.
    TooFewChannels { expected: usize, got: usize },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::TooFewChannels { expected, got } => {
                write!(f, "expected {expected} channel readings, got {got}")
            }
        }
    }
}

/// The ring set of one tracked source: one [`RingSampler`] per
/// (channel, measurement kind), sharing a single write cursor.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    rings: Vec<[RingSampler; 3]>,
    cursor: usize,
    capacity: usize,
}

impl SampleWindow {
    /// # Panics
    ///
    /// Panics if `capacity` is zero, even when `channels` is zero.
    pub fn new(channels: usize, capacity: usize) -> Self {
        assert!(capacity > 0, "SampleWindow capacity must be > 0");
        let rings = (0..channels)
            .map(|_| {
                [
                    RingSampler::new(capacity),
                    RingSampler::new(capacity),
                    RingSampler::new(capacity),
                ]
            })
            .collect();
        Self { rings, cursor: 0, capacity }
    }

    pub fn channels(&self) -> usize {
        self.rings.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slot the next [`record`](Self::record) call will write.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Store one meter callback's worth of readings and advance the cursor.
    ///
    /// Readings past the tracked channel count are ignored. A short slice is
    /// rejected without touching any ring.
    pub fn record(&mut self, levels: &[ChannelLevels]) -> Result<(), RecordError> {
        if levels.len() < self.rings.len() {
            return Err(RecordError::TooFewChannels {
                expected: self.rings.len(),
                got: levels.len(),
            });
        }
        let pos = self.cursor;
        for (rings, reading) in self.rings.iter_mut().zip(levels) {
            for kind in MeasurementKind::ALL {
                rings[kind.index()].write(pos, reading.get(kind));
            }
        }
        self.cursor = (self.cursor + 1) % self.capacity;
        Ok(())
    }

    /// Maximum currently held for `(channel, kind)`, or `None` for an
    /// untracked channel.
    pub fn reduce(&self, channel: usize, kind: MeasurementKind) -> Option<f64> {
        self.rings.get(channel).map(|r| r[kind.index()].max())
    }
}
