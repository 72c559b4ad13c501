//! Binary mask codec.
//!
//! Masks travel as `{size: [height, width], counts: "<rle>"}`: column-major run
//! lengths (starting with a background run) packed into printable characters, five
//! bits per character with a continuation flag, and each run after the second stored
//! as a delta against the run two positions earlier.

use std::fmt;

use bitvec::vec::BitVec;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Characters per run length. Keeps the decoded value within 60 bits.
const MAX_CHARS_PER_RUN: usize = 12;
const CHAR_BASE: u8 = 48;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaskError {
    #[error("invalid run-length character {byte:#04x} at offset {offset}")]
    InvalidCharacter { offset: usize, byte: u8 },

    #[error("run-length payload ends inside a run at offset {offset}")]
    Truncated { offset: usize },

    #[error("run length starting at offset {offset} is too long")]
    Overflow { offset: usize },

    #[error("a {height}x{width} mask has more pixels than fit in memory")]
    TooLarge { height: usize, width: usize },

    #[error("run {run} has a negative length")]
    NegativeRun { run: usize },

    #[error("run lengths cover {found} pixels but a {height}x{width} mask has {expected}")]
    SizeMismatch {
        height: usize,
        width: usize,
        expected: usize,
        found: u64,
    },
}

/// Raw per-pixel binary mask, stored row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct BinaryMask {
    height: usize,
    width: usize,
    bits: BitVec,
}

impl BinaryMask {
    /// Creates an all-background mask.
    #[must_use]
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            bits: BitVec::repeat(false, height * width),
        }
    }

    #[must_use]
    pub fn from_fn(height: usize, width: usize, mut f: impl FnMut(usize, usize) -> bool) -> Self {
        let mut bits = BitVec::with_capacity(height * width);
        for row in 0..height {
            for col in 0..width {
                bits.push(f(row, col));
            }
        }

        Self {
            height,
            width,
            bits,
        }
    }

    /// Thresholds model logits: a pixel is foreground when its logit is positive.
    #[must_use]
    pub fn from_logits(logits: ArrayView2<'_, f32>) -> Self {
        let (height, width) = logits.dim();
        Self::from_fn(height, width, |row, col| logits[[row, col]] > 0.0)
    }

    #[must_use]
    pub fn from_array(mask: ArrayView2<'_, bool>) -> Self {
        let (height, width) = mask.dim();
        Self::from_fn(height, width, |row, col| mask[[row, col]])
    }

    #[must_use]
    pub fn to_array(&self) -> Array2<bool> {
        Array2::from_shape_fn((self.height, self.width), |(row, col)| self.get(row, col))
    }

    /// Returns `(height, width)`.
    #[must_use]
    pub fn size(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// # Panics
    ///
    /// Panics when the pixel lies outside the mask.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[self.offset(row, col)]
    }

    /// # Panics
    ///
    /// Panics when the pixel lies outside the mask.
    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        let offset = self.offset(row, col);
        self.bits.set(offset, value);
    }

    /// Number of foreground pixels.
    #[must_use]
    pub fn area(&self) -> usize {
        self.bits.count_ones()
    }

    fn offset(&self, row: usize, col: usize) -> usize {
        assert!(
            row < self.height && col < self.width,
            "pixel ({row}, {col}) outside {}x{} mask",
            self.height,
            self.width
        );
        row * self.width + col
    }
}

impl fmt::Debug for BinaryMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BinaryMask")
            .field("height", &self.height)
            .field("width", &self.width)
            .field("area", &self.area())
            .finish()
    }
}

/// Encoded mask as it appears on the wire and in the journal.
///
/// Deserializing validates the payload against the declared size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MaskFields")]
pub struct Mask {
    size: [usize; 2],
    counts: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MaskFields {
    size: [usize; 2],
    counts: String,
}

impl TryFrom<MaskFields> for Mask {
    type Error = MaskError;

    fn try_from(fields: MaskFields) -> Result<Self, Self::Error> {
        Self::new(fields.size, fields.counts)
    }
}

impl Mask {
    /// Creates a mask from its wire fields, validating the run lengths.
    pub fn new(size: [usize; 2], counts: impl Into<String>) -> Result<Self, MaskError> {
        let mask = Self {
            size,
            counts: counts.into(),
        };
        checked_runs(&mask)?;
        Ok(mask)
    }

    /// Returns `[height, width]`.
    #[must_use]
    pub fn size(&self) -> [usize; 2] {
        self.size
    }

    #[must_use]
    pub fn counts(&self) -> &str {
        &self.counts
    }

    pub fn decode(&self) -> Result<BinaryMask, MaskError> {
        decode(self)
    }
}

/// Encodes a binary mask.
#[must_use]
pub fn encode(mask: &BinaryMask) -> Mask {
    Mask {
        size: [mask.height, mask.width],
        counts: runs_to_string(&run_lengths(mask)),
    }
}

/// Decodes an encoded mask; exact inverse of [`encode`].
pub fn decode(mask: &Mask) -> Result<BinaryMask, MaskError> {
    let runs = checked_runs(mask)?;
    let [height, width] = mask.size;
    let mut decoded = BinaryMask::new(height, width);

    let mut position = 0usize;
    let mut value = false;
    for run in runs {
        // Runs are already checked against the pixel count, so they fit in usize.
        let run = run as usize;
        if value {
            for index in position..position + run {
                decoded.set(index % height, index / height, true);
            }
        }
        position += run;
        value = !value;
    }

    Ok(decoded)
}

fn checked_runs(mask: &Mask) -> Result<Vec<u64>, MaskError> {
    let runs = runs_from_string(&mask.counts)?;
    let [height, width] = mask.size;
    let expected = height
        .checked_mul(width)
        .ok_or(MaskError::TooLarge { height, width })?;
    let found = runs.iter().try_fold(0u64, |total, run| total.checked_add(*run));

    match found {
        Some(found) if found == expected as u64 => Ok(runs),
        found => Err(MaskError::SizeMismatch {
            height,
            width,
            expected,
            found: found.unwrap_or(u64::MAX),
        }),
    }
}

fn run_lengths(mask: &BinaryMask) -> Vec<u64> {
    let mut runs = Vec::new();
    let mut current = false;
    let mut run = 0u64;

    for col in 0..mask.width {
        for row in 0..mask.height {
            let value = mask.get(row, col);
            if value != current {
                runs.push(run);
                run = 0;
                current = value;
            }
            run += 1;
        }
    }

    if mask.height * mask.width > 0 {
        runs.push(run);
    }

    runs
}

fn runs_to_string(runs: &[u64]) -> String {
    let mut encoded = String::new();

    for (index, run) in runs.iter().enumerate() {
        let mut value = *run as i64;
        if index > 2 {
            value -= runs[index - 2] as i64;
        }

        loop {
            let mut chunk = (value & 0x1f) as u8;
            value >>= 5;
            let more = if chunk & 0x10 != 0 {
                value != -1
            } else {
                value != 0
            };
            if more {
                chunk |= 0x20;
            }
            encoded.push(char::from(chunk + CHAR_BASE));
            if !more {
                break;
            }
        }
    }

    encoded
}

fn runs_from_string(encoded: &str) -> Result<Vec<u64>, MaskError> {
    let bytes = encoded.as_bytes();
    let mut runs: Vec<u64> = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let start = offset;
        let mut value = 0i64;
        let mut shift = 0usize;

        loop {
            if shift == MAX_CHARS_PER_RUN {
                return Err(MaskError::Overflow { offset: start });
            }
            let Some(byte) = bytes.get(offset).copied() else {
                return Err(MaskError::Truncated { offset: start });
            };
            if !(CHAR_BASE..CHAR_BASE + 64).contains(&byte) {
                return Err(MaskError::InvalidCharacter { offset, byte });
            }

            let chunk = i64::from(byte - CHAR_BASE);
            value |= (chunk & 0x1f) << (5 * shift);
            offset += 1;
            shift += 1;

            if chunk & 0x20 == 0 {
                if chunk & 0x10 != 0 {
                    value |= -1i64 << (5 * shift);
                }
                break;
            }
        }

        let run_index = runs.len();
        if run_index > 2 {
            value = i64::try_from(runs[run_index - 2])
                .ok()
                .and_then(|previous| value.checked_add(previous))
                .ok_or(MaskError::Overflow { offset: start })?;
        }
        if value < 0 {
            return Err(MaskError::NegativeRun { run: run_index });
        }
        runs.push(value as u64);
    }

    Ok(runs)
}
