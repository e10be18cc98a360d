//! Matrix geometry: the circular active-pixel mask over a 25×25 grid.
//!
//! The Glyph Matrix is not rectangular. Only 489 of the 625 logical cells
//! have an LED behind them. Two descriptions of that shape exist and must
//! agree on every cell:
//!
//! - [`ROW_COUNTS`], a per-row table of centered active cells, used when
//!   unpacking hand-authored [`ShapedFrame`]s
//! - [`is_in_mask`], a Euclidean distance test, used by procedural themes
//!
//! ## Rust concepts
//! - Fixed-size arrays (`[u8; 625]`) as a value type
//! - Newtypes to keep "flat" and "shaped" buffers from being mixed up
//! - `impl Serialize` by hand for arrays longer than 32 elements

use crate::error::ShapeError;
use serde::{Serialize, Serializer};

// ── Grid constants ───────────────────────────────────────────────────

/// Width and height of the logical grid.
pub const GRID_SIZE: usize = 25;

/// Length of a flat frame.
pub const PIXEL_COUNT: usize = GRID_SIZE * GRID_SIZE;

/// Center row/column of the grid.
pub const CENTER: f64 = 12.0;

/// Radius of the active circle, in cells.
pub const MASK_RADIUS: f64 = 12.5;

/// Active cells per row, top to bottom. Each row is centered.
pub const ROW_COUNTS: [usize; GRID_SIZE] = [
    7, 11, 15, 17, 19, 21, 21, 23, 23, 25, 25, 25, 25, 25, 25, 25, 23, 23, 21, 21, 19, 17, 15, 11,
    7,
];

/// Number of cells that have an LED behind them.
pub const ACTIVE_CELL_COUNT: usize = {
    let mut total = 0;
    let mut row = 0;
    while row < GRID_SIZE {
        total += ROW_COUNTS[row];
        row += 1;
    }
    total
};

// ── Mask predicates ──────────────────────────────────────────────────

/// First active column of `row` according to the row table.
pub fn row_start(row: usize) -> usize {
    (GRID_SIZE - ROW_COUNTS[row]) / 2
}

/// Euclidean mask test used by procedurally generated patterns.
pub fn is_in_mask(row: usize, col: usize) -> bool {
    if row >= GRID_SIZE || col >= GRID_SIZE {
        return false;
    }
    distance_from_center(row, col) <= MASK_RADIUS
}

/// Row-table mask test used by shaped (hand-authored) patterns.
pub fn is_in_row_table(row: usize, col: usize) -> bool {
    if row >= GRID_SIZE || col >= GRID_SIZE {
        return false;
    }
    let start = row_start(row);
    col >= start && col < start + ROW_COUNTS[row]
}

/// Distance of a cell from the grid center, in cells.
pub fn distance_from_center(row: usize, col: usize) -> f64 {
    let dx = col as f64 - CENTER;
    let dy = row as f64 - CENTER;
    (dx * dx + dy * dy).sqrt()
}

/// Convert a floating-point intensity to a display byte, rounding and clamping.
pub fn clamp_intensity(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, 255.0) as u8
}

// ── PixelFrame ───────────────────────────────────────────────────────

/// A full 625-cell intensity buffer, row-major. Cells outside the mask are
/// always zero.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelFrame {
    pixels: [u8; PIXEL_COUNT],
}

impl PixelFrame {
    /// All pixels off.
    pub fn blank() -> Self {
        Self {
            pixels: [0; PIXEL_COUNT],
        }
    }

    /// Build a frame by evaluating `f` for every masked cell.
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> u8) -> Self {
        let mut frame = Self::blank();
        for row in 0..GRID_SIZE {
            for col in 0..GRID_SIZE {
                if is_in_mask(row, col) {
                    frame.pixels[row * GRID_SIZE + col] = f(row, col);
                }
            }
        }
        frame
    }

    /// Build a frame from a raw flat buffer, zeroing anything outside the mask.
    pub fn from_flat(flat: &[u8; PIXEL_COUNT]) -> Self {
        Self::from_fn(|row, col| flat[row * GRID_SIZE + col])
    }

    pub fn get(&self, row: usize, col: usize) -> u8 {
        if row >= GRID_SIZE || col >= GRID_SIZE {
            return 0;
        }
        self.pixels[row * GRID_SIZE + col]
    }

    /// Set a pixel. Writes outside the mask are dropped.
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        if is_in_mask(row, col) {
            self.pixels[row * GRID_SIZE + col] = value;
        }
    }

    /// Raise a pixel to at least `value`. Used when layering shapes.
    pub fn set_max(&mut self, row: usize, col: usize, value: u8) {
        if is_in_mask(row, col) {
            let cell = &mut self.pixels[row * GRID_SIZE + col];
            *cell = (*cell).max(value);
        }
    }

    /// Apply `f` to every masked pixel.
    pub fn map(&self, mut f: impl FnMut(u8) -> u8) -> Self {
        Self::from_fn(|row, col| f(self.get(row, col)))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.pixels
    }

    pub fn as_array(&self) -> &[u8; PIXEL_COUNT] {
        &self.pixels
    }

    /// Widen to the integer array the hardware SDK consumes.
    pub fn to_intensities(&self) -> Vec<i32> {
        self.pixels.iter().map(|&p| p as i32).collect()
    }

    /// Number of lit pixels.
    pub fn lit_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p > 0).count()
    }

    /// True when every cell outside the mask is zero.
    pub fn respects_mask(&self) -> bool {
        (0..PIXEL_COUNT).all(|i| is_in_mask(i / GRID_SIZE, i % GRID_SIZE) || self.pixels[i] == 0)
    }
}

impl Default for PixelFrame {
    fn default() -> Self {
        Self::blank()
    }
}

impl std::fmt::Debug for PixelFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelFrame")
            .field("lit", &self.lit_count())
            .finish()
    }
}

impl Serialize for PixelFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.pixels.iter())
    }
}

// ── ShapedFrame ──────────────────────────────────────────────────────

/// Compact buffer with one value per active cell, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShapedFrame(Vec<u8>);

impl ShapedFrame {
    /// Strict constructor: the buffer must cover exactly the active cells.
    pub fn new(values: Vec<u8>) -> Result<Self, ShapeError> {
        if values.len() != ACTIVE_CELL_COUNT {
            return Err(ShapeError::Length {
                expected: ACTIVE_CELL_COUNT,
                actual: values.len(),
            });
        }
        Ok(Self(values))
    }

    pub fn values(&self) -> &[u8] {
        &self.0
    }

    pub fn to_flat(&self) -> PixelFrame {
        shaped_to_flat(&self.0)
    }
}

/// Unpack shaped values into a flat frame.
///
/// Short input leaves the trailing cells dark and long input is ignored past
/// the last active cell. Use [`ShapedFrame::new`] when the length must be
/// checked.
pub fn shaped_to_flat(shaped: &[u8]) -> PixelFrame {
    let mut frame = PixelFrame::blank();
    let mut values = shaped.iter();
    'rows: for row in 0..GRID_SIZE {
        let start = row_start(row);
        for col in start..start + ROW_COUNTS[row] {
            match values.next() {
                Some(&v) => frame.pixels[row * GRID_SIZE + col] = v,
                None => break 'rows,
            }
        }
    }
    frame
}

/// Select the active cells of a flat frame, row-major.
pub fn flat_to_shaped(frame: &PixelFrame) -> ShapedFrame {
    let mut values = Vec::with_capacity(ACTIVE_CELL_COUNT);
    for row in 0..GRID_SIZE {
        let start = row_start(row);
        for col in start..start + ROW_COUNTS[row] {
            values.push(frame.get(row, col));
        }
    }
    ShapedFrame(values)
}
