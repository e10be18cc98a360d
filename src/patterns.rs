//! Hand-authored static patterns in shaped form.
//!
//! Each pattern is 25 strings, one per mask row, each exactly as long as
//! that row's active-cell count. Glyphs map to intensities:
//!
//! | Glyph | Intensity |
//! |-------|-----------|
//! | `.`   | 0         |
//! | `-`   | 64        |
//! | `+`   | 128       |
//! | `*`   | 192       |
//! | `#`   | 255       |

use crate::error::ShapeError;
use crate::geometry::{GRID_SIZE, PixelFrame, ROW_COUNTS, ShapedFrame};
use std::sync::LazyLock;

/// The non-cycling frames every theme can show.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StateFrame {
    Paused,
    Offline,
    Loading,
    Error,
}

fn glyph_value(glyph: char) -> Option<u8> {
    match glyph {
        '.' => Some(0),
        '-' => Some(64),
        '+' => Some(128),
        '*' => Some(192),
        '#' => Some(255),
        _ => None,
    }
}

/// Parse a row-per-line pattern into a shaped frame, checking every row
/// against the mask table.
pub fn parse_pattern(rows: &[&str]) -> Result<ShapedFrame, ShapeError> {
    if rows.len() != GRID_SIZE {
        return Err(ShapeError::RowCount {
            expected: GRID_SIZE,
            actual: rows.len(),
        });
    }

    let mut values = Vec::new();
    for (row, line) in rows.iter().enumerate() {
        let cells = line.chars().count();
        if cells != ROW_COUNTS[row] {
            return Err(ShapeError::RowLength {
                row,
                expected: ROW_COUNTS[row],
                actual: cells,
            });
        }
        for glyph in line.chars() {
            values.push(glyph_value(glyph).ok_or(ShapeError::Glyph(glyph))?);
        }
    }

    ShapedFrame::new(values)
}

fn build(name: &str, rows: &[&str]) -> PixelFrame {
    match parse_pattern(rows) {
        Ok(shaped) => shaped.to_flat(),
        Err(e) => {
            tracing::error!("Built-in pattern {} is malformed: {}", name, e);
            PixelFrame::blank()
        }
    }
}

static MUSIC_NOTE_FRAME: LazyLock<PixelFrame> = LazyLock::new(|| build("music_note", &MUSIC_NOTE));
static PAUSED_FRAME: LazyLock<PixelFrame> = LazyLock::new(|| build("paused", &PAUSED));
static OFFLINE_FRAME: LazyLock<PixelFrame> = LazyLock::new(|| build("offline", &OFFLINE));
static LOADING_FRAME: LazyLock<PixelFrame> = LazyLock::new(|| build("loading", &LOADING));
static ERROR_FRAME: LazyLock<PixelFrame> = LazyLock::new(|| build("error", &ERROR));

/// Eighth-note pair, shown when there is no album art.
pub fn music_note() -> &'static PixelFrame {
    &MUSIC_NOTE_FRAME
}

/// Pattern for a state frame, at full intensity.
pub fn state_pattern(state: StateFrame) -> &'static PixelFrame {
    match state {
        StateFrame::Paused => &PAUSED_FRAME,
        StateFrame::Offline => &OFFLINE_FRAME,
        StateFrame::Loading => &LOADING_FRAME,
        StateFrame::Error => &ERROR_FRAME,
    }
}

#[rustfmt::skip]
const MUSIC_NOTE: [&str; 25] = [
    ".......",
    "...........",
    "...............",
    ".................",
    "...........####....",
    "........########.....",
    "........####...#.....",
    ".........#......#......",
    ".........#......#......",
    "..........#......#.......",
    "..........#......#.......",
    "..........#......#.......",
    "..........#......#.......",
    "..........#......#.......",
    "..........#..#####.......",
    "..........#..#####.......",
    ".....#####..#####......",
    ".....#####.............",
    "....#####............",
    ".....................",
    "...................",
    ".................",
    "...............",
    "...........",
    ".......",
];

#[rustfmt::skip]
const PAUSED: [&str; 25] = [
    ".......",
    "...........",
    "...............",
    ".................",
    "...................",
    ".....................",
    ".....###.....###.....",
    "......###.....###......",
    "......###.....###......",
    ".......###.....###.......",
    ".......###.....###.......",
    ".......###.....###.......",
    ".......###.....###.......",
    ".......###.....###.......",
    ".......###.....###.......",
    ".......###.....###.......",
    "......###.....###......",
    "......###.....###......",
    ".....###.....###.....",
    ".....................",
    "...................",
    ".................",
    "...............",
    "...........",
    ".......",
];

#[rustfmt::skip]
const OFFLINE: [&str; 25] = [
    ".......",
    "..-------..",
    "..-----------..",
    ".---.........---.",
    ".---...........---.",
    ".--...............--.",
    ".--.............+.--.",
    ".--.............+...--.",
    ".-.............+.....-.",
    ".--............+......--.",
    ".--...........+.......--.",
    ".--..........+........--.",
    ".--.........+.........--.",
    ".--........+..........--.",
    ".--.......+...........--.",
    ".--......+............--.",
    ".-.....+.............-.",
    ".--...+.............--.",
    ".--.+.............--.",
    ".--...............--.",
    ".---...........---.",
    ".---.........---.",
    "..-----------..",
    "..-------..",
    ".......",
];

#[rustfmt::skip]
const LOADING: [&str; 25] = [
    ".......",
    "...........",
    "...............",
    ".....###.........",
    "....#####..........",
    "....######...........",
    "...####..............",
    "...####................",
    "...###.................",
    "...*##...................",
    "...***...................",
    "...***...................",
    "...***.............---...",
    "...***.............---...",
    "...***.............---...",
    "...***.............---...",
    "...***...........---...",
    "...****.........----...",
    "...****.......++--...",
    "....**++++++++++-....",
    "....*++++++++++....",
    ".....+++++++.....",
    "...............",
    "...........",
    ".......",
];

#[rustfmt::skip]
const ERROR: [&str; 25] = [
    ".......",
    "...........",
    "...............",
    ".................",
    "...................",
    ".....................",
    "....##.........##....",
    ".....###.......###.....",
    "......###.....###......",
    "........###...###........",
    ".........###.###.........",
    "..........#####..........",
    "...........###...........",
    "..........#####..........",
    ".........###.###.........",
    "........###...###........",
    "......###.....###......",
    ".....###.......###.....",
    "....##.........##....",
    ".....................",
    "...................",
    ".................",
    "...............",
    "...........",
    ".......",
];
