//! Virtual terminal state
//!
//! This module defines the per-task character grid, its cursor and colour
//! state. Nothing here touches the real display; the compositor copies rows
//! out of it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_width::UnicodeWidthChar;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VtError {
    #[error("blit arguments must be the same length (text {text}, fg {fg}, bg {bg})")]
    BlitLength { text: usize, fg: usize, bg: usize },

    #[error("invalid colour digit '{0}'")]
    InvalidColor(char),
}

/// Palette colour. Blit strings encode each colour as its lowercase hex index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Color {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

impl Color {
    pub const ALL: [Color; 16] = [
        Color::Black,
        Color::Red,
        Color::Green,
        Color::Yellow,
        Color::Blue,
        Color::Magenta,
        Color::Cyan,
        Color::White,
        Color::BrightBlack,
        Color::BrightRed,
        Color::BrightGreen,
        Color::BrightYellow,
        Color::BrightBlue,
        Color::BrightMagenta,
        Color::BrightCyan,
        Color::BrightWhite,
    ];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Hex digit used in blit strings
    pub fn to_blit(self) -> char {
        std::char::from_digit(self.index() as u32, 16).unwrap_or('0')
    }

    pub fn from_blit(digit: char) -> Result<Self, VtError> {
        digit
            .to_digit(16)
            .and_then(|n| Self::from_index(n as u8))
            .ok_or(VtError::InvalidColor(digit))
    }

    /// Convert to crossterm color
    pub fn to_crossterm(self) -> crossterm::style::Color {
        crossterm::style::Color::AnsiValue(self.index())
    }
}

/// A single grid cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub fg: Color,
    pub bg: Color,
}

impl Cell {
    pub fn blank(fg: Color, bg: Color) -> Self {
        Self { ch: ' ', fg, bg }
    }
}

/// Rows the compositor has to copy out since the last frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirtyRows {
    Full,
    Rows(Vec<u16>),
}

/// In-memory terminal owned by exactly one task.
///
/// Coordinates are 1-based. Every position is clamped into the grid and
/// writes past the right edge are clipped, so no drawing call can fail on
/// geometry alone.
pub struct VirtualTerminal {
    width: u16,
    height: u16,
    cursor_x: u16,
    cursor_y: u16,
    cursor_blink: bool,
    text_color: Color,
    background_color: Color,
    rows: Vec<Vec<Cell>>,
    dirty: BTreeSet<u16>,
    full_redraw: bool,
}

impl VirtualTerminal {
    pub const DEFAULT_TEXT: Color = Color::White;
    pub const DEFAULT_BACKGROUND: Color = Color::Black;

    pub fn new(width: u16, height: u16) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let blank = Cell::blank(Self::DEFAULT_TEXT, Self::DEFAULT_BACKGROUND);
        Self {
            width,
            height,
            cursor_x: 1,
            cursor_y: 1,
            cursor_blink: false,
            text_color: Self::DEFAULT_TEXT,
            background_color: Self::DEFAULT_BACKGROUND,
            rows: vec![vec![blank; width as usize]; height as usize],
            dirty: BTreeSet::new(),
            full_redraw: true,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Write text at the cursor with the current colours.
    ///
    /// Characters past the right edge are clipped. The cursor advances by the
    /// number of characters written, clamped to the grid. Each cell holds one
    /// single-width character: control characters and wide characters (CJK,
    /// emoji) are stored as `'?'`, so only single-width text reads back
    /// unchanged.
    pub fn write(&mut self, text: &str) {
        let (fg, bg) = (self.text_color, self.background_color);
        let written = self.put_cells(text.chars().map(|ch| Cell { ch, fg, bg }));
        self.advance_cursor(written);
    }

    /// Write text with explicit per-character colours.
    ///
    /// `fg` and `bg` are hex digit strings, one digit per character of `text`.
    /// The current colour state is neither used nor changed. Characters are
    /// stored like `write` stores them.
    pub fn blit(&mut self, text: &str, fg: &str, bg: &str) -> Result<(), VtError> {
        let cells = parse_blit(text, fg, bg)?;
        let len = cells.len();
        self.put_cells(cells.into_iter());
        self.advance_cursor(len);
        Ok(())
    }

    /// Fill the grid with blanks in the current background and home the cursor
    pub fn clear(&mut self) {
        let blank = self.blank();
        for row in &mut self.rows {
            row.fill(blank);
        }
        self.cursor_x = 1;
        self.cursor_y = 1;
        self.mark_all_dirty();
    }

    /// Fill the cursor's row with blanks in the current background
    pub fn clear_line(&mut self) {
        let blank = self.blank();
        let y = self.cursor_y;
        self.rows[(y - 1) as usize].fill(blank);
        self.mark_dirty(y);
    }

    /// Shift rows up (`n > 0`) or down (`n < 0`).
    ///
    /// Rows scrolled off are discarded, new rows are blank. Scrolling by the
    /// full height or more is the same as `clear`.
    pub fn scroll(&mut self, n: i32) {
        if n == 0 {
            return;
        }
        let amount = n.unsigned_abs() as usize;
        if amount >= self.height as usize {
            self.clear();
            return;
        }

        let blank_row = vec![self.blank(); self.width as usize];
        if n > 0 {
            self.rows.drain(..amount);
            self.rows.extend(std::iter::repeat(blank_row).take(amount));
        } else {
            let keep = self.rows.len() - amount;
            let mut rows: Vec<Vec<Cell>> = std::iter::repeat(blank_row).take(amount).collect();
            rows.extend(self.rows.drain(..keep));
            self.rows = rows;
        }
        self.mark_all_dirty();
    }

    /// Move the cursor; out-of-range positions are clamped into the grid
    pub fn set_cursor_pos(&mut self, x: i32, y: i32) {
        self.cursor_x = x.clamp(1, self.width as i32) as u16;
        self.cursor_y = y.clamp(1, self.height as i32) as u16;
    }

    pub fn cursor_pos(&self) -> (u16, u16) {
        (self.cursor_x, self.cursor_y)
    }

    pub fn set_cursor_blink(&mut self, blink: bool) {
        self.cursor_blink = blink;
    }

    pub fn cursor_blink(&self) -> bool {
        self.cursor_blink
    }

    pub fn set_text_color(&mut self, color: Color) {
        self.text_color = color;
    }

    pub fn text_color(&self) -> Color {
        self.text_color
    }

    pub fn set_background_color(&mut self, color: Color) {
        self.background_color = color;
    }

    pub fn background_color(&self) -> Color {
        self.background_color
    }

    pub fn cell(&self, x: u16, y: u16) -> Option<Cell> {
        if x == 0 || y == 0 {
            return None;
        }
        self.rows
            .get((y - 1) as usize)
            .and_then(|row| row.get((x - 1) as usize))
            .copied()
    }

    /// Read a row back in blit form: `(text, fg, bg)`
    pub fn get_line(&self, y: u16) -> Option<(String, String, String)> {
        if y == 0 {
            return None;
        }
        let row = self.rows.get((y - 1) as usize)?;
        let text = row.iter().map(|c| c.ch).collect();
        let fg = row.iter().map(|c| c.fg.to_blit()).collect();
        let bg = row.iter().map(|c| c.bg.to_blit()).collect();
        Some((text, fg, bg))
    }

    /// Word-wrapping print helper.
    ///
    /// Honours `\n`, breaks between words at the right edge, hard-breaks
    /// words longer than a row and scrolls when the bottom is reached.
    /// Returns the number of line breaks taken.
    pub fn print(&mut self, text: &str) -> u16 {
        let width = self.width as usize;
        let mut x = self.cursor_x as usize;
        let mut breaks = 0;

        for (i, segment) in text.split('\n').enumerate() {
            if i > 0 {
                self.newline();
                x = 1;
                breaks += 1;
            }
            for word in segment.split_inclusive(' ') {
                let mut chars: Vec<char> = word.chars().collect();
                if x > 1 && x + chars.len() - 1 > width {
                    self.newline();
                    x = 1;
                    breaks += 1;
                }
                while !chars.is_empty() {
                    let room = (width + 1).saturating_sub(x).max(1);
                    let rest = chars.split_off(room.min(chars.len()));
                    self.cursor_x = x as u16;
                    let chunk: String = chars.iter().collect();
                    let (fg, bg) = (self.text_color, self.background_color);
                    self.put_cells(chunk.chars().map(|ch| Cell { ch, fg, bg }));
                    x += chars.len();
                    chars = rest;
                    if !chars.is_empty() {
                        self.newline();
                        x = 1;
                        breaks += 1;
                    }
                }
            }
        }

        self.cursor_x = x.clamp(1, width) as u16;
        breaks
    }

    /// Move to the start of the next row, scrolling at the bottom
    pub fn newline(&mut self) {
        self.cursor_x = 1;
        if self.cursor_y < self.height {
            self.cursor_y += 1;
        } else {
            self.scroll(1);
        }
    }

    pub fn mark_dirty(&mut self, y: u16) {
        self.dirty.insert(y);
    }

    pub fn mark_all_dirty(&mut self) {
        self.full_redraw = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.full_redraw || !self.dirty.is_empty()
    }

    /// Hand the pending damage to the caller and reset tracking
    pub fn take_dirty(&mut self) -> DirtyRows {
        let damage = if self.full_redraw {
            DirtyRows::Full
        } else {
            DirtyRows::Rows(self.dirty.iter().copied().collect())
        };
        self.dirty.clear();
        self.full_redraw = false;
        damage
    }

    fn blank(&self) -> Cell {
        Cell::blank(self.text_color, self.background_color)
    }

    /// Place cells from the cursor rightwards, clipping at the edge.
    /// Returns how many cells the caller asked to place.
    fn put_cells(&mut self, cells: impl Iterator<Item = Cell>) -> usize {
        let y = self.cursor_y;
        let start = self.cursor_x as usize;
        let width = self.width as usize;
        let row = &mut self.rows[(y - 1) as usize];

        let mut count = 0;
        for (i, mut cell) in cells.enumerate() {
            count = i + 1;
            let col = start + i;
            if col > width {
                continue;
            }
            cell.ch = sanitize(cell.ch);
            row[col - 1] = cell;
        }
        if count > 0 && start <= width {
            self.dirty.insert(y);
        }
        count
    }

    fn advance_cursor(&mut self, by: usize) {
        let x = self.cursor_x as usize + by;
        self.cursor_x = x.clamp(1, self.width as usize) as u16;
    }
}

/// One grid cell per character: control and non-single-width characters
/// render as '?'
fn sanitize(ch: char) -> char {
    if ch.is_control() || ch.width() != Some(1) {
        '?'
    } else {
        ch
    }
}

/// Validate and zip the three blit strings into cells
pub fn parse_blit(text: &str, fg: &str, bg: &str) -> Result<Vec<Cell>, VtError> {
    let (text_len, fg_len, bg_len) = (text.chars().count(), fg.chars().count(), bg.chars().count());
    if text_len != fg_len || text_len != bg_len {
        return Err(VtError::BlitLength {
            text: text_len,
            fg: fg_len,
            bg: bg_len,
        });
    }

    text.chars()
        .zip(fg.chars().zip(bg.chars()))
        .map(|(ch, (f, b))| {
            Ok(Cell {
                ch,
                fg: Color::from_blit(f)?,
                bg: Color::from_blit(b)?,
            })
        })
        .collect()
}
