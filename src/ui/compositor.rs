//! Compositor
//!
//! Copies the focused task's terminal onto the real display and draws the
//! status bar on the last row. Background terminals are never read here,
//! so output per frame is bounded by the display size alone.
//!
//! ```text
//! row 1 .. height-1   focused VT (dirty rows only)
//! row height          [*menu] [clock] [ps]
//! ```

use std::io;

use tracing::trace;

use crate::config::StatusBarConfig;
use crate::core::host::Display;
use crate::core::task::TaskId;
use crate::core::term::{DirtyRows, VirtualTerminal};

/// One status bar slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    pub name: String,
    pub focused: bool,
    pub crashed: bool,
}

pub struct Compositor {
    width: u16,
    height: u16,
    style: StatusBarConfig,
    /// Task whose terminal is on screen
    shown: Option<TaskId>,
    /// Status bar as last drawn
    status: Option<Vec<StatusEntry>>,
    full_redraw: bool,
    idle: bool,
}

impl Compositor {
    pub fn new(width: u16, height: u16, style: StatusBarConfig) -> Self {
        Self {
            width,
            height,
            style,
            shown: None,
            status: None,
            full_redraw: true,
            idle: false,
        }
    }

    /// Rows available to task terminals
    pub fn body_height(&self) -> u16 {
        self.height.saturating_sub(1)
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.invalidate();
    }

    /// Redraw everything on the next frame
    pub fn invalidate(&mut self) {
        self.full_redraw = true;
        self.status = None;
    }

    /// Draw one frame.
    ///
    /// `focused` is the task on screen, or `None` when the ring is empty, in
    /// which case the display is cleared once and left alone.
    pub fn render(
        &mut self,
        display: &mut dyn Display,
        focused: Option<(TaskId, &mut VirtualTerminal)>,
        entries: &[StatusEntry],
    ) -> io::Result<()> {
        let Some((id, vt)) = focused else {
            if !self.idle {
                display.begin_frame()?;
                display.clear()?;
                display.flush()?;
                self.idle = true;
                self.shown = None;
                self.invalidate();
            }
            return Ok(());
        };

        let switched = self.shown != Some(id);
        let damage = vt.take_dirty();
        let rows: Vec<u16> = if self.full_redraw || switched || self.idle {
            (1..=vt.size().1).collect()
        } else {
            match damage {
                DirtyRows::Full => (1..=vt.size().1).collect(),
                DirtyRows::Rows(rows) => rows,
            }
        };
        let status_changed = self.status.as_deref() != Some(entries);

        if rows.is_empty() && !status_changed && !switched {
            // Cursor may still have moved
            display.begin_frame()?;
            self.place_cursor(display, vt)?;
            return display.flush();
        }

        trace!("Compositing {} ({} rows)", id, rows.len());
        display.begin_frame()?;
        for y in rows.into_iter().filter(|&y| y <= self.body_height()) {
            self.copy_row(display, vt, y)?;
        }
        if status_changed {
            self.draw_status(display, entries)?;
            self.status = Some(entries.to_vec());
        }
        self.place_cursor(display, vt)?;
        display.flush()?;

        self.shown = Some(id);
        self.full_redraw = false;
        self.idle = false;
        Ok(())
    }

    fn copy_row(&self, display: &mut dyn Display, vt: &VirtualTerminal, y: u16) -> io::Result<()> {
        let Some((text, fg, bg)) = vt.get_line(y) else {
            return Ok(());
        };
        let width = self.width as usize;
        let text: String = text.chars().take(width).collect();
        let fg: String = fg.chars().take(width).collect();
        let bg: String = bg.chars().take(width).collect();

        display.set_cursor_pos(1, y)?;
        display.blit(&text, &fg, &bg)
    }

    fn draw_status(&self, display: &mut dyn Display, entries: &[StatusEntry]) -> io::Result<()> {
        if self.height == 0 {
            return Ok(());
        }
        let (text, fg) = self.status_line(entries);
        let bg: String = std::iter::repeat(self.style.background_color.to_blit())
            .take(text.chars().count())
            .collect();

        display.set_cursor_pos(1, self.height)?;
        display.blit(&text, &fg, &bg)
    }

    /// Status bar text and its per-character foreground, padded and clipped
    /// to the display width
    fn status_line(&self, entries: &[StatusEntry]) -> (String, String) {
        let width = self.width as usize;
        let mut text = String::new();
        let mut fg = String::new();

        for (i, entry) in entries.iter().enumerate() {
            let color = if entry.crashed {
                self.style.crashed_color
            } else if entry.focused {
                self.style.focused_color
            } else {
                self.style.text_color
            };
            let marker = if entry.focused {
                self.style.focus_marker.as_str()
            } else {
                ""
            };
            let slot = format!("{}[{}{}]", if i > 0 { " " } else { "" }, marker, entry.name);
            for ch in slot.chars() {
                text.push(ch);
                fg.push(color.to_blit());
            }
        }

        let text: String = text.chars().chain(std::iter::repeat(' ')).take(width).collect();
        let fg: String = fg
            .chars()
            .chain(std::iter::repeat(self.style.text_color.to_blit()))
            .take(width)
            .collect();
        (text, fg)
    }

    fn place_cursor(&self, display: &mut dyn Display, vt: &VirtualTerminal) -> io::Result<()> {
        let (x, y) = vt.cursor_pos();
        if y <= self.body_height() {
            display.set_cursor_pos(x.min(self.width.max(1)), y)?;
        }
        display.set_text_color(vt.text_color())?;
        display.set_cursor_blink(vt.cursor_blink())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::term::Color;

    /// Display that records what was drawn where
    struct Recorder {
        screen: VirtualTerminal,
        rows_touched: Vec<u16>,
        clears: usize,
    }

    impl Recorder {
        fn new(width: u16, height: u16) -> Self {
            Self {
                screen: VirtualTerminal::new(width, height),
                rows_touched: Vec::new(),
                clears: 0,
            }
        }

        fn row(&self, y: u16) -> String {
            self.screen.get_line(y).unwrap().0
        }
    }

    impl Display for Recorder {
        fn size(&self) -> io::Result<(u16, u16)> {
            Ok(self.screen.size())
        }

        fn set_cursor_pos(&mut self, x: u16, y: u16) -> io::Result<()> {
            self.screen.set_cursor_pos(x as i32, y as i32);
            Ok(())
        }

        fn set_cursor_blink(&mut self, blink: bool) -> io::Result<()> {
            self.screen.set_cursor_blink(blink);
            Ok(())
        }

        fn set_text_color(&mut self, color: Color) -> io::Result<()> {
            self.screen.set_text_color(color);
            Ok(())
        }

        fn set_background_color(&mut self, color: Color) -> io::Result<()> {
            self.screen.set_background_color(color);
            Ok(())
        }

        fn write(&mut self, text: &str) -> io::Result<()> {
            self.rows_touched.push(self.screen.cursor_pos().1);
            self.screen.write(text);
            Ok(())
        }

        fn blit(&mut self, text: &str, fg: &str, bg: &str) -> io::Result<()> {
            self.rows_touched.push(self.screen.cursor_pos().1);
            self.screen
                .blit(text, fg, bg)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
        }

        fn clear(&mut self) -> io::Result<()> {
            self.clears += 1;
            self.screen.clear();
            Ok(())
        }

        fn clear_line(&mut self) -> io::Result<()> {
            self.rows_touched.push(self.screen.cursor_pos().1);
            self.screen.clear_line();
            Ok(())
        }
    }

    fn entries(names: &[&str], focused: usize) -> Vec<StatusEntry> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| StatusEntry {
                name: name.to_string(),
                focused: i == focused,
                crashed: false,
            })
            .collect()
    }

    #[test]
    fn test_renders_focused_vt_and_status_bar() {
        let mut display = Recorder::new(20, 4);
        let mut compositor = Compositor::new(20, 4, StatusBarConfig::default());
        let mut vt = VirtualTerminal::new(20, 3);
        vt.write("hello");

        compositor
            .render(&mut display, Some((TaskId(1), &mut vt)), &entries(&["menu", "clock"], 0))
            .unwrap();

        assert_eq!(display.row(1).trim_end(), "hello");
        assert_eq!(display.row(4).trim_end(), "[*menu] [clock]");
        assert_eq!(display.screen.cell(2, 4).unwrap().fg, Color::Blue);
        assert_eq!(display.screen.cell(10, 4).unwrap().fg, Color::Black);
        assert_eq!(display.screen.cursor_pos(), (6, 1));
        assert!(display.rows_touched.iter().all(|&y| (1..=4).contains(&y)));
    }

    #[test]
    fn test_only_dirty_rows_are_copied() {
        let mut display = Recorder::new(10, 4);
        let mut compositor = Compositor::new(10, 4, StatusBarConfig::default());
        let mut vt = VirtualTerminal::new(10, 3);
        let status = entries(&["a"], 0);

        compositor
            .render(&mut display, Some((TaskId(1), &mut vt)), &status)
            .unwrap();
        display.rows_touched.clear();

        vt.set_cursor_pos(1, 2);
        vt.write("x");
        compositor
            .render(&mut display, Some((TaskId(1), &mut vt)), &status)
            .unwrap();
        assert_eq!(display.rows_touched, vec![2]);

        display.rows_touched.clear();
        compositor
            .render(&mut display, Some((TaskId(1), &mut vt)), &status)
            .unwrap();
        assert!(display.rows_touched.is_empty());
    }

    #[test]
    fn test_switching_task_redraws_everything() {
        let mut display = Recorder::new(10, 3);
        let mut compositor = Compositor::new(10, 3, StatusBarConfig::default());
        let mut first = VirtualTerminal::new(10, 2);
        let mut second = VirtualTerminal::new(10, 2);
        first.write("one");
        second.write("two");

        compositor
            .render(&mut display, Some((TaskId(1), &mut first)), &entries(&["1", "2"], 0))
            .unwrap();
        display.rows_touched.clear();
        compositor
            .render(&mut display, Some((TaskId(2), &mut second)), &entries(&["1", "2"], 1))
            .unwrap();

        assert_eq!(display.rows_touched, vec![1, 2, 3]);
        assert_eq!(display.row(1).trim_end(), "two");
        assert_eq!(display.row(3).trim_end(), "[1] [*2]");
    }

    #[test]
    fn test_status_bar_is_clipped_and_colors_crashes() {
        let mut display = Recorder::new(8, 2);
        let mut compositor = Compositor::new(8, 2, StatusBarConfig::default());
        let mut vt = VirtualTerminal::new(8, 1);
        let status = vec![
            StatusEntry {
                name: "boom".into(),
                focused: false,
                crashed: true,
            },
            StatusEntry {
                name: "long-name".into(),
                focused: true,
                crashed: false,
            },
        ];

        compositor
            .render(&mut display, Some((TaskId(2), &mut vt)), &status)
            .unwrap();
        assert_eq!(display.row(2), "[boom] [");
        assert_eq!(display.screen.cell(2, 2).unwrap().fg, Color::Red);
    }

    #[test]
    fn test_idle_clears_once() {
        let mut display = Recorder::new(10, 3);
        let mut compositor = Compositor::new(10, 3, StatusBarConfig::default());

        compositor.render(&mut display, None, &[]).unwrap();
        compositor.render(&mut display, None, &[]).unwrap();
        assert_eq!(display.clears, 1);
    }
}
