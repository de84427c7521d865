//! Crossterm host
//!
//! The real display and event source used by the binary. Output is queued
//! into a buffer and flushed once per frame inside a synchronized update:
//!
//! ```text
//! begin_frame()  → start sync, disable autowrap, hide cursor
//!     ↓
//! compositor     → rows, status bar, cursor
//!     ↓
//! flush()        → show cursor (if blinking), enable autowrap, end sync
//! ```

use std::io::{self, BufWriter, Stdout, Write};
use std::time::Duration;

use crossterm::{
    cursor::{Hide, MoveTo, SetCursorStyle, Show},
    event::{
        self, DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture,
        Event as CtEvent, KeyEventKind, KeyboardEnhancementFlags, PopKeyboardEnhancementFlags,
        PushKeyboardEnhancementFlags,
    },
    execute, queue,
    style::{Print, ResetColor, SetBackgroundColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use tracing::{debug, info};

use super::hotkeys::{Chord, Modifiers};
use crate::core::event::Event;
use crate::core::host::{Display, EventSource};
use crate::core::term::{parse_blit, Color};

/// Raw display on stdout
pub struct CrosstermDisplay {
    out: BufWriter<Stdout>,
    initialized: bool,
    enhanced_keys: bool,
    text_color: Color,
    background_color: Color,
    cursor_visible: bool,
}

impl CrosstermDisplay {
    pub fn new() -> Self {
        Self {
            out: BufWriter::new(io::stdout()),
            initialized: false,
            enhanced_keys: false,
            text_color: Color::White,
            background_color: Color::Black,
            cursor_visible: false,
        }
    }

    /// Enter raw mode and the alternate screen
    pub fn init(&mut self) -> io::Result<()> {
        terminal::enable_raw_mode()?;
        execute!(
            self.out,
            EnterAlternateScreen,
            EnableMouseCapture,
            EnableBracketedPaste,
            Clear(ClearType::All)
        )?;

        // Key release events are needed for modifier tracking
        self.enhanced_keys = terminal::supports_keyboard_enhancement().unwrap_or(false);
        if self.enhanced_keys {
            execute!(
                self.out,
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                        | KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                )
            )?;
        }
        info!("Terminal initialized (key release events: {})", self.enhanced_keys);

        self.initialized = true;
        Ok(())
    }

    /// Restore the terminal; safe to call more than once
    pub fn cleanup(&mut self) -> io::Result<()> {
        if !self.initialized {
            return Ok(());
        }

        write!(self.out, "\x1b[?7h")?; // Enable autowrap
        write!(self.out, "\x1b[?2026l")?; // End synchronized update (if active)
        if self.enhanced_keys {
            queue!(self.out, PopKeyboardEnhancementFlags)?;
        }
        execute!(
            self.out,
            ResetColor,
            SetCursorStyle::DefaultUserShape,
            Show,
            DisableBracketedPaste,
            DisableMouseCapture,
            LeaveAlternateScreen
        )?;
        terminal::disable_raw_mode()?;
        self.initialized = false;
        Ok(())
    }

    fn apply_colors(&mut self, fg: Color, bg: Color) -> io::Result<()> {
        queue!(
            self.out,
            SetForegroundColor(fg.to_crossterm()),
            SetBackgroundColor(bg.to_crossterm())
        )
    }
}

impl Default for CrosstermDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CrosstermDisplay {
    fn drop(&mut self) {
        let _ = self.cleanup();
    }
}

impl Display for CrosstermDisplay {
    fn size(&self) -> io::Result<(u16, u16)> {
        terminal::size()
    }

    fn set_cursor_pos(&mut self, x: u16, y: u16) -> io::Result<()> {
        queue!(self.out, MoveTo(x.saturating_sub(1), y.saturating_sub(1)))
    }

    fn set_cursor_blink(&mut self, blink: bool) -> io::Result<()> {
        self.cursor_visible = blink;
        if blink {
            queue!(self.out, SetCursorStyle::BlinkingBlock)?;
        }
        Ok(())
    }

    fn set_text_color(&mut self, color: Color) -> io::Result<()> {
        self.text_color = color;
        queue!(self.out, SetForegroundColor(color.to_crossterm()))
    }

    fn set_background_color(&mut self, color: Color) -> io::Result<()> {
        self.background_color = color;
        queue!(self.out, SetBackgroundColor(color.to_crossterm()))
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        queue!(self.out, Print(text))
    }

    fn blit(&mut self, text: &str, fg: &str, bg: &str) -> io::Result<()> {
        let cells = parse_blit(text, fg, bg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

        let mut current: Option<(Color, Color)> = None;
        for cell in cells {
            if current != Some((cell.fg, cell.bg)) {
                self.apply_colors(cell.fg, cell.bg)?;
                current = Some((cell.fg, cell.bg));
            }
            queue!(self.out, Print(cell.ch))?;
        }
        // Blit leaves the colour state alone
        self.apply_colors(self.text_color, self.background_color)
    }

    fn clear(&mut self) -> io::Result<()> {
        queue!(
            self.out,
            SetBackgroundColor(self.background_color.to_crossterm()),
            Clear(ClearType::All),
            MoveTo(0, 0)
        )
    }

    fn clear_line(&mut self) -> io::Result<()> {
        queue!(
            self.out,
            SetBackgroundColor(self.background_color.to_crossterm()),
            Clear(ClearType::CurrentLine)
        )
    }

    fn begin_frame(&mut self) -> io::Result<()> {
        write!(self.out, "\x1b[?2026h")?; // Begin synchronized update
        write!(self.out, "\x1b[?7l")?; // Disable autowrap
        queue!(self.out, Hide)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.cursor_visible {
            queue!(self.out, Show)?;
        }
        write!(self.out, "\x1b[?7h")?; // Enable autowrap
        write!(self.out, "\x1b[?2026l")?; // End synchronized update
        self.out.flush()
    }
}

/// Terminal input as session events
pub struct CrosstermEvents {
    /// Chord turned into `Event::Terminate`
    quit: Option<Chord>,
}

impl CrosstermEvents {
    pub fn new(quit: Option<Chord>) -> Self {
        Self { quit }
    }

    fn translate(&self, raw: CtEvent) -> Option<Event> {
        match raw {
            CtEvent::Key(key) => {
                let quit = self.quit.as_ref().is_some_and(|chord| {
                    key.kind != KeyEventKind::Release
                        && chord.matches(Modifiers::from(key.modifiers), key.code)
                });
                if quit {
                    info!("Quit chord pressed");
                    Some(Event::Terminate)
                } else {
                    Some(Event::Key(key))
                }
            }
            CtEvent::Mouse(mouse) => Some(Event::Mouse(mouse)),
            CtEvent::Paste(text) => Some(Event::Paste(text)),
            CtEvent::Resize(width, height) => Some(Event::Resize { width, height }),
            CtEvent::FocusGained | CtEvent::FocusLost => None,
        }
    }
}

impl EventSource for CrosstermEvents {
    fn pull_event(&mut self, timeout: Option<Duration>) -> io::Result<Event> {
        if let Some(timeout) = timeout {
            if !event::poll(timeout)? {
                return Ok(Event::Tick);
            }
        }
        let raw = event::read()?;
        match self.translate(raw) {
            Some(event) => Ok(event),
            None => {
                debug!("Ignored terminal event");
                Ok(Event::Tick)
            }
        }
    }
}
