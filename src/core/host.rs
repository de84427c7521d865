//! Host interfaces
//!
//! Everything the scheduler needs from the surrounding program: a clock, a
//! blocking event source, a raw character display and a program loader.
//! The crossterm-backed implementations live in `ui::terminal`; the fakes
//! here drive the scheduler deterministically.

use std::cell::Cell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::{Duration, Instant};

use thiserror::Error;

use super::event::Event;
use super::task::Program;
use super::term::{Color, VirtualTerminal};

/// Monotonic session time
pub trait Clock {
    /// Time elapsed since the session started
    fn now(&self) -> Duration;
}

/// Wall clock backed by `Instant`
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Settable clock; clones share the same time
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, now: Duration) {
        self.now.set(now);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Blocking source of host events
pub trait EventSource {
    /// Return exactly one event.
    ///
    /// `timeout` bounds the wait: when it elapses without input the source
    /// returns `Event::Tick`. `None` waits indefinitely. An error is fatal to
    /// the session.
    fn pull_event(&mut self, timeout: Option<Duration>) -> io::Result<Event>;
}

/// Pre-recorded events, optionally advancing a `ManualClock` before each one
pub struct ScriptedEvents {
    clock: Option<ManualClock>,
    queue: VecDeque<(Duration, Event)>,
}

impl ScriptedEvents {
    pub fn new() -> Self {
        Self {
            clock: None,
            queue: VecDeque::new(),
        }
    }

    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            clock: Some(clock),
            queue: VecDeque::new(),
        }
    }

    pub fn push(&mut self, event: Event) -> &mut Self {
        self.queue.push_back((Duration::ZERO, event));
        self
    }

    /// Advance the clock by `after`, then deliver `event`
    pub fn push_after(&mut self, after: Duration, event: Event) -> &mut Self {
        self.queue.push_back((after, event));
        self
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl Default for ScriptedEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for ScriptedEvents {
    fn pull_event(&mut self, _timeout: Option<Duration>) -> io::Result<Event> {
        let (after, event) = self.queue.pop_front().ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "event script exhausted")
        })?;
        if let Some(clock) = &self.clock {
            clock.advance(after);
        }
        Ok(event)
    }
}

/// Write-only character grid the compositor draws on.
/// Coordinates are 1-based like the virtual terminal's.
pub trait Display {
    fn size(&self) -> io::Result<(u16, u16)>;
    fn set_cursor_pos(&mut self, x: u16, y: u16) -> io::Result<()>;
    fn set_cursor_blink(&mut self, blink: bool) -> io::Result<()>;
    fn set_text_color(&mut self, color: Color) -> io::Result<()>;
    fn set_background_color(&mut self, color: Color) -> io::Result<()>;
    fn write(&mut self, text: &str) -> io::Result<()>;
    fn blit(&mut self, text: &str, fg: &str, bg: &str) -> io::Result<()>;
    fn clear(&mut self) -> io::Result<()>;
    fn clear_line(&mut self) -> io::Result<()>;

    /// Start a frame; output may be held back until `flush`
    fn begin_frame(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Finish the frame and push buffered output to the device
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A virtual terminal can stand in for the real display
impl Display for VirtualTerminal {
    fn size(&self) -> io::Result<(u16, u16)> {
        Ok(VirtualTerminal::size(self))
    }

    fn set_cursor_pos(&mut self, x: u16, y: u16) -> io::Result<()> {
        VirtualTerminal::set_cursor_pos(self, x as i32, y as i32);
        Ok(())
    }

    fn set_cursor_blink(&mut self, blink: bool) -> io::Result<()> {
        VirtualTerminal::set_cursor_blink(self, blink);
        Ok(())
    }

    fn set_text_color(&mut self, color: Color) -> io::Result<()> {
        VirtualTerminal::set_text_color(self, color);
        Ok(())
    }

    fn set_background_color(&mut self, color: Color) -> io::Result<()> {
        VirtualTerminal::set_background_color(self, color);
        Ok(())
    }

    fn write(&mut self, text: &str) -> io::Result<()> {
        VirtualTerminal::write(self, text);
        Ok(())
    }

    fn blit(&mut self, text: &str, fg: &str, bg: &str) -> io::Result<()> {
        VirtualTerminal::blit(self, text, fg, bg)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))
    }

    fn clear(&mut self) -> io::Result<()> {
        VirtualTerminal::clear(self);
        Ok(())
    }

    fn clear_line(&mut self) -> io::Result<()> {
        VirtualTerminal::clear_line(self);
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("No such program: {0}")]
    NotFound(String),

    #[error("Failed to start {name}: {source}")]
    Init {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Capabilities handed to a program when it is created
#[derive(Clone)]
pub struct HostServices {
    pub clock: Rc<dyn Clock>,
    /// Identifiers the loader can resolve
    pub catalogue: Rc<[String]>,
}

impl HostServices {
    pub fn new(clock: Rc<dyn Clock>, catalogue: Vec<String>) -> Self {
        Self {
            clock,
            catalogue: catalogue.into(),
        }
    }
}

/// Resolves a name to a program body
pub trait ProgramLoader {
    fn load(
        &self,
        identifier: &str,
        args: &[String],
        services: &HostServices,
    ) -> Result<Box<dyn Program>, LoadError>;

    /// Identifiers this loader knows about, for listings
    fn catalogue(&self) -> Vec<String> {
        Vec::new()
    }
}
