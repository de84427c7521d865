//! Session events
//!
//! One `Event` is pulled from the host per scheduler cycle. Tasks select
//! events with an optional `EventKind` filter; the `EventClass` decides who
//! is allowed to see an event at all.

use std::fmt;

use crossterm::event::{KeyEvent, KeyEventKind, MouseEvent};

/// Identifier of a scheduler timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// An event delivered by the host or synthesized by the scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Key press, repeat or release
    Key(KeyEvent),
    Mouse(MouseEvent),
    Paste(String),
    /// Host display changed size
    Resize { width: u16, height: u16 },
    /// A timer owned by the receiving task fired
    Timer(TimerId),
    /// Event queued by a task
    Custom { name: String, args: Vec<String> },
    /// Abort the whole session
    Terminate,
    /// Host wake-up with nothing to report (a deadline was reached)
    Tick,
}

/// Type tag used by task filters
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Key,
    KeyUp,
    Mouse,
    Paste,
    Resize,
    Timer,
    Custom(String),
    Terminate,
    Tick,
}

/// Delivery class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Keyboard, pointer and paste: focused task only
    Input,
    /// Every task whose filter matches
    Broadcast,
    /// Consumed by the scheduler, never delivered
    Control,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Key(key) if key.kind == KeyEventKind::Release => EventKind::KeyUp,
            Event::Key(_) => EventKind::Key,
            Event::Mouse(_) => EventKind::Mouse,
            Event::Paste(_) => EventKind::Paste,
            Event::Resize { .. } => EventKind::Resize,
            Event::Timer(_) => EventKind::Timer,
            Event::Custom { name, .. } => EventKind::Custom(name.clone()),
            Event::Terminate => EventKind::Terminate,
            Event::Tick => EventKind::Tick,
        }
    }

    pub fn class(&self) -> EventClass {
        match self {
            Event::Key(_) | Event::Mouse(_) | Event::Paste(_) => EventClass::Input,
            Event::Resize { .. } | Event::Timer(_) | Event::Custom { .. } => EventClass::Broadcast,
            Event::Terminate | Event::Tick => EventClass::Control,
        }
    }

    /// Whether a task waiting with `filter` accepts this event.
    /// An absent filter accepts everything.
    pub fn matches(&self, filter: Option<&EventKind>) -> bool {
        match filter {
            None => true,
            Some(kind) => *kind == self.kind(),
        }
    }

    pub fn custom(name: impl Into<String>, args: Vec<String>) -> Self {
        Event::Custom {
            name: name.into(),
            args,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Key => write!(f, "key"),
            EventKind::KeyUp => write!(f, "key_up"),
            EventKind::Mouse => write!(f, "mouse"),
            EventKind::Paste => write!(f, "paste"),
            EventKind::Resize => write!(f, "resize"),
            EventKind::Timer => write!(f, "timer"),
            EventKind::Custom(name) => write!(f, "{}", name),
            EventKind::Terminate => write!(f, "terminate"),
            EventKind::Tick => write!(f, "tick"),
        }
    }
}
