//! User interface: what reaches the real terminal and what comes back.
//!
//! - **hotkeys**: session chords intercepted before routing
//! - **compositor**: focused terminal + status bar renderer
//! - **terminal**: crossterm-backed display and event source

pub mod compositor;
pub mod hotkeys;
pub mod terminal;

pub use compositor::{Compositor, StatusEntry};
pub use hotkeys::{Chord, HotkeyAction, HotkeyInterceptor, Intercept, Modifiers};
pub use terminal::{CrosstermDisplay, CrosstermEvents};
