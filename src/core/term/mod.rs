//! Virtual terminal: the per-task character-cell display device.

mod state;

pub use state::{parse_blit, Cell, Color, DirtyRows, VirtualTerminal, VtError};
