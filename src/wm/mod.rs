//! Session management - the task ring and the loop that drives it.
//!
//! - **ring**: focus ring (ordered task ids + focus index)
//! - **router**: per-cycle routing plan (who is resumed with what)
//! - **scheduler**: owns tasks and timers, runs the cycle
//!
//! # Module Hierarchy
//!
//! ```text
//! wm/
//! ├── mod.rs        - Module exports
//! ├── ring.rs       - FocusRing
//! ├── router.rs     - Routing rules
//! └── scheduler.rs  - Scheduler (top-level coordinator)
//! ```

pub mod ring;
pub mod router;
pub mod scheduler;

pub use ring::FocusRing;
pub use scheduler::{Cycle, Scheduler, SessionError, SessionExit};
