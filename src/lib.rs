//! taskring - a cooperative multitasking session manager.
//!
//! Several programs share one terminal. Each runs as a task with its own
//! virtual terminal; one task is focused (visible, receiving input) while
//! the rest keep running in the background. Tasks yield explicitly by
//! waiting for an event or a deadline, and a crash stays inside the task
//! that raised it.

pub mod config;
pub mod core;
pub mod programs;
pub mod ui;
pub mod wm;

pub use crate::core::event::{Event, EventKind, TimerId};
pub use crate::core::host::{Clock, Display, EventSource, HostServices, LoadError, ProgramLoader};
pub use crate::core::task::{
    program_fn, ExecutionState, Program, SessionSnapshot, Step, TaskContext, TaskId, TaskInfo, Wake,
};
pub use crate::core::term::{Color, VirtualTerminal};
pub use crate::wm::{Scheduler, SessionError, SessionExit};
