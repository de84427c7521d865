//! Core session components.
//!
//! The leaf abstractions the scheduler is built from:
//!
//! - **term**: per-task virtual terminal and the 16-colour palette
//! - **event**: event model, filter kinds and delivery classes
//! - **host**: interfaces the surrounding program provides (clock, event
//!   source, raw display, program loader)
//! - **task**: program bodies, execution state and the task-facing context
//! - **timer**: scheduler-owned timer table
//!
//! # Architecture
//!
//! ```text
//! Task
//! ├── Program (resumable body)
//! ├── VirtualTerminal (private screen)
//! └── ExecutionState (wait condition)
//! ```

pub mod event;
pub mod host;
pub mod task;
pub mod term;
pub mod timer;
