//! Tasks
//!
//! A task is one resumable program body plus the virtual terminal it draws
//! on. The body is driven explicitly: every resume hands it a `Wake` and it
//! answers with a `Step` naming what it waits for next. Errors and panics
//! raised by the body stop at this boundary and turn the task `Crashed`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::event::{Event, EventKind, TimerId};
use super::host::{HostServices, LoadError, ProgramLoader};
use super::term::{Color, VirtualTerminal};
use super::timer::TimerTable;

/// Unique task identifier, assigned in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Task execution state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionState {
    /// Runnable; resumed again on the next cycle
    Ready,
    /// Waiting for an event, optionally of one kind only
    WaitingForEvent(Option<EventKind>),
    /// Sleeping until `deadline` (session time)
    WaitingForTimer { timer: TimerId, deadline: Duration },
    /// Finished or closed
    Dead,
    /// Stopped by an error raised from the body
    Crashed(String),
}

impl ExecutionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionState::Dead | ExecutionState::Crashed(_))
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionState::Ready => write!(f, "ready"),
            ExecutionState::WaitingForEvent(None) => write!(f, "waiting"),
            ExecutionState::WaitingForEvent(Some(kind)) => write!(f, "waiting:{}", kind),
            ExecutionState::WaitingForTimer { deadline, .. } => {
                write!(f, "sleeping:{:.1}s", deadline.as_secs_f64())
            }
            ExecutionState::Dead => write!(f, "dead"),
            ExecutionState::Crashed(_) => write!(f, "crashed"),
        }
    }
}

/// Why a body is being resumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wake {
    /// First resume right after spawn
    Start,
    /// An event that satisfied the wait condition
    Event(Event),
    /// The body yielded `Step::Ready` last time
    Continue,
}

impl Wake {
    pub fn event(&self) -> Option<&Event> {
        match self {
            Wake::Event(event) => Some(event),
            _ => None,
        }
    }
}

/// What a body asks for when it yields
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Give others a turn, then continue
    Ready,
    /// Suspend until an event matching the filter (any event if `None`)
    WaitEvent(Option<EventKind>),
    /// Suspend until the timer fires; build with `TaskContext::sleep`
    WaitTimer { timer: TimerId, deadline: Duration },
    /// Return normally
    Done,
}

/// A cooperatively scheduled program body
pub trait Program {
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step>;
}

impl<F> Program for F
where
    F: FnMut(&mut TaskContext<'_>, Wake) -> anyhow::Result<Step>,
{
    fn resume(&mut self, ctx: &mut TaskContext<'_>, wake: Wake) -> anyhow::Result<Step> {
        self(ctx, wake)
    }
}

/// Box a closure as a program body
pub fn program_fn<F>(body: F) -> Box<dyn Program>
where
    F: FnMut(&mut TaskContext<'_>, Wake) -> anyhow::Result<Step> + 'static,
{
    Box::new(body)
}

/// Read-only view of one ring member
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub state: ExecutionState,
}

/// Session state exposed for inspection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Ring members in ring order
    pub tasks: Vec<TaskInfo>,
    pub focus: Option<TaskId>,
}

impl SessionSnapshot {
    pub fn order(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskInfo> {
        self.tasks.iter().find(|t| t.id == id)
    }
}

/// Work a body asked for that the scheduler applies after dispatch
pub(crate) enum Request {
    Insert {
        id: TaskId,
        name: String,
        program: Box<dyn Program>,
        focus: bool,
    },
    Close(TaskId),
    Focus(TaskId),
    Queue(Event),
}

/// Scheduler-owned pieces a resume may touch
pub(crate) struct ResumeEnv<'a> {
    pub now: Duration,
    pub timers: &'a mut TimerTable,
    pub session: &'a SessionSnapshot,
    pub loader: &'a dyn ProgramLoader,
    pub services: &'a HostServices,
    pub next_id: &'a mut u64,
    pub requests: &'a mut Vec<Request>,
}

/// The surface a body may use while it runs
pub struct TaskContext<'a> {
    id: TaskId,
    name: &'a mut String,
    vt: &'a mut VirtualTerminal,
    env: ResumeEnv<'a>,
}

impl<'a> TaskContext<'a> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// The task's own terminal
    pub fn vt(&mut self) -> &mut VirtualTerminal {
        &mut *self.vt
    }

    /// Session time
    pub fn now(&self) -> Duration {
        self.env.now
    }

    /// Snapshot of the ring taken just before this resume
    pub fn session(&self) -> &SessionSnapshot {
        self.env.session
    }

    pub fn services(&self) -> &HostServices {
        self.env.services
    }

    /// Yield until an event matching `filter` arrives
    pub fn await_event(&self, filter: Option<EventKind>) -> Step {
        Step::WaitEvent(filter)
    }

    /// Yield until `duration` has elapsed.
    ///
    /// Backed by a private timer; the body is resumed with `Event::Timer` for
    /// that timer exactly once.
    pub fn sleep(&mut self, duration: Duration) -> Step {
        let deadline = self.env.now + duration;
        let timer = self.env.timers.start(self.id, deadline);
        Step::WaitTimer { timer, deadline }
    }

    /// Start a timer delivered later as `Event::Timer(id)` to this task only
    pub fn start_timer(&mut self, duration: Duration) -> TimerId {
        self.env.timers.start(self.id, self.env.now + duration)
    }

    pub fn cancel_timer(&mut self, timer: TimerId) -> bool {
        self.env.timers.cancel(self.id, timer)
    }

    /// Queue a custom event; it is dispatched before the next host event
    pub fn queue_event(&mut self, name: &str, args: Vec<String>) {
        self.env.requests.push(Request::Queue(Event::custom(name, args)));
    }

    /// Load a program and add it to the ring with focus
    pub fn spawn(&mut self, identifier: &str, args: &[String]) -> Result<TaskId, LoadError> {
        self.insert(identifier, args, true)
    }

    /// Load a program and add it to the ring in the background
    pub fn launch(&mut self, identifier: &str, args: &[String]) -> Result<TaskId, LoadError> {
        self.insert(identifier, args, false)
    }

    /// Rename this task; the status bar picks it up on the next frame
    pub fn set_title(&mut self, title: &str) {
        *self.name = title.to_string();
    }

    pub fn focus(&mut self, id: TaskId) {
        self.env.requests.push(Request::Focus(id));
    }

    pub fn close(&mut self, id: TaskId) {
        self.env.requests.push(Request::Close(id));
    }

    fn insert(&mut self, identifier: &str, args: &[String], focus: bool) -> Result<TaskId, LoadError> {
        let program = self.env.loader.load(identifier, args, self.env.services)?;
        let id = TaskId(*self.env.next_id);
        *self.env.next_id += 1;
        self.env.requests.push(Request::Insert {
            id,
            name: identifier.to_string(),
            program,
            focus,
        });
        Ok(id)
    }
}

/// One program instance and its private terminal
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub state: ExecutionState,
    pub vt: VirtualTerminal,
    program: Box<dyn Program>,
    /// Crash text has been on screen at least once
    pub(crate) crash_seen: bool,
}

impl Task {
    pub fn new(id: TaskId, name: String, program: Box<dyn Program>, width: u16, height: u16) -> Self {
        Self {
            id,
            name,
            state: ExecutionState::Ready,
            vt: VirtualTerminal::new(width, height),
            program,
            crash_seen: false,
        }
    }

    /// Resume the body once and record the state it yields.
    ///
    /// Terminal tasks are never resumed again.
    pub(crate) fn resume(&mut self, wake: Wake, env: ResumeEnv<'_>) {
        if self.state.is_terminal() {
            return;
        }

        let Task {
            id,
            name,
            vt,
            program,
            ..
        } = self;
        let mut ctx = TaskContext {
            id: *id,
            name,
            vt,
            env,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| program.resume(&mut ctx, wake)));

        self.state = match result {
            Ok(Ok(Step::Ready)) => ExecutionState::Ready,
            Ok(Ok(Step::WaitEvent(filter))) => ExecutionState::WaitingForEvent(filter),
            Ok(Ok(Step::WaitTimer { timer, deadline })) => {
                ExecutionState::WaitingForTimer { timer, deadline }
            }
            Ok(Ok(Step::Done)) => {
                info!("Task {} ({}) finished", self.id, self.name);
                ExecutionState::Dead
            }
            Ok(Err(e)) => self.crash(format!("{:#}", e)),
            Err(payload) => self.crash(panic_message(payload)),
        };
        debug!("Task {} is now {}", self.id, self.state);
    }

    /// Force the task dead without waiting for a suspension point
    pub(crate) fn kill(&mut self) {
        self.state = ExecutionState::Dead;
    }

    /// Replace the terminal with a blank one of a new size.
    ///
    /// Content is not reflowed; the new screen only notes the resize, plus
    /// the crash report for a crashed task.
    pub(crate) fn rebuild_vt(&mut self, width: u16, height: u16) {
        self.vt = VirtualTerminal::new(width, height);
        self.vt.set_text_color(Color::BrightBlack);
        self.vt.print(&format!("[resized to {}x{}]", width, height));
        self.vt.newline();
        self.vt.set_text_color(VirtualTerminal::DEFAULT_TEXT);

        if let ExecutionState::Crashed(message) = &self.state {
            let message = message.clone();
            self.print_crash(&message);
        }
    }

    fn crash(&mut self, message: String) -> ExecutionState {
        warn!("Task {} ({}) crashed: {}", self.id, self.name, message);
        self.print_crash(&message);
        ExecutionState::Crashed(message)
    }

    fn print_crash(&mut self, message: &str) {
        let vt = &mut self.vt;
        vt.set_background_color(VirtualTerminal::DEFAULT_BACKGROUND);
        vt.set_text_color(Color::Red);
        if vt.cursor_pos().0 > 1 {
            vt.newline();
        }
        vt.print(&format!("{} crashed: {}", self.name, message));
        vt.newline();
        vt.set_text_color(Color::BrightBlack);
        vt.print("Close this task to dismiss it.");
        vt.set_text_color(VirtualTerminal::DEFAULT_TEXT);
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
