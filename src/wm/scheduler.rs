//! Scheduler - owns every task, the focus ring and the timers, and drives
//! the pull / intercept / route / reap / render cycle.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::rc::Rc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::ring::FocusRing;
use super::router;
use crate::config::StatusBarConfig;
use crate::core::event::Event;
use crate::core::host::{Clock, Display, EventSource, HostServices, LoadError, ProgramLoader};
use crate::core::task::{
    ExecutionState, Program, Request, ResumeEnv, SessionSnapshot, Task, TaskId, TaskInfo, Wake,
};
use crate::core::timer::TimerTable;
use crate::ui::compositor::{Compositor, StatusEntry};
use crate::ui::hotkeys::{HotkeyAction, HotkeyInterceptor, Intercept};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Event source failed: {0}")]
    EventSource(#[source] io::Error),

    #[error("Display failed: {0}")]
    Display(#[source] io::Error),
}

/// Result of one scheduler cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// At least one task is left
    Running,
    /// The ring is empty
    Idle,
    /// A terminate event ended the session
    Aborted,
}

/// Why `run` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Every task finished or was closed
    Idle,
    Terminated,
}

pub struct Scheduler {
    tasks: BTreeMap<TaskId, Task>,
    ring: FocusRing,
    timers: TimerTable,
    loader: Box<dyn ProgramLoader>,
    services: HostServices,
    hotkeys: HotkeyInterceptor,
    compositor: Compositor,
    /// Custom events queued by tasks, served before the host is polled
    pending: VecDeque<Event>,
    requests: Vec<Request>,
    next_id: u64,
    /// Display size; task terminals get all rows but the status bar
    width: u16,
    height: u16,
    /// Program the new-task chord spawns
    default_program: String,
}

impl Scheduler {
    pub fn new(loader: Box<dyn ProgramLoader>, clock: Rc<dyn Clock>, width: u16, height: u16) -> Self {
        let services = HostServices::new(clock, loader.catalogue());
        Self {
            tasks: BTreeMap::new(),
            ring: FocusRing::new(),
            timers: TimerTable::new(),
            loader,
            services,
            hotkeys: HotkeyInterceptor::default(),
            compositor: Compositor::new(width, height, StatusBarConfig::default()),
            pending: VecDeque::new(),
            requests: Vec::new(),
            next_id: 1,
            width,
            height,
            default_program: "menu".to_string(),
        }
    }

    pub fn with_hotkeys(mut self, hotkeys: HotkeyInterceptor) -> Self {
        self.hotkeys = hotkeys;
        self
    }

    pub fn with_status_bar(mut self, style: StatusBarConfig) -> Self {
        self.compositor = Compositor::new(self.width, self.height, style);
        self
    }

    pub fn with_default_program(mut self, name: impl Into<String>) -> Self {
        self.default_program = name.into();
        self
    }

    /// Load `identifier` and start it as a new focused task at the end of
    /// the ring. The body runs up to its first suspension point before this
    /// returns. Load failures create no task.
    pub fn spawn(&mut self, identifier: &str, args: &[String]) -> Result<TaskId, LoadError> {
        let program = self.loader.load(identifier, args, &self.services).map_err(|e| {
            warn!("Failed to load {}: {}", identifier, e);
            e
        })?;
        let id = self.alloc_id();
        self.insert(id, identifier.to_string(), program, true);
        self.settle();
        Ok(id)
    }

    /// Kill a task immediately, without waiting for it to yield
    pub fn close(&mut self, id: TaskId) -> bool {
        let Some(task) = self.tasks.get_mut(&id) else {
            return false;
        };
        task.kill();
        info!("Closed task {} ({})", id, task.name);
        self.timers.remove_owner(id);
        self.reap();
        true
    }

    pub fn focus(&mut self, id: TaskId) -> bool {
        let found = self.ring.set_focus(id);
        if found {
            debug!("Focus on {}", id);
            self.reap();
        }
        found
    }

    pub fn focus_next(&mut self) {
        self.ring.focus_next();
        debug!("Focus next: {:?}", self.ring.focused());
        self.reap();
    }

    pub fn focus_prev(&mut self) {
        self.ring.focus_prev();
        debug!("Focus prev: {:?}", self.ring.focused());
        self.reap();
    }

    pub fn focused(&self) -> Option<TaskId> {
        self.ring.focused()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn is_idle(&self) -> bool {
        self.ring.is_empty()
    }

    /// Ring order, per-task id/name/state and the focus
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            tasks: self
                .ring
                .ids()
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .map(|task| TaskInfo {
                    id: task.id,
                    name: task.name.clone(),
                    state: task.state.clone(),
                })
                .collect(),
            focus: self.ring.focused(),
        }
    }

    /// Run cycles until the ring empties or the host terminates the session
    pub fn run(
        &mut self,
        source: &mut dyn EventSource,
        display: &mut dyn Display,
    ) -> Result<SessionExit, SessionError> {
        info!("Session running with {} task(s)", self.ring.len());
        loop {
            if self.ring.is_empty() {
                self.render(display)?;
                info!("Session idle");
                return Ok(SessionExit::Idle);
            }
            match self.run_cycle(source, display)? {
                Cycle::Running | Cycle::Idle => {}
                Cycle::Aborted => return Ok(SessionExit::Terminated),
            }
        }
    }

    /// One cycle: pull an event, intercept chords, route, apply requests,
    /// reap and render
    pub fn run_cycle(
        &mut self,
        source: &mut dyn EventSource,
        display: &mut dyn Display,
    ) -> Result<Cycle, SessionError> {
        let event = self.next_event(source)?;
        trace!("Event {:?}", event);

        match &event {
            Event::Terminate => {
                self.abort(display)?;
                return Ok(Cycle::Aborted);
            }
            Event::Resize { width, height } => self.resize(*width, *height),
            _ => {}
        }

        let routed = match self.hotkeys.intercept(&event) {
            Intercept::Pass => Some(event),
            Intercept::Consumed => None,
            Intercept::Action(action) => {
                self.perform(action);
                None
            }
        };

        self.dispatch(routed.as_ref());
        self.settle();
        self.render(display)?;

        Ok(if self.ring.is_empty() {
            Cycle::Idle
        } else {
            Cycle::Running
        })
    }

    fn next_event(&mut self, source: &mut dyn EventSource) -> Result<Event, SessionError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(event);
        }
        let timeout = self.poll_timeout();
        source.pull_event(timeout).map_err(SessionError::EventSource)
    }

    /// How long the host may block: not at all while a task is runnable or
    /// a timer is due, until the next deadline otherwise.
    ///
    /// Timers owned by a task sleeping on another timer cannot fire before
    /// that sleep ends and do not count.
    fn poll_timeout(&self) -> Option<Duration> {
        let now = self.services.clock.now();
        let runnable = self
            .tasks
            .values()
            .any(|t| t.state == ExecutionState::Ready);
        if runnable {
            return Some(Duration::ZERO);
        }
        self.timers
            .next_deadline_where(|entry| match self.tasks.get(&entry.owner) {
                Some(task) => match task.state {
                    ExecutionState::WaitingForTimer { timer, .. } => timer == entry.id,
                    _ => true,
                },
                None => true,
            })
            .map(|deadline| deadline.saturating_sub(now))
    }

    fn dispatch(&mut self, event: Option<&Event>) {
        let now = self.services.clock.now();
        let due = self.timers.due(now);

        let plan = {
            let tasks: Vec<(TaskId, &ExecutionState)> = self
                .ring
                .ids()
                .iter()
                .filter_map(|id| self.tasks.get(id).map(|t| (*id, &t.state)))
                .collect();
            router::plan(&tasks, self.ring.focused(), event, &due, now)
        };

        for timer in plan.fired.iter().chain(&plan.dropped) {
            self.timers.remove(*timer);
        }
        if !plan.dropped.is_empty() {
            debug!("Dropped {} unwanted timer(s)", plan.dropped.len());
        }
        for (id, wake) in plan.deliveries {
            self.resume(id, wake);
        }
    }

    fn resume(&mut self, id: TaskId, wake: Wake) {
        let now = self.services.clock.now();
        let session = self.snapshot();
        let Some(task) = self.tasks.get_mut(&id) else {
            return;
        };

        trace!("Resuming {} with {:?}", id, wake);
        task.resume(
            wake,
            ResumeEnv {
                now,
                timers: &mut self.timers,
                session: &session,
                loader: self.loader.as_ref(),
                services: &self.services,
                next_id: &mut self.next_id,
                requests: &mut self.requests,
            },
        );

        if task.state.is_terminal() {
            self.timers.remove_owner(id);
        }

        // Closes are immediate: a closed task is not resumed later in this
        // dispatch. Removal from the ring still happens in `settle`.
        for request in &self.requests {
            if let Request::Close(target) = request {
                if let Some(closed) = self.tasks.get_mut(target) {
                    closed.kill();
                }
                self.timers.remove_owner(*target);
            }
        }
    }

    fn alloc_id(&mut self) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        id
    }

    fn vt_size(&self) -> (u16, u16) {
        (self.width.max(1), self.height.saturating_sub(1).max(1))
    }

    fn insert(&mut self, id: TaskId, name: String, program: Box<dyn Program>, focus: bool) {
        let (width, height) = self.vt_size();
        info!("Spawned task {} ({})", id, name);
        self.tasks.insert(id, Task::new(id, name, program, width, height));
        if focus {
            self.ring.push_focused(id);
        } else {
            self.ring.push(id);
        }
        self.resume(id, Wake::Start);
    }

    /// Apply what bodies asked for, including work queued by tasks started
    /// along the way, then reap
    fn settle(&mut self) {
        while !self.requests.is_empty() {
            for request in std::mem::take(&mut self.requests) {
                match request {
                    Request::Insert {
                        id,
                        name,
                        program,
                        focus,
                    } => self.insert(id, name, program, focus),
                    Request::Close(id) => {
                        self.close(id);
                    }
                    Request::Focus(id) => {
                        self.focus(id);
                    }
                    Request::Queue(event) => self.pending.push_back(event),
                }
            }
        }
        self.reap();
    }

    /// Remove finished tasks from the ring.
    ///
    /// Dead tasks go at once. A crashed task stays until its report has been
    /// on screen and focus has moved on.
    fn reap(&mut self) {
        let focused = self.ring.focused();
        let doomed: Vec<TaskId> = self
            .ring
            .ids()
            .iter()
            .copied()
            .filter(|id| match self.tasks.get(id) {
                Some(task) => match task.state {
                    ExecutionState::Dead => true,
                    ExecutionState::Crashed(_) => task.crash_seen && focused != Some(*id),
                    _ => false,
                },
                None => true,
            })
            .collect();

        for id in doomed {
            self.ring.remove(id);
            self.timers.remove_owner(id);
            if let Some(task) = self.tasks.remove(&id) {
                info!("Reaped task {} ({}, {})", id, task.name, task.state);
            }
        }
    }

    fn perform(&mut self, action: HotkeyAction) {
        info!("Hotkey {:?}", action);
        match action {
            HotkeyAction::NewTask => {
                let name = self.default_program.clone();
                // Load failures are already logged
                let _ = self.spawn(&name, &[]);
            }
            HotkeyAction::FocusNext => self.focus_next(),
            HotkeyAction::FocusPrev => self.focus_prev(),
            HotkeyAction::CloseFocused => {
                if let Some(id) = self.ring.focused() {
                    self.close(id);
                }
            }
        }
    }

    /// Rebuild every terminal at the new size; content is not reflowed
    fn resize(&mut self, width: u16, height: u16) {
        info!("Resize to {}x{}", width, height);
        self.width = width;
        self.height = height;
        let (vt_width, vt_height) = self.vt_size();
        for task in self.tasks.values_mut() {
            task.rebuild_vt(vt_width, vt_height);
        }
        self.compositor.resize(width, height);
    }

    fn abort(&mut self, display: &mut dyn Display) -> Result<(), SessionError> {
        info!("Session terminated with {} task(s)", self.ring.len());
        for (id, task) in self.tasks.iter_mut() {
            task.kill();
            self.timers.remove_owner(*id);
        }
        self.tasks.clear();
        self.ring = FocusRing::new();
        self.pending.clear();
        self.requests.clear();
        self.render(display)
    }

    fn render(&mut self, display: &mut dyn Display) -> Result<(), SessionError> {
        let focused = self.ring.focused();
        let entries: Vec<StatusEntry> = self
            .ring
            .ids()
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|task| StatusEntry {
                name: task.name.clone(),
                focused: Some(task.id) == focused,
                crashed: matches!(task.state, ExecutionState::Crashed(_)),
            })
            .collect();

        let screen = match focused.and_then(|id| self.tasks.get_mut(&id)) {
            Some(task) => {
                if matches!(task.state, ExecutionState::Crashed(_)) {
                    task.crash_seen = true;
                }
                Some((task.id, &mut task.vt))
            }
            None => None,
        };
        self.compositor
            .render(display, screen, &entries)
            .map_err(SessionError::Display)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

    use super::*;
    use crate::core::event::EventKind;
    use crate::core::host::{ManualClock, ScriptedEvents};
    use crate::core::task::{program_fn, Step};
    use crate::core::term::VirtualTerminal;

    type Log = Rc<RefCell<Vec<String>>>;

    #[derive(Default)]
    struct Loader {
        programs: HashMap<String, Box<dyn Fn() -> Box<dyn Program>>>,
    }

    impl Loader {
        fn with(mut self, name: &str, make: impl Fn() -> Box<dyn Program> + 'static) -> Self {
            self.programs.insert(name.to_string(), Box::new(make));
            self
        }
    }

    impl ProgramLoader for Loader {
        fn load(
            &self,
            identifier: &str,
            _args: &[String],
            _services: &HostServices,
        ) -> Result<Box<dyn Program>, LoadError> {
            self.programs
                .get(identifier)
                .map(|make| make())
                .ok_or_else(|| LoadError::NotFound(identifier.to_string()))
        }
    }

    fn describe(wake: &Wake) -> String {
        match wake {
            Wake::Start => "start".to_string(),
            Wake::Continue => "continue".to_string(),
            Wake::Event(event) => event.kind().to_string(),
        }
    }

    /// Logs every wake-up as `tag:what`, then waits on `filter` again
    fn waiter(log: &Log, tag: &str, filter: Option<EventKind>) -> impl Fn() -> Box<dyn Program> {
        let log = log.clone();
        let tag = tag.to_string();
        move || {
            let (log, tag, filter) = (log.clone(), tag.clone(), filter.clone());
            program_fn(move |ctx, wake| {
                log.borrow_mut().push(format!("{}:{}", tag, describe(&wake)));
                Ok(ctx.await_event(filter.clone()))
            })
        }
    }

    fn crasher() -> Box<dyn Program> {
        program_fn(|ctx, wake| match wake {
            Wake::Start => Ok(ctx.await_event(None)),
            _ => Err(anyhow::anyhow!("bad input")),
        })
    }

    fn session(loader: Loader) -> (Scheduler, ManualClock, VirtualTerminal) {
        let clock = ManualClock::new();
        let scheduler = Scheduler::new(Box::new(loader), Rc::new(clock.clone()), 40, 10);
        (scheduler, clock, VirtualTerminal::new(40, 10))
    }

    fn key(c: char) -> Event {
        Event::Key(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    fn ctrl(code: KeyCode) -> Event {
        Event::Key(KeyEvent::new(code, KeyModifiers::CONTROL))
    }

    fn cycle(s: &mut Scheduler, events: &mut ScriptedEvents, display: &mut VirtualTerminal) -> Cycle {
        s.run_cycle(events, display).unwrap()
    }

    fn row(vt: &VirtualTerminal, y: u16) -> String {
        vt.get_line(y).unwrap().0.trim_end().to_string()
    }

    #[test]
    fn test_spawn_appends_and_focuses() {
        let log = Log::default();
        let loader = Loader::default()
            .with("a", waiter(&log, "a", None))
            .with("b", waiter(&log, "b", None));
        let (mut s, _, _) = session(loader);

        let a = s.spawn("a", &[]).unwrap();
        let b = s.spawn("b", &[]).unwrap();

        let snapshot = s.snapshot();
        assert_eq!(snapshot.order(), vec![a, b]);
        assert_eq!(snapshot.focus, Some(b));
        assert_eq!(*log.borrow(), vec!["a:start", "b:start"]);
        assert_eq!(
            snapshot.get(a).unwrap().state,
            ExecutionState::WaitingForEvent(None)
        );
    }

    #[test]
    fn test_key_reaches_only_focused_matching_task() {
        let log = Log::default();
        let loader = Loader::default()
            .with("a", waiter(&log, "a", None))
            .with("b", waiter(&log, "b", Some(EventKind::Timer)));
        let (mut s, _, mut display) = session(loader);
        let a = s.spawn("a", &[]).unwrap();
        let b = s.spawn("b", &[]).unwrap();
        s.focus(a);
        log.borrow_mut().clear();

        let mut events = ScriptedEvents::new();
        events.push(key('A'));
        cycle(&mut s, &mut events, &mut display);

        assert_eq!(*log.borrow(), vec!["a:key"]);
        assert_eq!(
            s.task(b).unwrap().state,
            ExecutionState::WaitingForEvent(Some(EventKind::Timer))
        );
    }

    #[test]
    fn test_background_tasks_never_see_input() {
        let log = Log::default();
        let loader = Loader::default()
            .with("a", waiter(&log, "a", None))
            .with("b", waiter(&log, "b", None));
        let (mut s, _, mut display) = session(loader);
        s.spawn("a", &[]).unwrap();
        s.spawn("b", &[]).unwrap();
        log.borrow_mut().clear();

        let mut events = ScriptedEvents::new();
        events
            .push(key('x'))
            .push(Event::Paste("text".into()))
            .push(Event::custom("mail", vec![]));
        for _ in 0..3 {
            cycle(&mut s, &mut events, &mut display);
        }

        assert_eq!(*log.borrow(), vec!["b:key", "b:paste", "a:mail", "b:mail"]);
    }

    #[test]
    fn test_sleep_resumes_exactly_at_deadline() {
        let log = Log::default();
        let sleep_log = log.clone();
        let loader = Loader::default().with("sleeper", move || {
            let log = sleep_log.clone();
            program_fn(move |ctx, wake| {
                log.borrow_mut().push(describe(&wake));
                Ok(match wake {
                    Wake::Start => ctx.sleep(Duration::from_secs(2)),
                    _ => ctx.await_event(None),
                })
            })
        });
        let (mut s, clock, mut display) = session(loader);
        let id = s.spawn("sleeper", &[]).unwrap();

        let mut events = ScriptedEvents::with_clock(clock.clone());
        events
            .push_after(Duration::from_millis(1900), key('x'))
            .push_after(Duration::from_millis(90), Event::Tick)
            .push_after(Duration::from_millis(10), Event::Tick)
            .push_after(Duration::from_secs(1), Event::Tick);

        cycle(&mut s, &mut events, &mut display);
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(clock.now(), Duration::from_millis(1990));
        assert!(matches!(
            s.task(id).unwrap().state,
            ExecutionState::WaitingForTimer { .. }
        ));
        assert_eq!(*log.borrow(), vec!["start"]);

        cycle(&mut s, &mut events, &mut display);
        assert_eq!(*log.borrow(), vec!["start", "timer"]);

        cycle(&mut s, &mut events, &mut display);
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(s.timers.len(), 0);
    }

    #[test]
    fn test_key_is_not_lost_to_a_due_timer() {
        let log = Log::default();
        let timer_log = log.clone();
        let loader = Loader::default().with("t", move || {
            let log = timer_log.clone();
            program_fn(move |ctx, wake| {
                match &wake {
                    Wake::Start => {
                        ctx.start_timer(Duration::from_secs(1));
                    }
                    other => log.borrow_mut().push(describe(other)),
                }
                Ok(ctx.await_event(None))
            })
        });
        let (mut s, clock, mut display) = session(loader);
        s.spawn("t", &[]).unwrap();

        let mut events = ScriptedEvents::with_clock(clock);
        events
            .push_after(Duration::from_secs(2), key('k'))
            .push(Event::Tick);

        cycle(&mut s, &mut events, &mut display);
        assert_eq!(*log.borrow(), vec!["key"]);
        // the timer is still due, so the host must not block
        assert_eq!(s.poll_timeout(), Some(Duration::ZERO));

        cycle(&mut s, &mut events, &mut display);
        assert_eq!(*log.borrow(), vec!["key", "timer"]);
        assert!(s.timers.is_empty());
        assert_eq!(s.poll_timeout(), None);
    }

    #[test]
    fn test_close_takes_effect_within_the_same_dispatch() {
        let log = Log::default();
        let closer_log = log.clone();
        let go = Some(EventKind::Custom("go".into()));
        let closer_filter = go.clone();
        let loader = Loader::default()
            .with("closer", move || {
                let (log, filter) = (closer_log.clone(), closer_filter.clone());
                program_fn(move |ctx, wake| {
                    if wake.event().is_some() {
                        log.borrow_mut().push("closer:go".to_string());
                        ctx.close(TaskId(2));
                    }
                    Ok(ctx.await_event(filter.clone()))
                })
            })
            .with("victim", waiter(&log, "victim", go));
        let (mut s, _, mut display) = session(loader);
        let closer = s.spawn("closer", &[]).unwrap();
        let victim = s.spawn("victim", &[]).unwrap();
        assert_eq!(victim, TaskId(2));
        log.borrow_mut().clear();

        let mut events = ScriptedEvents::new();
        events.push(Event::custom("go", vec![]));
        cycle(&mut s, &mut events, &mut display);

        assert_eq!(*log.borrow(), vec!["closer:go"]);
        assert!(s.task(victim).is_none());
        assert_eq!(s.snapshot().order(), vec![closer]);
        assert_eq!(s.focused(), Some(closer));
    }

    #[test]
    fn test_timer_parked_behind_sleep_does_not_spin() {
        let log = Log::default();
        let sleep_log = log.clone();
        let loader = Loader::default().with("t", move || {
            let log = sleep_log.clone();
            program_fn(move |ctx, wake| match wake {
                Wake::Start => {
                    ctx.start_timer(Duration::from_secs(1));
                    Ok(ctx.sleep(Duration::from_secs(5)))
                }
                other => {
                    log.borrow_mut().push(describe(&other));
                    Ok(ctx.await_event(None))
                }
            })
        });
        let (mut s, clock, mut display) = session(loader);
        s.spawn("t", &[]).unwrap();

        clock.set(Duration::from_secs(2));
        assert_eq!(s.poll_timeout(), Some(Duration::from_secs(3)));

        let mut events = ScriptedEvents::with_clock(clock);
        events
            .push_after(Duration::from_secs(3), Event::Tick)
            .push(Event::Tick);

        // the sleep ends; the parked timer becomes deliverable
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(*log.borrow(), vec!["timer"]);
        assert_eq!(s.poll_timeout(), Some(Duration::ZERO));

        cycle(&mut s, &mut events, &mut display);
        assert_eq!(*log.borrow(), vec!["timer", "timer"]);
        assert!(s.timers.is_empty());
    }

    #[test]
    fn test_focus_next_chord_wraps() {
        let log = Log::default();
        let loader = Loader::default().with("t", waiter(&log, "t", None));
        let (mut s, _, mut display) = session(loader);
        let first = s.spawn("t", &[]).unwrap();
        let second = s.spawn("t", &[]).unwrap();
        s.spawn("t", &[]).unwrap();
        s.focus(second);
        log.borrow_mut().clear();

        let mut events = ScriptedEvents::new();
        events.push(ctrl(KeyCode::Right)).push(ctrl(KeyCode::Right));
        cycle(&mut s, &mut events, &mut display);
        cycle(&mut s, &mut events, &mut display);

        assert_eq!(s.focused(), Some(first));
        // chords are never forwarded
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_close_focused_moves_to_next() {
        let log = Log::default();
        let loader = Loader::default().with("t", waiter(&log, "t", None));
        let (mut s, _, _) = session(loader);
        let first = s.spawn("t", &[]).unwrap();
        let second = s.spawn("t", &[]).unwrap();
        let third = s.spawn("t", &[]).unwrap();
        s.focus(second);

        assert!(s.close(second));
        assert_eq!(s.focused(), Some(third));
        assert!(s.task(second).is_none());

        s.close(third);
        assert_eq!(s.focused(), Some(first));
        assert!(!s.close(third));
    }

    #[test]
    fn test_crash_is_isolated_and_reported() {
        let log = Log::default();
        let loader = Loader::default()
            .with("a", waiter(&log, "a", None))
            .with("crasher", crasher)
            .with("c", waiter(&log, "c", None));
        let (mut s, _, mut display) = session(loader);
        let a = s.spawn("a", &[]).unwrap();
        let bad = s.spawn("crasher", &[]).unwrap();
        let c = s.spawn("c", &[]).unwrap();

        let mut events = ScriptedEvents::new();
        events.push(Event::custom("poke", vec![])).push(Event::Tick);
        cycle(&mut s, &mut events, &mut display);

        let snapshot = s.snapshot();
        assert_eq!(snapshot.order(), vec![a, bad, c]);
        assert_eq!(snapshot.focus, Some(c));
        assert_eq!(
            snapshot.get(bad).unwrap().state,
            ExecutionState::Crashed("bad input".into())
        );
        assert_eq!(snapshot.get(a).unwrap().state, ExecutionState::WaitingForEvent(None));
        assert_eq!(snapshot.get(c).unwrap().state, ExecutionState::WaitingForEvent(None));
        assert_eq!(row(&s.task(bad).unwrap().vt, 1), "crasher crashed: bad input");

        // Stays until it has been looked at and left
        s.focus(bad);
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(row(&display, 1), "crasher crashed: bad input");
        assert!(s.task(bad).is_some());

        s.focus_next();
        assert_eq!(s.snapshot().order(), vec![a, c]);
        assert_eq!(s.focused(), Some(c));
    }

    #[test]
    fn test_panicking_task_is_crashed() {
        let loader = Loader::default().with("p", || {
            program_fn(|_ctx, _wake| -> anyhow::Result<Step> { panic!("oops") })
        });
        let (mut s, _, _) = session(loader);
        let id = s.spawn("p", &[]).unwrap();

        assert_eq!(
            s.task(id).unwrap().state,
            ExecutionState::Crashed("panicked: oops".into())
        );
    }

    #[test]
    fn test_load_error_creates_no_task() {
        let (mut s, _, _) = session(Loader::default());

        let err = s.spawn("nope", &[]).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(ref name) if name == "nope"));
        assert!(s.is_idle());
        assert_eq!(s.snapshot(), SessionSnapshot::default());
    }

    #[test]
    fn test_terminate_aborts_session() {
        let log = Log::default();
        let loader = Loader::default().with("t", waiter(&log, "t", None));
        let (mut s, _, mut display) = session(loader);
        s.spawn("t", &[]).unwrap();
        s.spawn("t", &[]).unwrap();

        let mut events = ScriptedEvents::new();
        events.push(key('a')).push(Event::Terminate);
        let exit = s.run(&mut events, &mut display).unwrap();

        assert_eq!(exit, SessionExit::Terminated);
        assert!(s.is_idle());
        assert_eq!(*log.borrow(), vec!["t:start", "t:start", "t:key"]);
    }

    #[test]
    fn test_resize_rebuilds_terminals() {
        let log = Log::default();
        let loader = Loader::default()
            .with("a", waiter(&log, "a", Some(EventKind::Resize)))
            .with("b", waiter(&log, "b", Some(EventKind::Key)));
        let (mut s, _, _) = session(loader);
        let a = s.spawn("a", &[]).unwrap();
        let b = s.spawn("b", &[]).unwrap();
        log.borrow_mut().clear();

        let mut display = VirtualTerminal::new(30, 6);
        let mut events = ScriptedEvents::new();
        events.push(Event::Resize {
            width: 30,
            height: 6,
        });
        cycle(&mut s, &mut events, &mut display);

        for id in [a, b] {
            let vt = &s.task(id).unwrap().vt;
            assert_eq!(vt.size(), (30, 5));
            assert_eq!(row(vt, 1), "[resized to 30x5]");
        }
        assert_eq!(*log.borrow(), vec!["a:resize"]);
        assert_eq!(row(&display, 6), "[a] [*b]");
    }

    #[test]
    fn test_session_goes_idle_when_ring_empties() {
        let loader = Loader::default().with("once", || {
            program_fn(|ctx, wake| match wake {
                Wake::Start => Ok(ctx.await_event(Some(EventKind::Key))),
                _ => Ok(Step::Done),
            })
        });
        let (mut s, _, mut display) = session(loader);
        s.spawn("once", &[]).unwrap();

        let mut events = ScriptedEvents::new();
        events.push(Event::Tick).push(key('q'));
        let exit = s.run(&mut events, &mut display).unwrap();

        assert_eq!(exit, SessionExit::Idle);
        assert_eq!(events.remaining(), 0);
        assert_eq!(row(&display, 10), "");
    }

    #[test]
    fn test_ready_tasks_keep_running() {
        let count = Rc::new(std::cell::Cell::new(0));
        let seen = count.clone();
        let loader = Loader::default().with("busy", move || {
            let seen = seen.clone();
            program_fn(move |ctx, _wake| {
                seen.set(seen.get() + 1);
                Ok(if seen.get() < 3 {
                    Step::Ready
                } else {
                    ctx.sleep(Duration::from_millis(500))
                })
            })
        });
        let (mut s, _, mut display) = session(loader);
        s.spawn("busy", &[]).unwrap();
        assert_eq!(s.poll_timeout(), Some(Duration::ZERO));

        let mut events = ScriptedEvents::new();
        events.push(Event::Tick).push(Event::Tick);
        cycle(&mut s, &mut events, &mut display);
        cycle(&mut s, &mut events, &mut display);

        assert_eq!(count.get(), 3);
        assert_eq!(s.poll_timeout(), Some(Duration::from_millis(500)));
    }

    #[test]
    fn test_tasks_spawn_and_signal_each_other() {
        let log = Log::default();
        let launch_log = log.clone();
        let loader = Loader::default()
            .with("listener", waiter(&log, "listener", Some(EventKind::Custom("ping".into()))))
            .with("launcher", move || {
                let log = launch_log.clone();
                program_fn(move |ctx, wake| {
                    if wake.event().is_some() {
                        let id = ctx.spawn("listener", &[])?;
                        log.borrow_mut().push(format!("launched {}", id));
                        ctx.queue_event("ping", vec!["hi".into()]);
                    }
                    Ok(ctx.await_event(Some(EventKind::Key)))
                })
            });
        let (mut s, _, mut display) = session(loader);
        let launcher = s.spawn("launcher", &[]).unwrap();

        let mut events = ScriptedEvents::new();
        events.push(key('n'));
        cycle(&mut s, &mut events, &mut display);

        let snapshot = s.snapshot();
        assert_eq!(snapshot.order(), vec![launcher, TaskId(2)]);
        assert_eq!(snapshot.focus, Some(TaskId(2)));
        assert_eq!(*log.borrow(), vec!["launched #2", "listener:start"]);

        // queued event is served without polling the host
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(log.borrow().last().map(String::as_str), Some("listener:ping"));
    }

    #[test]
    fn test_new_task_and_close_chords() {
        let log = Log::default();
        let loader = Loader::default().with("a", waiter(&log, "a", None));
        let (s, _, mut display) = session(loader);
        let mut s = s.with_default_program("a");
        let first = s.spawn("a", &[]).unwrap();

        let mut events = ScriptedEvents::new();
        events.push(ctrl(KeyCode::Char('t')));
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(s.snapshot().tasks.len(), 2);
        assert_ne!(s.focused(), Some(first));

        events.push(ctrl(KeyCode::Char('w')));
        cycle(&mut s, &mut events, &mut display);
        assert_eq!(s.snapshot().order(), vec![first]);
        assert_eq!(s.focused(), Some(first));
    }
}
