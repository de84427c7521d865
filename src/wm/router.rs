//! Event routing
//!
//! Decides, for one cycle, which tasks are resumed and with what. Routing is
//! a pure function of the ring, the task states, the pulled event and the
//! timers that are due; the scheduler executes the resulting plan.
//!
//! Rules, per task in ring order:
//!
//! 1. A task sleeping on a timer whose deadline has passed gets that timer,
//!    whatever event was pulled.
//! 2. A task waiting for events gets the pulled event if its filter
//!    matches. Otherwise it gets its earliest due timer if the filter
//!    accepts timers; a timer passed over stays pending.
//! 3. Input events only reach the focused task.
//! 4. Other events reach every task whose filter matches.
//!
//! No task is resumed twice in one cycle.

use std::time::Duration;

use crate::core::event::{Event, EventClass, EventKind, TimerId};
use crate::core::task::{ExecutionState, TaskId, Wake};
use crate::core::timer::TimerEntry;

/// What the scheduler should do this cycle
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Plan {
    /// Resumes to perform, in ring order
    pub deliveries: Vec<(TaskId, Wake)>,
    /// Timers delivered this cycle; remove them from the table
    pub fired: Vec<TimerId>,
    /// Due timers nobody will ever accept; remove them too
    pub dropped: Vec<TimerId>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty() && self.fired.is_empty() && self.dropped.is_empty()
    }

    pub fn resumed(&self, id: TaskId) -> bool {
        self.deliveries.iter().any(|(t, _)| *t == id)
    }
}

/// Build the routing plan for one cycle.
///
/// `tasks` lists ring members in ring order. `event` is the pulled event, or
/// `None` when it was consumed before routing. `due` holds the timers whose
/// deadline is at or before `now`, earliest first.
pub fn plan(
    tasks: &[(TaskId, &ExecutionState)],
    focused: Option<TaskId>,
    event: Option<&Event>,
    due: &[TimerEntry],
    now: Duration,
) -> Plan {
    let mut plan = Plan::default();

    // Timer events are only synthesized from the table
    let event = event.filter(|e| !matches!(e, Event::Timer(_)));

    for &(id, state) in tasks {
        match state {
            ExecutionState::Ready => plan.deliveries.push((id, Wake::Continue)),
            ExecutionState::WaitingForTimer { timer, deadline } => {
                if now >= *deadline {
                    plan.deliveries.push((id, Wake::Event(Event::Timer(*timer))));
                    plan.fired.push(*timer);
                }
            }
            ExecutionState::WaitingForEvent(filter) => {
                let pulled = event
                    .filter(|e| e.matches(filter.as_ref()) && deliverable(e, id, focused));
                let accepts_timer = filter.as_ref().map_or(true, |k| *k == EventKind::Timer);
                let own_timer = due
                    .iter()
                    .find(|e| e.owner == id && !plan.fired.contains(&e.id));

                // A pulled event cannot wait, a due timer can
                if let Some(event) = pulled {
                    plan.deliveries.push((id, Wake::Event(event.clone())));
                } else if let (true, Some(entry)) = (accepts_timer, own_timer) {
                    plan.deliveries.push((id, Wake::Event(Event::Timer(entry.id))));
                    plan.fired.push(entry.id);
                }
            }
            ExecutionState::Dead | ExecutionState::Crashed(_) => {}
        }
    }

    for entry in due {
        if plan.fired.contains(&entry.id) {
            continue;
        }
        let owner = tasks.iter().find(|(t, _)| *t == entry.owner).map(|(_, s)| *s);
        let unwanted = match owner {
            None => true,
            Some(ExecutionState::Dead | ExecutionState::Crashed(_)) => true,
            Some(ExecutionState::WaitingForEvent(Some(kind))) => {
                *kind != EventKind::Timer && !plan.resumed(entry.owner)
            }
            // Busy or already served this cycle; try again next cycle
            Some(_) => false,
        };
        if unwanted {
            plan.dropped.push(entry.id);
        }
    }

    plan
}

fn deliverable(event: &Event, id: TaskId, focused: Option<TaskId>) -> bool {
    match event.class() {
        EventClass::Input => focused == Some(id),
        EventClass::Broadcast => true,
        EventClass::Control => false,
    }
}
