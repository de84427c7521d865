//! Timer table
//!
//! Timers are owned by the scheduler and bound to the task that started
//! them. An entry leaves the table when it fires, is cancelled, or its owner
//! dies.

use std::time::Duration;

use super::event::TimerId;
use super::task::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEntry {
    pub id: TimerId,
    pub deadline: Duration,
    pub owner: TaskId,
}

#[derive(Debug, Default)]
pub struct TimerTable {
    next_id: u64,
    entries: Vec<TimerEntry>,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, owner: TaskId, deadline: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.entries.push(TimerEntry {
            id,
            deadline,
            owner,
        });
        id
    }

    /// Cancel a timer on behalf of `owner`. Other tasks' timers are untouched.
    pub fn cancel(&mut self, owner: TaskId, id: TimerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.id == id && e.owner == owner));
        self.entries.len() != before
    }

    pub fn remove(&mut self, id: TimerId) -> Option<TimerEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn remove_owner(&mut self, owner: TaskId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.owner != owner);
        before - self.entries.len()
    }

    pub fn get(&self, id: TimerId) -> Option<&TimerEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Entries whose deadline has passed, earliest first
    pub fn due(&self, now: Duration) -> Vec<TimerEntry> {
        let mut due: Vec<TimerEntry> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .copied()
            .collect();
        due.sort_by_key(|e| (e.deadline, e.id));
        due
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.next_deadline_where(|_| true)
    }

    /// Earliest deadline among the entries `keep` accepts
    pub fn next_deadline_where(&self, keep: impl Fn(&TimerEntry) -> bool) -> Option<Duration> {
        self.entries
            .iter()
            .filter(|e| keep(e))
            .map(|e| e.deadline)
            .min()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_due_is_ordered_by_deadline() {
        let mut timers = TimerTable::new();
        let late = timers.start(TaskId(1), secs(5));
        let early = timers.start(TaskId(2), secs(2));
        timers.start(TaskId(1), secs(9));

        let due: Vec<TimerId> = timers.due(secs(5)).iter().map(|e| e.id).collect();
        assert_eq!(due, vec![early, late]);
        assert_eq!(timers.next_deadline(), Some(secs(2)));
        assert_eq!(
            timers.next_deadline_where(|e| e.owner == TaskId(1)),
            Some(secs(5))
        );
    }

    #[test]
    fn test_cancel_is_owner_scoped() {
        let mut timers = TimerTable::new();
        let id = timers.start(TaskId(1), secs(1));

        assert!(!timers.cancel(TaskId(2), id));
        assert!(timers.cancel(TaskId(1), id));
        assert!(timers.is_empty());
    }

    #[test]
    fn test_remove_owner_drops_all_its_timers() {
        let mut timers = TimerTable::new();
        timers.start(TaskId(1), secs(1));
        timers.start(TaskId(1), secs(2));
        let other = timers.start(TaskId(2), secs(3));

        assert_eq!(timers.remove_owner(TaskId(1)), 2);
        assert_eq!(timers.len(), 1);
        assert!(timers.get(other).is_some());
    }
}
