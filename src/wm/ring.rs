//! Focus ring - ordered task ids with a wrapping focus index

use crate::core::task::TaskId;

#[derive(Debug, Default, Clone)]
pub struct FocusRing {
    /// Live task ids in creation order
    order: Vec<TaskId>,
    /// Index into `order`, valid whenever `order` is non-empty
    focus: usize,
}

impl FocusRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` and give it focus
    pub fn push_focused(&mut self, id: TaskId) {
        self.order.push(id);
        self.focus = self.order.len() - 1;
    }

    /// Append `id` without moving focus
    pub fn push(&mut self, id: TaskId) {
        self.order.push(id);
    }

    /// Remove `id` from the ring.
    ///
    /// Removing the focused task hands focus to the task that followed it,
    /// wrapping to the front when it was last.
    pub fn remove(&mut self, id: TaskId) -> bool {
        let Some(pos) = self.position(id) else {
            return false;
        };
        self.order.remove(pos);

        if pos < self.focus {
            self.focus -= 1;
        } else if self.focus >= self.order.len() {
            self.focus = 0;
        }
        true
    }

    pub fn focus_next(&mut self) {
        if !self.order.is_empty() {
            self.focus = (self.focus + 1) % self.order.len();
        }
    }

    pub fn focus_prev(&mut self) {
        if !self.order.is_empty() {
            self.focus = if self.focus == 0 {
                self.order.len() - 1
            } else {
                self.focus - 1
            };
        }
    }

    /// Focus `id` if it is in the ring
    pub fn set_focus(&mut self, id: TaskId) -> bool {
        match self.position(id) {
            Some(pos) => {
                self.focus = pos;
                true
            }
            None => false,
        }
    }

    pub fn focused(&self) -> Option<TaskId> {
        self.order.get(self.focus).copied()
    }

    pub fn focus_index(&self) -> Option<usize> {
        if self.order.is_empty() {
            None
        } else {
            Some(self.focus)
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.order.contains(&id)
    }

    pub fn position(&self, id: TaskId) -> Option<usize> {
        self.order.iter().position(|&t| t == id)
    }

    pub fn ids(&self) -> &[TaskId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
