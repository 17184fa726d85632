// src/runtime/closure.rs
//! Captured-variable cells
//!
//! A cell starts `Open`, naming a slot of a live call frame; reads and writes
//! go through that frame. When the frame is retired the cell is closed: the
//! slot's last value is copied into the cell and the frame is never consulted
//! again. Closing is one-way.

use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::frame::FrameId;
use crate::runtime::value::Value;

/// State of a captured binding
#[derive(Debug, Clone)]
pub enum CellState {
    /// Aliases `slot` of the live frame `frame`
    Open { frame: FrameId, slot: usize },
    /// Owns the value copied out when the frame ended
    Closed(Value),
}

/// Shared captured-variable binding
///
/// Clones share the same state, so sibling closures over one local observe
/// each other's writes before and after the cell closes.
#[derive(Debug, Clone)]
pub struct ClosureCell {
    state: Rc<RefCell<CellState>>,
    name: Rc<str>,
}

impl ClosureCell {
    pub fn open(name: impl Into<Rc<str>>, frame: FrameId, slot: usize) -> Self {
        Self::with_state(name, CellState::Open { frame, slot })
    }

    pub fn closed(name: impl Into<Rc<str>>, value: Value) -> Self {
        Self::with_state(name, CellState::Closed(value))
    }

    fn with_state(name: impl Into<Rc<str>>, state: CellState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
            name: name.into(),
        }
    }

    /// Name of the captured variable, used in error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the current state
    pub fn state(&self) -> CellState {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.state.borrow(), CellState::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        !self.is_open()
    }

    /// Frame and slot while open
    pub fn location(&self) -> Option<(FrameId, usize)> {
        match *self.state.borrow() {
            CellState::Open { frame, slot } => Some((frame, slot)),
            CellState::Closed(_) => None,
        }
    }

    pub fn closed_value(&self) -> Option<Value> {
        match &*self.state.borrow() {
            CellState::Closed(value) => Some(value.clone()),
            CellState::Open { .. } => None,
        }
    }

    /// Copy `value` in and detach from the frame. False if already closed.
    pub fn close(&self, value: Value) -> bool {
        let mut state = self.state.borrow_mut();
        if matches!(*state, CellState::Closed(_)) {
            return false;
        }
        *state = CellState::Closed(value);
        true
    }

    /// Overwrite the value of a closed cell. False while open.
    pub fn store(&self, value: Value) -> bool {
        let mut state = self.state.borrow_mut();
        match &mut *state {
            CellState::Closed(slot) => {
                *slot = value;
                true
            }
            CellState::Open { .. } => false,
        }
    }

    pub fn ptr_eq(&self, other: &ClosureCell) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_is_one_way() {
        let cell = ClosureCell::open("total", FrameId(7), 2);
        assert_eq!(cell.location(), Some((FrameId(7), 2)));
        assert!(!cell.store(Value::number(1.0)));

        assert!(cell.close(Value::number(5.0)));
        assert!(cell.is_closed());
        assert!(!cell.close(Value::number(9.0)));
        assert_eq!(cell.closed_value(), Some(Value::number(5.0)));
        assert_eq!(cell.location(), None);
    }

    #[test]
    fn test_clones_share_state() {
        let cell = ClosureCell::open("count", FrameId(1), 0);
        let sibling = cell.clone();

        cell.close(Value::number(1.0));
        assert!(sibling.is_closed());

        sibling.store(Value::number(2.0));
        assert_eq!(cell.closed_value(), Some(Value::number(2.0)));
        assert!(cell.ptr_eq(&sibling));
        assert_eq!(sibling.name(), "count");
    }

    #[test]
    fn test_closed_cell_keeps_name() {
        let cell = ClosureCell::closed("limit", Value::number(3.0));
        assert_eq!(cell.name(), "limit");
        assert_eq!(cell.closed_value(), Some(Value::number(3.0)));
    }
}
