// src/runtime/frame.rs
//! Call frames and backtraces

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::runtime::closure::ClosureCell;
use crate::runtime::value::{FunctionRef, Value};

static NEXT_FRAME: AtomicU64 = AtomicU64::new(1);

/// Identity of a call frame, stable while a generator frame is suspended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u64);

impl FrameId {
    pub(crate) fn next() -> Self {
        FrameId(NEXT_FRAME.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered `try` block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TryHandler {
    /// Instruction offset of the handler
    pub offset: usize,
    /// Frame count when the handler was registered
    pub frame_depth: usize,
    /// Depth of the registering frame's stack
    pub stack_len: usize,
}

/// Execution context of one invocation
#[derive(Debug)]
pub struct CallFrame {
    pub id: FrameId,
    /// Name reported in backtraces
    pub name: String,
    pub function: FunctionRef,
    /// Instruction pointer into the function's code
    pub ip: usize,
    /// Index of the first local in the shared stack (ordinary frames)
    pub slot_base: usize,
    /// Shared stack depth before the call
    pub saved_sp: usize,
    /// Offset of the current instruction, for line lookup
    pub offset: usize,
    /// Private evaluation stack, present only for generator frames
    pub gen_stack: Option<Vec<Value>>,
    pub local_count: usize,
    /// Handlers a suspended generator registered before yielding
    pub saved_try: Vec<TryHandler>,
    open_cells: Vec<(usize, ClosureCell)>,
}

impl CallFrame {
    /// Frame whose locals live in the shared stack from `slot_base`
    pub fn new(function: FunctionRef, slot_base: usize) -> Self {
        let (name, local_count) = {
            let f = function.borrow();
            (f.name.clone(), f.local_count())
        };
        Self {
            id: FrameId::next(),
            name,
            function,
            ip: 0,
            slot_base,
            saved_sp: slot_base,
            offset: 0,
            gen_stack: None,
            local_count,
            saved_try: Vec::new(),
            open_cells: Vec::new(),
        }
    }

    /// Frame with its own private stack
    pub fn generator(function: FunctionRef, capacity: usize) -> Self {
        let mut frame = Self::new(function, 0);
        frame.gen_stack = Some(Vec::with_capacity(capacity.max(frame.local_count)));
        frame
    }

    #[inline]
    pub fn is_generator(&self) -> bool {
        self.gen_stack.is_some()
    }

    /// Source line of the current instruction
    pub fn line(&self) -> u32 {
        self.function.borrow().chunk.line_at(self.offset)
    }

    /// Name of a local slot, falling back to its index
    pub fn slot_name(&self, slot: usize) -> String {
        let function = self.function.borrow();
        function
            .chunk
            .variables
            .get(slot)
            .or_else(|| function.params.get(slot))
            .cloned()
            .unwrap_or_else(|| format!("<slot {slot}>"))
    }

    /// The open cell for `slot`, created on first capture
    pub fn cell_for(&mut self, slot: usize) -> ClosureCell {
        if let Some((_, cell)) = self.open_cells.iter().find(|(s, _)| *s == slot) {
            return cell.clone();
        }
        let cell = ClosureCell::open(self.slot_name(slot), self.id, slot);
        self.open_cells.push((slot, cell.clone()));
        cell
    }

    pub fn open_cell_count(&self) -> usize {
        self.open_cells.len()
    }

    /// Read a local from this frame's storage
    pub fn slot<'a>(&'a self, shared: &'a [Value], slot: usize) -> Option<&'a Value> {
        if slot >= self.local_count {
            return None;
        }
        match &self.gen_stack {
            Some(stack) => stack.get(slot),
            None => shared.get(self.slot_base + slot),
        }
    }

    pub fn slot_mut<'a>(
        &'a mut self,
        shared: &'a mut [Value],
        slot: usize,
    ) -> Option<&'a mut Value> {
        if slot >= self.local_count {
            return None;
        }
        match &mut self.gen_stack {
            Some(stack) => stack.get_mut(slot),
            None => shared.get_mut(self.slot_base + slot),
        }
    }

    /// Close every open cell with its slot's current value
    ///
    /// Must run before the frame's storage is reclaimed.
    pub(crate) fn close_cells(&mut self, shared: &[Value]) -> usize {
        let cells = std::mem::take(&mut self.open_cells);
        let count = cells.len();
        for (slot, cell) in cells {
            let value = self.slot(shared, slot).cloned().unwrap_or_default();
            cell.close(value);
        }
        count
    }
}

/// One line of a backtrace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub name: String,
    pub line: u32,
}

/// Frame stack snapshot, innermost first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    pub frames: Vec<TraceFrame>,
}

impl StackTrace {
    /// Name reported for the outermost frame
    pub const SCRIPT: &'static str = "script";
    /// Frames with this name are internal and left out
    pub const HIDDEN: &'static str = "error";

    /// Walk `frames` from innermost to outermost
    pub fn capture(frames: &[CallFrame]) -> Self {
        let frames = frames
            .iter()
            .enumerate()
            .rev()
            .filter(|(_, frame)| frame.name != Self::HIDDEN)
            .map(|(depth, frame)| TraceFrame {
                name: if depth == 0 {
                    Self::SCRIPT.to_string()
                } else {
                    frame.name.clone()
                },
                line: frame.line(),
            })
            .collect();
        Self { frames }
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backtrace:")?;
        for frame in &self.frames {
            write!(f, "\n  at {} (line {})", frame.name, frame.line)?;
        }
        Ok(())
    }
}
