// src/runtime/generator.rs
//! Registry of suspended generator frames

use std::rc::Rc;

use ahash::HashMap;
use tracing::debug;

use crate::runtime::frame::{CallFrame, FrameId};

/// Lifecycle of a generator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Declared but never resumed
    Uninitialized,
    /// Paused at a yield, frame held by the registry
    Suspended,
    /// On the active frame stack
    Running,
    /// Ran to completion; cannot be resumed
    Done,
}

/// Suspended generator frames keyed by generator instance
#[derive(Debug, Default)]
pub struct GeneratorRegistry {
    frames: HashMap<u64, CallFrame>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, instance: u64, frame: CallFrame) {
        self.frames.insert(instance, frame);
    }

    /// Remove a suspended frame so it can be resumed
    pub fn take(&mut self, instance: u64) -> Option<CallFrame> {
        self.frames.remove(&instance)
    }

    pub fn contains(&self, instance: u64) -> bool {
        self.frames.contains_key(&instance)
    }

    pub fn get(&self, instance: u64) -> Option<&CallFrame> {
        self.frames.get(&instance)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn find_frame(&self, id: FrameId) -> Option<&CallFrame> {
        self.frames.values().find(|f| f.id == id)
    }

    pub fn find_frame_mut(&mut self, id: FrameId) -> Option<&mut CallFrame> {
        self.frames.values_mut().find(|f| f.id == id)
    }

    /// Reclaim frames of generators nothing else refers to
    ///
    /// A suspended frame holds one reference to its generator function; when
    /// that is the only one left the generator can never be resumed. Open
    /// cells are closed before the frame is dropped.
    pub fn sweep(&mut self) -> usize {
        let abandoned: Vec<u64> = self
            .frames
            .iter()
            .filter(|(_, frame)| Rc::strong_count(&frame.function) == 1)
            .map(|(instance, _)| *instance)
            .collect();

        for instance in &abandoned {
            if let Some(mut frame) = self.frames.remove(instance) {
                let closed = frame.close_cells(&[]);
                debug!(instance, frame = %frame.id, closed, "reclaimed abandoned generator");
            }
        }
        abandoned.len()
    }
}
