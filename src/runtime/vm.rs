// src/runtime/vm.rs
//! Execution context shared by the interpreter and native functions
//!
//! The `Vm` owns the shared value stack, the frame stack, suspended
//! generators, globals, try handlers and the import cache. The instruction
//! loop itself lives outside this crate; it drives the context through the
//! operations below.

use std::cell::RefCell;
use std::rc::Rc;

use ahash::HashMap;
use tracing::{debug, trace, warn};

use crate::config::VmConfig;
use crate::module::{fingerprint, ImportCache, ModuleEntry};
use crate::native::{NativeFunction, NativeOutcome};
use crate::runtime::closure::{CellState, ClosureCell};
use crate::runtime::frame::{CallFrame, FrameId, StackTrace, TryHandler};
use crate::runtime::function::{Capture, FunctionObj};
use crate::runtime::generator::{GeneratorRegistry, GeneratorState};
use crate::runtime::stringify::stringify;
use crate::runtime::value::{assign, FunctionRef, Payload, Value, ValueFlags};
use crate::RuntimeError;

/// VM execution context
pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    generators: GeneratorRegistry,
    globals: HashMap<String, Value>,
    try_handlers: Vec<TryHandler>,
    imports: ImportCache,
    config: VmConfig,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        Self {
            stack: Vec::with_capacity(config.stack_capacity),
            frames: Vec::new(),
            generators: GeneratorRegistry::new(),
            globals: HashMap::default(),
            try_handlers: Vec::new(),
            imports: ImportCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    // ----- value stack -----

    /// Stack of the running frame: a generator's private stack or the shared one
    fn active_stack(&mut self) -> &mut Vec<Value> {
        match self.frames.last_mut() {
            Some(CallFrame {
                gen_stack: Some(stack),
                ..
            }) => stack,
            _ => &mut self.stack,
        }
    }

    fn active_stack_ref(&self) -> &[Value] {
        match self.frames.last() {
            Some(CallFrame {
                gen_stack: Some(stack),
                ..
            }) => stack,
            _ => &self.stack,
        }
    }

    #[inline]
    pub fn push(&mut self, value: Value) {
        self.active_stack().push(value);
    }

    #[inline]
    pub fn pop(&mut self) -> Option<Value> {
        self.active_stack().pop()
    }

    #[inline]
    pub fn peek(&self) -> Option<&Value> {
        self.active_stack_ref().last()
    }

    /// Depth of the shared stack
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Depth of the running frame's stack
    pub fn active_len(&self) -> usize {
        self.active_stack_ref().len()
    }

    // ----- frames -----

    /// Number of active frames
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    pub fn current_frame_mut(&mut self) -> Option<&mut CallFrame> {
        self.frames.last_mut()
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// Move the instruction pointer of the running frame forward
    pub fn advance(&mut self, bytes: usize) -> Result<usize, RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        frame.offset = frame.ip;
        frame.ip += bytes;
        Ok(frame.ip)
    }

    /// Set the instruction pointer of the running frame
    pub fn jump(&mut self, ip: usize) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        frame.ip = ip;
        frame.offset = ip;
        Ok(())
    }

    fn check_depth(&self) -> Result<(), RuntimeError> {
        if self.frames.len() >= self.config.max_call_depth {
            warn!(limit = self.config.max_call_depth, "call stack depth exceeded");
            return Err(RuntimeError::StackOverflow {
                limit: self.config.max_call_depth,
                trace: self.backtrace(),
            });
        }
        Ok(())
    }

    /// Push a frame for `function`, binding `args` to its parameters
    ///
    /// Fails before any state changes when the depth limit would be exceeded
    /// or the argument count does not fit the signature.
    pub fn call(
        &mut self,
        function: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<FrameId, RuntimeError> {
        self.check_depth()?;
        let args = bind_arguments(&function.borrow(), args)?;

        let slot_base = self.stack.len();
        let frame = CallFrame::new(Rc::clone(function), slot_base);
        self.stack.extend(args);
        self.stack.resize_with(slot_base + frame.local_count, Value::none);

        let id = frame.id;
        trace!(frame = %id, name = %frame.name, depth = self.frames.len() + 1, "push frame");
        self.frames.push(frame);
        Ok(id)
    }

    /// Pop the running frame and hand `value` to the caller
    ///
    /// The shared stack returns to its depth before the call, then the return
    /// value is pushed onto the caller's stack. A returning generator frame
    /// marks its generator done.
    pub fn ret(&mut self, value: Value) -> Result<Value, RuntimeError> {
        let mut frame = self.frames.pop().ok_or(RuntimeError::NoActiveFrame)?;
        self.retire(&mut frame);
        trace!(frame = %frame.id, name = %frame.name, "pop frame");
        self.push(value.clone());
        Ok(value)
    }

    /// Release a frame that left the frame stack for good
    fn retire(&mut self, frame: &mut CallFrame) {
        let closed = frame.close_cells(&self.stack);
        if closed > 0 {
            trace!(frame = %frame.id, closed, "closed captured cells");
        }
        if frame.is_generator() {
            frame.function.borrow_mut().generator_done = true;
            debug!(name = %frame.name, "generator done");
        } else {
            self.stack.truncate(frame.saved_sp);
        }
        let depth = self.frames.len();
        self.try_handlers.retain(|h| h.frame_depth <= depth);
    }

    /// Pop frames until `depth` remain
    pub fn unwind_to(&mut self, depth: usize) {
        while self.frames.len() > depth {
            let Some(mut frame) = self.frames.pop() else {
                break;
            };
            self.retire(&mut frame);
        }
    }

    /// Run `body` as the execution of `function`
    ///
    /// `body` stands in for the instruction loop: it runs with the new frame on
    /// top and returns the frame's result. On error every frame pushed since
    /// entry is unwound and the shared stack restored before the error is
    /// returned. A body that pops frames it did not push fails with
    /// [`RuntimeError::FrameUnderflow`].
    pub fn invoke<F>(
        &mut self,
        function: &FunctionRef,
        args: Vec<Value>,
        body: F,
    ) -> Result<Value, RuntimeError>
    where
        F: FnOnce(&mut Vm) -> Result<Value, RuntimeError>,
    {
        let depth = self.frames.len();
        let base_sp = self.stack.len();
        self.call(function, args)?;

        match body(self) {
            Ok(value) if self.frames.len() > depth => {
                self.unwind_to(depth + 1);
                self.ret(value)
            }
            Ok(_) if self.frames.len() < depth => {
                let found = self.frames.len();
                warn!(expected = depth, found, "invocation popped its caller's frames");
                self.stack.truncate(base_sp);
                Err(RuntimeError::FrameUnderflow {
                    expected: depth,
                    found,
                })
            }
            Ok(value) => Ok(value),
            Err(err) => {
                let unwound = self.frames.len().saturating_sub(depth);
                debug!(error = %err, unwound, "invocation failed");
                self.unwind_to(depth);
                self.stack.truncate(base_sp);
                Err(err)
            }
        }
    }

    /// Snapshot of the frame stack, innermost first
    pub fn backtrace(&self) -> StackTrace {
        StackTrace::capture(&self.frames)
    }

    // ----- locals -----

    pub fn local(&self, slot: usize) -> Result<Value, RuntimeError> {
        let frame = self.frames.last().ok_or(RuntimeError::NoActiveFrame)?;
        frame
            .slot(&self.stack, slot)
            .cloned()
            .ok_or(RuntimeError::InvalidSlot { slot })
    }

    /// Bind a local of the running frame, keeping the flags `value` carries
    ///
    /// Declarations are how a local becomes const; later stores go through
    /// [`Vm::set_local`].
    pub fn declare_local(&mut self, slot: usize, value: Value) -> Result<(), RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let target = frame
            .slot_mut(&mut self.stack, slot)
            .ok_or(RuntimeError::InvalidSlot { slot })?;
        *target = value;
        Ok(())
    }

    /// Store into a local of the running frame, returning the on-change hook to run
    pub fn set_local(
        &mut self,
        slot: usize,
        value: Value,
    ) -> Result<Option<Value>, RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        let name = frame.slot_name(slot);
        let target = frame
            .slot_mut(&mut self.stack, slot)
            .ok_or(RuntimeError::InvalidSlot { slot })?;
        let assignment = assign(&name, Some(&*target), value)?;
        *target = assignment.value;
        Ok(assignment.hook)
    }

    // ----- closures -----

    /// Capture `slot` of the running frame into `function` under `name`
    ///
    /// Every capture of the same slot shares one cell.
    pub fn capture(
        &mut self,
        function: &FunctionRef,
        name: &str,
        slot: usize,
    ) -> Result<ClosureCell, RuntimeError> {
        let frame = self.frames.last_mut().ok_or(RuntimeError::NoActiveFrame)?;
        if slot >= frame.local_count {
            return Err(RuntimeError::InvalidSlot { slot });
        }
        let cell = frame.cell_for(slot);
        function.borrow_mut().add_capture(Capture {
            name: name.to_string(),
            slot,
            cell: cell.clone(),
        });
        Ok(cell)
    }

    /// Re-capture a variable the running function itself captured (nested closures)
    pub fn inherit_capture(
        &mut self,
        function: &FunctionRef,
        name: &str,
    ) -> Result<ClosureCell, RuntimeError> {
        let frame = self.frames.last().ok_or(RuntimeError::NoActiveFrame)?;
        let capture = frame
            .function
            .borrow()
            .capture(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        let cell = capture.cell.clone();
        function.borrow_mut().add_capture(capture);
        Ok(cell)
    }

    /// The cell `function` holds for `name`
    pub fn capture_cell(
        &self,
        function: &FunctionRef,
        name: &str,
    ) -> Result<ClosureCell, RuntimeError> {
        function
            .borrow()
            .capture(name)
            .map(|c| c.cell.clone())
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))
    }

    /// Read a captured variable, through its frame while the cell is open
    pub fn read_capture(&self, cell: &ClosureCell) -> Result<Value, RuntimeError> {
        match cell.state() {
            CellState::Closed(value) => Ok(value),
            CellState::Open { frame, slot } => {
                let owner = self
                    .find_frame(frame)
                    .ok_or(RuntimeError::DanglingCapture { frame: frame.0 })?;
                owner
                    .slot(&self.stack, slot)
                    .cloned()
                    .ok_or(RuntimeError::InvalidSlot { slot })
            }
        }
    }

    /// Write a captured variable, returning the on-change hook to run
    pub fn write_capture(
        &mut self,
        cell: &ClosureCell,
        value: Value,
    ) -> Result<Option<Value>, RuntimeError> {
        match cell.state() {
            CellState::Closed(current) => {
                let assignment = assign(cell.name(), Some(&current), value)?;
                cell.store(assignment.value);
                Ok(assignment.hook)
            }
            CellState::Open { frame, slot } => {
                let Vm {
                    stack,
                    frames,
                    generators,
                    ..
                } = self;
                let owner = match frames.iter_mut().rev().find(|f| f.id == frame) {
                    Some(owner) => owner,
                    None => generators
                        .find_frame_mut(frame)
                        .ok_or(RuntimeError::DanglingCapture { frame: frame.0 })?,
                };
                let name = owner.slot_name(slot);
                let target = owner
                    .slot_mut(stack, slot)
                    .ok_or(RuntimeError::InvalidSlot { slot })?;
                let assignment = assign(&name, Some(&*target), value)?;
                *target = assignment.value;
                Ok(assignment.hook)
            }
        }
    }

    /// Read the variable `function` captured under `name`
    pub fn read_captured(
        &self,
        function: &FunctionRef,
        name: &str,
    ) -> Result<Value, RuntimeError> {
        let cell = self.capture_cell(function, name)?;
        self.read_capture(&cell)
    }

    fn find_frame(&self, id: FrameId) -> Option<&CallFrame> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.id == id)
            .or_else(|| self.generators.find_frame(id))
    }

    // ----- generators -----

    /// New, independent instance of a generator function
    pub fn instantiate_generator(
        &self,
        function: &FunctionRef,
    ) -> Result<FunctionRef, RuntimeError> {
        let function = function.borrow();
        if !function.is_generator {
            return Err(RuntimeError::NotAGenerator {
                name: function.name.clone(),
            });
        }
        Ok(Rc::new(RefCell::new(function.fresh_instance())))
    }

    pub fn generator_state(&self, generator: &FunctionRef) -> GeneratorState {
        let generator = generator.borrow();
        if generator.generator_done {
            GeneratorState::Done
        } else if !generator.generator_init {
            GeneratorState::Uninitialized
        } else if self.generators.contains(generator.instance()) {
            GeneratorState::Suspended
        } else {
            GeneratorState::Running
        }
    }

    /// Make `generator` the running frame
    ///
    /// The first resume binds `args` as the generator's arguments and
    /// allocates its frame. Later resumes restore the suspended frame and push
    /// the first of `args`, if any, as the value sent to the paused yield.
    /// Try handlers the generator registered before yielding are reinstated
    /// at its new depth.
    pub fn resume(
        &mut self,
        generator: &FunctionRef,
        args: Vec<Value>,
    ) -> Result<FrameId, RuntimeError> {
        let (name, instance, initialised) = {
            let g = generator.borrow();
            if !g.is_generator {
                return Err(RuntimeError::NotAGenerator { name: g.name.clone() });
            }
            if g.generator_done {
                return Err(RuntimeError::GeneratorExhausted { name: g.name.clone() });
            }
            (g.name.clone(), g.instance(), g.generator_init)
        };
        self.check_depth()?;

        let mut frame = if initialised {
            let mut frame = self
                .generators
                .take(instance)
                .ok_or_else(|| RuntimeError::GeneratorRunning { name: name.clone() })?;
            let sent = args.into_iter().next();
            if let (Some(stack), Some(sent)) = (frame.gen_stack.as_mut(), sent) {
                stack.push(sent);
            }
            frame
        } else {
            let args = bind_arguments(&generator.borrow(), args)?;
            let capacity = self.config.gen_stack_capacity;
            let mut frame = CallFrame::generator(Rc::clone(generator), capacity);
            let local_count = frame.local_count;
            if let Some(stack) = frame.gen_stack.as_mut() {
                stack.extend(args);
                stack.resize_with(local_count, Value::none);
            }
            generator.borrow_mut().generator_init = true;
            frame
        };

        frame.saved_sp = self.stack.len();
        let saved_try = std::mem::take(&mut frame.saved_try);
        let id = frame.id;
        debug!(name = %name, instance, first = !initialised, "resume generator");
        self.frames.push(frame);

        let depth = self.frames.len();
        self.try_handlers.extend(saved_try.into_iter().map(|handler| TryHandler {
            frame_depth: depth,
            ..handler
        }));
        Ok(id)
    }

    /// Suspend the running generator frame, handing `value` to the resumer
    ///
    /// The generator's own try handlers are set aside with its frame.
    pub fn yield_value(&mut self, value: Value) -> Result<Value, RuntimeError> {
        let is_generator = self
            .frames
            .last()
            .map(CallFrame::is_generator)
            .ok_or(RuntimeError::NoActiveFrame)?;
        if !is_generator {
            return Err(RuntimeError::NotInGenerator);
        }
        let Some(mut frame) = self.frames.pop() else {
            return Err(RuntimeError::NoActiveFrame);
        };

        let depth = self.frames.len();
        let own = self
            .try_handlers
            .iter()
            .position(|h| h.frame_depth > depth)
            .unwrap_or(self.try_handlers.len());
        frame.saved_try = self.try_handlers.split_off(own);

        let instance = frame.function.borrow().instance();
        debug!(name = %frame.name, instance, handlers = frame.saved_try.len(), "suspend generator");
        self.generators.insert(instance, frame);
        self.sweep_generators();

        self.push(value.clone());
        Ok(value)
    }

    /// Reclaim suspended generators that can no longer be resumed
    pub fn sweep_generators(&mut self) -> usize {
        self.generators.sweep()
    }

    pub fn suspended_generators(&self) -> usize {
        self.generators.len()
    }

    // ----- globals -----

    /// Declare a global, replacing any previous binding
    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Result<Value, RuntimeError> {
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))
    }

    /// Reassign a declared global, returning the on-change hook to run
    pub fn set_global(
        &mut self,
        name: &str,
        value: Value,
    ) -> Result<Option<Value>, RuntimeError> {
        let slot = self
            .globals
            .get_mut(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()))?;
        let assignment = assign(name, Some(&*slot), value)?;
        *slot = assignment.value;
        Ok(assignment.hook)
    }

    pub fn globals(&self) -> &HashMap<String, Value> {
        &self.globals
    }

    // ----- structured exception handling -----

    /// Register a handler at `offset` for the running frame
    pub fn push_try(&mut self, offset: usize) {
        let handler = TryHandler {
            offset,
            frame_depth: self.frames.len(),
            stack_len: self.active_len(),
        };
        self.try_handlers.push(handler);
    }

    pub fn pop_try(&mut self) -> Option<TryHandler> {
        self.try_handlers.pop()
    }

    pub fn try_depth(&self) -> usize {
        self.try_handlers.len()
    }

    /// Transfer control to the innermost handler
    ///
    /// Frames above the handler's frame are unwound, the handler frame's stack
    /// is cut back to its registered depth, `error` is pushed and the handler
    /// offset returned. Without a handler the error is uncaught.
    pub fn throw(&mut self, error: Value) -> Result<usize, RuntimeError> {
        let Some(handler) = self.try_handlers.pop() else {
            return Err(RuntimeError::Uncaught {
                message: error_message(&error),
                trace: self.backtrace(),
            });
        };

        self.unwind_to(handler.frame_depth);
        self.active_stack().truncate(handler.stack_len);
        self.push(error);
        if let Some(frame) = self.frames.last_mut() {
            frame.ip = handler.offset;
            frame.offset = handler.offset;
        }
        debug!(offset = handler.offset, depth = handler.frame_depth, "caught error");
        Ok(handler.offset)
    }

    // ----- natives -----

    /// Call a native function, spreading unpacked list arguments
    ///
    /// Catchable failures come back as error objects; failures of natives
    /// declared fatal become [`RuntimeError::Fatal`].
    pub fn call_native(
        &mut self,
        native: &NativeFunction,
        args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let args = spread_arguments(args);
        match native.invoke(&args) {
            NativeOutcome::Value(value) | NativeOutcome::Caught(value) => Ok(value),
            NativeOutcome::Fatal(failure) => Err(RuntimeError::Fatal {
                message: format!("{}: {}", native.name, failure),
                trace: self.backtrace(),
            }),
        }
    }

    // ----- modules -----

    /// Import the module at `path`, evaluating it only on the first request
    ///
    /// `evaluate` runs the module's top-level code in a fresh global scope and
    /// returns its namespace object. The module's globals are captured when it
    /// finishes and the caller's globals are restored. Failed evaluations are
    /// not cached.
    pub fn import<F>(&mut self, path: &str, evaluate: F) -> Result<ModuleEntry, RuntimeError>
    where
        F: FnOnce(&mut Vm) -> Result<Value, RuntimeError>,
    {
        if let Some(entry) = self.imports.get(path) {
            debug!(path, "import cache hit");
            return Ok(entry.clone());
        }
        self.evaluate_module(path, None, evaluate)
    }

    /// Like [`Vm::import`], re-evaluating when `source` differs from the cached module's
    pub fn import_source<F>(
        &mut self,
        path: &str,
        source: &str,
        evaluate: F,
    ) -> Result<ModuleEntry, RuntimeError>
    where
        F: FnOnce(&mut Vm) -> Result<Value, RuntimeError>,
    {
        let digest = fingerprint(source);
        if self.imports.is_fresh(path, &digest) {
            debug!(path, "import cache hit");
            if let Some(entry) = self.imports.get(path) {
                return Ok(entry.clone());
            }
        } else if self.imports.contains(path) {
            debug!(path, "module source changed; re-evaluating");
        }
        self.evaluate_module(path, Some(digest), evaluate)
    }

    fn evaluate_module<F>(
        &mut self,
        path: &str,
        digest: Option<[u8; 32]>,
        evaluate: F,
    ) -> Result<ModuleEntry, RuntimeError>
    where
        F: FnOnce(&mut Vm) -> Result<Value, RuntimeError>,
    {
        debug!(path, "import cache miss; evaluating module");
        let caller_globals = std::mem::take(&mut self.globals);
        let result = evaluate(self);
        let module_globals = std::mem::replace(&mut self.globals, caller_globals);

        let namespace = result?;
        namespace.try_object()?;

        let entry = ModuleEntry {
            namespace,
            globals: module_globals,
            fingerprint: digest,
        };
        self.imports.insert(path, entry.clone());
        Ok(entry)
    }

    pub fn imports(&self) -> &ImportCache {
        &self.imports
    }

    pub fn imports_mut(&mut self) -> &mut ImportCache {
        &mut self.imports
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand list arguments flagged `UNPACK` in place
pub fn spread_arguments(args: Vec<Value>) -> Vec<Value> {
    if !args.iter().any(|a| a.flags().contains(ValueFlags::UNPACK)) {
        return args;
    }
    let mut spread = Vec::with_capacity(args.len());
    for arg in args {
        if arg.flags().contains(ValueFlags::UNPACK) {
            if let Payload::List(items) = arg.payload() {
                spread.extend(items.borrow().iter().cloned());
                continue;
            }
        }
        spread.push(arg);
    }
    spread
}

/// Fit call arguments to a function's parameters
///
/// Unpacked lists are spread, surplus arguments are packed into a list when
/// the last default carries `PACKER`, and missing trailing arguments take
/// their defaults. Bound parameters carry no flags: a const argument does
/// not make its parameter const.
fn bind_arguments(function: &FunctionObj, args: Vec<Value>) -> Result<Vec<Value>, RuntimeError> {
    let mut args = spread_arguments(args);
    let got = args.len();
    let max = function.max_args();
    let packs = max > 0
        && function.defaults_count > 0
        && function
            .defaults
            .last()
            .is_some_and(|d| d.flags().contains(ValueFlags::PACKER));

    if packs && args.len() >= max {
        let rest = args.split_off(max - 1);
        args.push(Value::list(rest));
    }

    if args.len() < function.min_args() || args.len() > max {
        return Err(RuntimeError::Arity {
            name: function.name.clone(),
            min: function.min_args(),
            max,
            got,
        });
    }

    while args.len() < max {
        let index = args.len();
        if packs && index == max - 1 {
            args.push(Value::list(Vec::new()));
        } else {
            let default = function
                .defaults
                .get(index - function.arity)
                .cloned()
                .unwrap_or_default();
            args.push(default);
        }
    }
    for arg in &mut args {
        arg.set_flags(ValueFlags::all(), false);
    }
    Ok(args)
}

fn error_message(error: &Value) -> String {
    if let Payload::Object(object) = error.payload() {
        if let Some(message) = object.borrow().get("message") {
            return stringify(message, false);
        }
    }
    stringify(error, false)
}
