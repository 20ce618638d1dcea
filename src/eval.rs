use crate::condition::{self, push_handler, types, Condition, HandlerList};
use crate::config::{MachineConfig, UnhandledPolicy, UNHANDLED_EXIT_CODE};
use crate::context::{ThreadContext, TracePoint};
use crate::env::{self, Frame};
use crate::error::{EvalError, EvalResult};
use crate::heap::Heap;
use crate::object::{Closure, Escape, Object};
use crate::printer;
use crate::reader::Reader;
use crate::symbol::{sym, SymbolTable};
use crate::value::{ObjId, PrimId, SymbolId, TypeId, Value};

/// Extra nesting granted to handlers of `recursion-too-deep`.
const OVERFLOW_HEADROOM: usize = 64;

/// Calling convention shared by primitives and native forms. `args` is a
/// proper list whose length has already been checked against the arity.
pub type PrimFn = fn(&mut Machine, Value, TailEscape) -> EvalResult<Outcome>;

/// Argument count a primitive accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
}

impl Arity {
    pub fn accepts(self, n: usize) -> bool {
        match self {
            Arity::Exact(k) => n == k,
            Arity::AtLeast(k) => n >= k,
            Arity::Range(lo, hi) => n >= lo && n <= hi,
        }
    }

    pub fn describe(self) -> String {
        match self {
            Arity::Exact(k) => k.to_string(),
            Arity::AtLeast(k) => format!("at least {}", k),
            Arity::Range(lo, hi) => format!("{} to {}", lo, hi),
        }
    }
}

pub struct Primitive {
    pub name: &'static str,
    pub arity: Arity,
    pub func: PrimFn,
}

/// One trampoline step.
#[derive(Debug, Clone, Copy)]
enum Step {
    Value(Value),
    Eval { expr: Value, env: ObjId },
    Apply { proc: Value, args: Value },
}

/// What a primitive hands back to the trampoline: a finished value, or a
/// request to keep going in tail position.
#[derive(Debug)]
pub struct Outcome(Step);

impl Outcome {
    pub fn value(v: Value) -> Self {
        Outcome(Step::Value(v))
    }
}

/// The right to continue in tail position, handed to every primitive call.
/// Firing it consumes it, so a primitive can request at most one
/// continuation per call.
#[derive(Debug)]
pub struct TailEscape {
    _private: (),
}

impl TailEscape {
    fn new() -> Self {
        TailEscape { _private: () }
    }

    /// Evaluate `expr` in `env` in place of the current call.
    pub fn eval(self, expr: Value, env: ObjId) -> Outcome {
        Outcome(Step::Eval { expr, env })
    }

    /// Apply `proc` to `args` in place of the current call.
    pub fn apply(self, proc: Value, args: Value) -> Outcome {
        Outcome(Step::Apply { proc, args })
    }
}

/// One evaluator. All interpreter state lives here so the collector can
/// find its roots, and a machine is confined to the thread that runs it.
/// Several machines may run on several threads at once; they share nothing.
pub struct Machine {
    pub heap: Heap,
    pub symbols: SymbolTable,
    pub types: condition::TypeRegistry,
    pub ctx: ThreadContext,
    pub config: MachineConfig,
    /// The top-level frame.
    pub global: ObjId,
    /// Bindings the global frame started with. Copied by
    /// `make-default-environment`.
    defaults: ObjId,

    primitives: Vec<Primitive>,
    /// Values live in native frames. Each `run` owns two slots for its
    /// current step; native code pins whatever it holds across a nested
    /// evaluation.
    pinned: Vec<Value>,
    depth: usize,
    depth_limit: usize,
    escape_counter: u64,
}

impl Machine {
    /// A machine with the full primitive library installed.
    pub fn new(config: MachineConfig) -> EvalResult<Self> {
        let mut m = Machine::bare(config)?;
        crate::forms::install(&mut m)?;
        crate::builtins::install(&mut m)?;
        m.defaults = env::copy_frame(&mut m.heap, m.global, None)?;
        Ok(m)
    }

    /// A machine with an empty global frame. Embedders register what they
    /// need through `define_primitive`, `define_form` and `define_global`.
    pub fn bare(config: MachineConfig) -> EvalResult<Self> {
        let mut heap = Heap::new(config.heap_capacity, config.gc_threshold);
        let global = heap.alloc_obj(Object::Frame(Frame::with_capacity(None, 512)))?;
        Ok(Machine {
            heap,
            symbols: SymbolTable::new(),
            types: condition::TypeRegistry::new(),
            ctx: ThreadContext::new(config.trace_depth),
            depth_limit: config.max_depth,
            config,
            global,
            defaults: global,
            primitives: Vec::new(),
            pinned: Vec::new(),
            depth: 0,
            escape_counter: 0,
        })
    }

    // ========================================================================
    // Registration
    // ========================================================================

    pub fn intern(&mut self, name: &str) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn define_global(&mut self, name: &str, value: Value) -> EvalResult<Value> {
        let sym = self.symbols.intern(name);
        env::define(&mut self.heap, self.global, sym, value)
    }

    /// Register a primitive and return its value without binding it.
    pub fn make_primitive(&mut self, name: &'static str, arity: Arity, func: PrimFn) -> Value {
        let id = PrimId(self.primitives.len() as u32);
        self.primitives.push(Primitive { name, arity, func });
        Value::Primitive(id)
    }

    pub fn define_primitive(
        &mut self,
        name: &'static str,
        arity: Arity,
        func: PrimFn,
    ) -> EvalResult<Value> {
        let prim = self.make_primitive(name, arity, func);
        self.define_global(name, prim)
    }

    /// Register a native form. `arity` counts the leading environment.
    pub fn define_form(&mut self, name: &'static str, arity: Arity, func: PrimFn) -> EvalResult<Value> {
        let prim = self.make_primitive(name, arity, func);
        let form = Value::Form(self.heap.alloc_obj(Object::Wrapped(prim))?);
        self.define_global(name, form)
    }

    pub fn primitive(&self, id: PrimId) -> &Primitive {
        &self.primitives[id.0 as usize]
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Evaluate `expr` in `env`. Nested calls grow the native stack; use
    /// `TailEscape` instead wherever the result is the caller's result.
    pub fn eval(&mut self, expr: Value, env: ObjId) -> EvalResult<Value> {
        self.run(Step::Eval { expr, env })
    }

    /// A fresh top-level frame holding the bindings the machine started
    /// with. Definitions made since then are not in it.
    pub fn default_environment(&mut self) -> EvalResult<ObjId> {
        env::copy_frame(&mut self.heap, self.defaults, None)
    }

    pub fn eval_global(&mut self, expr: Value) -> EvalResult<Value> {
        let global = self.global;
        self.eval(expr, global)
    }

    pub fn apply(&mut self, proc: Value, args: Value) -> EvalResult<Value> {
        self.run(Step::Apply { proc, args })
    }

    /// Read and evaluate every form in `src` at top level. Returns the value
    /// of the last one, nil for empty input.
    pub fn eval_str(&mut self, src: &str) -> EvalResult<Value> {
        let mut pos = 0;
        let mut last = Value::Nil;
        while let Some((expr, next)) = self.read_at(src, pos)? {
            pos = next;
            last = self.eval_global(expr)?;
        }
        Ok(last)
    }

    /// Read the expression starting at byte offset `pos` of `src`, with the
    /// offset just past it. Read one, evaluate it, then read the next: the
    /// collector does not see expressions that are read but not yet running.
    pub fn read_at(&mut self, src: &str, pos: usize) -> EvalResult<Option<(Value, usize)>> {
        Reader::new(src, &mut self.heap, &mut self.symbols).read_one_at(pos)
    }

    // ========================================================================
    // Pinning and collection
    // ========================================================================

    pub fn pin(&mut self, v: Value) {
        self.pinned.push(v);
    }

    pub fn pin_mark(&self) -> usize {
        self.pinned.len()
    }

    pub fn release(&mut self, mark: usize) {
        self.pinned.truncate(mark);
    }

    /// Everything pinned since `mark`, oldest first.
    pub fn pinned_since(&self, mark: usize) -> &[Value] {
        &self.pinned[mark..]
    }

    /// Run a full collection now. Everything reachable from the global
    /// frame, the handler list, the trace buffer and pinned values survives.
    pub fn collect_garbage(&mut self) -> (usize, usize) {
        let mut roots = self.ctx.roots();
        roots.extend(self.pinned.iter().copied());
        roots.push(Value::Env(self.global));
        roots.push(Value::Env(self.defaults));
        let freed = self.heap.collect(roots);
        let heap = &self.heap;
        let symbols = self.symbols.reclaim_uninterned(|id| heap.symbol_reached(id));
        tracing::debug!(
            cells = freed.0,
            objects = freed.1,
            symbols,
            live_cells = self.heap.live_count(),
            live_objects = self.heap.live_objects(),
            "gc"
        );
        freed
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    // ========================================================================
    // The trampoline
    // ========================================================================

    fn run(&mut self, step: Step) -> EvalResult<Value> {
        if self.depth >= self.depth_limit {
            self.overflow()?;
        }
        self.depth += 1;
        let base = self.pinned.len();
        self.pinned.push(Value::Nil);
        self.pinned.push(Value::Nil);
        let result = self.run_loop(step, base);
        self.pinned.truncate(base);
        self.depth -= 1;
        result
    }

    fn run_loop(&mut self, mut step: Step, base: usize) -> EvalResult<Value> {
        loop {
            let (a, b) = match step {
                Step::Value(v) => return Ok(v),
                Step::Eval { expr, env } => (expr, Value::Env(env)),
                Step::Apply { proc, args } => (proc, args),
            };
            self.pinned[base] = a;
            self.pinned[base + 1] = b;

            if self.heap.should_gc() {
                self.collect_garbage();
            }

            step = match step {
                Step::Eval { expr, env } => self.eval_step(expr, env)?,
                Step::Apply { proc, args } => self.apply_step(proc, args)?,
                Step::Value(v) => return Ok(v),
            };
        }
    }

    fn eval_step(&mut self, expr: Value, env: ObjId) -> EvalResult<Step> {
        match expr {
            Value::Symbol(name) => Ok(Step::Value(self.lookup(name, env)?)),
            Value::Pair(id) => {
                self.ctx.trace.record(TracePoint::Eval {
                    expr,
                    env: Value::Env(env),
                });
                if self.config.trace_eval {
                    tracing::trace!(depth = self.depth, "eval {}", self.write_string(expr));
                }
                let op_expr = self.heap.car(id);
                let operands = self.heap.cdr(id);
                let op = match op_expr {
                    Value::Symbol(name) => self.lookup(name, env)?,
                    _ => self.eval(op_expr, env)?,
                };
                self.combination(expr, op, operands, env)
            }
            other => Ok(Step::Value(other)),
        }
    }

    /// Dispatch on the run-time tag of the operator value. Whether a name
    /// is special is decided here, by what it is bound to right now.
    fn combination(&mut self, expr: Value, op: Value, operands: Value, env: ObjId) -> EvalResult<Step> {
        match op {
            Value::Primitive(_) | Value::Closure(_) | Value::Restart(_) | Value::Escape(_) => {
                let mark = self.pin_mark();
                self.pin(op);
                let args = self.eval_operands(expr, operands, env);
                self.release(mark);
                Ok(Step::Apply { proc: op, args: args? })
            }
            Value::Form(id) => {
                let proc = self.heap.wrapped(id)?;
                let args = self.heap.cons(Value::Env(env), operands)?;
                Ok(Step::Apply { proc, args })
            }
            Value::Macro(id) => {
                let proc = self.heap.wrapped(id)?;
                let mark = self.pin_mark();
                self.pin(op);
                let expansion = self.apply(proc, operands);
                self.release(mark);
                Ok(Step::Eval {
                    expr: expansion?,
                    env,
                })
            }
            _ => self.fail(
                types::NOT_APPLICABLE,
                &[(sym::OBJECT, op), (sym::EXPRESSION, expr)],
            ),
        }
    }

    /// Evaluate operands left to right into a fresh list.
    fn eval_operands(&mut self, expr: Value, operands: Value, env: ObjId) -> EvalResult<Value> {
        let mark = self.pin_mark();
        let mut current = operands;
        loop {
            match current {
                Value::Nil => break,
                Value::Pair(id) => {
                    let v = self.eval(self.heap.car(id), env)?;
                    self.pin(v);
                    current = self.heap.cdr(id);
                }
                _ => {
                    return self.fail(types::MALFORMED_EXPRESSION, &[(sym::EXPRESSION, expr)]);
                }
            }
        }
        let values = self.pinned_since(mark).to_vec();
        let list = self.heap.list(&values);
        self.release(mark);
        list
    }

    fn apply_step(&mut self, proc: Value, args: Value) -> EvalResult<Step> {
        self.ctx.trace.record(TracePoint::Apply { proc, args });
        match proc {
            Value::Primitive(id) => {
                let (arity, func) = {
                    let p = self.primitive(id);
                    (p.arity, p.func)
                };
                let n = match self.heap.list_len(args) {
                    Some(n) => n,
                    None => {
                        return self.fail(
                            types::MALFORMED_EXPRESSION,
                            &[(sym::PROCEDURE, proc), (sym::ARGUMENTS, args)],
                        )
                    }
                };
                if !arity.accepts(n) {
                    return self.wrong_arg_count(proc, args, arity.describe());
                }
                let Outcome(step) = func(self, args, TailEscape::new())?;
                Ok(step)
            }
            Value::Closure(id) => {
                let clo = self.heap.closure(id)?.clone();
                let frame = env::new_frame(&mut self.heap, Some(clo.env))?;
                self.bind_params(proc, clo.params, args, frame)?;
                self.body_step(clo.body, frame)
            }
            Value::Restart(id) => {
                let inner = self.heap.restart(id)?.proc;
                Ok(Step::Apply { proc: inner, args })
            }
            Value::Escape(id) => {
                let esc = match self.heap.obj(id) {
                    Object::Escape(e) => *e,
                    _ => return Err(EvalError::internal("escape value without escape object")),
                };
                let value = match self.heap.list_to_vec(args).as_deref() {
                    Some([]) => Value::Nil,
                    Some([v]) => *v,
                    _ => return self.wrong_arg_count(proc, args, "0 to 1".to_string()),
                };
                if !esc.live {
                    return self.fail(types::ESCAPE_EXPIRED, &[(sym::OBJECT, proc)]);
                }
                Err(EvalError::Escape { id: esc.id, value })
            }
            _ => self.fail(
                types::NOT_APPLICABLE,
                &[(sym::OBJECT, proc), (sym::ARGUMENTS, args)],
            ),
        }
    }

    /// Bind a parameter list (symbol, proper list, or dotted list) in `frame`.
    fn bind_params(&mut self, proc: Value, params: Value, args: Value, frame: ObjId) -> EvalResult<()> {
        let mut p = params;
        let mut a = args;
        loop {
            match p {
                Value::Nil => {
                    if a.is_nil() {
                        return Ok(());
                    }
                    return self.wrong_arg_count(proc, args, self.params_arity(params));
                }
                Value::Symbol(name) => {
                    env::define(&mut self.heap, frame, name, a)?;
                    return Ok(());
                }
                Value::Pair(pid) => {
                    let name = match self.heap.car(pid) {
                        Value::Symbol(name) => name,
                        _ => {
                            return self.fail(
                                types::MALFORMED_EXPRESSION,
                                &[(sym::EXPRESSION, params)],
                            )
                        }
                    };
                    let aid = match a {
                        Value::Pair(aid) => aid,
                        _ => return self.wrong_arg_count(proc, args, self.params_arity(params)),
                    };
                    let value = self.heap.car(aid);
                    env::define(&mut self.heap, frame, name, value)?;
                    p = self.heap.cdr(pid);
                    a = self.heap.cdr(aid);
                }
                _ => {
                    return self.fail(types::MALFORMED_EXPRESSION, &[(sym::EXPRESSION, params)]);
                }
            }
        }
    }

    fn params_arity(&self, params: Value) -> String {
        let mut n = 0;
        let mut p = params;
        while let Value::Pair(id) = p {
            n += 1;
            p = self.heap.cdr(id);
        }
        if p.is_nil() {
            Arity::Exact(n).describe()
        } else {
            Arity::AtLeast(n).describe()
        }
    }

    /// Evaluate all but the last body expression nested; the last one
    /// becomes the next step.
    fn body_step(&mut self, body: Value, env: ObjId) -> EvalResult<Step> {
        let mut current = body;
        loop {
            match current {
                Value::Nil => return Ok(Step::Value(Value::Nil)),
                Value::Pair(id) => {
                    let expr = self.heap.car(id);
                    let rest = self.heap.cdr(id);
                    if rest.is_nil() {
                        return Ok(Step::Eval { expr, env });
                    }
                    self.eval(expr, env)?;
                    current = rest;
                }
                _ => {
                    return self.fail(types::MALFORMED_EXPRESSION, &[(sym::EXPRESSION, body)]);
                }
            }
        }
    }

    /// `body_step` for native forms.
    pub fn eval_body(&mut self, body: Value, env: ObjId, esc: TailEscape) -> EvalResult<Outcome> {
        match self.body_step(body, env)? {
            Step::Eval { expr, env } => Ok(esc.eval(expr, env)),
            step => Ok(Outcome(step)),
        }
    }

    fn lookup(&mut self, name: SymbolId, env: ObjId) -> EvalResult<Value> {
        match env::lookup(&self.heap, env, name)? {
            Some(v) => Ok(v),
            None => self.fail(types::UNBOUND_VARIABLE, &[(sym::NAME, Value::Symbol(name))]),
        }
    }

    fn overflow(&mut self) -> EvalResult<()> {
        let depth = Value::Int(self.depth as i64);
        let cond = self.make_condition(types::RECURSION_TOO_DEEP, &[(sym::DEPTH, depth)])?;
        if self.depth_limit > self.config.max_depth {
            // A handler for the first overflow overflowed again.
            return Err(self.unhandled(cond));
        }
        self.depth_limit = self.config.max_depth + OVERFLOW_HEADROOM;
        let result = self.signal(cond);
        self.depth_limit = self.config.max_depth;
        result.map(|_| ())
    }

    // ========================================================================
    // Closures and escapes
    // ========================================================================

    pub fn make_closure(
        &mut self,
        params: Value,
        body: Value,
        env: ObjId,
        name: Option<SymbolId>,
    ) -> EvalResult<Value> {
        self.check_params(params)?;
        let clo = Closure {
            params,
            body,
            env,
            name,
        };
        Ok(Value::Closure(self.heap.alloc_obj(Object::Closure(clo))?))
    }

    fn check_params(&mut self, params: Value) -> EvalResult<()> {
        let mut p = params;
        loop {
            match p {
                Value::Nil | Value::Symbol(_) => return Ok(()),
                Value::Pair(id) if self.heap.car(id).is_symbol() => p = self.heap.cdr(id),
                _ => {
                    return self.fail(types::MALFORMED_EXPRESSION, &[(sym::EXPRESSION, params)]);
                }
            }
        }
    }

    /// Call `proc` with a fresh one-shot escape. Invoking the escape while
    /// the call is active returns its argument from here; afterwards it is
    /// dead and invoking it signals `escape-expired`.
    pub fn call_with_escape(&mut self, proc: Value) -> EvalResult<Value> {
        let result = self.escape_scope(|m, escape| {
            let args = m.heap.list(&[escape])?;
            m.apply(proc, args)
        })?;
        Ok(result.unwrap_or_else(|escaped| escaped))
    }

    /// Run `body` with a fresh escape. `Ok(Err(v))` means the escape was
    /// invoked with `v`.
    fn escape_scope(
        &mut self,
        body: impl FnOnce(&mut Machine, Value) -> EvalResult<Value>,
    ) -> EvalResult<Result<Value, Value>> {
        self.escape_counter += 1;
        let id = self.escape_counter;
        let obj = self.heap.alloc_obj(Object::Escape(Escape { id, live: true }))?;
        let escape = Value::Escape(obj);
        let saved = self.ctx.handlers.clone();
        let mark = self.pin_mark();
        self.pin(escape);
        let result = body(self, escape);
        self.release(mark);
        if let Object::Escape(e) = self.heap.obj_mut(obj) {
            e.live = false;
        }
        match result {
            Ok(v) => Ok(Ok(v)),
            Err(EvalError::Escape { id: target, value }) if target == id => {
                self.ctx.handlers = saved;
                Ok(Err(value))
            }
            Err(e) => Err(e),
        }
    }

    /// Call `thunk`. If an error is signalled inside it, the stack unwinds
    /// to here and `Err(condition)` is returned.
    pub fn catch_errors(&mut self, thunk: Value) -> EvalResult<Result<Value, Value>> {
        self.escape_scope(|m, escape| {
            m.with_handler(types::ERROR, escape, |m| m.apply(thunk, Value::Nil))
        })
    }

    /// Apply the installed debugger to `reason`. The debugger is switched
    /// off while it runs, so conditions it signals do not re-enter it.
    /// Returns nil when no debugger is installed.
    pub fn enter_debugger(&mut self, reason: Value) -> EvalResult<Value> {
        let debugger = self.ctx.debugger;
        if debugger.is_nil() {
            return Ok(Value::Nil);
        }
        tracing::debug!("entering debugger");
        self.ctx.debugger = Value::Nil;
        let mark = self.pin_mark();
        self.pin(debugger);
        self.pin(reason);
        let result = match self.heap.list(&[reason]) {
            Ok(args) => self.apply(debugger, args),
            Err(e) => Err(e),
        };
        self.release(mark);
        if self.ctx.debugger.is_nil() {
            self.ctx.debugger = debugger;
        }
        result
    }

    // ========================================================================
    // Conditions
    // ========================================================================

    /// Build a condition of `ctype` with the given fields and the current
    /// stack trace.
    pub fn make_condition(&mut self, ctype: TypeId, fields: &[(SymbolId, Value)]) -> EvalResult<Value> {
        let mark = self.pin_mark();
        let trace = self.stack_trace()?;
        self.pin(trace);
        let id = self.heap.alloc_obj(Object::Condition(Condition {
            ctype,
            fields: Value::Nil,
        }))?;
        condition::put_field(&mut self.heap, id, sym::STACK_TRACE, trace)?;
        for &(name, value) in fields.iter().rev() {
            condition::put_field(&mut self.heap, id, name, value)?;
        }
        self.release(mark);
        Ok(Value::Condition(id))
    }

    /// The trace buffer as a list of `(eval expr env)` and
    /// `(apply proc args)` entries, oldest first.
    pub fn stack_trace(&mut self) -> EvalResult<Value> {
        let mut entries = Vec::new();
        for point in self.ctx.trace.snapshot() {
            let entry = match point {
                TracePoint::Invalid => continue,
                TracePoint::Eval { expr, env } => {
                    self.heap.list(&[Value::Symbol(sym::EVAL), expr, env])?
                }
                TracePoint::Apply { proc, args } => {
                    self.heap.list(&[Value::Symbol(sym::APPLY), proc, args])?
                }
            };
            entries.push(entry);
        }
        self.heap.list(&entries)
    }

    /// Offer `cond` to every matching handler, innermost first. Each handler
    /// runs with only the handlers outside its own registration installed.
    /// Returns nil once all of them have returned, unless the condition is
    /// an error, in which case it is unhandled.
    pub fn signal(&mut self, cond: Value) -> EvalResult<Value> {
        let cid = match cond {
            Value::Condition(id) => id,
            other => return self.type_mismatch("condition", other),
        };
        let ctype = self.heap.condition(cid)?.ctype;
        tracing::debug!(condition = self.types.name(ctype), "signal");
        if self.ctx.debug_all_conditions {
            self.enter_debugger(cond)?;
        }

        let saved = self.ctx.handlers.clone();
        let mark = self.pin_mark();
        self.pin(cond);
        for h in condition::handler_values(&saved) {
            self.pin(h);
        }
        let result = self.run_handlers(cond, ctype, &saved);
        self.ctx.handlers = saved;
        self.release(mark);
        let handled = result?;

        if self.types.is_error(ctype) {
            if !self.ctx.debug_all_conditions {
                self.enter_debugger(cond)?;
            }
            return Err(self.unhandled(cond));
        }
        if handled == 0 && self.types.is_subtype(ctype, types::WARNING) {
            tracing::warn!("{}", self.condition_report(cond));
        }
        Ok(Value::Nil)
    }

    fn run_handlers(&mut self, cond: Value, ctype: TypeId, list: &HandlerList) -> EvalResult<usize> {
        let mut handled = 0;
        let mut node = list.clone();
        while let Some(n) = node {
            if self.types.is_subtype(ctype, n.ctype) {
                self.ctx.handlers = n.next.clone();
                let args = self.heap.list(&[cond])?;
                self.apply(n.handler, args)?;
                handled += 1;
            }
            node = n.next.clone();
        }
        Ok(handled)
    }

    /// Signal a freshly built condition of an error type. Never returns
    /// `Ok`: either a handler leaves via an escape or the error is unhandled.
    pub fn fail<T>(&mut self, ctype: TypeId, fields: &[(SymbolId, Value)]) -> EvalResult<T> {
        let cond = self.make_condition(ctype, fields)?;
        self.signal(cond)?;
        Err(EvalError::internal(format!(
            "signal of {} returned normally",
            self.types.name(ctype)
        )))
    }

    /// `(error message irritant...)`.
    pub fn error<T>(&mut self, message: &str, irritants: &[Value]) -> EvalResult<T> {
        let msg = self.heap.alloc_string(message)?;
        let mark = self.pin_mark();
        self.pin(msg);
        let irritants = self.heap.list(irritants);
        self.release(mark);
        self.fail(types::ERROR, &[(sym::MESSAGE, msg), (sym::IRRITANTS, irritants?)])
    }

    pub fn type_mismatch<T>(&mut self, expected: &str, got: Value) -> EvalResult<T> {
        let expected = Value::Symbol(self.symbols.intern(expected));
        self.fail(types::TYPE_MISMATCH, &[(sym::EXPECTED, expected), (sym::OBJECT, got)])
    }

    fn wrong_arg_count<T>(&mut self, proc: Value, args: Value, expected: String) -> EvalResult<T> {
        let expected = self.heap.alloc_string(expected)?;
        self.fail(
            types::WRONG_ARGUMENT_COUNT,
            &[
                (sym::PROCEDURE, proc),
                (sym::ARGUMENTS, args),
                (sym::EXPECTED, expected),
            ],
        )
    }

    /// Install `handler` for `ctype` around `body`, removing it however
    /// `body` exits.
    pub fn with_handler<T>(
        &mut self,
        ctype: TypeId,
        handler: Value,
        body: impl FnOnce(&mut Machine) -> EvalResult<T>,
    ) -> EvalResult<T> {
        let saved = self.ctx.handlers.clone();
        self.ctx.handlers = push_handler(&saved, ctype, handler);
        let result = body(self);
        self.ctx.handlers = saved;
        result
    }

    /// Terminate or build `EvalError::Unhandled`, per the configured policy.
    fn unhandled(&mut self, cond: Value) -> EvalError {
        let report = self.condition_report(cond);
        let type_name = match cond {
            Value::Condition(id) => match self.heap.condition(id) {
                Ok(c) => self.types.name(c.ctype).to_string(),
                Err(_) => "condition".to_string(),
            },
            _ => "condition".to_string(),
        };
        match self.config.unhandled {
            UnhandledPolicy::Terminate => {
                eprintln!("Unhandled error condition!\n\n{}", report);
                std::process::exit(UNHANDLED_EXIT_CODE);
            }
            UnhandledPolicy::Return => EvalError::Unhandled { type_name, report },
        }
    }

    /// Written condition followed by its stack trace, one entry per line.
    pub fn condition_report(&self, cond: Value) -> String {
        let mut out = self.write_string(cond);
        if let Value::Condition(id) = cond {
            if let Ok(Some(trace)) = condition::field(&self.heap, id, sym::STACK_TRACE) {
                out.push_str("\n\nStack trace:");
                let mut current = trace;
                while let Value::Pair(pid) = current {
                    out.push_str("\n  ");
                    out.push_str(&self.write_string(self.heap.car(pid)));
                    current = self.heap.cdr(pid);
                }
            }
        }
        out
    }

    // ========================================================================
    // Printing
    // ========================================================================

    pub fn write_string(&self, v: Value) -> String {
        printer::write(self, v)
    }

    pub fn display_string(&self, v: Value) -> String {
        printer::display(self, v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> Machine {
        Machine::new(MachineConfig::default().with_policy(UnhandledPolicy::Return)).unwrap()
    }

    #[test]
    fn arity_accepts() {
        assert!(Arity::Exact(2).accepts(2));
        assert!(!Arity::Exact(2).accepts(3));
        assert!(Arity::AtLeast(1).accepts(5));
        assert!(!Arity::AtLeast(1).accepts(0));
        assert!(Arity::Range(1, 2).accepts(2));
        assert!(!Arity::Range(1, 2).accepts(3));
    }

    #[test]
    fn self_evaluating_values() {
        let mut m = machine();
        assert_eq!(m.eval_str("42").unwrap(), Value::Int(42));
        assert_eq!(m.eval_str("#t").unwrap(), Value::TRUE);
        assert_eq!(m.eval_str("()").unwrap(), Value::Nil);
        assert_eq!(m.eval_str("").unwrap(), Value::Nil);
    }

    #[test]
    fn depth_is_balanced_after_errors() {
        let mut m = machine();
        assert!(m.eval_str("(car (car 1))").is_err());
        assert_eq!(m.depth(), 0);
        assert_eq!(m.pin_mark(), 0);
        assert!(m.ctx.handlers.is_none());
    }

    #[test]
    fn collection_keeps_globals() {
        let mut m = machine();
        m.eval_str("(define xs (list 1 2 3))").unwrap();
        m.eval_str("(list 4 5 6)").unwrap();
        m.collect_garbage();
        let xs = m.eval_str("xs").unwrap();
        assert_eq!(m.write_string(xs), "(1 2 3)");
    }

    #[test]
    fn embedder_primitives_use_the_tail_escape() {
        fn twice(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
            let f = m.heap.car_val(args).unwrap_or(Value::Nil);
            let x = m.heap.car_val(m.heap.cdr_val(args).unwrap_or(Value::Nil)).unwrap_or(Value::Nil);
            let once = m.heap.list(&[x])?;
            let y = m.apply(f, once)?;
            let again = m.heap.list(&[y])?;
            Ok(esc.apply(f, again))
        }
        let mut m = machine();
        m.define_primitive("twice", Arity::Exact(2), twice).unwrap();
        let v = m.eval_str("(twice (lambda (n) (* n 3)) 2)").unwrap();
        assert_eq!(v, Value::Int(18));
    }
}
