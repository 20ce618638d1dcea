//! Native special forms.
//!
//! Each form is an ordinary primitive wrapped as a `Form` value, so it
//! receives `(env . operands)` with the operands unevaluated. Whatever a
//! form evaluates in tail position goes through its `TailEscape`.

use crate::condition::{push_handler, types};
use crate::env;
use crate::equal::eqv;
use crate::error::{EvalError, EvalResult};
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::object::Object;
use crate::symbol::sym;
use crate::value::{ObjId, SymbolId, Value};

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_form("quote", Arity::Exact(2), form_quote)?;
    m.define_form("quasiquote", Arity::Exact(2), form_quasiquote)?;
    m.define_form("lambda", Arity::AtLeast(2), form_lambda)?;
    m.define_form("named-lambda", Arity::AtLeast(2), form_named_lambda)?;
    m.define_form("define", Arity::AtLeast(2), form_define)?;
    m.define_form("define-variable", Arity::Range(2, 3), form_define_variable)?;
    m.define_form("define-macro", Arity::AtLeast(2), form_define_macro)?;
    m.define_form("defined?", Arity::Exact(2), form_defined_p)?;
    m.define_form("set!", Arity::Exact(3), form_set)?;
    m.define_form("unset!", Arity::Exact(2), form_unset)?;
    m.define_form("if", Arity::Range(3, 4), form_if)?;
    m.define_form("when", Arity::AtLeast(2), form_when)?;
    m.define_form("unless", Arity::AtLeast(2), form_unless)?;
    m.define_form("cond", Arity::AtLeast(1), form_cond)?;
    m.define_form("case", Arity::AtLeast(2), form_case)?;
    m.define_form("begin", Arity::AtLeast(1), form_begin)?;
    m.define_form("let", Arity::AtLeast(2), form_let)?;
    m.define_form("let*", Arity::AtLeast(2), form_let_star)?;
    m.define_form("letrec", Arity::AtLeast(2), form_letrec)?;
    m.define_form("do", Arity::AtLeast(3), form_do)?;
    m.define_form("and", Arity::AtLeast(1), form_and)?;
    m.define_form("or", Arity::AtLeast(1), form_or)?;
    m.define_form("handler-bind", Arity::AtLeast(2), form_handler_bind)?;
    m.define_form("unwind-protect", Arity::AtLeast(2), form_unwind_protect)?;
    m.define_form("the-environment", Arity::Exact(1), form_the_environment)?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

/// Split `(env . operands)`.
fn split(m: &mut Machine, args: Value) -> EvalResult<(ObjId, Value)> {
    let (env, rest) = match args {
        Value::Pair(id) => (m.heap.car(id), m.heap.cdr(id)),
        _ => (Value::Nil, Value::Nil),
    };
    match env {
        Value::Env(id) => Ok((id, rest)),
        other => m.type_mismatch("environment", other),
    }
}

/// Operands of a form as a vector. The arity check already proved the
/// list proper.
fn operands(m: &Machine, rest: Value) -> Vec<Value> {
    m.heap.list_to_vec(rest).unwrap_or_default()
}

fn malformed<T>(m: &mut Machine, expr: Value) -> EvalResult<T> {
    m.fail(types::MALFORMED_EXPRESSION, &[(sym::EXPRESSION, expr)])
}

fn symbol_of(m: &mut Machine, v: Value) -> EvalResult<SymbolId> {
    match v {
        Value::Symbol(s) => Ok(s),
        other => malformed(m, other),
    }
}

/// Evaluate `expr` while keeping `keep` alive.
fn eval_keeping(m: &mut Machine, keep: &[Value], expr: Value, env: ObjId) -> EvalResult<Value> {
    let mark = m.pin_mark();
    for v in keep {
        m.pin(*v);
    }
    let result = m.eval(expr, env);
    m.release(mark);
    result
}

/// Evaluate every expression of `body` nested and return the last value.
pub(crate) fn progn(m: &mut Machine, body: Value, env: ObjId) -> EvalResult<Value> {
    let mut last = Value::Nil;
    let mut current = body;
    while let Value::Pair(id) = current {
        last = m.eval(m.heap.car(id), env)?;
        current = m.heap.cdr(id);
    }
    Ok(last)
}

/// `name`, `(name)` or `(name init)`.
fn binding(m: &mut Machine, b: Value) -> EvalResult<(SymbolId, Value)> {
    match b {
        Value::Symbol(s) => Ok((s, Value::Nil)),
        Value::Pair(id) => {
            let name = symbol_of(m, m.heap.car(id))?;
            match m.heap.cdr(id) {
                Value::Nil => Ok((name, Value::Nil)),
                Value::Pair(rest) if m.heap.cdr(rest).is_nil() => Ok((name, m.heap.car(rest))),
                _ => malformed(m, b),
            }
        }
        _ => malformed(m, b),
    }
}

fn bindings(m: &mut Machine, list: Value) -> EvalResult<Vec<(SymbolId, Value)>> {
    let items = match m.heap.list_to_vec(list) {
        Some(items) => items,
        None => return malformed(m, list),
    };
    items.into_iter().map(|b| binding(m, b)).collect()
}

fn name_closure(m: &mut Machine, v: Value, name: SymbolId) {
    if let Value::Closure(id) = v {
        if let Object::Closure(clo) = m.heap.obj_mut(id) {
            if clo.name.is_none() {
                clo.name = Some(name);
            }
        }
    }
}

// ============================================================================
// Quoting
// ============================================================================

fn form_quote(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (_, rest) = split(m, args)?;
    Ok(Outcome::value(m.heap.car_val(rest).unwrap_or(Value::Nil)))
}

fn form_quasiquote(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let template = m.heap.car_val(rest).unwrap_or(Value::Nil);
    Ok(Outcome::value(quasi(m, template, env, 1)?))
}

/// `(tag x)` when `v` is exactly that shape.
fn tagged(m: &Machine, v: Value, tag: SymbolId) -> Option<Value> {
    let id = v.as_pair()?;
    if m.heap.car(id) != Value::Symbol(tag) {
        return None;
    }
    let rest = m.heap.cdr(id).as_pair()?;
    if !m.heap.cdr(rest).is_nil() {
        return None;
    }
    Some(m.heap.car(rest))
}

fn quasi(m: &mut Machine, x: Value, env: ObjId, depth: usize) -> EvalResult<Value> {
    if let Some(inner) = tagged(m, x, sym::UNQUOTE) {
        if depth == 1 {
            return m.eval(inner, env);
        }
        let expanded = quasi(m, inner, env, depth - 1)?;
        return m.heap.list(&[Value::Symbol(sym::UNQUOTE), expanded]);
    }
    if let Some(inner) = tagged(m, x, sym::QUASIQUOTE) {
        let expanded = quasi(m, inner, env, depth + 1)?;
        return m.heap.list(&[Value::Symbol(sym::QUASIQUOTE), expanded]);
    }
    match x {
        Value::Pair(_) => quasi_list(m, x, env, depth),
        Value::Vector(id) => {
            let items = m.heap.vector(id)?.clone();
            let list = m.heap.list(&items)?;
            let expanded = eval_quasi_keeping(m, list, env, depth)?;
            match m.heap.list_to_vec(expanded) {
                Some(items) => m.heap.alloc_vector(items),
                None => malformed(m, x),
            }
        }
        other => Ok(other),
    }
}

fn eval_quasi_keeping(m: &mut Machine, list: Value, env: ObjId, depth: usize) -> EvalResult<Value> {
    let mark = m.pin_mark();
    m.pin(list);
    let result = quasi_list(m, list, env, depth);
    m.release(mark);
    result
}

fn quasi_list(m: &mut Machine, list: Value, env: ObjId, depth: usize) -> EvalResult<Value> {
    let mark = m.pin_mark();
    let mut current = list;
    let mut tail = Value::Nil;
    loop {
        // `(a . ,b)` reads as `(a unquote b)`
        if tagged(m, current, sym::UNQUOTE).is_some() || tagged(m, current, sym::QUASIQUOTE).is_some() {
            tail = quasi(m, current, env, depth)?;
            break;
        }
        match current {
            Value::Pair(id) => {
                let item = m.heap.car(id);
                match tagged(m, item, sym::UNQUOTE_SPLICING) {
                    Some(inner) if depth == 1 => {
                        let spliced = m.eval(inner, env)?;
                        match m.heap.list_to_vec(spliced) {
                            Some(items) => {
                                for v in items {
                                    m.pin(v);
                                }
                            }
                            None => return malformed(m, item),
                        }
                    }
                    Some(inner) => {
                        let expanded = quasi(m, inner, env, depth - 1)?;
                        let v = m.heap.list(&[Value::Symbol(sym::UNQUOTE_SPLICING), expanded])?;
                        m.pin(v);
                    }
                    None => {
                        let v = quasi(m, item, env, depth)?;
                        m.pin(v);
                    }
                }
                current = m.heap.cdr(id);
            }
            Value::Nil => break,
            other => {
                tail = other;
                break;
            }
        }
    }
    let pieces = m.pinned_since(mark).to_vec();
    let result = m.heap.list_with_tail(&pieces, tail);
    m.release(mark);
    result
}

// ============================================================================
// Definitions and assignment
// ============================================================================

fn form_lambda(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let id = rest.as_pair().map(|p| (m.heap.car(p), m.heap.cdr(p)));
    let (params, body) = id.unwrap_or((Value::Nil, Value::Nil));
    Ok(Outcome::value(m.make_closure(params, body, env, None)?))
}

fn form_named_lambda(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let head = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let (name, params) = match head {
        Value::Pair(id) => (symbol_of(m, m.heap.car(id))?, m.heap.cdr(id)),
        other => return malformed(m, other),
    };
    Ok(Outcome::value(m.make_closure(params, body, env, Some(name))?))
}

/// `(define name expr)` or `(define (name . params) body...)`. Binds in
/// the current frame and returns the value.
fn form_define(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let target = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let tail = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let (name, value) = match target {
        Value::Symbol(name) => {
            let expr = match tail {
                Value::Nil => Value::Nil,
                Value::Pair(id) if m.heap.cdr(id).is_nil() => m.heap.car(id),
                _ => return malformed(m, rest),
            };
            let value = m.eval(expr, env)?;
            name_closure(m, value, name);
            (name, value)
        }
        Value::Pair(id) => {
            let name = symbol_of(m, m.heap.car(id))?;
            let params = m.heap.cdr(id);
            (name, m.make_closure(params, tail, env, Some(name))?)
        }
        other => return malformed(m, other),
    };
    Ok(Outcome::value(env::define(&mut m.heap, env, name, value)?))
}

/// Defines only when `name` is unbound in the whole chain.
fn form_define_variable(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let name = symbol_of(m, ops[0])?;
    if env::lookup(&m.heap, env, name)?.is_some() {
        return Ok(Outcome::value(Value::Nil));
    }
    let value = match ops.get(1) {
        Some(expr) => m.eval(*expr, env)?,
        None => Value::Nil,
    };
    name_closure(m, value, name);
    Ok(Outcome::value(env::define(&mut m.heap, env, name, value)?))
}

/// `(define-macro (name . params) body...)`.
fn form_define_macro(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let head = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let (name, params) = match head {
        Value::Pair(id) => (symbol_of(m, m.heap.car(id))?, m.heap.cdr(id)),
        other => return malformed(m, other),
    };
    let proc = m.make_closure(params, body, env, Some(name))?;
    let mac = Value::Macro(m.heap.alloc_obj(Object::Wrapped(proc))?);
    Ok(Outcome::value(env::define(&mut m.heap, env, name, mac)?))
}

fn form_defined_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let name = symbol_of(m, m.heap.car_val(rest).unwrap_or(Value::Nil))?;
    let bound = env::lookup(&m.heap, env, name)?.is_some();
    Ok(Outcome::value(Value::Bool(bound)))
}

/// Mutates the nearest existing binding; never creates one.
fn form_set(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let name = symbol_of(m, ops[0])?;
    let value = m.eval(ops[1], env)?;
    if !env::set(&mut m.heap, env, name, value)? {
        return m.fail(types::UNBOUND_VARIABLE, &[(sym::NAME, Value::Symbol(name))]);
    }
    Ok(Outcome::value(value))
}

fn form_unset(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let name = symbol_of(m, m.heap.car_val(rest).unwrap_or(Value::Nil))?;
    Ok(Outcome::value(Value::Bool(env::unset(&mut m.heap, env, name)?)))
}

// ============================================================================
// Conditionals
// ============================================================================

fn form_if(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    if m.eval(ops[0], env)?.is_true() {
        Ok(esc.eval(ops[1], env))
    } else {
        match ops.get(2) {
            Some(alt) => Ok(esc.eval(*alt, env)),
            None => Ok(Outcome::value(Value::Nil)),
        }
    }
}

fn form_when(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let test = m.heap.car_val(rest).unwrap_or(Value::Nil);
    if m.eval(test, env)?.is_true() {
        let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
        m.eval_body(body, env, esc)
    } else {
        Ok(Outcome::value(Value::Nil))
    }
}

fn form_unless(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let test = m.heap.car_val(rest).unwrap_or(Value::Nil);
    if m.eval(test, env)?.is_true() {
        Ok(Outcome::value(Value::Nil))
    } else {
        let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
        m.eval_body(body, env, esc)
    }
}

/// Clauses are `(test body...)`, `(test => receiver)` or `(else body...)`.
/// A clause with no body yields the test value.
fn form_cond(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    for clause in operands(m, rest) {
        let (test, body) = match clause {
            Value::Pair(id) => (m.heap.car(id), m.heap.cdr(id)),
            other => return malformed(m, other),
        };
        let value = if test == Value::Symbol(sym::ELSE) {
            Value::TRUE
        } else {
            m.eval(test, env)?
        };
        if !value.is_true() {
            continue;
        }
        if body.is_nil() {
            return Ok(Outcome::value(value));
        }
        if let Some(receiver) = tagged(m, body, sym::ARROW) {
            let proc = eval_keeping(m, &[value], receiver, env)?;
            let args = m.heap.list(&[value])?;
            return Ok(esc.apply(proc, args));
        }
        return m.eval_body(body, env, esc);
    }
    Ok(Outcome::value(Value::Nil))
}

/// `(case key ((datum...) body...) ... (else body...))`, compared with `eqv?`.
fn form_case(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let key = m.eval(ops[0], env)?;
    for &clause in &ops[1..] {
        let (data, body) = match clause {
            Value::Pair(id) => (m.heap.car(id), m.heap.cdr(id)),
            other => return malformed(m, other),
        };
        let matched = if data == Value::Symbol(sym::ELSE) {
            true
        } else {
            match m.heap.list_to_vec(data) {
                Some(items) => items.into_iter().any(|d| eqv(d, key)),
                None => return malformed(m, clause),
            }
        };
        if matched {
            return m.eval_body(body, env, esc);
        }
    }
    Ok(Outcome::value(Value::Nil))
}

fn form_begin(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    m.eval_body(rest, env, esc)
}

fn form_and(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let (last, init) = match ops.split_last() {
        Some(split) => split,
        None => return Ok(Outcome::value(Value::TRUE)),
    };
    for &expr in init {
        let v = m.eval(expr, env)?;
        if !v.is_true() {
            return Ok(Outcome::value(v));
        }
    }
    Ok(esc.eval(*last, env))
}

fn form_or(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let (last, init) = match ops.split_last() {
        Some(split) => split,
        None => return Ok(Outcome::value(Value::FALSE)),
    };
    for &expr in init {
        let v = m.eval(expr, env)?;
        if v.is_true() {
            return Ok(Outcome::value(v));
        }
    }
    Ok(esc.eval(*last, env))
}

// ============================================================================
// Binding forms
// ============================================================================

/// `(let ((name init)...) body...)` or named `(let loop ((name init)...) body...)`.
fn form_let(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let first = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    if let Value::Symbol(name) = first {
        return named_let(m, env, name, body, esc);
    }
    let specs = bindings(m, first)?;

    let frame = env::new_frame(&mut m.heap, Some(env))?;
    let mark = m.pin_mark();
    m.pin(Value::Env(frame));
    for (name, init) in specs {
        let v = match m.eval(init, env) {
            Ok(v) => v,
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        };
        env::define(&mut m.heap, frame, name, v)?;
    }
    m.release(mark);
    m.eval_body(body, frame, esc)
}

/// The loop procedure lives in its own frame so the body can call it.
fn named_let(m: &mut Machine, env: ObjId, name: SymbolId, rest: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let specs_list = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let specs = bindings(m, specs_list)?;

    let ext = env::new_frame(&mut m.heap, Some(env))?;
    let names: Vec<Value> = specs.iter().map(|(n, _)| Value::Symbol(*n)).collect();
    let params = m.heap.list(&names)?;
    let mark = m.pin_mark();
    m.pin(Value::Env(ext));
    let proc = m.make_closure(params, body, ext, Some(name))?;
    env::define(&mut m.heap, ext, name, proc)?;
    for (_, init) in specs {
        match m.eval(init, env) {
            Ok(v) => m.pin(v),
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        }
    }
    let values = m.pinned_since(mark + 1).to_vec();
    let args = m.heap.list(&values);
    m.release(mark);
    Ok(esc.apply(proc, args?))
}

/// Sequential bindings in one new frame: each init sees the ones before.
fn form_let_star(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let specs_list = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let specs = bindings(m, specs_list)?;

    let frame = env::new_frame(&mut m.heap, Some(env))?;
    let mark = m.pin_mark();
    m.pin(Value::Env(frame));
    for (name, init) in specs {
        match m.eval(init, frame) {
            Ok(v) => {
                env::define(&mut m.heap, frame, name, v)?;
            }
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        }
    }
    m.release(mark);
    m.eval_body(body, frame, esc)
}

/// All names are bound (to nil) before any init runs, so inits can close
/// over each other.
fn form_letrec(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let specs_list = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let specs = bindings(m, specs_list)?;

    let frame = env::new_frame(&mut m.heap, Some(env))?;
    for (name, _) in &specs {
        env::define(&mut m.heap, frame, *name, Value::Nil)?;
    }
    let mark = m.pin_mark();
    m.pin(Value::Env(frame));
    for (name, init) in specs {
        match m.eval(init, frame) {
            Ok(v) => {
                name_closure(m, v, name);
                env::define(&mut m.heap, frame, name, v)?;
            }
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        }
    }
    m.release(mark);
    m.eval_body(body, frame, esc)
}

struct DoVar {
    name: SymbolId,
    init: Value,
    step: Option<Value>,
}

/// `(do ((var init [step])...) (test result...) body...)`. Every iteration
/// gets a fresh frame off the enclosing environment; steps are evaluated in
/// the previous iteration's frame.
fn form_do(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let ops = operands(m, rest);
    let vars = do_vars(m, ops[0])?;
    let (test, results) = match ops[1] {
        Value::Pair(id) => (m.heap.car(id), m.heap.cdr(id)),
        other => return malformed(m, other),
    };
    let body = m.heap.cdr_val(m.heap.cdr_val(rest).unwrap_or(Value::Nil)).unwrap_or(Value::Nil);

    let mark = m.pin_mark();
    let result = do_loop(m, env, &vars, test, body, mark);
    m.release(mark);
    let frame = result?;
    m.eval_body(results, frame, esc)
}

fn do_vars(m: &mut Machine, list: Value) -> EvalResult<Vec<DoVar>> {
    let specs = match m.heap.list_to_vec(list) {
        Some(specs) => specs,
        None => return malformed(m, list),
    };
    let mut vars = Vec::with_capacity(specs.len());
    for spec in specs {
        let parts = match m.heap.list_to_vec(spec) {
            Some(parts) if !parts.is_empty() && parts.len() <= 3 => parts,
            _ => return malformed(m, spec),
        };
        vars.push(DoVar {
            name: symbol_of(m, parts[0])?,
            init: parts.get(1).copied().unwrap_or(Value::Nil),
            step: parts.get(2).copied(),
        });
    }
    Ok(vars)
}

/// Runs until the test is true and returns the frame it was true in.
fn do_loop(
    m: &mut Machine,
    env: ObjId,
    vars: &[DoVar],
    test: Value,
    body: Value,
    mark: usize,
) -> EvalResult<ObjId> {
    let mut frame = env::new_frame(&mut m.heap, Some(env))?;
    m.pin(Value::Env(frame));
    for var in vars {
        let v = m.eval(var.init, env)?;
        env::define(&mut m.heap, frame, var.name, v)?;
    }
    loop {
        if m.eval(test, frame)?.is_true() {
            return Ok(frame);
        }
        progn(m, body, frame)?;

        let next = env::new_frame(&mut m.heap, Some(env))?;
        m.pin(Value::Env(next));
        for var in vars {
            let v = match var.step {
                Some(step) => m.eval(step, frame)?,
                None => env::lookup(&m.heap, frame, var.name)?.unwrap_or(Value::Nil),
            };
            env::define(&mut m.heap, next, var.name, v)?;
        }
        frame = next;
        m.release(mark);
        m.pin(Value::Env(frame));
    }
}

// ============================================================================
// Dynamic extent
// ============================================================================

/// `(handler-bind ((type handler)...) body...)`. The first clause is the
/// innermost handler. All of them are removed when the body exits.
fn form_handler_bind(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let clauses_list = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let body = m.heap.cdr_val(rest).unwrap_or(Value::Nil);
    let clauses = match m.heap.list_to_vec(clauses_list) {
        Some(clauses) => clauses,
        None => return malformed(m, clauses_list),
    };

    let mark = m.pin_mark();
    let result = handler_bind(m, env, &clauses, body);
    m.release(mark);
    Ok(Outcome::value(result?))
}

fn handler_bind(m: &mut Machine, env: ObjId, clauses: &[Value], body: Value) -> EvalResult<Value> {
    let mut installed = Vec::with_capacity(clauses.len());
    for &clause in clauses {
        let parts = match m.heap.list_to_vec(clause) {
            Some(parts) if parts.len() == 2 => parts,
            _ => return malformed(m, clause),
        };
        let ctype = match m.eval(parts[0], env)? {
            Value::Type(t) => t,
            other => return m.type_mismatch("condition-type", other),
        };
        let handler = m.eval(parts[1], env)?;
        m.pin(handler);
        installed.push((ctype, handler));
    }

    let saved = m.ctx.handlers.clone();
    let mut list = saved.clone();
    for &(ctype, handler) in installed.iter().rev() {
        list = push_handler(&list, ctype, handler);
    }
    m.ctx.handlers = list;
    let result = progn(m, body, env);
    m.ctx.handlers = saved;
    result
}

/// `(unwind-protect protected cleanup...)`. Cleanup runs on every exit,
/// escapes and unhandled errors included.
fn form_unwind_protect(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, rest) = split(m, args)?;
    let protected = m.heap.car_val(rest).unwrap_or(Value::Nil);
    let cleanup = m.heap.cdr_val(rest).unwrap_or(Value::Nil);

    let saved = m.ctx.handlers.clone();
    let result = m.eval(protected, env);
    m.ctx.handlers = saved;
    let keep = match &result {
        Ok(v) => *v,
        Err(EvalError::Escape { value, .. }) => *value,
        Err(_) => Value::Nil,
    };
    let mark = m.pin_mark();
    m.pin(keep);
    let cleaned = progn(m, cleanup, env);
    m.release(mark);
    cleaned?;
    Ok(Outcome::value(result?))
}

fn form_the_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (env, _) = split(m, args)?;
    Ok(Outcome::value(Value::Env(env)))
}
