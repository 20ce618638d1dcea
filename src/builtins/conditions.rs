use super::{argv, condition, condition_type, procedure, string, symbol};
use crate::condition::{self, types, Restart};
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::object::Object;
use crate::symbol::sym;
use crate::value::{SymbolId, TypeId, Value};

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("make-condition-type", Arity::Range(1, 2), make_condition_type)?;
    m.define_primitive("condition-type?", Arity::Exact(1), condition_type_p)?;
    m.define_primitive("condition-type-name", Arity::Exact(1), condition_type_name)?;
    m.define_primitive("condition-type-parent", Arity::Exact(1), condition_type_parent)?;
    m.define_primitive("subtype?", Arity::Exact(2), subtype_p)?;
    m.define_primitive("make-condition", Arity::AtLeast(1), make_condition)?;
    m.define_primitive("condition?", Arity::Exact(1), condition_p)?;
    m.define_primitive("condition-type", Arity::Exact(1), condition_type_of)?;
    m.define_primitive("condition-field", Arity::Range(2, 3), condition_field)?;
    m.define_primitive("condition-put-field!", Arity::Exact(3), condition_put_field)?;
    m.define_primitive("condition-fields", Arity::Exact(1), condition_fields)?;
    m.define_primitive("signal", Arity::Exact(1), signal)?;
    m.define_primitive("error", Arity::AtLeast(1), error)?;
    m.define_primitive("warning", Arity::AtLeast(1), warning)?;
    m.define_primitive("with-handler", Arity::Exact(3), with_handler)?;
    m.define_primitive("make-restart", Arity::Range(2, 3), make_restart)?;
    m.define_primitive("restart?", Arity::Exact(1), restart_p)?;
    m.define_primitive("restart-name", Arity::Exact(1), restart_name)?;
    m.define_primitive("restart-description", Arity::Exact(1), restart_description)?;
    m.define_primitive("invoke-restart", Arity::AtLeast(1), invoke_restart)?;
    m.define_primitive("stack-trace", Arity::Range(0, 1), stack_trace)?;
    m.define_primitive("call/ec", Arity::Exact(1), call_ec)?;
    m.define_primitive("call-with-escape-continuation", Arity::Exact(1), call_ec)?;
    m.define_primitive("make-exception", Arity::Exact(2), make_exception)?;
    m.define_primitive("raise", Arity::Exact(1), raise)?;
    m.define_primitive("throw", Arity::Exact(2), throw)?;
    m.define_primitive("abort", Arity::Exact(0), abort)?;
    m.define_primitive("try", Arity::Exact(2), try_)?;
    m.define_primitive("set-debugger!", Arity::Exact(1), set_debugger)?;
    m.define_primitive("enter-debugger", Arity::Exact(1), enter_debugger)?;
    m.define_primitive(
        "set-invoke-debugger-on-all-conditions!",
        Arity::Exact(1),
        set_invoke_debugger_on_all_conditions,
    )?;

    // Built-in types are reachable as `<name>`.
    for id in types::CONDITION.0..=types::EXCEPTION.0 {
        let ctype = TypeId(id);
        let name = format!("<{}>", m.types.name(ctype));
        m.define_global(&name, Value::Type(ctype))?;
    }
    Ok(())
}

/// `(make-condition-type name [parent])`. Without a parent the new type
/// hangs directly under `condition`.
fn make_condition_type(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let name = match a[0] {
        Value::Symbol(s) => m.symbols.name(s).to_string(),
        other => string(m, other)?,
    };
    let parent = match a.get(1).copied() {
        None | Some(Value::Nil) => types::CONDITION,
        Some(v) => condition_type(m, v)?,
    };
    let id = m.types.define(&name, Some(parent));
    tracing::debug!(name = name.as_str(), parent = m.types.name(parent), "new condition type");
    Ok(Outcome::value(Value::Type(id)))
}

fn condition_type_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Type(_)))))
}

fn condition_type_name(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let t = condition_type(m, a[0])?;
    let name = m.types.name(t).to_string();
    Ok(Outcome::value(Value::Symbol(m.intern(&name))))
}

fn condition_type_parent(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let t = condition_type(m, a[0])?;
    Ok(Outcome::value(m.types.parent(t).map(Value::Type).unwrap_or(Value::Nil)))
}

fn subtype_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let sub = condition_type(m, a[0])?;
    let sup = condition_type(m, a[1])?;
    Ok(Outcome::value(Value::Bool(m.types.is_subtype(sub, sup))))
}

/// `(make-condition type name value ...)`.
fn make_condition(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let ctype = condition_type(m, a[0])?;
    let plist = &a[1..];
    if plist.len() % 2 != 0 {
        return m.error("make-condition: odd field list", &[args]);
    }
    let mut fields: Vec<(SymbolId, Value)> = Vec::with_capacity(plist.len() / 2);
    for pair in plist.chunks(2) {
        fields.push((symbol(m, pair[0])?, pair[1]));
    }
    Ok(Outcome::value(m.make_condition(ctype, &fields)?))
}

fn condition_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Condition(_)))))
}

fn condition_type_of(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = condition(m, a[0])?;
    Ok(Outcome::value(Value::Type(m.heap.condition(id)?.ctype)))
}

/// `(condition-field c name [default])`. Absent fields yield the default,
/// or nil.
fn condition_field(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = condition(m, a[0])?;
    let name = symbol(m, a[1])?;
    let found = condition::field(&m.heap, id, name)?;
    Ok(Outcome::value(found.or(a.get(2).copied()).unwrap_or(Value::Nil)))
}

fn condition_put_field(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = condition(m, a[0])?;
    let name = symbol(m, a[1])?;
    condition::put_field(&mut m.heap, id, name, a[2])?;
    Ok(Outcome::value(a[2]))
}

/// Fields as `((name value) ...)`, most recent first.
fn condition_fields(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = condition(m, a[0])?;
    let fields = condition::fields(&m.heap, id)?;
    let mut entries = Vec::with_capacity(fields.len());
    for (name, value) in fields {
        entries.push(m.heap.list(&[Value::Symbol(name), value])?);
    }
    Ok(Outcome::value(m.heap.list(&entries)?))
}

fn signal(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(m.signal(a[0])?))
}

/// Signal `cond` and never return normally. A condition that is not an
/// error is wrapped in a plain `error` once its handlers are done.
fn signal_as_error(m: &mut Machine, cond: Value) -> EvalResult<Outcome> {
    m.signal(cond)?;
    m.fail(types::ERROR, &[(sym::OBJECT, cond)])
}

/// `(error message irritant ...)`, or `(error condition)` to signal a
/// prebuilt condition as an error.
fn error(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    if let Value::Condition(_) = a[0] {
        return signal_as_error(m, a[0]);
    }
    let irritants = m.heap.cdr_val(args).unwrap_or(Value::Nil);
    m.fail(types::ERROR, &[(sym::MESSAGE, a[0]), (sym::IRRITANTS, irritants)])
}

/// `(warning message irritant ...)`. Returns nil once the handlers are
/// done; a warning nobody handles is logged.
fn warning(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let irritants = m.heap.cdr_val(args).unwrap_or(Value::Nil);
    let cond = m.make_condition(types::WARNING, &[(sym::MESSAGE, a[0]), (sym::IRRITANTS, irritants)])?;
    Ok(Outcome::value(m.signal(cond)?))
}

/// `(with-handler type handler thunk)`.
fn with_handler(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let ctype = condition_type(m, a[0])?;
    let handler = procedure(m, a[1])?;
    let thunk = a[2];
    let value = m.with_handler(ctype, handler, |m| m.apply(thunk, Value::Nil))?;
    Ok(Outcome::value(value))
}

/// `(make-restart name procedure [description])`.
fn make_restart(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let proc = procedure(m, a[1])?;
    let description = match a.get(2).copied() {
        Some(v) => string(m, v)?,
        None => String::new(),
    };
    let id = m.heap.alloc_obj(Object::Restart(Restart {
        name: a[0],
        proc,
        description,
    }))?;
    Ok(Outcome::value(Value::Restart(id)))
}

fn restart_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Restart(_)))))
}

fn restart_name(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Restart(id) => Ok(Outcome::value(m.heap.restart(id)?.name)),
        other => m.type_mismatch("restart", other),
    }
}

fn restart_description(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Restart(id) => {
            let text = m.heap.restart(id)?.description.clone();
            Ok(Outcome::value(m.heap.alloc_string(text)?))
        }
        other => m.type_mismatch("restart", other),
    }
}

/// `(invoke-restart restart arg ...)` is an ordinary tail call.
fn invoke_restart(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    if !matches!(a[0], Value::Restart(_)) {
        return m.type_mismatch("restart", a[0]);
    }
    let rest = m.heap.cdr_val(args).unwrap_or(Value::Nil);
    Ok(esc.apply(a[0], rest))
}

/// `(stack-trace)` snapshots the trace buffer; `(stack-trace c)` returns
/// the trace captured when `c` was made.
fn stack_trace(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a.first().copied() {
        Some(v) => {
            let id = condition(m, v)?;
            let trace = condition::field(&m.heap, id, sym::STACK_TRACE)?;
            Ok(Outcome::value(trace.unwrap_or(Value::Nil)))
        }
        None => Ok(Outcome::value(m.stack_trace()?)),
    }
}

fn call_ec(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let proc = procedure(m, a[0])?;
    Ok(Outcome::value(m.call_with_escape(proc)?))
}

/// `(make-exception tag object)` builds an `exception` condition without
/// signalling it.
fn make_exception(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let cond = m.make_condition(types::EXCEPTION, &[(sym::TAG, a[0]), (sym::OBJECT, a[1])])?;
    Ok(Outcome::value(cond))
}

/// `(raise object)`. Conditions are signalled as they are; anything else
/// travels as the `object` of an untagged exception.
fn raise(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let cond = match a[0] {
        Value::Condition(_) => a[0],
        other => m.make_condition(types::EXCEPTION, &[(sym::TAG, Value::Nil), (sym::OBJECT, other)])?,
    };
    signal_as_error(m, cond)
}

/// `(throw tag object)` raises a fresh exception.
fn throw(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let cond = m.make_condition(types::EXCEPTION, &[(sym::TAG, a[0]), (sym::OBJECT, a[1])])?;
    signal_as_error(m, cond)
}

/// `(abort)` throws the tag `abort` with no object.
fn abort(m: &mut Machine, _args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let tag = Value::Symbol(m.intern("abort"));
    let cond = m.make_condition(types::EXCEPTION, &[(sym::TAG, tag), (sym::OBJECT, Value::Nil)])?;
    signal_as_error(m, cond)
}

/// `(try handler thunk)`. An error signalled in `thunk` unwinds to here
/// and `handler` is tail called with the condition.
fn try_(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let handler = procedure(m, a[0])?;
    let thunk = procedure(m, a[1])?;
    match m.catch_errors(thunk)? {
        Ok(value) => Ok(Outcome::value(value)),
        Err(cond) => {
            let args = m.heap.list(&[cond])?;
            Ok(esc.apply(handler, args))
        }
    }
}

/// `(set-debugger! procedure)`, or nil to remove the debugger. Returns the
/// previous one.
fn set_debugger(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let debugger = match a[0] {
        Value::Nil => Value::Nil,
        other => procedure(m, other)?,
    };
    let previous = std::mem::replace(&mut m.ctx.debugger, debugger);
    Ok(Outcome::value(previous))
}

/// `(enter-debugger reason)` returns whatever the debugger returns. With
/// no debugger installed the reason is logged and nil returned.
fn enter_debugger(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    if m.ctx.debugger.is_nil() {
        tracing::warn!("no debugger installed: {}", m.write_string(a[0]));
        return Ok(Outcome::value(Value::Nil));
    }
    Ok(Outcome::value(m.enter_debugger(a[0])?))
}

fn set_invoke_debugger_on_all_conditions(
    m: &mut Machine,
    args: Value,
    _esc: TailEscape,
) -> EvalResult<Outcome> {
    let a = argv(m, args);
    m.ctx.debug_all_conditions = a[0].is_true();
    Ok(Outcome::value(a[0]))
}
