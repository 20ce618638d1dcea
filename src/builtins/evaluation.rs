use super::{argv, environment, list, procedure, string, symbol};
use crate::condition::types;
use crate::env;
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::object::Object;
use crate::symbol::sym;
use crate::value::Value;

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("eval", Arity::Range(1, 2), eval)?;
    m.define_primitive("eval-proc", Arity::Exact(2), eval_proc)?;
    m.define_primitive("apply", Arity::AtLeast(1), apply)?;
    m.define_primitive("make-macro", Arity::Exact(1), make_macro)?;
    m.define_primitive("make-form", Arity::Exact(1), make_form)?;
    m.define_primitive("primitive?", Arity::Exact(1), primitive_p)?;
    m.define_primitive("closure?", Arity::Exact(1), closure_p)?;
    m.define_primitive("procedure?", Arity::Exact(1), procedure_p)?;
    m.define_primitive("macro?", Arity::Exact(1), macro_p)?;
    m.define_primitive("form?", Arity::Exact(1), form_p)?;
    m.define_primitive("environment?", Arity::Exact(1), environment_p)?;
    m.define_primitive("make-environment", Arity::Range(0, 1), make_environment)?;
    m.define_primitive("make-empty-environment", Arity::Exact(0), make_empty_environment)?;
    m.define_primitive("make-default-environment", Arity::Exact(0), make_default_environment)?;
    m.define_primitive("global-environment", Arity::Exact(0), global_environment)?;
    m.define_primitive("environment-parent", Arity::Exact(1), environment_parent)?;
    m.define_primitive("lookup-in-environment", Arity::Range(2, 3), lookup_in_environment)?;
    m.define_primitive("define-in-environment!", Arity::Exact(3), define_in_environment)?;
    m.define_primitive("set-in-environment!", Arity::Exact(3), set_in_environment)?;
    m.define_primitive("unset-from-environment!", Arity::Exact(2), unset_from_environment)?;
    m.define_primitive("environment-variables", Arity::Exact(1), environment_variables)?;
    m.define_primitive("gensym", Arity::Range(0, 1), gensym)?;
    Ok(())
}

/// `(eval expr [env])`, in tail position. The default is the global frame.
fn eval(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let env = match a.get(1).copied() {
        Some(v) => environment(m, v)?,
        None => m.global,
    };
    Ok(esc.eval(a[0], env))
}

/// `(eval-proc body env)` evaluates a list of expressions like a closure
/// body.
fn eval_proc(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let env = environment(m, a[1])?;
    m.eval_body(a[0], env, esc)
}

/// `(apply proc arg ... list)`.
fn apply(m: &mut Machine, args: Value, esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let proc = a[0];
    let spread = match a.split_last() {
        Some((last, _)) if a.len() > 1 => {
            list(m, *last)?;
            let fixed = &a[1..a.len() - 1];
            m.heap.list_with_tail(fixed, *last)?
        }
        _ => Value::Nil,
    };
    Ok(esc.apply(proc, spread))
}

fn make_macro(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let proc = procedure(m, a[0])?;
    Ok(Outcome::value(Value::Macro(m.heap.alloc_obj(Object::Wrapped(proc))?)))
}

/// The wrapped procedure receives `(env . operands)`.
fn make_form(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let proc = procedure(m, a[0])?;
    Ok(Outcome::value(Value::Form(m.heap.alloc_obj(Object::Wrapped(proc))?)))
}

fn primitive_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Primitive(_)))))
}

fn closure_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Closure(_)))))
}

fn procedure_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(a[0].is_procedure())))
}

fn macro_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Macro(_)))))
}

fn form_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Form(_)))))
}

fn environment_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Env(_)))))
}

/// `(make-environment [parent])`. The parent defaults to the global frame.
fn make_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let parent = match a.first().copied() {
        Some(v) => environment(m, v)?,
        None => m.global,
    };
    Ok(Outcome::value(Value::Env(env::new_frame(&mut m.heap, Some(parent))?)))
}

/// A frame with no bindings and no parent. Not even the special forms are
/// visible from it.
fn make_empty_environment(m: &mut Machine, _args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    Ok(Outcome::value(Value::Env(env::new_frame(&mut m.heap, None)?)))
}

/// A separate top level: the startup bindings, none of the user's.
fn make_default_environment(m: &mut Machine, _args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    Ok(Outcome::value(Value::Env(m.default_environment()?)))
}

fn global_environment(m: &mut Machine, _args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    Ok(Outcome::value(Value::Env(m.global)))
}

fn environment_parent(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    Ok(Outcome::value(env::parent(&m.heap, frame)?.map(Value::Env).unwrap_or(Value::Nil)))
}

/// `(lookup-in-environment env name [default])`. Without a default an
/// unbound name signals `unbound-variable`.
fn lookup_in_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    let name = symbol(m, a[1])?;
    match (env::lookup(&m.heap, frame, name)?, a.get(2)) {
        (Some(v), _) => Ok(Outcome::value(v)),
        (None, Some(default)) => Ok(Outcome::value(*default)),
        (None, None) => m.fail(types::UNBOUND_VARIABLE, &[(sym::NAME, a[1])]),
    }
}

fn define_in_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    let name = symbol(m, a[1])?;
    Ok(Outcome::value(env::define(&mut m.heap, frame, name, a[2])?))
}

fn set_in_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    let name = symbol(m, a[1])?;
    if !env::set(&mut m.heap, frame, name, a[2])? {
        return m.fail(types::UNBOUND_VARIABLE, &[(sym::NAME, a[1])]);
    }
    Ok(Outcome::value(a[2]))
}

fn unset_from_environment(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    let name = symbol(m, a[1])?;
    Ok(Outcome::value(Value::Bool(env::unset(&mut m.heap, frame, name)?)))
}

/// Names bound directly in the frame, not its ancestors.
fn environment_variables(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let frame = environment(m, a[0])?;
    let names: Vec<Value> = env::variables(&m.heap, frame)?
        .into_iter()
        .map(Value::Symbol)
        .collect();
    Ok(Outcome::value(m.heap.list(&names)?))
}

/// `(gensym [prefix])` returns a fresh uninterned symbol.
fn gensym(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let prefix = match a.first().copied() {
        None => "g".to_string(),
        Some(Value::Symbol(s)) => m.symbols.name(s).to_string(),
        Some(v) => string(m, v)?,
    };
    Ok(Outcome::value(Value::Symbol(m.symbols.gensym(&prefix))))
}
