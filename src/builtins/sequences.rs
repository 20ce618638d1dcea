//! Strings, vectors and output.

use std::io::Write;

use super::{argv, index, list, string, symbol};
use crate::error::{EvalError, EvalResult};
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::value::{ObjId, Value};

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("string?", Arity::Exact(1), string_p)?;
    m.define_primitive("string-append", Arity::AtLeast(0), string_append)?;
    m.define_primitive("string-length", Arity::Exact(1), string_length)?;
    m.define_primitive("symbol->string", Arity::Exact(1), symbol_to_string)?;
    m.define_primitive("string->symbol", Arity::Exact(1), string_to_symbol)?;
    m.define_primitive("object->string", Arity::Exact(1), object_to_string)?;
    m.define_primitive("vector?", Arity::Exact(1), vector_p)?;
    m.define_primitive("vector", Arity::AtLeast(0), vector)?;
    m.define_primitive("make-vector", Arity::Range(1, 2), make_vector)?;
    m.define_primitive("vector-ref", Arity::Exact(2), vector_ref)?;
    m.define_primitive("vector-set!", Arity::Exact(3), vector_set)?;
    m.define_primitive("vector-length", Arity::Exact(1), vector_length)?;
    m.define_primitive("vector->list", Arity::Exact(1), vector_to_list)?;
    m.define_primitive("list->vector", Arity::Exact(1), list_to_vector)?;
    m.define_primitive("display", Arity::Exact(1), display)?;
    m.define_primitive("write", Arity::Exact(1), write)?;
    m.define_primitive("newline", Arity::Exact(0), newline)?;
    Ok(())
}

fn vector_arg(m: &mut Machine, v: Value) -> EvalResult<ObjId> {
    match v {
        Value::Vector(id) => Ok(id),
        other => m.type_mismatch("vector", other),
    }
}

fn string_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Str(_)))))
}

fn string_append(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let mut out = String::new();
    for v in argv(m, args) {
        out.push_str(&string(m, v)?);
    }
    Ok(Outcome::value(m.heap.alloc_string(out)?))
}

/// Length in characters.
fn string_length(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let s = string(m, a[0])?;
    Ok(Outcome::value(Value::Int(s.chars().count() as i64)))
}

fn symbol_to_string(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let s = symbol(m, a[0])?;
    let name = m.symbols.name(s).to_string();
    Ok(Outcome::value(m.heap.alloc_string(name)?))
}

/// Interns, so `pkg:name` lands in package `pkg`.
fn string_to_symbol(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let s = string(m, a[0])?;
    Ok(Outcome::value(Value::Symbol(m.intern(&s))))
}

fn object_to_string(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let text = m.write_string(a[0]);
    Ok(Outcome::value(m.heap.alloc_string(text)?))
}

fn vector_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Vector(_)))))
}

fn vector(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(m.heap.alloc_vector(a)?))
}

/// `(make-vector n [fill])`, filled with nil by default.
fn make_vector(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let n = index(m, a[0])?;
    let fill = a.get(1).copied().unwrap_or(Value::Nil);
    match m.heap.alloc_filled_vector(n, fill) {
        Ok(v) => Ok(Outcome::value(v)),
        Err(EvalError::HeapOverflow) => m.error("make-vector: length exceeds the heap", &[a[0]]),
        Err(e) => Err(e),
    }
}

fn vector_ref(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = vector_arg(m, a[0])?;
    let i = index(m, a[1])?;
    match m.heap.vector(id)?.get(i).copied() {
        Some(v) => Ok(Outcome::value(v)),
        None => m.error("vector-ref: index out of range", &[a[1]]),
    }
}

fn vector_set(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = vector_arg(m, a[0])?;
    let i = index(m, a[1])?;
    let items = m.heap.vector_mut(id)?;
    if i >= items.len() {
        return m.error("vector-set!: index out of range", &[a[1]]);
    }
    items[i] = a[2];
    Ok(Outcome::value(a[2]))
}

fn vector_length(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = vector_arg(m, a[0])?;
    Ok(Outcome::value(Value::Int(m.heap.vector(id)?.len() as i64)))
}

fn vector_to_list(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = vector_arg(m, a[0])?;
    let items = m.heap.vector(id)?.clone();
    Ok(Outcome::value(m.heap.list(&items)?))
}

fn list_to_vector(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let items = list(m, a[0])?;
    Ok(Outcome::value(m.heap.alloc_vector(items)?))
}

fn emit(text: &str) {
    let mut out = std::io::stdout();
    // Write errors are ignored.
    let _ = out.write_all(text.as_bytes());
    let _ = out.flush();
}

fn display(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    emit(&m.display_string(a[0]));
    Ok(Outcome::value(Value::Nil))
}

fn write(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    emit(&m.write_string(a[0]));
    Ok(Outcome::value(Value::Nil))
}

fn newline(_m: &mut Machine, _args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    emit("\n");
    Ok(Outcome::value(Value::Nil))
}
