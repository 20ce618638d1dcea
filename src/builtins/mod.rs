//! The primitive library. Every primitive uses the ordinary calling
//! convention: an evaluated, arity-checked argument list plus the tail
//! escape.

mod conditions;
mod equality;
mod evaluation;
mod lists;
mod numbers;
mod sequences;
mod tables;

use crate::error::EvalResult;
use crate::eval::Machine;
use crate::value::{ObjId, SymbolId, TypeId, Value};

pub fn install(m: &mut Machine) -> EvalResult<()> {
    conditions::install(m)?;
    evaluation::install(m)?;
    tables::install(m)?;
    lists::install(m)?;
    numbers::install(m)?;
    equality::install(m)?;
    sequences::install(m)?;
    Ok(())
}

/// Arguments as a vector. Arity was checked by the caller, so the list is
/// proper.
pub(crate) fn argv(m: &Machine, args: Value) -> Vec<Value> {
    m.heap.list_to_vec(args).unwrap_or_default()
}

pub(crate) fn int(m: &mut Machine, v: Value) -> EvalResult<i64> {
    match v {
        Value::Int(n) => Ok(n),
        other => m.type_mismatch("integer", other),
    }
}

pub(crate) fn index(m: &mut Machine, v: Value) -> EvalResult<usize> {
    match v {
        Value::Int(n) if n >= 0 => Ok(n as usize),
        other => m.type_mismatch("index", other),
    }
}

pub(crate) fn symbol(m: &mut Machine, v: Value) -> EvalResult<SymbolId> {
    match v {
        Value::Symbol(s) => Ok(s),
        other => m.type_mismatch("symbol", other),
    }
}

pub(crate) fn string(m: &mut Machine, v: Value) -> EvalResult<String> {
    match v {
        Value::Str(id) => Ok(m.heap.string(id)?.to_string()),
        other => m.type_mismatch("string", other),
    }
}

pub(crate) fn environment(m: &mut Machine, v: Value) -> EvalResult<ObjId> {
    match v {
        Value::Env(id) => Ok(id),
        other => m.type_mismatch("environment", other),
    }
}

pub(crate) fn condition_type(m: &mut Machine, v: Value) -> EvalResult<TypeId> {
    match v {
        Value::Type(t) => Ok(t),
        other => m.type_mismatch("condition-type", other),
    }
}

pub(crate) fn condition(m: &mut Machine, v: Value) -> EvalResult<ObjId> {
    match v {
        Value::Condition(id) => Ok(id),
        other => m.type_mismatch("condition", other),
    }
}

/// A proper list as a vector.
pub(crate) fn list(m: &mut Machine, v: Value) -> EvalResult<Vec<Value>> {
    match m.heap.list_to_vec(v) {
        Some(items) => Ok(items),
        None => m.type_mismatch("list", v),
    }
}

pub(crate) fn procedure(m: &mut Machine, v: Value) -> EvalResult<Value> {
    if v.is_procedure() {
        Ok(v)
    } else {
        m.type_mismatch("procedure", v)
    }
}
