use super::{argv, symbol};
use crate::equal::Equality;
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::symbol::sym;
use crate::table;
use crate::value::{ObjId, Value};

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("make-hash-table", Arity::Range(0, 1), make_hash_table)?;
    m.define_primitive("hash-table?", Arity::Exact(1), hash_table_p)?;
    m.define_primitive("hash-table-ref", Arity::Range(2, 3), hash_table_ref)?;
    m.define_primitive("hash-table-put!", Arity::Exact(3), hash_table_put)?;
    m.define_primitive("hash-table-set!", Arity::Exact(3), hash_table_set)?;
    m.define_primitive("hash-table-unset!", Arity::Exact(2), hash_table_unset)?;
    m.define_primitive("hash-table-count", Arity::Exact(1), hash_table_count)?;
    m.define_primitive("hash-table->alist", Arity::Exact(1), hash_table_alist)?;
    Ok(())
}

fn table_arg(m: &mut Machine, v: Value) -> EvalResult<ObjId> {
    match v {
        Value::Table(id) => Ok(id),
        other => m.type_mismatch("hash-table", other),
    }
}

/// `(make-hash-table ['eq | 'eqv | 'equal])`, `equal` by default.
fn make_hash_table(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mode = match a.first().copied() {
        None => Equality::Equal,
        Some(v) => match symbol(m, v)? {
            sym::EQ => Equality::Eq,
            sym::EQV => Equality::Eqv,
            sym::EQUAL => Equality::Equal,
            _ => return m.error("make-hash-table: unknown mode", &[v]),
        },
    };
    Ok(Outcome::value(table::new_table(&mut m.heap, mode)?))
}

fn hash_table_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Table(_)))))
}

/// `(hash-table-ref table key [default])`. A missing key yields the
/// default, or nil.
fn hash_table_ref(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    let found = table::get(&m.heap, id, a[1])?;
    Ok(Outcome::value(found.or(a.get(2).copied()).unwrap_or(Value::Nil)))
}

fn hash_table_put(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    Ok(Outcome::value(Value::Bool(table::put(&mut m.heap, id, a[1], a[2])?)))
}

fn hash_table_set(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    table::set(&mut m.heap, id, a[1], a[2])?;
    Ok(Outcome::value(a[2]))
}

fn hash_table_unset(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    Ok(Outcome::value(Value::Bool(table::unset(&mut m.heap, id, a[1])?)))
}

fn hash_table_count(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    Ok(Outcome::value(Value::Int(table::count(&m.heap, id)? as i64)))
}

/// Entries as `((key . value) ...)`, in no particular order.
fn hash_table_alist(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let id = table_arg(m, a[0])?;
    let entries = table::entries(&m.heap, id)?;
    let mut result = Value::Nil;
    for (k, v) in entries {
        let entry = m.heap.cons(k, v)?;
        result = m.heap.cons(entry, result)?;
    }
    Ok(Outcome::value(result))
}
