use super::{argv, index, list};
use crate::equal::{eq, equal, eqv, Equality};
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::value::Value;

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("cons", Arity::Exact(2), cons)?;
    m.define_primitive("car", Arity::Exact(1), car)?;
    m.define_primitive("cdr", Arity::Exact(1), cdr)?;
    m.define_primitive("set-car!", Arity::Exact(2), set_car)?;
    m.define_primitive("set-cdr!", Arity::Exact(2), set_cdr)?;
    m.define_primitive("list", Arity::AtLeast(0), list_prim)?;
    m.define_primitive("length", Arity::Exact(1), length)?;
    m.define_primitive("append", Arity::AtLeast(0), append)?;
    m.define_primitive("reverse", Arity::Exact(1), reverse)?;
    m.define_primitive("list-ref", Arity::Exact(2), list_ref)?;
    m.define_primitive("memq", Arity::Exact(2), memq)?;
    m.define_primitive("memv", Arity::Exact(2), memv)?;
    m.define_primitive("member", Arity::Exact(2), member)?;
    m.define_primitive("assq", Arity::Exact(2), assq)?;
    m.define_primitive("assv", Arity::Exact(2), assv)?;
    m.define_primitive("assoc", Arity::Exact(2), assoc)?;
    m.define_primitive("map", Arity::AtLeast(2), map)?;
    m.define_primitive("for-each", Arity::AtLeast(2), for_each)?;
    m.define_primitive("filter", Arity::Exact(2), filter)?;
    m.define_primitive("reduce", Arity::Exact(3), reduce)?;
    m.define_primitive("pair?", Arity::Exact(1), pair_p)?;
    m.define_primitive("null?", Arity::Exact(1), null_p)?;
    m.define_primitive("list?", Arity::Exact(1), list_p)?;
    m.define_primitive("symbol?", Arity::Exact(1), symbol_p)?;
    Ok(())
}

fn cons(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(m.heap.cons(a[0], a[1])?))
}

/// `(car ())` is `()`.
fn car(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Nil => Ok(Outcome::value(Value::Nil)),
        Value::Pair(id) => Ok(Outcome::value(m.heap.car(id))),
        other => m.type_mismatch("pair", other),
    }
}

fn cdr(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Nil => Ok(Outcome::value(Value::Nil)),
        Value::Pair(id) => Ok(Outcome::value(m.heap.cdr(id))),
        other => m.type_mismatch("pair", other),
    }
}

fn set_car(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Pair(id) => {
            m.heap.set_car(id, a[1]);
            Ok(Outcome::value(a[1]))
        }
        other => m.type_mismatch("pair", other),
    }
}

fn set_cdr(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match a[0] {
        Value::Pair(id) => {
            m.heap.set_cdr(id, a[1]);
            Ok(Outcome::value(a[1]))
        }
        other => m.type_mismatch("pair", other),
    }
}

/// The argument list is already fresh, so it is the result.
fn list_prim(_m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    Ok(Outcome::value(args))
}

fn length(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match m.heap.list_len(a[0]) {
        Some(n) => Ok(Outcome::value(Value::Int(n as i64))),
        None => m.type_mismatch("list", a[0]),
    }
}

/// Copies every list but the last, which is shared.
fn append(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let (last, init) = match a.split_last() {
        Some(split) => split,
        None => return Ok(Outcome::value(Value::Nil)),
    };
    let mut items = Vec::new();
    for &l in init {
        items.extend(list(m, l)?);
    }
    Ok(Outcome::value(m.heap.list_with_tail(&items, *last)?))
}

fn reverse(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mut result = Value::Nil;
    for item in list(m, a[0])? {
        result = m.heap.cons(item, result)?;
    }
    Ok(Outcome::value(result))
}

fn list_ref(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let items = list(m, a[0])?;
    let i = index(m, a[1])?;
    match items.get(i) {
        Some(v) => Ok(Outcome::value(*v)),
        None => m.error("list-ref: index out of range", &[a[1]]),
    }
}

/// The first tail of `l` whose car matches `x`, or `#f`.
fn member_by(m: &mut Machine, args: Value, mode: Equality) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mut current = a[1];
    while let Value::Pair(id) = current {
        if mode.test(&m.heap, a[0], m.heap.car(id)) {
            return Ok(Outcome::value(current));
        }
        current = m.heap.cdr(id);
    }
    Ok(Outcome::value(Value::FALSE))
}

fn memq(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    member_by(m, args, Equality::Eq)
}

fn memv(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    member_by(m, args, Equality::Eqv)
}

fn member(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    member_by(m, args, Equality::Equal)
}

/// The first entry of the alist whose car matches `x`, or `#f`.
fn assoc_by(m: &mut Machine, args: Value, test: fn(&Machine, Value, Value) -> bool) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mut current = a[1];
    while let Value::Pair(id) = current {
        if let Value::Pair(entry) = m.heap.car(id) {
            if test(m, a[0], m.heap.car(entry)) {
                return Ok(Outcome::value(Value::Pair(entry)));
            }
        }
        current = m.heap.cdr(id);
    }
    Ok(Outcome::value(Value::FALSE))
}

fn assq(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    assoc_by(m, args, |_, a, b| eq(a, b))
}

fn assv(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    assoc_by(m, args, |_, a, b| eqv(a, b))
}

fn assoc(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    assoc_by(m, args, |m, a, b| equal(&m.heap, a, b))
}

/// Apply `f` across the lists in parallel, stopping at the shortest.
/// Results stay pinned from `mark` on.
fn map_into(m: &mut Machine, f: Value, lists: &[Value]) -> EvalResult<()> {
    let mut columns = Vec::with_capacity(lists.len());
    for &l in lists {
        columns.push(list(m, l)?);
    }
    let n = columns.iter().map(Vec::len).min().unwrap_or(0);
    for i in 0..n {
        let row: Vec<Value> = columns.iter().map(|c| c[i]).collect();
        let call_args = m.heap.list(&row)?;
        let v = m.apply(f, call_args)?;
        m.pin(v);
    }
    Ok(())
}

fn map(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mark = m.pin_mark();
    let result = map_into(m, a[0], &a[1..]).and_then(|_| {
        let values = m.pinned_since(mark).to_vec();
        m.heap.list(&values)
    });
    m.release(mark);
    Ok(Outcome::value(result?))
}

fn for_each(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mark = m.pin_mark();
    let result = map_into(m, a[0], &a[1..]);
    m.release(mark);
    result?;
    Ok(Outcome::value(Value::Nil))
}

/// `(filter pred list)` keeps the items `pred` accepts, in order.
fn filter(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let items = list(m, a[1])?;
    let mut kept = Vec::new();
    for item in items {
        let call_args = m.heap.list(&[item])?;
        if m.apply(a[0], call_args)?.is_true() {
            kept.push(item);
        }
    }
    Ok(Outcome::value(m.heap.list(&kept)?))
}

/// `(reduce f initial list)` folds from the left as `(f acc item)`.
fn reduce(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let items = list(m, a[2])?;
    let mark = m.pin_mark();
    let mut acc = a[1];
    for item in items {
        m.release(mark);
        m.pin(acc);
        let call_args = match m.heap.list(&[acc, item]) {
            Ok(call_args) => call_args,
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        };
        match m.apply(a[0], call_args) {
            Ok(v) => acc = v,
            Err(e) => {
                m.release(mark);
                return Err(e);
            }
        }
    }
    m.release(mark);
    Ok(Outcome::value(acc))
}

fn pair_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(a[0].is_pair())))
}

fn null_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(a[0].is_nil())))
}

fn list_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(m.heap.is_proper_list(a[0]))))
}

fn symbol_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(a[0].is_symbol())))
}
