use rand::Rng;

use super::{argv, int};
use crate::condition::types;
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::symbol::sym;
use crate::value::Value;

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("+", Arity::AtLeast(0), add)?;
    m.define_primitive("-", Arity::AtLeast(1), sub)?;
    m.define_primitive("*", Arity::AtLeast(0), mul)?;
    m.define_primitive("/", Arity::AtLeast(1), div)?;
    m.define_primitive("=", Arity::AtLeast(1), num_eq)?;
    m.define_primitive("<", Arity::AtLeast(1), lt)?;
    m.define_primitive(">", Arity::AtLeast(1), gt)?;
    m.define_primitive("<=", Arity::AtLeast(1), le)?;
    m.define_primitive(">=", Arity::AtLeast(1), ge)?;
    m.define_primitive("quotient", Arity::Exact(2), quotient)?;
    m.define_primitive("remainder", Arity::Exact(2), remainder)?;
    m.define_primitive("modulo", Arity::Exact(2), modulo)?;
    m.define_primitive("abs", Arity::Exact(1), abs)?;
    m.define_primitive("number?", Arity::Exact(1), number_p)?;
    m.define_primitive("integer?", Arity::Exact(1), integer_p)?;
    m.define_primitive("zero?", Arity::Exact(1), zero_p)?;
    m.define_primitive("random", Arity::Exact(1), random)?;
    Ok(())
}

/// Integers stay exact until a real shows up or they overflow.
#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Real(f64),
}

impl Num {
    fn real(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Real(x) => x,
        }
    }

    fn value(self) -> Value {
        match self {
            Num::Int(n) => Value::Int(n),
            Num::Real(x) => Value::Real(x),
        }
    }
}

fn num(m: &mut Machine, v: Value) -> EvalResult<Num> {
    match v {
        Value::Int(n) => Ok(Num::Int(n)),
        Value::Real(x) => Ok(Num::Real(x)),
        other => m.type_mismatch("number", other),
    }
}

fn arithmetic_error<T>(m: &mut Machine, message: &str, operands: &[Value]) -> EvalResult<T> {
    let message = m.heap.alloc_string(message)?;
    let operands = m.heap.list(operands)?;
    m.fail(
        types::ARITHMETIC_ERROR,
        &[(sym::MESSAGE, message), (sym::IRRITANTS, operands)],
    )
}

/// Fold the operands with an exact and an inexact version of one operator.
fn fold(
    m: &mut Machine,
    name: &str,
    init: Num,
    operands: &[Value],
    exact: fn(i64, i64) -> Option<i64>,
    inexact: fn(f64, f64) -> f64,
) -> EvalResult<Num> {
    let mut acc = init;
    for &v in operands {
        let n = num(m, v)?;
        acc = match (acc, n) {
            (Num::Int(a), Num::Int(b)) => match exact(a, b) {
                Some(r) => Num::Int(r),
                None => {
                    return arithmetic_error(m, &format!("{}: integer overflow", name), operands)
                }
            },
            (a, b) => Num::Real(inexact(a.real(), b.real())),
        };
    }
    Ok(acc)
}

fn add(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let r = fold(m, "+", Num::Int(0), &a, i64::checked_add, |x, y| x + y)?;
    Ok(Outcome::value(r.value()))
}

fn mul(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let r = fold(m, "*", Num::Int(1), &a, i64::checked_mul, |x, y| x * y)?;
    Ok(Outcome::value(r.value()))
}

/// `(- x)` negates.
fn sub(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let r = if a.len() == 1 {
        fold(m, "-", Num::Int(0), &a, i64::checked_sub, |x, y| x - y)?
    } else {
        let first = num(m, a[0])?;
        fold(m, "-", first, &a[1..], i64::checked_sub, |x, y| x - y)?
    };
    Ok(Outcome::value(r.value()))
}

/// Exact when the integers divide evenly, real otherwise. `(/ x)` is the
/// reciprocal.
fn div(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let (mut acc, rest) = if a.len() == 1 {
        (Num::Int(1), &a[..])
    } else {
        (num(m, a[0])?, &a[1..])
    };
    for &v in rest {
        let n = num(m, v)?;
        if n.real() == 0.0 {
            return arithmetic_error(m, "/: division by zero", &a);
        }
        acc = match (acc, n) {
            (Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => match x.checked_div(y) {
                Some(q) => Num::Int(q),
                None => return arithmetic_error(m, "/: integer overflow", &a),
            },
            (x, y) => Num::Real(x.real() / y.real()),
        };
    }
    Ok(Outcome::value(acc.value()))
}

fn compare(m: &mut Machine, args: Value, test: fn(Num, Num) -> bool) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mut nums = Vec::with_capacity(a.len());
    for v in a {
        nums.push(num(m, v)?);
    }
    let holds = nums.windows(2).all(|w| test(w[0], w[1]));
    Ok(Outcome::value(Value::Bool(holds)))
}

fn cmp(a: Num, b: Num) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
        (x, y) => x.real().partial_cmp(&y.real()),
    }
}

fn num_eq(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    compare(m, args, |a, b| cmp(a, b) == Some(std::cmp::Ordering::Equal))
}

fn lt(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    compare(m, args, |a, b| cmp(a, b) == Some(std::cmp::Ordering::Less))
}

fn gt(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    compare(m, args, |a, b| cmp(a, b) == Some(std::cmp::Ordering::Greater))
}

fn le(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    compare(m, args, |a, b| {
        matches!(cmp(a, b), Some(std::cmp::Ordering::Less | std::cmp::Ordering::Equal))
    })
}

fn ge(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    compare(m, args, |a, b| {
        matches!(cmp(a, b), Some(std::cmp::Ordering::Greater | std::cmp::Ordering::Equal))
    })
}

/// Shared by the three integer divisions: checks types and the zero
/// divisor.
fn int_operands(m: &mut Machine, args: Value, name: &str) -> EvalResult<(i64, i64)> {
    let a = argv(m, args);
    let x = int(m, a[0])?;
    let y = int(m, a[1])?;
    if y == 0 {
        return arithmetic_error(m, &format!("{}: division by zero", name), &a);
    }
    Ok((x, y))
}

fn quotient(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (x, y) = int_operands(m, args, "quotient")?;
    match x.checked_div(y) {
        Some(q) => Ok(Outcome::value(Value::Int(q))),
        None => arithmetic_error(m, "quotient: integer overflow", &[Value::Int(x), Value::Int(y)]),
    }
}

/// Sign follows the dividend.
fn remainder(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (x, y) = int_operands(m, args, "remainder")?;
    Ok(Outcome::value(Value::Int(x.checked_rem(y).unwrap_or(0))))
}

/// Sign follows the divisor.
fn modulo(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let (x, y) = int_operands(m, args, "modulo")?;
    let r = x.checked_rem(y).unwrap_or(0);
    let r = if r != 0 && (r < 0) != (y < 0) { r + y } else { r };
    Ok(Outcome::value(Value::Int(r)))
}

fn abs(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    match num(m, a[0])? {
        Num::Int(n) => match n.checked_abs() {
            Some(r) => Ok(Outcome::value(Value::Int(r))),
            None => arithmetic_error(m, "abs: integer overflow", &a),
        },
        Num::Real(x) => Ok(Outcome::value(Value::Real(x.abs()))),
    }
}

fn number_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(a[0].is_number())))
}

fn integer_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let is_int = match a[0] {
        Value::Int(_) => true,
        Value::Real(x) => x.fract() == 0.0 && x.is_finite(),
        _ => false,
    };
    Ok(Outcome::value(Value::Bool(is_int)))
}

fn zero_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(num(m, a[0])?.real() == 0.0)))
}

/// `(random n)`: an integer in `[0, n)`, or a real in `[0, n)` for a real
/// bound.
fn random(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    let mut rng = rand::thread_rng();
    match num(m, a[0])? {
        Num::Int(n) if n > 0 => Ok(Outcome::value(Value::Int(rng.gen_range(0..n)))),
        Num::Real(x) if x > 0.0 => Ok(Outcome::value(Value::Real(rng.gen::<f64>() * x))),
        _ => m.error("random: bound must be positive", &[a[0]]),
    }
}
