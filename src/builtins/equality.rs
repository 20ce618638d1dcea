use super::argv;
use crate::equal::{eq, equal, eqv};
use crate::error::EvalResult;
use crate::eval::{Arity, Machine, Outcome, TailEscape};
use crate::value::Value;

pub fn install(m: &mut Machine) -> EvalResult<()> {
    m.define_primitive("eq?", Arity::Exact(2), eq_p)?;
    m.define_primitive("eqv?", Arity::Exact(2), eqv_p)?;
    m.define_primitive("equal?", Arity::Exact(2), equal_p)?;
    m.define_primitive("not", Arity::Exact(1), not)?;
    m.define_primitive("boolean?", Arity::Exact(1), boolean_p)?;
    Ok(())
}

fn eq_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(eq(a[0], a[1]))))
}

fn eqv_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(eqv(a[0], a[1]))))
}

fn equal_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(equal(&m.heap, a[0], a[1]))))
}

fn not(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(!a[0].is_true())))
}

fn boolean_p(m: &mut Machine, args: Value, _esc: TailEscape) -> EvalResult<Outcome> {
    let a = argv(m, args);
    Ok(Outcome::value(Value::Bool(matches!(a[0], Value::Bool(_)))))
}
