use crate::condition;
use crate::eval::Machine;
use crate::object::Object;
use crate::symbol::sym;
use crate::value::Value;

/// Nesting beyond this prints as "...".
const MAX_DEPTH: usize = 200;
/// List and vector elements beyond this print as "...".
const MAX_ITEMS: usize = 10_000;

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Write,
    Display,
}

/// Machine-readable rendering: strings are quoted.
pub fn write(m: &Machine, val: Value) -> String {
    let mut out = String::new();
    print_inner(m, val, Mode::Write, &mut out, 0);
    out
}

/// Human-readable rendering: strings print raw.
pub fn display(m: &Machine, val: Value) -> String {
    let mut out = String::new();
    print_inner(m, val, Mode::Display, &mut out, 0);
    out
}

fn print_inner(m: &Machine, val: Value, mode: Mode, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }

    match val {
        Value::Nil => out.push_str("()"),
        Value::Bool(true) => out.push_str("#t"),
        Value::Bool(false) => out.push_str("#f"),
        Value::Int(n) => out.push_str(&n.to_string()),
        Value::Real(x) => out.push_str(&format!("{:?}", x)),
        Value::Symbol(id) => out.push_str(&m.symbols.qualified_name(id)),
        Value::Str(id) => match m.heap.obj(id) {
            Object::Str(s) if mode == Mode::Display => out.push_str(s),
            Object::Str(s) => print_string(s, out),
            _ => out.push_str("#<string>"),
        },
        Value::Pair(id) => {
            let car = m.heap.car(id);
            let cdr = m.heap.cdr(id);
            if car == Value::Symbol(sym::QUOTE) {
                if let Value::Pair(cdr_id) = cdr {
                    if m.heap.cdr(cdr_id).is_nil() {
                        out.push('\'');
                        print_inner(m, m.heap.car(cdr_id), mode, out, depth + 1);
                        return;
                    }
                }
            }

            out.push('(');
            print_inner(m, car, mode, out, depth + 1);
            let mut current = cdr;
            let mut count = 1;
            loop {
                match current {
                    Value::Nil => break,
                    Value::Pair(pid) => {
                        if count >= MAX_ITEMS {
                            out.push_str(" ...");
                            break;
                        }
                        out.push(' ');
                        print_inner(m, m.heap.car(pid), mode, out, depth + 1);
                        current = m.heap.cdr(pid);
                        count += 1;
                    }
                    tail => {
                        out.push_str(" . ");
                        print_inner(m, tail, mode, out, depth + 1);
                        break;
                    }
                }
            }
            out.push(')');
        }
        Value::Vector(id) => {
            out.push_str("#(");
            if let Object::Vector(items) = m.heap.obj(id) {
                for (i, item) in items.iter().take(MAX_ITEMS).enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    print_inner(m, *item, mode, out, depth + 1);
                }
                if items.len() > MAX_ITEMS {
                    out.push_str(" ...");
                }
            }
            out.push(')');
        }
        Value::Primitive(id) => {
            out.push_str(&format!("#<primitive {}>", m.primitive(id).name));
        }
        Value::Closure(id) => match m.heap.obj(id) {
            Object::Closure(clo) => match clo.name {
                Some(name) => {
                    out.push_str(&format!("#<closure {}>", m.symbols.qualified_name(name)))
                }
                None => out.push_str("#<closure>"),
            },
            _ => out.push_str("#<closure>"),
        },
        Value::Macro(id) | Value::Form(id) => {
            let kind = if matches!(val, Value::Macro(_)) { "macro" } else { "form" };
            out.push_str("#<");
            out.push_str(kind);
            if let Object::Wrapped(proc) = m.heap.obj(id) {
                out.push(' ');
                print_inner(m, *proc, mode, out, depth + 1);
            }
            out.push('>');
        }
        Value::Condition(id) => print_condition(m, id, mode, out, depth),
        Value::Restart(id) => match m.heap.obj(id) {
            Object::Restart(r) => {
                out.push_str("#<restart ");
                print_inner(m, r.name, mode, out, depth + 1);
                if !r.description.is_empty() {
                    out.push(' ');
                    print_string(&r.description, out);
                }
                out.push('>');
            }
            _ => out.push_str("#<restart>"),
        },
        Value::Env(id) => match m.heap.obj(id) {
            Object::Frame(f) => out.push_str(&format!("#<environment {} bindings>", f.len())),
            _ => out.push_str("#<environment>"),
        },
        Value::Table(id) => match m.heap.obj(id) {
            Object::Table(t) => out.push_str(&format!("#<hash-table {:?} {}>", t.mode, t.len())),
            _ => out.push_str("#<hash-table>"),
        },
        Value::Escape(_) => out.push_str("#<escape-continuation>"),
        Value::Type(id) => {
            out.push_str(&format!("#<condition-type {}>", m.types.name(id)));
        }
    }
}

/// `#<condition type name: value ...>`. The stack trace is left out; reports
/// print it separately.
fn print_condition(
    m: &Machine,
    id: crate::value::ObjId,
    mode: Mode,
    out: &mut String,
    depth: usize,
) {
    let cond = match m.heap.condition(id) {
        Ok(cond) => cond,
        Err(_) => {
            out.push_str("#<condition>");
            return;
        }
    };
    out.push_str("#<condition ");
    out.push_str(m.types.name(cond.ctype));
    if let Ok(fields) = condition::fields(&m.heap, id) {
        for (name, value) in fields {
            if name == sym::STACK_TRACE {
                continue;
            }
            out.push(' ');
            out.push_str(&m.symbols.qualified_name(name));
            out.push_str(": ");
            print_inner(m, value, mode, out, depth + 1);
        }
    }
    out.push('>');
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}
