use crate::condition::{Condition, Restart};
use crate::env::Frame;
use crate::table::Table;
use crate::value::{ObjId, SymbolId, Value};

/// A lambda closed over the frame it was created in.
#[derive(Debug, Clone)]
pub struct Closure {
    /// Parameter list: a symbol, a proper list of symbols, or a dotted list.
    pub params: Value,
    /// Body expressions as a proper list.
    pub body: Value,
    pub env: ObjId,
    pub name: Option<SymbolId>,
}

/// One-shot upward escape created by `call/ec`.
#[derive(Debug, Clone, Copy)]
pub struct Escape {
    pub id: u64,
    /// Cleared when the creating `call/ec` returns by any means.
    pub live: bool,
}

/// Everything that does not fit into a `Value` word.
#[derive(Debug)]
pub enum Object {
    /// A swept slot waiting on the free list.
    Free,
    Str(String),
    Vector(Vec<Value>),
    Closure(Closure),
    /// The procedure behind a `Macro` or `Form` value.
    Wrapped(Value),
    Condition(Condition),
    Restart(Restart),
    Frame(Frame),
    Table(Table),
    Escape(Escape),
}

impl Object {
    /// Push every value this object refers to. Used by the mark phase.
    pub fn trace(&self, out: &mut Vec<Value>) {
        match self {
            Object::Free | Object::Str(_) | Object::Escape(_) => {}
            Object::Vector(items) => out.extend(items.iter().copied()),
            Object::Closure(clo) => {
                out.push(clo.params);
                out.push(clo.body);
                out.push(Value::Env(clo.env));
                if let Some(name) = clo.name {
                    out.push(Value::Symbol(name));
                }
            }
            Object::Wrapped(proc) => out.push(*proc),
            Object::Condition(cond) => out.push(cond.fields),
            Object::Restart(restart) => {
                out.push(restart.name);
                out.push(restart.proc);
            }
            Object::Frame(frame) => frame.trace(out),
            Object::Table(table) => table.trace(out),
        }
    }
}
