//! Condition types, condition and restart records, and the handler list.

use std::sync::Arc;

use crate::error::EvalResult;
use crate::heap::Heap;
use crate::value::{ObjId, SymbolId, TypeId, Value};

/// Built-in condition types, registered in this order by `TypeRegistry::new`.
pub mod types {
    use crate::value::TypeId;

    pub const CONDITION: TypeId = TypeId(0);
    pub const WARNING: TypeId = TypeId(1);
    pub const ERROR: TypeId = TypeId(2);
    pub const RUNTIME_ERROR: TypeId = TypeId(3);
    pub const UNBOUND_VARIABLE: TypeId = TypeId(4);
    pub const WRONG_ARGUMENT_COUNT: TypeId = TypeId(5);
    pub const TYPE_MISMATCH: TypeId = TypeId(6);
    pub const NOT_APPLICABLE: TypeId = TypeId(7);
    pub const MALFORMED_EXPRESSION: TypeId = TypeId(8);
    pub const RECURSION_TOO_DEEP: TypeId = TypeId(9);
    pub const ARITHMETIC_ERROR: TypeId = TypeId(10);
    pub const ESCAPE_EXPIRED: TypeId = TypeId(11);
    pub const EXCEPTION: TypeId = TypeId(12);
}

#[derive(Debug, Clone)]
pub struct ConditionType {
    pub name: String,
    pub parent: Option<TypeId>,
}

/// The condition hierarchy. Types are never removed, so a `TypeId` stays
/// valid for the life of the machine.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<ConditionType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    pub fn new() -> Self {
        let mut reg = TypeRegistry { types: Vec::new() };
        reg.define("condition", None);
        reg.define("warning", Some(types::CONDITION));
        reg.define("error", Some(types::CONDITION));
        reg.define("runtime-error", Some(types::ERROR));
        for name in [
            "unbound-variable",
            "wrong-argument-count",
            "type-mismatch",
            "not-applicable",
            "malformed-expression",
            "recursion-too-deep",
            "arithmetic-error",
            "escape-expired",
        ] {
            reg.define(name, Some(types::RUNTIME_ERROR));
        }
        reg.define("exception", Some(types::ERROR));
        reg
    }

    pub fn define(&mut self, name: &str, parent: Option<TypeId>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(ConditionType {
            name: name.to_string(),
            parent,
        });
        id
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.types[id.0 as usize].name
    }

    pub fn parent(&self, id: TypeId) -> Option<TypeId> {
        self.types[id.0 as usize].parent
    }

    /// Reflexive: every type is a subtype of itself.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        let mut current = Some(sub);
        while let Some(t) = current {
            if t == sup {
                return true;
            }
            current = self.parent(t);
        }
        false
    }

    pub fn is_error(&self, id: TypeId) -> bool {
        self.is_subtype(id, types::ERROR)
    }

    pub fn by_name(&self, name: &str) -> Option<TypeId> {
        self.types
            .iter()
            .rposition(|t| t.name == name)
            .map(|i| TypeId(i as u32))
    }
}

/// A condition instance. `fields` is a list of `(name value)` lists; the
/// most recent `put` for a name shadows older ones.
#[derive(Debug, Clone)]
pub struct Condition {
    pub ctype: TypeId,
    pub fields: Value,
}

/// A named recovery action. Invoking it is an ordinary call of `proc`.
#[derive(Debug, Clone)]
pub struct Restart {
    pub name: Value,
    pub proc: Value,
    pub description: String,
}

pub fn field(heap: &Heap, cond: ObjId, name: SymbolId) -> EvalResult<Option<Value>> {
    let mut current = heap.condition(cond)?.fields;
    while let Value::Pair(id) = current {
        if let Value::Pair(entry) = heap.car(id) {
            if heap.car(entry) == Value::Symbol(name) {
                return Ok(Some(heap.car_val(heap.cdr(entry)).unwrap_or(Value::Nil)));
            }
        }
        current = heap.cdr(id);
    }
    Ok(None)
}

pub fn put_field(heap: &mut Heap, cond: ObjId, name: SymbolId, value: Value) -> EvalResult<()> {
    let old = heap.condition(cond)?.fields;
    let entry = heap.list(&[Value::Symbol(name), value])?;
    let fields = heap.cons(entry, old)?;
    heap.condition_mut(cond)?.fields = fields;
    Ok(())
}

/// Fields as `(name . value)` pairs, newest first, shadowed entries dropped.
pub fn fields(heap: &Heap, cond: ObjId) -> EvalResult<Vec<(SymbolId, Value)>> {
    let mut out: Vec<(SymbolId, Value)> = Vec::new();
    let mut current = heap.condition(cond)?.fields;
    while let Value::Pair(id) = current {
        if let Value::Pair(entry) = heap.car(id) {
            if let Value::Symbol(name) = heap.car(entry) {
                if !out.iter().any(|(n, _)| *n == name) {
                    let value = heap.car_val(heap.cdr(entry)).unwrap_or(Value::Nil);
                    out.push((name, value));
                }
            }
        }
        current = heap.cdr(id);
    }
    Ok(out)
}

/// One installed handler. `next` is the list that was active when this
/// handler was installed, which is also what the handler itself runs under.
#[derive(Debug)]
pub struct HandlerNode {
    pub ctype: TypeId,
    pub handler: Value,
    pub next: HandlerList,
}

/// Persistent singly-linked handler list. Installing a handler never
/// mutates an existing list, so restoring a saved head is all that is
/// needed to leave a dynamic extent.
pub type HandlerList = Option<Arc<HandlerNode>>;

pub fn push_handler(list: &HandlerList, ctype: TypeId, handler: Value) -> HandlerList {
    Some(Arc::new(HandlerNode {
        ctype,
        handler,
        next: list.clone(),
    }))
}

/// Every handler procedure in the list, innermost first.
pub fn handler_values(list: &HandlerList) -> Vec<Value> {
    let mut out = Vec::new();
    let mut current = list.as_ref();
    while let Some(node) = current {
        out.push(node.handler);
        current = node.next.as_ref();
    }
    out
}
