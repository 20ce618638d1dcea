use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::heap::Heap;
use crate::object::Object;
use crate::value::Value;

/// Structural hashing looks no deeper than this. Equal values still hash
/// alike because both are cut at the same place.
const HASH_DEPTH: usize = 64;

/// Which equality a comparison or a mapping uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    Eq,
    Eqv,
    Equal,
}

impl Equality {
    pub fn test(self, heap: &Heap, a: Value, b: Value) -> bool {
        match self {
            Equality::Eq => eq(a, b),
            Equality::Eqv => eqv(a, b),
            Equality::Equal => equal(heap, a, b),
        }
    }

    pub fn hash(self, heap: &Heap, v: Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        match self {
            Equality::Eq | Equality::Eqv => hash_identity(v, &mut hasher),
            Equality::Equal => hash_structure(heap, v, &mut hasher, 0),
        }
        hasher.finish()
    }
}

/// Identity. Immediate values compare by content since they have no other
/// identity.
pub fn eq(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Real(x), Value::Real(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

/// Identity, plus numbers of the same exactness compare by value.
pub fn eqv(a: Value, b: Value) -> bool {
    match (a, b) {
        (Value::Real(x), Value::Real(y)) => x == y || x.to_bits() == y.to_bits(),
        _ => eq(a, b),
    }
}

/// Structural equality over pairs, strings and vectors. List spines are
/// walked in a loop and nested cars go on an explicit work list, so neither
/// length nor nesting depth touches the native stack. Circular structure
/// does not terminate.
pub fn equal(heap: &Heap, a: Value, b: Value) -> bool {
    let mut pending = vec![(a, b)];
    while let Some((mut x, mut y)) = pending.pop() {
        loop {
            if eqv(x, y) {
                break;
            }
            match (x, y) {
                (Value::Pair(p), Value::Pair(q)) => {
                    let (cx, cy) = (heap.car(p), heap.car(q));
                    if !eqv(cx, cy) {
                        pending.push((cx, cy));
                    }
                    x = heap.cdr(p);
                    y = heap.cdr(q);
                }
                (Value::Str(p), Value::Str(q)) => match (heap.obj(p), heap.obj(q)) {
                    (Object::Str(s), Object::Str(t)) if s == t => break,
                    _ => return false,
                },
                (Value::Vector(p), Value::Vector(q)) => match (heap.obj(p), heap.obj(q)) {
                    (Object::Vector(v), Object::Vector(w)) if v.len() == w.len() => {
                        pending.extend(v.iter().copied().zip(w.iter().copied()));
                        break;
                    }
                    _ => return false,
                },
                _ => return false,
            }
        }
    }
    true
}

fn hash_identity(v: Value, h: &mut DefaultHasher) {
    std::mem::discriminant(&v).hash(h);
    match v {
        Value::Nil => {}
        Value::Bool(b) => b.hash(h),
        Value::Int(n) => n.hash(h),
        // 0.0 and -0.0 are eqv
        Value::Real(x) => (if x == 0.0 { 0u64 } else { x.to_bits() }).hash(h),
        Value::Symbol(id) => id.hash(h),
        Value::Pair(id) => id.hash(h),
        Value::Primitive(id) => id.hash(h),
        Value::Type(id) => id.hash(h),
        other => {
            if let Some(id) = other.object() {
                id.hash(h);
            }
        }
    }
}

fn hash_structure(heap: &Heap, v: Value, h: &mut DefaultHasher, depth: usize) {
    if depth > HASH_DEPTH {
        return;
    }
    match v {
        Value::Pair(id) => {
            0u8.hash(h);
            hash_structure(heap, heap.car(id), h, depth + 1);
            hash_structure(heap, heap.cdr(id), h, depth + 1);
        }
        Value::Str(id) => match heap.obj(id) {
            Object::Str(s) => {
                1u8.hash(h);
                s.hash(h);
            }
            _ => hash_identity(v, h),
        },
        Value::Vector(id) => match heap.obj(id) {
            Object::Vector(items) => {
                2u8.hash(h);
                items.len().hash(h);
                for item in items {
                    hash_structure(heap, *item, h, depth + 1);
                }
            }
            _ => hash_identity(v, h),
        },
        _ => hash_identity(v, h),
    }
}
