//! Lexical environment frames.
//!
//! A frame is a heap object, so a closure keeps its whole parent chain alive
//! just by holding the `ObjId` of the frame it was created in. Mutating a
//! binding mutates the one shared frame, which every closure over that frame
//! observes.

use std::collections::HashMap;

use crate::error::EvalResult;
use crate::heap::Heap;
use crate::object::Object;
use crate::value::{ObjId, SymbolId, Value};

/// Frames with more bindings than this switch to a hash map.
const SMALL_FRAME_LIMIT: usize = 16;

#[derive(Debug, Clone)]
enum Bindings {
    Small(Vec<(SymbolId, Value)>),
    Large(HashMap<SymbolId, Value>),
}

#[derive(Debug, Clone)]
pub struct Frame {
    bindings: Bindings,
    pub parent: Option<ObjId>,
}

impl Frame {
    pub fn new(parent: Option<ObjId>) -> Self {
        Frame {
            bindings: Bindings::Small(Vec::new()),
            parent,
        }
    }

    /// A frame that starts out hashed. Used for the global environment.
    pub fn with_capacity(parent: Option<ObjId>, capacity: usize) -> Self {
        let bindings = if capacity > SMALL_FRAME_LIMIT {
            Bindings::Large(HashMap::with_capacity(capacity))
        } else {
            Bindings::Small(Vec::with_capacity(capacity))
        };
        Frame { bindings, parent }
    }

    pub fn get(&self, name: SymbolId) -> Option<Value> {
        match &self.bindings {
            Bindings::Small(v) => v.iter().find(|(k, _)| *k == name).map(|(_, val)| *val),
            Bindings::Large(m) => m.get(&name).copied(),
        }
    }

    pub fn contains(&self, name: SymbolId) -> bool {
        self.get(name).is_some()
    }

    /// Insert or overwrite.
    pub fn insert(&mut self, name: SymbolId, value: Value) {
        match &mut self.bindings {
            Bindings::Small(v) => {
                if let Some(slot) = v.iter_mut().find(|(k, _)| *k == name) {
                    slot.1 = value;
                    return;
                }
                v.push((name, value));
                if v.len() > SMALL_FRAME_LIMIT {
                    let map = v.drain(..).collect();
                    self.bindings = Bindings::Large(map);
                }
            }
            Bindings::Large(m) => {
                m.insert(name, value);
            }
        }
    }

    /// Overwrite an existing binding. Returns false if absent.
    pub fn update(&mut self, name: SymbolId, value: Value) -> bool {
        match &mut self.bindings {
            Bindings::Small(v) => match v.iter_mut().find(|(k, _)| *k == name) {
                Some(slot) => {
                    slot.1 = value;
                    true
                }
                None => false,
            },
            Bindings::Large(m) => match m.get_mut(&name) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
        }
    }

    pub fn remove(&mut self, name: SymbolId) -> bool {
        match &mut self.bindings {
            Bindings::Small(v) => match v.iter().position(|(k, _)| *k == name) {
                Some(i) => {
                    v.remove(i);
                    true
                }
                None => false,
            },
            Bindings::Large(m) => m.remove(&name).is_some(),
        }
    }

    pub fn len(&self) -> usize {
        match &self.bindings {
            Bindings::Small(v) => v.len(),
            Bindings::Large(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bindings in this frame only. Small frames keep definition order.
    pub fn entries(&self) -> Vec<(SymbolId, Value)> {
        match &self.bindings {
            Bindings::Small(v) => v.clone(),
            Bindings::Large(m) => m.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }

    pub fn trace(&self, out: &mut Vec<Value>) {
        match &self.bindings {
            Bindings::Small(v) => {
                for (name, val) in v {
                    out.push(Value::Symbol(*name));
                    out.push(*val);
                }
            }
            Bindings::Large(m) => {
                for (name, val) in m {
                    out.push(Value::Symbol(*name));
                    out.push(*val);
                }
            }
        }
        if let Some(parent) = self.parent {
            out.push(Value::Env(parent));
        }
    }
}

/// Allocate an empty frame chained onto `parent`.
pub fn new_frame(heap: &mut Heap, parent: Option<ObjId>) -> EvalResult<ObjId> {
    heap.alloc_obj(Object::Frame(Frame::new(parent)))
}

/// A new frame under `parent` holding the same bindings as `frame`. Later
/// changes to either frame are not seen by the other.
pub fn copy_frame(heap: &mut Heap, frame: ObjId, parent: Option<ObjId>) -> EvalResult<ObjId> {
    let bindings = heap.frame(frame)?.bindings.clone();
    heap.alloc_obj(Object::Frame(Frame { bindings, parent }))
}

/// Bind `name` in `frame` itself, never in an ancestor. Returns the value.
pub fn define(heap: &mut Heap, frame: ObjId, name: SymbolId, value: Value) -> EvalResult<Value> {
    heap.frame_mut(frame)?.insert(name, value);
    Ok(value)
}

/// Walk the chain and return the nearest binding.
pub fn lookup(heap: &Heap, frame: ObjId, name: SymbolId) -> EvalResult<Option<Value>> {
    Ok(owner(heap, frame, name)?.map(|(_, val)| val))
}

/// Mutate the nearest existing binding in place. Returns false when no
/// frame in the chain binds `name`.
pub fn set(heap: &mut Heap, frame: ObjId, name: SymbolId, value: Value) -> EvalResult<bool> {
    match owner(heap, frame, name)? {
        Some((id, _)) => Ok(heap.frame_mut(id)?.update(name, value)),
        None => Ok(false),
    }
}

/// Remove the nearest binding. Unbinding an absent name is a no-op that
/// returns false.
pub fn unset(heap: &mut Heap, frame: ObjId, name: SymbolId) -> EvalResult<bool> {
    match owner(heap, frame, name)? {
        Some((id, _)) => Ok(heap.frame_mut(id)?.remove(name)),
        None => Ok(false),
    }
}

/// Names bound directly in `frame`.
pub fn variables(heap: &Heap, frame: ObjId) -> EvalResult<Vec<SymbolId>> {
    Ok(heap
        .frame(frame)?
        .entries()
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

pub fn parent(heap: &Heap, frame: ObjId) -> EvalResult<Option<ObjId>> {
    Ok(heap.frame(frame)?.parent)
}

fn owner(heap: &Heap, frame: ObjId, name: SymbolId) -> EvalResult<Option<(ObjId, Value)>> {
    let mut current = Some(frame);
    while let Some(id) = current {
        let f = heap.frame(id)?;
        if let Some(val) = f.get(name) {
            return Ok(Some((id, val)));
        }
        current = f.parent;
    }
    Ok(None)
}
