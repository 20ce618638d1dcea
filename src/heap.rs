use std::collections::HashSet;

use crate::condition::{Condition, Restart};
use crate::env::Frame;
use crate::error::{EvalError, EvalResult};
use crate::object::{Closure, Object};
use crate::table::Table;
use crate::value::{ObjId, PairId, SymbolId, Value};

/// A single cons cell on the heap.
pub struct ConsCell {
    pub car: Value,
    pub cdr: Value,
    pub mark: bool,
}

struct ObjSlot {
    obj: Object,
    mark: bool,
}

/// The heap. Pairs live in `cells`, everything else in `objects`.
/// `PairId` and `ObjId` are plain indices, so reference cycles (a `letrec`
/// closure captured by its own frame) cost nothing special: the collector
/// traces from the roots and sweeps whatever it did not reach.
pub struct Heap {
    cells: Vec<ConsCell>,
    free_list: Vec<PairId>,
    objects: Vec<ObjSlot>,
    free_objects: Vec<ObjId>,
    capacity: usize,
    /// Number of allocations since last GC (for triggering).
    allocs_since_gc: usize,
    /// GC threshold: trigger GC when allocs_since_gc reaches this.
    gc_threshold: usize,
    /// Symbols met while marking in the last collection.
    reached_symbols: HashSet<SymbolId>,
}

impl Heap {
    pub fn new(capacity: usize, gc_threshold: usize) -> Self {
        Heap {
            cells: Vec::with_capacity(1024),
            free_list: Vec::new(),
            objects: Vec::with_capacity(256),
            free_objects: Vec::new(),
            capacity,
            allocs_since_gc: 0,
            gc_threshold: gc_threshold.max(1024),
            reached_symbols: HashSet::new(),
        }
    }

    /// Allocate a new cons cell.
    /// Returns Err(HeapOverflow) if capacity is exceeded.
    pub fn alloc(&mut self, car: Value, cdr: Value) -> EvalResult<PairId> {
        self.allocs_since_gc += 1;

        if let Some(id) = self.free_list.pop() {
            let cell = &mut self.cells[id.0 as usize];
            cell.car = car;
            cell.cdr = cdr;
            cell.mark = false;
            return Ok(id);
        }

        if self.cells.len() + self.objects.len() >= self.capacity {
            return Err(EvalError::HeapOverflow);
        }

        let id = PairId(self.cells.len() as u32);
        self.cells.push(ConsCell {
            car,
            cdr,
            mark: false,
        });
        Ok(id)
    }

    /// Allocate a cons and wrap it as a value.
    pub fn cons(&mut self, car: Value, cdr: Value) -> EvalResult<Value> {
        Ok(Value::Pair(self.alloc(car, cdr)?))
    }

    /// Allocate a heap object.
    pub fn alloc_obj(&mut self, obj: Object) -> EvalResult<ObjId> {
        self.allocs_since_gc += 1;

        if let Some(id) = self.free_objects.pop() {
            let slot = &mut self.objects[id.0 as usize];
            slot.obj = obj;
            slot.mark = false;
            return Ok(id);
        }

        if self.cells.len() + self.objects.len() >= self.capacity {
            return Err(EvalError::HeapOverflow);
        }

        let id = ObjId(self.objects.len() as u32);
        self.objects.push(ObjSlot { obj, mark: false });
        Ok(id)
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> EvalResult<Value> {
        Ok(Value::Str(self.alloc_obj(Object::Str(s.into()))?))
    }

    pub fn alloc_vector(&mut self, items: Vec<Value>) -> EvalResult<Value> {
        Ok(Value::Vector(self.alloc_obj(Object::Vector(items))?))
    }

    /// A vector of `len` copies of `fill`. Lengths beyond the heap's
    /// capacity, or ones the allocator refuses, are a heap overflow.
    pub fn alloc_filled_vector(&mut self, len: usize, fill: Value) -> EvalResult<Value> {
        if len > self.capacity {
            return Err(EvalError::HeapOverflow);
        }
        let mut items = Vec::new();
        items
            .try_reserve_exact(len)
            .map_err(|_| EvalError::HeapOverflow)?;
        items.resize(len, fill);
        self.alloc_vector(items)
    }

    /// Get the car of a pair.
    #[inline]
    pub fn car(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].car
    }

    /// Get the cdr of a pair.
    #[inline]
    pub fn cdr(&self, id: PairId) -> Value {
        self.cells[id.0 as usize].cdr
    }

    #[inline]
    pub fn set_car(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].car = val;
    }

    #[inline]
    pub fn set_cdr(&mut self, id: PairId, val: Value) {
        self.cells[id.0 as usize].cdr = val;
    }

    /// car of a pair, or nil of nil. Any other atom yields `None`.
    pub fn car_val(&self, val: Value) -> Option<Value> {
        match val {
            Value::Nil => Some(Value::Nil),
            Value::Pair(id) => Some(self.car(id)),
            _ => None,
        }
    }

    /// cdr of a pair, or nil of nil. Any other atom yields `None`.
    pub fn cdr_val(&self, val: Value) -> Option<Value> {
        match val {
            Value::Nil => Some(Value::Nil),
            Value::Pair(id) => Some(self.cdr(id)),
            _ => None,
        }
    }

    #[inline]
    pub fn obj(&self, id: ObjId) -> &Object {
        &self.objects[id.0 as usize].obj
    }

    #[inline]
    pub fn obj_mut(&mut self, id: ObjId) -> &mut Object {
        &mut self.objects[id.0 as usize].obj
    }

    pub fn string(&self, id: ObjId) -> EvalResult<&str> {
        match self.obj(id) {
            Object::Str(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn vector(&self, id: ObjId) -> EvalResult<&Vec<Value>> {
        match self.obj(id) {
            Object::Vector(v) => Ok(v),
            other => Err(mismatch("vector", other)),
        }
    }

    pub fn vector_mut(&mut self, id: ObjId) -> EvalResult<&mut Vec<Value>> {
        match self.obj_mut(id) {
            Object::Vector(v) => Ok(v),
            other => Err(mismatch("vector", other)),
        }
    }

    pub fn closure(&self, id: ObjId) -> EvalResult<&Closure> {
        match self.obj(id) {
            Object::Closure(c) => Ok(c),
            other => Err(mismatch("closure", other)),
        }
    }

    pub fn wrapped(&self, id: ObjId) -> EvalResult<Value> {
        match self.obj(id) {
            Object::Wrapped(proc) => Ok(*proc),
            other => Err(mismatch("wrapped procedure", other)),
        }
    }

    pub fn frame(&self, id: ObjId) -> EvalResult<&Frame> {
        match self.obj(id) {
            Object::Frame(f) => Ok(f),
            other => Err(mismatch("frame", other)),
        }
    }

    pub fn frame_mut(&mut self, id: ObjId) -> EvalResult<&mut Frame> {
        match self.obj_mut(id) {
            Object::Frame(f) => Ok(f),
            other => Err(mismatch("frame", other)),
        }
    }

    pub fn condition(&self, id: ObjId) -> EvalResult<&Condition> {
        match self.obj(id) {
            Object::Condition(c) => Ok(c),
            other => Err(mismatch("condition", other)),
        }
    }

    pub fn condition_mut(&mut self, id: ObjId) -> EvalResult<&mut Condition> {
        match self.obj_mut(id) {
            Object::Condition(c) => Ok(c),
            other => Err(mismatch("condition", other)),
        }
    }

    pub fn restart(&self, id: ObjId) -> EvalResult<&Restart> {
        match self.obj(id) {
            Object::Restart(r) => Ok(r),
            other => Err(mismatch("restart", other)),
        }
    }

    pub fn table(&self, id: ObjId) -> EvalResult<&Table> {
        match self.obj(id) {
            Object::Table(t) => Ok(t),
            other => Err(mismatch("hash table", other)),
        }
    }

    pub fn table_mut(&mut self, id: ObjId) -> EvalResult<&mut Table> {
        match self.obj_mut(id) {
            Object::Table(t) => Ok(t),
            other => Err(mismatch("hash table", other)),
        }
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[Value]) -> EvalResult<Value> {
        self.list_with_tail(values, Value::Nil)
    }

    /// Build `(v0 v1 ... . tail)`.
    pub fn list_with_tail(&mut self, values: &[Value], tail: Value) -> EvalResult<Value> {
        let mut result = tail;
        for &val in values.iter().rev() {
            let pair = self.alloc(val, result)?;
            result = Value::Pair(pair);
        }
        Ok(result)
    }

    /// Returns true if this value is a proper list.
    pub fn is_proper_list(&self, val: Value) -> bool {
        self.list_len(val).is_some()
    }

    /// Length of a proper list, `None` for improper or circular lists.
    pub fn list_len(&self, val: Value) -> Option<usize> {
        let mut slow = val;
        let mut fast = val;
        let mut len = 0usize;
        loop {
            match fast {
                Value::Nil => return Some(len),
                Value::Pair(id) => {
                    fast = self.cdr(id);
                    len += 1;
                }
                _ => return None,
            }
            match fast {
                Value::Nil => return Some(len),
                Value::Pair(id) => {
                    fast = self.cdr(id);
                    len += 1;
                }
                _ => return None,
            }
            if let Value::Pair(id) = slow {
                slow = self.cdr(id);
            }
            if slow == fast && fast.is_pair() {
                return None;
            }
        }
    }

    /// Collect a proper list into a Vec. Returns None if not a proper list.
    pub fn list_to_vec(&self, val: Value) -> Option<Vec<Value>> {
        let len = self.list_len(val)?;
        let mut result = Vec::with_capacity(len);
        let mut current = val;
        while let Value::Pair(id) = current {
            result.push(self.car(id));
            current = self.cdr(id);
        }
        Some(result)
    }

    /// Returns the number of allocated cells (including free-listed ones).
    pub fn total_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the number of live cells (accurate after GC).
    pub fn live_count(&self) -> usize {
        self.cells.len() - self.free_list.len()
    }

    /// Returns the number of live objects (accurate after GC).
    pub fn live_objects(&self) -> usize {
        self.objects.len() - self.free_objects.len()
    }

    /// Returns true if we should trigger a GC cycle.
    pub fn should_gc(&self) -> bool {
        self.allocs_since_gc >= self.gc_threshold
    }

    /// Adjust GC threshold based on occupancy.
    fn adjust_gc_threshold(&mut self) {
        let live = self.live_count() + self.live_objects();
        let total = self.cells.len() + self.objects.len();
        if total > 0 {
            let occupancy = live as f64 / total as f64;
            if occupancy > 0.75 {
                // High occupancy: double the threshold to avoid thrashing
                self.gc_threshold = (self.gc_threshold * 2).min(self.capacity);
            }
        }
    }

    // === GC methods ===

    /// Whether the last collection reached `id`.
    pub fn symbol_reached(&self, id: SymbolId) -> bool {
        self.reached_symbols.contains(&id)
    }

    /// Run a full mark-sweep cycle from the given roots.
    /// Returns (cells freed, objects freed).
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> (usize, usize) {
        self.clear_marks();
        self.reached_symbols.clear();
        let mut worklist: Vec<Value> = roots.into_iter().collect();
        self.process_worklist(&mut worklist);
        let freed = self.sweep();
        self.allocs_since_gc = 0;
        self.adjust_gc_threshold();
        freed
    }

    fn clear_marks(&mut self) {
        for cell in &mut self.cells {
            cell.mark = false;
        }
        for slot in &mut self.objects {
            slot.mark = false;
        }
    }

    /// Mark everything reachable from the worklist.
    fn process_worklist(&mut self, worklist: &mut Vec<Value>) {
        while let Some(val) = worklist.pop() {
            if let Value::Symbol(id) = val {
                self.reached_symbols.insert(id);
            } else if let Value::Pair(id) = val {
                let cell = &mut self.cells[id.0 as usize];
                if !cell.mark {
                    cell.mark = true;
                    worklist.push(cell.car);
                    worklist.push(cell.cdr);
                }
            } else if let Some(id) = val.object() {
                let slot = &mut self.objects[id.0 as usize];
                if !slot.mark {
                    slot.mark = true;
                    slot.obj.trace(worklist);
                }
            }
        }
    }

    /// Sweep: collect unmarked cells and objects to the free lists.
    fn sweep(&mut self) -> (usize, usize) {
        let before = (self.free_list.len(), self.free_objects.len());
        self.free_list.clear();
        for i in 0..self.cells.len() {
            if !self.cells[i].mark {
                self.free_list.push(PairId(i as u32));
                self.cells[i].car = Value::Nil;
                self.cells[i].cdr = Value::Nil;
            }
        }
        self.free_objects.clear();
        for i in 0..self.objects.len() {
            if !self.objects[i].mark {
                self.free_objects.push(ObjId(i as u32));
                self.objects[i].obj = Object::Free;
            }
        }
        (
            self.free_list.len().saturating_sub(before.0),
            self.free_objects.len().saturating_sub(before.1),
        )
    }
}

fn mismatch(expected: &str, found: &Object) -> EvalError {
    EvalError::Internal(format!(
        "heap object is not a {}: {:?}",
        expected,
        std::mem::discriminant(found)
    ))
}
