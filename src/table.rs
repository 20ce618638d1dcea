//! Mapping tables keyed by `eq?`, `eqv?` or `equal?`.
//!
//! A table is a heap object, and `equal?` hashing has to read the heap, so
//! every operation first locates the key with shared borrows and only then
//! takes the one mutable borrow it needs.

use std::collections::HashMap;

use crate::equal::Equality;
use crate::error::EvalResult;
use crate::heap::Heap;
use crate::object::Object;
use crate::value::{ObjId, Value};

/// Tables with more entries than this switch to hashed buckets.
const SMALL_TABLE_LIMIT: usize = 8;

#[derive(Debug)]
enum Entries {
    Small(Vec<(Value, Value)>),
    Large {
        buckets: HashMap<u64, Vec<(Value, Value)>>,
        count: usize,
    },
}

#[derive(Debug)]
pub struct Table {
    pub mode: Equality,
    entries: Entries,
}

/// Where a key lives, found without mutating anything.
enum Slot {
    Small(usize),
    Large(u64, usize),
}

impl Table {
    pub fn new(mode: Equality) -> Self {
        Table {
            mode,
            entries: Entries::Small(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match &self.entries {
            Entries::Small(v) => v.len(),
            Entries::Large { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pairs(&self) -> Vec<(Value, Value)> {
        match &self.entries {
            Entries::Small(v) => v.clone(),
            Entries::Large { buckets, .. } => buckets.values().flatten().copied().collect(),
        }
    }

    pub fn trace(&self, out: &mut Vec<Value>) {
        for (k, v) in self.pairs() {
            out.push(k);
            out.push(v);
        }
    }

    fn find(&self, heap: &Heap, key: Value, hash: u64) -> Option<Slot> {
        match &self.entries {
            Entries::Small(v) => v
                .iter()
                .position(|(k, _)| self.mode.test(heap, *k, key))
                .map(Slot::Small),
            Entries::Large { buckets, .. } => buckets.get(&hash).and_then(|bucket| {
                bucket
                    .iter()
                    .position(|(k, _)| self.mode.test(heap, *k, key))
                    .map(|i| Slot::Large(hash, i))
            }),
        }
    }

    fn value_at(&self, slot: &Slot) -> Option<Value> {
        match (&self.entries, slot) {
            (Entries::Small(v), Slot::Small(i)) => v.get(*i).map(|(_, val)| *val),
            (Entries::Large { buckets, .. }, Slot::Large(h, i)) => {
                buckets.get(h).and_then(|b| b.get(*i)).map(|(_, val)| *val)
            }
            _ => None,
        }
    }

    fn write(&mut self, slot: &Slot, value: Value) {
        match (&mut self.entries, slot) {
            (Entries::Small(v), Slot::Small(i)) => {
                if let Some(entry) = v.get_mut(*i) {
                    entry.1 = value;
                }
            }
            (Entries::Large { buckets, .. }, Slot::Large(h, i)) => {
                if let Some(entry) = buckets.get_mut(h).and_then(|b| b.get_mut(*i)) {
                    entry.1 = value;
                }
            }
            _ => {}
        }
    }

    fn remove(&mut self, slot: &Slot) {
        match (&mut self.entries, slot) {
            (Entries::Small(v), Slot::Small(i)) => {
                v.remove(*i);
            }
            (Entries::Large { buckets, count }, Slot::Large(h, i)) => {
                if let Some(bucket) = buckets.get_mut(h) {
                    bucket.remove(*i);
                    *count -= 1;
                    if bucket.is_empty() {
                        buckets.remove(h);
                    }
                }
            }
            _ => {}
        }
    }

    /// Append a key known to be absent. `hashes` supplies the hash of every
    /// existing key when a small table has to convert.
    fn push(&mut self, key: Value, value: Value, hash: u64, hashes: impl FnOnce() -> Vec<u64>) {
        match &mut self.entries {
            Entries::Small(v) if v.len() < SMALL_TABLE_LIMIT => v.push((key, value)),
            Entries::Small(v) => {
                let mut buckets: HashMap<u64, Vec<(Value, Value)>> = HashMap::new();
                let count = v.len() + 1;
                for ((k, val), h) in v.drain(..).zip(hashes()) {
                    buckets.entry(h).or_default().push((k, val));
                }
                buckets.entry(hash).or_default().push((key, value));
                self.entries = Entries::Large { buckets, count };
            }
            Entries::Large { buckets, count } => {
                buckets.entry(hash).or_default().push((key, value));
                *count += 1;
            }
        }
    }
}

pub fn new_table(heap: &mut Heap, mode: Equality) -> EvalResult<Value> {
    Ok(Value::Table(heap.alloc_obj(Object::Table(Table::new(mode)))?))
}

fn locate(heap: &Heap, id: ObjId, key: Value) -> EvalResult<(u64, Option<Slot>)> {
    let table = heap.table(id)?;
    let hash = table.mode.hash(heap, key);
    Ok((hash, table.find(heap, key, hash)))
}

fn existing_hashes(heap: &Heap, id: ObjId) -> EvalResult<Vec<u64>> {
    let table = heap.table(id)?;
    Ok(table
        .pairs()
        .into_iter()
        .map(|(k, _)| table.mode.hash(heap, k))
        .collect())
}

/// Lookup. `None` means absent, which is distinct from a stored nil.
pub fn get(heap: &Heap, id: ObjId, key: Value) -> EvalResult<Option<Value>> {
    let (_, slot) = locate(heap, id, key)?;
    Ok(slot.and_then(|s| heap.table(id).ok().and_then(|t| t.value_at(&s))))
}

/// Insert only when absent. Returns whether the key was inserted.
pub fn put(heap: &mut Heap, id: ObjId, key: Value, value: Value) -> EvalResult<bool> {
    let (hash, slot) = locate(heap, id, key)?;
    if slot.is_some() {
        return Ok(false);
    }
    let hashes = existing_hashes(heap, id)?;
    heap.table_mut(id)?.push(key, value, hash, || hashes);
    Ok(true)
}

/// Update or insert.
pub fn set(heap: &mut Heap, id: ObjId, key: Value, value: Value) -> EvalResult<()> {
    let (hash, slot) = locate(heap, id, key)?;
    match slot {
        Some(slot) => heap.table_mut(id)?.write(&slot, value),
        None => {
            let hashes = existing_hashes(heap, id)?;
            heap.table_mut(id)?.push(key, value, hash, || hashes);
        }
    }
    Ok(())
}

/// Remove a key. Returns whether it was present.
pub fn unset(heap: &mut Heap, id: ObjId, key: Value) -> EvalResult<bool> {
    let (_, slot) = locate(heap, id, key)?;
    match slot {
        Some(slot) => {
            heap.table_mut(id)?.remove(&slot);
            Ok(true)
        }
        None => Ok(false),
    }
}

pub fn count(heap: &Heap, id: ObjId) -> EvalResult<usize> {
    Ok(heap.table(id)?.len())
}

pub fn entries(heap: &Heap, id: ObjId) -> EvalResult<Vec<(Value, Value)>> {
    Ok(heap.table(id)?.pairs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(heap: &mut Heap, mode: Equality) -> ObjId {
        new_table(heap, mode).unwrap().object().unwrap()
    }

    #[test]
    fn put_inserts_only_when_absent() {
        let mut heap = Heap::new(10_000, 1024);
        let t = table(&mut heap, Equality::Eqv);
        assert!(put(&mut heap, t, Value::Int(1), Value::Int(10)).unwrap());
        assert!(!put(&mut heap, t, Value::Int(1), Value::Int(20)).unwrap());
        assert_eq!(get(&heap, t, Value::Int(1)).unwrap(), Some(Value::Int(10)));
    }

    #[test]
    fn set_overwrites_and_absent_differs_from_nil() {
        let mut heap = Heap::new(10_000, 1024);
        let t = table(&mut heap, Equality::Eq);
        set(&mut heap, t, Value::Int(1), Value::Nil).unwrap();
        assert_eq!(get(&heap, t, Value::Int(1)).unwrap(), Some(Value::Nil));
        assert_eq!(get(&heap, t, Value::Int(2)).unwrap(), None);
        set(&mut heap, t, Value::Int(1), Value::TRUE).unwrap();
        assert_eq!(get(&heap, t, Value::Int(1)).unwrap(), Some(Value::TRUE));
        assert_eq!(count(&heap, t).unwrap(), 1);
    }

    #[test]
    fn equal_tables_match_fresh_strings() {
        let mut heap = Heap::new(10_000, 1024);
        let t = table(&mut heap, Equality::Equal);
        let k1 = heap.alloc_string("key").unwrap();
        let k2 = heap.alloc_string("key").unwrap();
        set(&mut heap, t, k1, Value::Int(1)).unwrap();
        assert_eq!(get(&heap, t, k2).unwrap(), Some(Value::Int(1)));

        let e = table(&mut heap, Equality::Eq);
        set(&mut heap, e, k1, Value::Int(1)).unwrap();
        assert_eq!(get(&heap, e, k2).unwrap(), None);
    }

    #[test]
    fn large_tables_keep_every_entry() {
        let mut heap = Heap::new(100_000, 1024);
        let t = table(&mut heap, Equality::Equal);
        for i in 0..200 {
            let key = heap.list(&[Value::Int(i), Value::Int(i * 2)]).unwrap();
            set(&mut heap, t, key, Value::Int(i)).unwrap();
        }
        assert_eq!(count(&heap, t).unwrap(), 200);
        let probe = heap.list(&[Value::Int(42), Value::Int(84)]).unwrap();
        assert_eq!(get(&heap, t, probe).unwrap(), Some(Value::Int(42)));
        assert!(unset(&mut heap, t, probe).unwrap());
        assert!(!unset(&mut heap, t, probe).unwrap());
        assert_eq!(count(&heap, t).unwrap(), 199);
        assert_eq!(entries(&heap, t).unwrap().len(), 199);
    }
}
