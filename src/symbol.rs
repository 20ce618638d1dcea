use std::collections::HashMap;

use crate::value::SymbolId;

/// Package that unqualified names are interned into.
pub const DEFAULT_PACKAGE: &str = "user";

struct SymbolName {
    package: String,
    name: String,
    interned: bool,
    /// False once a collection has reclaimed this uninterned id.
    live: bool,
}

/// Interned symbol table. Symbols are keyed by their qualified name
/// `package:name`, so `foo` and `user:foo` are the same `SymbolId` and
/// `eq?` on symbols is a plain id comparison.
pub struct SymbolTable {
    name_to_id: HashMap<(String, String), SymbolId>,
    id_to_name: Vec<SymbolName>,
    gensym_counter: u64,
    /// Reclaimed gensym ids, reused before the table grows.
    free_ids: Vec<SymbolId>,
}

/// Well-known symbol IDs, pre-interned at startup.
/// These must match the order of interning in SymbolTable::new().
pub mod sym {
    use crate::value::SymbolId;

    pub const QUOTE: SymbolId = SymbolId(0);
    pub const QUASIQUOTE: SymbolId = SymbolId(1);
    pub const UNQUOTE: SymbolId = SymbolId(2);
    pub const UNQUOTE_SPLICING: SymbolId = SymbolId(3);
    pub const ELSE: SymbolId = SymbolId(4);
    pub const ARROW: SymbolId = SymbolId(5);
    pub const LAMBDA: SymbolId = SymbolId(6);
    pub const DEFINE: SymbolId = SymbolId(7);
    pub const MESSAGE: SymbolId = SymbolId(8);
    pub const IRRITANTS: SymbolId = SymbolId(9);
    pub const STACK_TRACE: SymbolId = SymbolId(10);
    pub const EVAL: SymbolId = SymbolId(11);
    pub const APPLY: SymbolId = SymbolId(12);
    pub const NAME: SymbolId = SymbolId(13);
    pub const VALUE: SymbolId = SymbolId(14);
    pub const EXPECTED: SymbolId = SymbolId(15);
    pub const OBJECT: SymbolId = SymbolId(16);
    pub const PROCEDURE: SymbolId = SymbolId(17);
    pub const ARGUMENTS: SymbolId = SymbolId(18);
    pub const EXPRESSION: SymbolId = SymbolId(19);
    pub const DEPTH: SymbolId = SymbolId(20);
    pub const EQ: SymbolId = SymbolId(21);
    pub const EQV: SymbolId = SymbolId(22);
    pub const EQUAL: SymbolId = SymbolId(23);
    pub const T: SymbolId = SymbolId(24);
    pub const TAG: SymbolId = SymbolId(25);
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    /// Create a new symbol table with all well-known symbols pre-interned.
    /// The order MUST match the constants in the `sym` module above.
    pub fn new() -> Self {
        let names = [
            "quote", "quasiquote", "unquote", "unquote-splicing",
            "else", "=>", "lambda", "define",
            "message", "irritants", "stack-trace", "eval", "apply",
            "name", "value", "expected", "object", "procedure", "arguments",
            "expression", "depth",
            "eq", "eqv", "equal", "t", "tag",
        ];

        let mut table = SymbolTable {
            name_to_id: HashMap::new(),
            id_to_name: Vec::new(),
            gensym_counter: 0,
            free_ids: Vec::new(),
        };
        for name in names {
            table.intern(name);
        }
        table
    }

    /// Intern a symbol name. `pkg:name` is interned in `pkg`; anything else
    /// goes to the default package. Returns the existing ID if present.
    pub fn intern(&mut self, name: &str) -> SymbolId {
        let (package, local) = split_qualified(name);
        self.intern_in(package, local)
    }

    pub fn intern_in(&mut self, package: &str, name: &str) -> SymbolId {
        let key = (package.to_string(), name.to_string());
        if let Some(&id) = self.name_to_id.get(&key) {
            return id;
        }
        let id = SymbolId(self.id_to_name.len() as u32);
        self.id_to_name.push(SymbolName {
            package: key.0.clone(),
            name: key.1.clone(),
            interned: true,
            live: true,
        });
        self.name_to_id.insert(key, id);
        id
    }

    /// Create a fresh uninterned symbol. It is never `eq?` to any interned
    /// symbol, even one with the same print name.
    pub fn gensym(&mut self, prefix: &str) -> SymbolId {
        self.gensym_counter += 1;
        let entry = SymbolName {
            package: String::new(),
            name: format!("{}{}", prefix, self.gensym_counter),
            interned: false,
            live: true,
        };
        match self.free_ids.pop() {
            Some(id) => {
                self.id_to_name[id.0 as usize] = entry;
                id
            }
            None => {
                let id = SymbolId(self.id_to_name.len() as u32);
                self.id_to_name.push(entry);
                id
            }
        }
    }

    /// Free every uninterned symbol that `keep` rejects, so a later gensym
    /// can reuse its id. Interned symbols are permanent. Returns how many
    /// were freed.
    pub fn reclaim_uninterned(&mut self, keep: impl Fn(SymbolId) -> bool) -> usize {
        let mut freed = 0;
        for (i, entry) in self.id_to_name.iter_mut().enumerate() {
            let id = SymbolId(i as u32);
            if entry.interned || !entry.live || keep(id) {
                continue;
            }
            entry.live = false;
            entry.name = String::new();
            self.free_ids.push(id);
            freed += 1;
        }
        freed
    }

    /// Local name of a symbol, without its package.
    pub fn name(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize].name
    }

    pub fn package(&self, id: SymbolId) -> &str {
        &self.id_to_name[id.0 as usize].package
    }

    pub fn is_interned(&self, id: SymbolId) -> bool {
        self.id_to_name[id.0 as usize].interned
    }

    /// Printed representation: bare name in the default package, `pkg:name`
    /// elsewhere, `#:name` for uninterned symbols.
    pub fn qualified_name(&self, id: SymbolId) -> String {
        let entry = &self.id_to_name[id.0 as usize];
        if !entry.interned {
            format!("#:{}", entry.name)
        } else if entry.package == DEFAULT_PACKAGE {
            entry.name.clone()
        } else {
            format!("{}:{}", entry.package, entry.name)
        }
    }

    /// Look up a symbol ID by name, without interning.
    pub fn lookup(&self, name: &str) -> Option<SymbolId> {
        let (package, local) = split_qualified(name);
        self.name_to_id
            .get(&(package.to_string(), local.to_string()))
            .copied()
    }

    /// Live symbols, uninterned ones included.
    pub fn count(&self) -> usize {
        self.id_to_name.len() - self.free_ids.len()
    }
}

/// `pkg:name` splits at the first colon. A leading or trailing colon is
/// part of the name.
fn split_qualified(name: &str) -> (&str, &str) {
    match name.find(':') {
        Some(i) if i > 0 && i + 1 < name.len() => (&name[..i], &name[i + 1..]),
        _ => (DEFAULT_PACKAGE, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_symbols_match_constants() {
        let table = SymbolTable::new();
        assert_eq!(table.lookup("quote"), Some(sym::QUOTE));
        assert_eq!(table.lookup("=>"), Some(sym::ARROW));
        assert_eq!(table.lookup("stack-trace"), Some(sym::STACK_TRACE));
        assert_eq!(table.lookup("t"), Some(sym::T));
        assert_eq!(table.lookup("tag"), Some(sym::TAG));
    }

    #[test]
    fn unqualified_names_live_in_default_package() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("user:foo");
        assert_eq!(a, b);
        assert_eq!(table.qualified_name(a), "foo");
    }

    #[test]
    fn packages_separate_names() {
        let mut table = SymbolTable::new();
        let a = table.intern("foo");
        let b = table.intern("net:foo");
        assert_ne!(a, b);
        assert_eq!(table.name(b), "foo");
        assert_eq!(table.package(b), "net");
        assert_eq!(table.qualified_name(b), "net:foo");
    }

    #[test]
    fn keywords_are_plain_names() {
        let mut table = SymbolTable::new();
        let k = table.intern(":key");
        assert_eq!(table.package(k), DEFAULT_PACKAGE);
        assert_eq!(table.name(k), ":key");
    }

    #[test]
    fn gensyms_are_never_interned() {
        let mut table = SymbolTable::new();
        let g = table.gensym("g");
        let name = table.name(g).to_string();
        let interned = table.intern(&name);
        assert_ne!(g, interned);
        assert!(!table.is_interned(g));
        assert!(table.qualified_name(g).starts_with("#:"));
    }

    #[test]
    fn unreachable_gensyms_are_reused() {
        let mut table = SymbolTable::new();
        let base = table.count();
        let kept = table.gensym("g");
        let dropped: Vec<SymbolId> = (0..10).map(|_| table.gensym("g")).collect();
        let kept_name = table.name(kept).to_string();
        let quote = sym::QUOTE;
        assert_eq!(table.reclaim_uninterned(|id| id == kept || id == quote), 10);
        assert_eq!(table.count(), base + 1);
        assert_eq!(table.name(kept), kept_name);
        // Reclaiming twice frees nothing new.
        assert_eq!(table.reclaim_uninterned(|id| id == kept), 0);

        let again = table.gensym("g");
        assert!(dropped.contains(&again));
        assert_ne!(table.name(again), kept_name);
        assert_eq!(table.count(), base + 2);
        assert_eq!(table.lookup("quote"), Some(sym::QUOTE));
    }
}
