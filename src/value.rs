use std::fmt;

/// Unique identifier for an interned (or generated) symbol.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

/// Index into the cons-cell heap. This is the GC handle for pairs.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PairId(pub u32);

/// Index into the object heap (strings, vectors, closures, frames, ...).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub u32);

/// Index into the machine's primitive table. Primitives are never collected.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrimId(pub u32);

/// Index into the condition-type registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

/// The fundamental value. Copy semantics: anything larger than a machine
/// word lives in the heap and is referred to by id.
///
/// The variant is the run-time tag the evaluator dispatches on. In particular
/// `Primitive`, `Closure`, `Macro` and `Form` are the operator capabilities;
/// whether `(if ...)` is special depends only on which of these the symbol
/// `if` is bound to when the combination is evaluated.
#[derive(Clone, Copy, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Real(f64),
    Symbol(SymbolId),
    Pair(PairId),
    Str(ObjId),
    Vector(ObjId),
    Primitive(PrimId),
    Closure(ObjId),
    /// Wraps a procedure that maps raw operands to a replacement expression.
    Macro(ObjId),
    /// Wraps a procedure that receives `(env . raw-operands)`.
    Form(ObjId),
    Condition(ObjId),
    Restart(ObjId),
    Env(ObjId),
    Table(ObjId),
    Escape(ObjId),
    Type(TypeId),
}

impl Value {
    pub const TRUE: Value = Value::Bool(true);
    pub const FALSE: Value = Value::Bool(false);

    pub fn is_nil(self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Only `nil` and `#f` are false.
    pub fn is_true(self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_pair(self) -> bool {
        matches!(self, Value::Pair(_))
    }

    pub fn is_symbol(self) -> bool {
        matches!(self, Value::Symbol(_))
    }

    pub fn is_number(self) -> bool {
        matches!(self, Value::Int(_) | Value::Real(_))
    }

    pub fn is_procedure(self) -> bool {
        matches!(
            self,
            Value::Primitive(_) | Value::Closure(_) | Value::Restart(_) | Value::Escape(_)
        )
    }

    pub fn as_pair(self) -> Option<PairId> {
        match self {
            Value::Pair(id) => Some(id),
            _ => None,
        }
    }

    /// The heap object behind this value, if it has one.
    pub fn object(self) -> Option<ObjId> {
        match self {
            Value::Str(id)
            | Value::Vector(id)
            | Value::Closure(id)
            | Value::Macro(id)
            | Value::Form(id)
            | Value::Condition(id)
            | Value::Restart(id)
            | Value::Env(id)
            | Value::Table(id)
            | Value::Escape(id) => Some(id),
            _ => None,
        }
    }

    /// Short type name used in diagnostics and `type-mismatch` conditions.
    pub fn type_name(self) -> &'static str {
        match self {
            Value::Nil => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Real(_) => "real",
            Value::Symbol(_) => "symbol",
            Value::Pair(_) => "pair",
            Value::Str(_) => "string",
            Value::Vector(_) => "vector",
            Value::Primitive(_) => "primitive",
            Value::Closure(_) => "closure",
            Value::Macro(_) => "macro",
            Value::Form(_) => "form",
            Value::Condition(_) => "condition",
            Value::Restart(_) => "restart",
            Value::Env(_) => "environment",
            Value::Table(_) => "hash-table",
            Value::Escape(_) => "escape-continuation",
            Value::Type(_) => "condition-type",
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Int(n) => write!(f, "Int({})", n),
            Value::Real(x) => write!(f, "Real({})", x),
            Value::Symbol(id) => write!(f, "Sym({})", id.0),
            Value::Pair(id) => write!(f, "Pair({})", id.0),
            Value::Primitive(id) => write!(f, "Prim({})", id.0),
            Value::Type(id) => write!(f, "Type({})", id.0),
            other => match other.object() {
                Some(id) => write!(f, "{}({})", other.type_name(), id.0),
                None => write!(f, "{}", other.type_name()),
            },
        }
    }
}

impl fmt::Debug for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

impl fmt::Debug for PairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairId({})", self.0)
    }
}

impl fmt::Debug for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjId({})", self.0)
    }
}

impl fmt::Debug for PrimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrimId({})", self.0)
    }
}

impl fmt::Debug for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}
