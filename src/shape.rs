//! Shape Model: the structural description of one type.
//!
//! Shapes are the engine's only input. Each distinct type occupies exactly
//! one slot in a [`Registry`] and is referenced by [`ShapeId`] — never by
//! owning pointers — so self-referential and mutually recursive type graphs
//! are plain data. Shapes are immutable once defined; the engine reads them
//! and never mutates them.
//!
//! The registry doubles as the stand-in for the static shape-extraction
//! front end: callers (and the CLI, via JSON registry files) populate it
//! through `add`/`leaf`/`reserve`/`define` and hand the engine a root id.

use serde::{Deserialize, Serialize};

use crate::error::DeriveError;
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// IDENTITY
// ————————————————————————————————————————————————————————————————————————————

/// Type identity: index into a [`Registry`]. The cache/graph key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShapeId(pub u32);

impl std::fmt::Display for ShapeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// KINDS
// ————————————————————————————————————————————————————————————————————————————

/// Well-known primitive/library types, special-cased by every application's
/// leaf table so they never reach generic composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Leaf {
    Unit,
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Bytes,
    Timestamp,
}

impl Leaf {
    pub const ALL: [Leaf; 8] = [
        Leaf::Unit,
        Leaf::Bool,
        Leaf::Int,
        Leaf::UInt,
        Leaf::Float,
        Leaf::Str,
        Leaf::Bytes,
        Leaf::Timestamp,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Leaf::Unit => "unit",
            Leaf::Bool => "bool",
            Leaf::Int => "int",
            Leaf::UInt => "uint",
            Leaf::Float => "float",
            Leaf::Str => "str",
            Leaf::Bytes => "bytes",
            Leaf::Timestamp => "timestamp",
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            Leaf::Unit => Value::Unit,
            Leaf::Bool => Value::Bool(false),
            Leaf::Int => Value::Int(0),
            Leaf::UInt => Value::UInt(0),
            Leaf::Float => Value::float(0.0),
            Leaf::Str => Value::Str(String::new()),
            Leaf::Bytes => Value::Bytes(Vec::new()),
            Leaf::Timestamp => Value::Timestamp(chrono::DateTime::UNIX_EPOCH),
        }
    }
}

/// Container construction idiom a collection/dictionary type supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// No discoverable construction path; composition fails.
    #[default]
    None,
    /// Zero-arg constructor plus an add/insert method.
    Mutable,
    /// Factory accepting a whole in-memory sequence at once.
    Enumerable,
    /// Factory accepting a fixed-length buffer view (pooled buffer).
    Span,
}

// ————————————————————————————————————————————————————————————————————————————
// KIND PAYLOADS
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub shape: ShapeId,
    #[serde(default = "yes")]
    pub has_getter: bool,
    #[serde(default = "yes")]
    pub has_setter: bool,
    #[serde(default)]
    pub is_field: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub shape: ShapeId,
    #[serde(default = "yes")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Post-construction member: `required` means init-only — it must be set
/// before the object escapes and therefore rides in the argument state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initializer {
    pub name: String,
    pub shape: ShapeId,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constructor {
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub initializers: Vec<Initializer>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectShape {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub constructor: Option<Constructor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerableShape {
    pub element: ShapeId,
    /// Numeric rank; > 1 for multi-dimensional arrays.
    #[serde(default = "one")]
    pub rank: u32,
    #[serde(default)]
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryShape {
    pub key: ShapeId,
    pub value: ShapeId,
    #[serde(default)]
    pub strategy: Strategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumCase {
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumShape {
    /// Underlying integer representation.
    pub repr: ShapeId,
    #[serde(default)]
    pub cases: Vec<EnumCase>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NullableShape {
    pub element: ShapeId,
}

/// Closed kind set. Dispatch is kind-first; `Opaque` is the single
/// well-defined fallback for shapes the engine cannot compose.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Leaf(Leaf),
    Object(ObjectShape),
    Enumerable(EnumerableShape),
    Dictionary(DictionaryShape),
    Enum(EnumShape),
    Nullable(NullableShape),
    Opaque,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Leaf(_) => "leaf",
            Kind::Object(_) => "object",
            Kind::Enumerable(_) => "enumerable",
            Kind::Dictionary(_) => "dictionary",
            Kind::Enum(_) => "enum",
            Kind::Nullable(_) => "nullable",
            Kind::Opaque => "opaque",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shape {
    pub name: String,
    pub kind: Kind,
}

// ————————————————————————————————————————————————————————————————————————————
// REGISTRY
// ————————————————————————————————————————————————————————————————————————————

/// Identity-stable shape store: one slot per distinct type, children
/// referenced by id, cycles welcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    shapes: Vec<Shape>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, kind: Kind) -> ShapeId {
        let id = ShapeId(self.shapes.len() as u32);
        self.shapes.push(Shape { name: name.into(), kind });
        id
    }

    /// Leaf shapes are deduplicated: every reference to e.g. `str` resolves
    /// to the same identity, so the builder composes it at most once.
    pub fn leaf(&mut self, leaf: Leaf) -> ShapeId {
        let hit = self
            .shapes
            .iter()
            .position(|s| matches!(s.kind, Kind::Leaf(l) if l == leaf));
        match hit {
            Some(i) => ShapeId(i as u32),
            None => self.add(leaf.name(), Kind::Leaf(leaf)),
        }
    }

    /// Reserve an identity before its definition exists. Required for
    /// self-referential shapes: reserve, build the kind against the
    /// reserved id, then `define`.
    pub fn reserve(&mut self, name: impl Into<String>) -> ShapeId {
        self.add(name, Kind::Opaque)
    }

    pub fn define(&mut self, id: ShapeId, kind: Kind) -> Result<(), DeriveError> {
        let shape = self
            .shapes
            .get_mut(id.0 as usize)
            .ok_or(DeriveError::UnknownShape(id))?;
        shape.kind = kind;
        Ok(())
    }

    pub fn get(&self, id: ShapeId) -> Result<&Shape, DeriveError> {
        self.shapes
            .get(id.0 as usize)
            .ok_or(DeriveError::UnknownShape(id))
    }

    pub fn find(&self, name: &str) -> Option<ShapeId> {
        self.shapes
            .iter()
            .position(|s| s.name == name)
            .map(|i| ShapeId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Check every child reference resolves. Run after loading a registry
    /// from a file; the in-process builder API cannot produce dangling ids.
    pub fn validate(&self) -> Result<(), DeriveError> {
        let check = |id: ShapeId| -> Result<(), DeriveError> {
            if (id.0 as usize) < self.shapes.len() {
                Ok(())
            } else {
                Err(DeriveError::UnknownShape(id))
            }
        };
        for shape in &self.shapes {
            match &shape.kind {
                Kind::Leaf(_) | Kind::Opaque => {}
                Kind::Object(obj) => {
                    for p in &obj.properties {
                        check(p.shape)?;
                    }
                    if let Some(ctor) = &obj.constructor {
                        for p in &ctor.parameters {
                            check(p.shape)?;
                        }
                        for m in &ctor.initializers {
                            check(m.shape)?;
                        }
                    }
                }
                Kind::Enumerable(seq) => check(seq.element)?,
                Kind::Dictionary(dict) => {
                    check(dict.key)?;
                    check(dict.value)?;
                }
                Kind::Enum(en) => check(en.repr)?,
                Kind::Nullable(n) => check(n.element)?,
            }
        }
        Ok(())
    }

    /// Per-shape default value, used for optional members omitted from the
    /// input. Cyclic object graphs bottom out at `Null`.
    pub fn default_value(&self, id: ShapeId) -> Value {
        self.default_inner(id, &mut Vec::new())
    }

    fn default_inner(&self, id: ShapeId, seen: &mut Vec<ShapeId>) -> Value {
        if seen.contains(&id) {
            return Value::Null;
        }
        let Ok(shape) = self.get(id) else {
            return Value::Null;
        };
        match &shape.kind {
            Kind::Leaf(l) => l.default_value(),
            Kind::Nullable(_) | Kind::Opaque => Value::Null,
            Kind::Enumerable(_) => Value::Seq(Vec::new()),
            Kind::Dictionary(_) => Value::Map(Vec::new()),
            Kind::Enum(en) => Value::Int(en.cases.first().map(|c| c.value).unwrap_or(0)),
            Kind::Object(obj) => {
                seen.push(id);
                let rec = obj
                    .properties
                    .iter()
                    .map(|p| (p.name.clone(), self.default_inner(p.shape, seen)))
                    .collect();
                seen.pop();
                Value::Record(rec)
            }
        }
    }
}

fn yes() -> bool {
    true
}

fn one() -> u32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaves_are_deduplicated() {
        let mut reg = Registry::new();
        let a = reg.leaf(Leaf::Str);
        let b = reg.leaf(Leaf::Int);
        let c = reg.leaf(Leaf::Str);
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn reserve_then_define_allows_self_reference() {
        let mut reg = Registry::new();
        let node = reg.reserve("Node");
        let children = reg.add(
            "Vec<Node>",
            Kind::Enumerable(EnumerableShape {
                element: node,
                rank: 1,
                strategy: Strategy::Mutable,
            }),
        );
        reg.define(
            node,
            Kind::Object(ObjectShape {
                properties: vec![Property {
                    name: "children".into(),
                    shape: children,
                    has_getter: true,
                    has_setter: true,
                    is_field: false,
                }],
                constructor: None,
            }),
        )
        .unwrap();
        assert!(reg.validate().is_ok());
        assert!(matches!(reg.get(node).unwrap().kind, Kind::Object(_)));
    }

    #[test]
    fn define_rejects_unknown_ids() {
        let mut reg = Registry::new();
        let err = reg
            .define(ShapeId(7), Kind::Leaf(Leaf::Int))
            .unwrap_err();
        assert!(matches!(err, DeriveError::UnknownShape(ShapeId(7))));
    }

    #[test]
    fn default_value_bottoms_out_on_cycles() {
        let mut reg = Registry::new();
        let node = reg.reserve("Node");
        reg.define(
            node,
            Kind::Object(ObjectShape {
                properties: vec![Property {
                    name: "next".into(),
                    shape: node,
                    has_getter: true,
                    has_setter: true,
                    is_field: false,
                }],
                constructor: None,
            }),
        )
        .unwrap();
        let v = reg.default_value(node);
        assert_eq!(v, Value::record([("next", Value::Null)]));
    }

    #[test]
    fn registry_round_trips_through_json() {
        let mut reg = Registry::new();
        let s = reg.leaf(Leaf::Str);
        reg.add(
            "Names",
            Kind::Enumerable(EnumerableShape {
                element: s,
                rank: 1,
                strategy: Strategy::Enumerable,
            }),
        );
        let text = serde_json::to_string(&reg).unwrap();
        let back: Registry = serde_json::from_str(&text).unwrap();
        assert_eq!(back.len(), 2);
        assert!(back.validate().is_ok());
        assert_eq!(back.find("Names"), Some(ShapeId(1)));
    }
}
