//! Config binder application: hierarchical config trees → runtime values.
//!
//! Binding is deliberately looser than the JSON codec: keys match
//! case-insensitively (first match in document order wins), scalars coerce
//! from strings ("42", "true", "3.5", RFC 3339), comma-separated strings
//! bind to sequences, and enums bind by declared case name or number.
//! Required slots missing from the tree are still hard errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value as Json;

use crate::derive::assemble::{self, assemble_map, assemble_multidim, assemble_seq};
use crate::derive::plan::{instantiate, plan_construction, ArgumentState};
use crate::derive::{build_root, Builder, Deferred, Derivation};
use crate::error::{CodecError, DeriveError};
use crate::shape::{
    DictionaryShape, EnumShape, EnumerableShape, Leaf, NullableShape, ObjectShape, Registry,
    Shape, ShapeId,
};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// ARTIFACT
// ————————————————————————————————————————————————————————————————————————————

/// Derived artifact: binds one config subtree to a runtime value.
#[derive(Clone)]
pub struct Binder {
    run: Arc<dyn Fn(&Json) -> Result<Value, CodecError> + Send + Sync>,
}

impl Binder {
    fn new(run: impl Fn(&Json) -> Result<Value, CodecError> + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(run) }
    }

    pub fn bind(&self, tree: &Json) -> Result<Value, CodecError> {
        (self.run)(tree)
    }
}

/// Memoized public entry point.
pub fn binder(registry: &Registry, root: ShapeId) -> Result<Binder, DeriveError> {
    build_root::<ConfigDerivation>(registry, root)
}

/// First case-insensitive match in document order.
fn lookup<'a>(map: &'a serde_json::Map<String, Json>, name: &str) -> Option<&'a Json> {
    map.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

fn json_kind(j: &Json) -> &'static str {
    match j {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn mismatch(j: &Json, expected: &'static str) -> CodecError {
    CodecError::TypeMismatch {
        expected,
        found: json_kind(j),
    }
}

fn coerce_err(s: &str, wanted: &str) -> CodecError {
    CodecError::Invalid(format!("cannot coerce {s:?} to {wanted}"))
}

// ————————————————————————————————————————————————————————————————————————————
// LEAF TABLE (native type or string coercion)
// ————————————————————————————————————————————————————————————————————————————

static LEAF_BINDERS: Lazy<BTreeMap<Leaf, Binder>> = Lazy::new(|| {
    let mut table = BTreeMap::new();

    table.insert(
        Leaf::Unit,
        Binder::new(|j| match j {
            Json::Null => Ok(Value::Unit),
            other => Err(mismatch(other, "null")),
        }),
    );
    table.insert(
        Leaf::Bool,
        Binder::new(|j| match j {
            Json::Bool(b) => Ok(Value::Bool(*b)),
            Json::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Json::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            Json::String(s) => Err(coerce_err(s, "bool")),
            other => Err(mismatch(other, "bool")),
        }),
    );
    table.insert(
        Leaf::Int,
        Binder::new(|j| match j {
            Json::Number(_) => j.as_i64().map(Value::Int).ok_or_else(|| mismatch(j, "integer")),
            Json::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| coerce_err(s, "int")),
            other => Err(mismatch(other, "number")),
        }),
    );
    table.insert(
        Leaf::UInt,
        Binder::new(|j| match j {
            Json::Number(_) => j.as_u64().map(Value::UInt).ok_or_else(|| mismatch(j, "uint")),
            Json::String(s) => s
                .trim()
                .parse::<u64>()
                .map(Value::UInt)
                .map_err(|_| coerce_err(s, "uint")),
            other => Err(mismatch(other, "number")),
        }),
    );
    table.insert(
        Leaf::Float,
        Binder::new(|j| match j {
            Json::Number(_) => j.as_f64().map(Value::float).ok_or_else(|| mismatch(j, "float")),
            Json::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::float)
                .map_err(|_| coerce_err(s, "float")),
            other => Err(mismatch(other, "number")),
        }),
    );
    table.insert(
        Leaf::Str,
        Binder::new(|j| match j {
            Json::String(s) => Ok(Value::Str(s.clone())),
            other => Err(mismatch(other, "string")),
        }),
    );
    table.insert(
        Leaf::Bytes,
        Binder::new(|j| match j {
            // Array of numbers, or a string's raw utf-8.
            Json::Array(xs) => xs
                .iter()
                .map(|x| {
                    x.as_u64()
                        .and_then(|n| u8::try_from(n).ok())
                        .ok_or_else(|| CodecError::Invalid("byte out of range".into()))
                })
                .collect::<Result<Vec<u8>, _>>()
                .map(Value::Bytes),
            Json::String(s) => Ok(Value::Bytes(s.as_bytes().to_vec())),
            other => Err(mismatch(other, "array")),
        }),
    );
    table.insert(
        Leaf::Timestamp,
        Binder::new(|j| {
            let s = j.as_str().ok_or_else(|| mismatch(j, "string"))?;
            chrono::DateTime::parse_from_rfc3339(s.trim())
                .map(|dt| Value::Timestamp(dt.with_timezone(&chrono::Utc)))
                .map_err(|_| coerce_err(s, "timestamp"))
        }),
    );

    table
});

// ————————————————————————————————————————————————————————————————————————————
// DERIVATION
// ————————————————————————————————————————————————————————————————————————————

pub enum ConfigDerivation {}

impl Derivation for ConfigDerivation {
    type Artifact = Binder;

    fn defer(cell: Deferred<Binder>) -> Binder {
        Binder::new(move |j| (cell.get().run)(j))
    }

    fn leaf(shape: &Shape, leaf: Leaf) -> Result<Binder, DeriveError> {
        LEAF_BINDERS
            .get(&leaf)
            .cloned()
            .ok_or_else(|| DeriveError::UnsupportedShapeKind {
                shape: shape.name.clone(),
                kind: "leaf",
            })
    }

    fn object(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        obj: &ObjectShape,
    ) -> Result<Binder, DeriveError> {
        let registry = b.registry();
        let plan = Arc::new(plan_construction(shape, obj)?);
        let fallbacks = plan.slot_fallbacks(registry);
        let post_fallbacks = plan.post_fallbacks(registry);

        let slot_binders: Vec<Binder> = plan
            .slots
            .iter()
            .map(|s| b.build(s.shape))
            .collect::<Result<_, _>>()?;
        let post_binders: Vec<Binder> = plan
            .post
            .iter()
            .map(|m| b.build(m.shape))
            .collect::<Result<_, _>>()?;

        Ok(Binder::new(move |j| {
            let map = j.as_object().ok_or_else(|| mismatch(j, "object"))?;
            let mut state = ArgumentState::new(plan.arity());
            for (i, slot) in plan.slots.iter().enumerate() {
                if let Some(subtree) = lookup(map, &slot.name) {
                    state.set(i, (slot_binders[i].run)(subtree)?);
                }
            }
            let args = state.finish(&plan, &fallbacks)?;
            let mut post = Vec::with_capacity(plan.post.len());
            for ((m, binder), fallback) in plan.post.iter().zip(&post_binders).zip(&post_fallbacks)
            {
                let value = match lookup(map, &m.name) {
                    Some(subtree) => (binder.run)(subtree)?,
                    None => fallback.clone(),
                };
                post.push((m.name.clone(), value));
            }
            Ok(instantiate(&plan, args, post))
        }))
    }

    fn enumerable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        seq: &EnumerableShape,
    ) -> Result<Binder, DeriveError> {
        assemble::check_strategy(shape, seq.strategy)?;
        let elem = b.build(seq.element)?;
        let strategy = seq.strategy;
        let rank = seq.rank;

        if rank <= 1 {
            Ok(Binder::new(move |j| match j {
                Json::Array(xs) => {
                    assemble_seq(strategy, xs.len(), xs.iter().map(|x| (elem.run)(x)))
                }
                // "a, b, c" binds as three string-coerced elements.
                Json::String(s) => {
                    let pieces: Vec<&str> = if s.trim().is_empty() {
                        Vec::new()
                    } else {
                        s.split(',').map(str::trim).collect()
                    };
                    assemble_seq(
                        strategy,
                        pieces.len(),
                        pieces
                            .iter()
                            .map(|p| (elem.run)(&Json::String((*p).to_string()))),
                    )
                }
                other => Err(mismatch(other, "array")),
            }))
        } else {
            Ok(Binder::new(move |j| {
                let nested = bind_nested(&elem, j, rank)?;
                assemble_multidim(rank, &nested)
            }))
        }
    }

    fn dictionary(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        dict: &DictionaryShape,
    ) -> Result<Binder, DeriveError> {
        assemble::check_strategy(shape, dict.strategy)?;
        let key = b.build(dict.key)?;
        let value = b.build(dict.value)?;
        let strategy = dict.strategy;

        Ok(Binder::new(move |j| {
            let map = j.as_object().ok_or_else(|| mismatch(j, "object"))?;
            assemble_map(
                strategy,
                map.len(),
                map.iter().map(|(k, subtree)| {
                    let kd = (key.run)(&Json::String(k.clone()))?;
                    Ok((kd, (value.run)(subtree)?))
                }),
            )
        }))
    }

    fn enumeration(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        en: &EnumShape,
    ) -> Result<Binder, DeriveError> {
        if en.cases.is_empty() {
            return b.build(en.repr);
        }
        let cases: Arc<[(String, i64)]> =
            en.cases.iter().map(|c| (c.name.clone(), c.value)).collect();

        Ok(Binder::new(move |j| match j {
            Json::String(s) => {
                let name = s.trim();
                if let Some((_, v)) = cases.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                    return Ok(Value::Int(*v));
                }
                // Numeric strings bind like numbers.
                if let Ok(n) = name.parse::<i64>() {
                    if cases.iter().any(|(_, v)| *v == n) {
                        return Ok(Value::Int(n));
                    }
                }
                Err(CodecError::UnknownEnumCase(name.to_string()))
            }
            Json::Number(_) => {
                let n = j.as_i64().ok_or_else(|| mismatch(j, "integer"))?;
                if cases.iter().any(|(_, v)| *v == n) {
                    Ok(Value::Int(n))
                } else {
                    Err(CodecError::UnknownEnumCase(n.to_string()))
                }
            }
            other => Err(mismatch(other, "string")),
        }))
    }

    fn nullable(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        inner: &NullableShape,
    ) -> Result<Binder, DeriveError> {
        let elem = b.build(inner.element)?;
        Ok(Binder::new(move |j| {
            if j.is_null() {
                Ok(Value::Null)
            } else {
                (elem.run)(j)
            }
        }))
    }
}

fn bind_nested(elem: &Binder, j: &Json, rank: u32) -> Result<Value, CodecError> {
    if rank == 0 {
        return (elem.run)(j);
    }
    let xs = j.as_array().ok_or_else(|| mismatch(j, "array"))?;
    let out = xs
        .iter()
        .map(|x| bind_nested(elem, x, rank - 1))
        .collect::<Result<_, _>>()?;
    Ok(Value::Seq(out))
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
