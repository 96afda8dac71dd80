//! JSON codec application: one engine run per root shape yields an
//! encode/decode pair over `serde_json::Value`.
//!
//! Objects map to JSON objects in property declaration order; dictionaries
//! with string keys map to JSON objects and everything else to arrays of
//! pairs; enums travel as their underlying representation; timestamps as
//! RFC 3339 strings. Required fields are enforced at decode, omitted
//! optional members come back at their type's default.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value as Json;

use crate::derive::assemble::{self, assemble_map, assemble_multidim, assemble_seq, rectangular_dims};
use crate::derive::plan::{plan_construction, ArgumentState};
use crate::derive::{build_root, Builder, Deferred, Derivation};
use crate::error::{CodecError, DeriveError};
use crate::shape::{
    DictionaryShape, EnumShape, EnumerableShape, Kind, Leaf, NullableShape, ObjectShape, Registry,
    Shape, ShapeId,
};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// ARTIFACT
// ————————————————————————————————————————————————————————————————————————————

/// Derived artifact: a pure encode/decode pair for one shape. Immutable,
/// shareable, safe for unlimited concurrent invocation.
#[derive(Clone)]
pub struct JsonCodec {
    pub encode: Arc<dyn Fn(&Value) -> Result<Json, CodecError> + Send + Sync>,
    pub decode: Arc<dyn Fn(&Json) -> Result<Value, CodecError> + Send + Sync>,
}

impl JsonCodec {
    fn new(
        encode: impl Fn(&Value) -> Result<Json, CodecError> + Send + Sync + 'static,
        decode: impl Fn(&Json) -> Result<Value, CodecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }
}

/// Memoized public entry point.
pub fn codec(registry: &Registry, root: ShapeId) -> Result<JsonCodec, DeriveError> {
    build_root::<JsonDerivation>(registry, root)
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

// ————————————————————————————————————————————————————————————————————————————
// LEAF TABLE
// ————————————————————————————————————————————————————————————————————————————

/// Hand-written artifacts for the well-known leaves. Built once, never
/// mutated, shared by every builder run in the process.
static LEAF_CODECS: Lazy<BTreeMap<Leaf, JsonCodec>> = Lazy::new(|| {
    let mut table = BTreeMap::new();

    table.insert(
        Leaf::Unit,
        JsonCodec::new(
            |v| match v {
                Value::Unit => Ok(Json::Null),
                other => Err(other.mismatch("unit")),
            },
            |j| match j {
                Json::Null => Ok(Value::Unit),
                other => Err(mismatch(other, "null")),
            },
        ),
    );
    table.insert(
        Leaf::Bool,
        JsonCodec::new(
            |v| match v {
                Value::Bool(b) => Ok(Json::Bool(*b)),
                other => Err(other.mismatch("bool")),
            },
            |j| j.as_bool().map(Value::Bool).ok_or_else(|| mismatch(j, "bool")),
        ),
    );
    table.insert(
        Leaf::Int,
        JsonCodec::new(
            |v| match v {
                Value::Int(i) => Ok(Json::from(*i)),
                other => Err(other.mismatch("int")),
            },
            |j| j.as_i64().map(Value::Int).ok_or_else(|| mismatch(j, "number")),
        ),
    );
    table.insert(
        Leaf::UInt,
        JsonCodec::new(
            |v| match v {
                Value::UInt(u) => Ok(Json::from(*u)),
                other => Err(other.mismatch("uint")),
            },
            |j| j.as_u64().map(Value::UInt).ok_or_else(|| mismatch(j, "number")),
        ),
    );
    table.insert(
        Leaf::Float,
        JsonCodec::new(
            |v| match v {
                Value::Float(f) => serde_json::Number::from_f64(f.0)
                    .map(Json::Number)
                    .ok_or_else(|| CodecError::Invalid("non-finite float".into())),
                other => Err(other.mismatch("float")),
            },
            |j| j.as_f64().map(Value::float).ok_or_else(|| mismatch(j, "number")),
        ),
    );
    table.insert(
        Leaf::Str,
        JsonCodec::new(
            |v| match v {
                Value::Str(s) => Ok(Json::String(s.clone())),
                other => Err(other.mismatch("str")),
            },
            |j| {
                j.as_str()
                    .map(|s| Value::Str(s.to_string()))
                    .ok_or_else(|| mismatch(j, "string"))
            },
        ),
    );
    table.insert(
        Leaf::Bytes,
        JsonCodec::new(
            |v| match v {
                Value::Bytes(bs) => Ok(Json::Array(bs.iter().map(|&b| Json::from(b)).collect())),
                other => Err(other.mismatch("bytes")),
            },
            |j| {
                let xs = j.as_array().ok_or_else(|| mismatch(j, "array"))?;
                xs.iter()
                    .map(|x| {
                        x.as_u64()
                            .and_then(|n| u8::try_from(n).ok())
                            .ok_or_else(|| CodecError::Invalid("byte out of range".into()))
                    })
                    .collect::<Result<Vec<u8>, _>>()
                    .map(Value::Bytes)
            },
        ),
    );
    table.insert(
        Leaf::Timestamp,
        JsonCodec::new(
            |v| match v {
                Value::Timestamp(ts) => Ok(Json::String(ts.to_rfc3339())),
                other => Err(other.mismatch("timestamp")),
            },
            |j| {
                let s = j.as_str().ok_or_else(|| mismatch(j, "string"))?;
                chrono::DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::Timestamp(dt.with_timezone(&chrono::Utc)))
                    .map_err(|e| CodecError::Invalid(format!("bad timestamp: {e}")))
            },
        ),
    );

    table
});

// ————————————————————————————————————————————————————————————————————————————
// DERIVATION
// ————————————————————————————————————————————————————————————————————————————

pub enum JsonDerivation {}

impl Derivation for JsonDerivation {
    type Artifact = JsonCodec;

    fn defer(cell: Deferred<JsonCodec>) -> JsonCodec {
        let enc = cell.clone();
        JsonCodec::new(
            move |v| (enc.get().encode)(v),
            move |j| (cell.get().decode)(j),
        )
    }

    fn leaf(shape: &Shape, leaf: Leaf) -> Result<JsonCodec, DeriveError> {
        LEAF_CODECS
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
    ) -> Result<JsonCodec, DeriveError> {
        let registry = b.registry();
        let plan = Arc::new(plan_construction(shape, obj)?);
        let fallbacks = Arc::new(plan.slot_fallbacks(registry));
        let post_fallbacks = plan.post_fallbacks(registry);

        let slot_codecs: Vec<JsonCodec> = plan
            .slots
            .iter()
            .map(|s| b.build(s.shape))
            .collect::<Result<_, _>>()?;
        let post_codecs: Vec<JsonCodec> = plan
            .post
            .iter()
            .map(|m| b.build(m.shape))
            .collect::<Result<_, _>>()?;

        // Encode reads every gettable property in declaration order; a
        // field absent from the record encodes as its shape default.
        let getters: Vec<(String, Value, JsonCodec)> = obj
            .properties
            .iter()
            .filter(|p| p.has_getter)
            .map(|p| Ok((p.name.clone(), registry.default_value(p.shape), b.build(p.shape)?)))
            .collect::<Result<_, DeriveError>>()?;

        let decode_plan = Arc::clone(&plan);
        Ok(JsonCodec::new(
            move |v| {
                let rec = v.as_record().ok_or_else(|| v.mismatch("record"))?;
                let mut out = serde_json::Map::new();
                for (name, default, codec) in &getters {
                    let field = rec.get(name).unwrap_or(default);
                    out.insert(name.clone(), (codec.encode)(field)?);
                }
                Ok(Json::Object(out))
            },
            move |j| {
                let map = j.as_object().ok_or_else(|| mismatch(j, "object"))?;
                let plan = &decode_plan;
                let mut state = ArgumentState::new(plan.arity());
                for (i, slot) in plan.slots.iter().enumerate() {
                    if let Some(jv) = map.get(&slot.name) {
                        state.set(i, (slot_codecs[i].decode)(jv)?);
                    }
                }
                let args = state.finish(plan, &fallbacks)?;
                let mut post = Vec::with_capacity(plan.post.len());
                for ((m, codec), fallback) in
                    plan.post.iter().zip(&post_codecs).zip(&post_fallbacks)
                {
                    let value = match map.get(&m.name) {
                        Some(jv) => (codec.decode)(jv)?,
                        None => fallback.clone(),
                    };
                    post.push((m.name.clone(), value));
                }
                Ok(crate::derive::plan::instantiate(plan, args, post))
            },
        ))
    }

    fn enumerable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        seq: &EnumerableShape,
    ) -> Result<JsonCodec, DeriveError> {
        assemble::check_strategy(shape, seq.strategy)?;
        let elem = b.build(seq.element)?;
        let strategy = seq.strategy;
        let rank = seq.rank;

        if rank <= 1 {
            let enc_elem = elem.clone();
            Ok(JsonCodec::new(
                move |v| {
                    let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
                    let out = xs
                        .iter()
                        .map(|x| (enc_elem.encode)(x))
                        .collect::<Result<_, _>>()?;
                    Ok(Json::Array(out))
                },
                move |j| {
                    let xs = j.as_array().ok_or_else(|| mismatch(j, "array"))?;
                    assemble_seq(strategy, xs.len(), xs.iter().map(|x| (elem.decode)(x)))
                },
            ))
        } else {
            // Multi-dimensional: nested sequences, rectangularity enforced
            // on both directions, flat-buffer assembly on decode.
            let enc_elem = elem.clone();
            Ok(JsonCodec::new(
                move |v| {
                    rectangular_dims(v, rank)?;
                    encode_nested(&enc_elem, v, rank)
                },
                move |j| {
                    let nested = decode_nested(&elem, j, rank)?;
                    assemble_multidim(rank, &nested)
                },
            ))
        }
    }

    fn dictionary(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        dict: &DictionaryShape,
    ) -> Result<JsonCodec, DeriveError> {
        assemble::check_strategy(shape, dict.strategy)?;
        let registry = b.registry();
        let string_keys = matches!(registry.get(dict.key)?.kind, Kind::Leaf(Leaf::Str));
        let key = b.build(dict.key)?;
        let value = b.build(dict.value)?;
        let strategy = dict.strategy;

        let (enc_key, enc_value) = (key.clone(), value.clone());
        Ok(JsonCodec::new(
            move |v| {
                let kv = match v {
                    Value::Map(kv) => kv,
                    other => return Err(other.mismatch("map")),
                };
                if string_keys {
                    let mut out = serde_json::Map::new();
                    for (k, val) in kv {
                        let Json::String(ks) = (enc_key.encode)(k)? else {
                            return Err(CodecError::Invalid("key did not encode to string".into()));
                        };
                        out.insert(ks, (enc_value.encode)(val)?);
                    }
                    Ok(Json::Object(out))
                } else {
                    let out = kv
                        .iter()
                        .map(|(k, val)| {
                            Ok(Json::Array(vec![(enc_key.encode)(k)?, (enc_value.encode)(val)?]))
                        })
                        .collect::<Result<_, CodecError>>()?;
                    Ok(Json::Array(out))
                }
            },
            move |j| {
                if string_keys {
                    let map = j.as_object().ok_or_else(|| mismatch(j, "object"))?;
                    assemble_map(
                        strategy,
                        map.len(),
                        map.iter().map(|(k, jv)| {
                            let kd = (key.decode)(&Json::String(k.clone()))?;
                            Ok((kd, (value.decode)(jv)?))
                        }),
                    )
                } else {
                    let xs = j.as_array().ok_or_else(|| mismatch(j, "array"))?;
                    assemble_map(
                        strategy,
                        xs.len(),
                        xs.iter().map(|entry| {
                            let pair = entry.as_array().ok_or_else(|| mismatch(entry, "array"))?;
                            if pair.len() != 2 {
                                return Err(CodecError::Invalid(format!(
                                    "expected [key, value] pair, found {} elements",
                                    pair.len()
                                )));
                            }
                            Ok(((key.decode)(&pair[0])?, (value.decode)(&pair[1])?))
                        }),
                    )
                }
            },
        ))
    }

    fn enumeration(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        en: &EnumShape,
    ) -> Result<JsonCodec, DeriveError> {
        // Pure value ↔ representation conversion; no enum logic of its own.
        b.build(en.repr)
    }

    fn nullable(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        inner: &NullableShape,
    ) -> Result<JsonCodec, DeriveError> {
        let elem = b.build(inner.element)?;
        let enc_elem = elem.clone();
        Ok(JsonCodec::new(
            move |v| {
                if v.is_null() {
                    Ok(Json::Null)
                } else {
                    (enc_elem.encode)(v)
                }
            },
            move |j| {
                if j.is_null() {
                    Ok(Value::Null)
                } else {
                    (elem.decode)(j)
                }
            },
        ))
    }
}

fn encode_nested(elem: &JsonCodec, v: &Value, rank: u32) -> Result<Json, CodecError> {
    if rank == 0 {
        return (elem.encode)(v);
    }
    let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
    let out = xs
        .iter()
        .map(|x| encode_nested(elem, x, rank - 1))
        .collect::<Result<_, _>>()?;
    Ok(Json::Array(out))
}

fn decode_nested(elem: &JsonCodec, j: &Json, rank: u32) -> Result<Value, CodecError> {
    if rank == 0 {
        return (elem.decode)(j);
    }
    let xs = j.as_array().ok_or_else(|| mismatch(j, "array"))?;
    let out = xs
        .iter()
        .map(|x| decode_nested(elem, x, rank - 1))
        .collect::<Result<_, _>>()?;
    Ok(Value::Seq(out))
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
