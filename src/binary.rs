//! Binary codec application: a compact positional wire format.
//!
//! Scalars are little-endian fixed width; strings and byte blobs carry a
//! `u32` length prefix; nullables spend one tag byte; records travel
//! positionally in construction-plan order with no field names on the wire;
//! rank-R arrays write R `u32` dimensions followed by the row-major element
//! buffer. Decoding an entire message checks that no input remains.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::derive::assemble::{
    self, assemble_map, assemble_seq, flatten_multidim, unflatten_multidim,
};
use crate::derive::plan::{instantiate, plan_construction, ArgumentState};
use crate::derive::{build_root, Builder, Deferred, Derivation};
use crate::error::{CodecError, DeriveError};
use crate::shape::{
    DictionaryShape, EnumShape, EnumerableShape, Leaf, NullableShape, ObjectShape, Registry,
    Shape, ShapeId,
};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// WIRE PRIMITIVES
// ————————————————————————————————————————————————————————————————————————————

/// Cursor over an input buffer. Every read is bounds-checked and reports
/// truncation as [`CodecError::UnexpectedEof`].
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, CodecError> {
        let bs: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(bs))
    }

    fn u64(&mut self) -> Result<u64, CodecError> {
        let bs: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(bs))
    }

    fn i64(&mut self) -> Result<i64, CodecError> {
        let bs: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(bs))
    }

    fn f64(&mut self) -> Result<f64, CodecError> {
        let bs: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(f64::from_le_bytes(bs))
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), CodecError> {
    let n = u32::try_from(len)
        .map_err(|_| CodecError::Invalid(format!("length {len} exceeds u32 wire limit")))?;
    out.extend_from_slice(&n.to_le_bytes());
    Ok(())
}

/// Validate a wire-supplied element count before anything is allocated for
/// it. Every encoded value occupies at least one byte, so a count larger
/// than the remaining input is corrupt — rejecting it here keeps hostile
/// length prefixes from driving huge preallocations.
fn checked_len(n: usize, r: &Reader<'_>) -> Result<usize, CodecError> {
    if n > r.remaining() {
        Err(CodecError::UnexpectedEof)
    } else {
        Ok(n)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ARTIFACT
// ————————————————————————————————————————————————————————————————————————————

/// Derived artifact: streaming encode into a caller-owned buffer, cursor
/// decode from a shared slice.
#[derive(Clone)]
pub struct BinaryCodec {
    pub encode: Arc<dyn Fn(&Value, &mut Vec<u8>) -> Result<(), CodecError> + Send + Sync>,
    pub decode: Arc<dyn Fn(&mut Reader<'_>) -> Result<Value, CodecError> + Send + Sync>,
}

impl BinaryCodec {
    fn new(
        encode: impl Fn(&Value, &mut Vec<u8>) -> Result<(), CodecError> + Send + Sync + 'static,
        decode: impl Fn(&mut Reader<'_>) -> Result<Value, CodecError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            encode: Arc::new(encode),
            decode: Arc::new(decode),
        }
    }

    /// Encode one value as a complete message.
    pub fn to_bytes(&self, v: &Value) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        (self.encode)(v, &mut out)?;
        Ok(out)
    }

    /// Decode one complete message; leftover input is an error.
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let mut reader = Reader::new(bytes);
        let v = (self.decode)(&mut reader)?;
        if reader.remaining() != 0 {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(v)
    }
}

/// Memoized public entry point.
pub fn codec(registry: &Registry, root: ShapeId) -> Result<BinaryCodec, DeriveError> {
    build_root::<BinaryDerivation>(registry, root)
}

// ————————————————————————————————————————————————————————————————————————————
// LEAF TABLE
// ————————————————————————————————————————————————————————————————————————————

static LEAF_CODECS: Lazy<BTreeMap<Leaf, BinaryCodec>> = Lazy::new(|| {
    let mut table = BTreeMap::new();

    // Unit spends one zero byte, keeping the invariant that every value
    // occupies at least one wire byte (length prefixes lean on it).
    table.insert(
        Leaf::Unit,
        BinaryCodec::new(
            |v, out| match v {
                Value::Unit => {
                    out.push(0);
                    Ok(())
                }
                other => Err(other.mismatch("unit")),
            },
            |r| match r.u8()? {
                0 => Ok(Value::Unit),
                n => Err(CodecError::Invalid(format!("bad unit byte {n:#04x}"))),
            },
        ),
    );
    table.insert(
        Leaf::Bool,
        BinaryCodec::new(
            |v, out| match v {
                Value::Bool(b) => {
                    out.push(*b as u8);
                    Ok(())
                }
                other => Err(other.mismatch("bool")),
            },
            |r| match r.u8()? {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                n => Err(CodecError::Invalid(format!("bad bool byte {n:#04x}"))),
            },
        ),
    );
    table.insert(
        Leaf::Int,
        BinaryCodec::new(
            |v, out| match v {
                Value::Int(i) => {
                    out.extend_from_slice(&i.to_le_bytes());
                    Ok(())
                }
                other => Err(other.mismatch("int")),
            },
            |r| r.i64().map(Value::Int),
        ),
    );
    table.insert(
        Leaf::UInt,
        BinaryCodec::new(
            |v, out| match v {
                Value::UInt(u) => {
                    out.extend_from_slice(&u.to_le_bytes());
                    Ok(())
                }
                other => Err(other.mismatch("uint")),
            },
            |r| r.u64().map(Value::UInt),
        ),
    );
    table.insert(
        Leaf::Float,
        BinaryCodec::new(
            |v, out| match v {
                Value::Float(f) => {
                    out.extend_from_slice(&f.0.to_le_bytes());
                    Ok(())
                }
                other => Err(other.mismatch("float")),
            },
            |r| r.f64().map(Value::float),
        ),
    );
    table.insert(
        Leaf::Str,
        BinaryCodec::new(
            |v, out| match v {
                Value::Str(s) => {
                    write_len(out, s.len())?;
                    out.extend_from_slice(s.as_bytes());
                    Ok(())
                }
                other => Err(other.mismatch("str")),
            },
            |r| {
                let len = r.u32()? as usize;
                let bytes = r.take(len)?;
                std::str::from_utf8(bytes)
                    .map(|s| Value::Str(s.to_string()))
                    .map_err(|e| CodecError::Invalid(format!("bad utf-8 string: {e}")))
            },
        ),
    );
    table.insert(
        Leaf::Bytes,
        BinaryCodec::new(
            |v, out| match v {
                Value::Bytes(bs) => {
                    write_len(out, bs.len())?;
                    out.extend_from_slice(bs);
                    Ok(())
                }
                other => Err(other.mismatch("bytes")),
            },
            |r| {
                let len = r.u32()? as usize;
                Ok(Value::Bytes(r.take(len)?.to_vec()))
            },
        ),
    );
    // Microseconds since the Unix epoch, signed.
    table.insert(
        Leaf::Timestamp,
        BinaryCodec::new(
            |v, out| match v {
                Value::Timestamp(ts) => {
                    out.extend_from_slice(&ts.timestamp_micros().to_le_bytes());
                    Ok(())
                }
                other => Err(other.mismatch("timestamp")),
            },
            |r| {
                let micros = r.i64()?;
                chrono::DateTime::from_timestamp_micros(micros)
                    .map(Value::Timestamp)
                    .ok_or_else(|| {
                        CodecError::Invalid(format!("timestamp {micros}us out of range"))
                    })
            },
        ),
    );

    table
});

// ————————————————————————————————————————————————————————————————————————————
// DERIVATION
// ————————————————————————————————————————————————————————————————————————————

pub enum BinaryDerivation {}

impl Derivation for BinaryDerivation {
    type Artifact = BinaryCodec;

    fn defer(cell: Deferred<BinaryCodec>) -> BinaryCodec {
        let enc = cell.clone();
        BinaryCodec::new(
            move |v, out| (enc.get().encode)(v, out),
            move |r| (cell.get().decode)(r),
        )
    }

    fn leaf(shape: &Shape, leaf: Leaf) -> Result<BinaryCodec, DeriveError> {
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
    ) -> Result<BinaryCodec, DeriveError> {
        let registry = b.registry();
        let plan = Arc::new(plan_construction(shape, obj)?);
        let slot_fallbacks = plan.slot_fallbacks(registry);
        let post_fallbacks = plan.post_fallbacks(registry);

        let slot_codecs: Vec<BinaryCodec> = plan
            .slots
            .iter()
            .map(|s| b.build(s.shape))
            .collect::<Result<_, _>>()?;
        let post_codecs: Vec<BinaryCodec> = plan
            .post
            .iter()
            .map(|m| b.build(m.shape))
            .collect::<Result<_, _>>()?;

        let enc_plan = Arc::clone(&plan);
        let (enc_slots, enc_posts) = (slot_codecs.clone(), post_codecs.clone());
        let (enc_slot_fb, enc_post_fb) = (slot_fallbacks, post_fallbacks);
        Ok(BinaryCodec::new(
            move |v, out| {
                // Positional: every slot and post member is written; a field
                // absent from the record falls back to its default, except a
                // required slot without one.
                let rec = v.as_record().ok_or_else(|| v.mismatch("record"))?;
                for ((slot, codec), fallback) in
                    enc_plan.slots.iter().zip(&enc_slots).zip(&enc_slot_fb)
                {
                    match (rec.get(&slot.name), fallback) {
                        (Some(field), _) => (codec.encode)(field, out)?,
                        (None, Some(fb)) => (codec.encode)(fb, out)?,
                        (None, None) => {
                            return Err(CodecError::MissingField(slot.name.clone()));
                        }
                    }
                }
                for ((m, codec), fallback) in
                    enc_plan.post.iter().zip(&enc_posts).zip(&enc_post_fb)
                {
                    let field = rec.get(&m.name).unwrap_or(fallback);
                    (codec.encode)(field, out)?;
                }
                Ok(())
            },
            move |r| {
                let mut state = ArgumentState::new(plan.arity());
                for (i, codec) in slot_codecs.iter().enumerate() {
                    state.set(i, (codec.decode)(r)?);
                }
                // Every slot is set, so no fallbacks apply at decode.
                let args = state.finish(&plan, &vec![None; plan.arity()])?;
                let mut post = Vec::with_capacity(plan.post.len());
                for (m, codec) in plan.post.iter().zip(&post_codecs) {
                    post.push((m.name.clone(), (codec.decode)(r)?));
                }
                Ok(instantiate(&plan, args, post))
            },
        ))
    }

    fn enumerable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        seq: &EnumerableShape,
    ) -> Result<BinaryCodec, DeriveError> {
        assemble::check_strategy(shape, seq.strategy)?;
        let elem = b.build(seq.element)?;
        let strategy = seq.strategy;
        let rank = seq.rank;

        if rank <= 1 {
            let enc_elem = elem.clone();
            Ok(BinaryCodec::new(
                move |v, out| {
                    let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
                    write_len(out, xs.len())?;
                    for x in xs {
                        (enc_elem.encode)(x, out)?;
                    }
                    Ok(())
                },
                move |r| {
                    let n = checked_len(r.u32()? as usize, r)?;
                    assemble_seq(strategy, n, (0..n).map(|_| (elem.decode)(r)))
                },
            ))
        } else {
            let enc_elem = elem.clone();
            Ok(BinaryCodec::new(
                move |v, out| {
                    let (dims, flat) = flatten_multidim(v, rank)?;
                    for d in &dims {
                        write_len(out, *d)?;
                    }
                    for x in &flat {
                        (enc_elem.encode)(x, out)?;
                    }
                    Ok(())
                },
                move |r| {
                    let mut dims = Vec::with_capacity(rank as usize);
                    for _ in 0..rank {
                        dims.push(r.u32()? as usize);
                    }
                    let total = dims
                        .iter()
                        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
                        .ok_or_else(|| {
                            CodecError::Invalid("array dimensions overflow".into())
                        })?;
                    let total = checked_len(total, r)?;
                    let mut flat = Vec::with_capacity(total);
                    for _ in 0..total {
                        flat.push((elem.decode)(r)?);
                    }
                    Ok(unflatten_multidim(&dims, &flat))
                },
            ))
        }
    }

    fn dictionary(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        dict: &DictionaryShape,
    ) -> Result<BinaryCodec, DeriveError> {
        assemble::check_strategy(shape, dict.strategy)?;
        let key = b.build(dict.key)?;
        let value = b.build(dict.value)?;
        let strategy = dict.strategy;

        let (enc_key, enc_value) = (key.clone(), value.clone());
        Ok(BinaryCodec::new(
            move |v, out| {
                let kv = match v {
                    Value::Map(kv) => kv,
                    other => return Err(other.mismatch("map")),
                };
                write_len(out, kv.len())?;
                for (k, val) in kv {
                    (enc_key.encode)(k, out)?;
                    (enc_value.encode)(val, out)?;
                }
                Ok(())
            },
            move |r| {
                let n = checked_len(r.u32()? as usize, r)?;
                assemble_map(
                    strategy,
                    n,
                    (0..n).map(|_| Ok(((key.decode)(r)?, (value.decode)(r)?))),
                )
            },
        ))
    }

    fn enumeration(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        en: &EnumShape,
    ) -> Result<BinaryCodec, DeriveError> {
        let repr = b.build(en.repr)?;
        if en.cases.is_empty() {
            // No declared cases: pure representation passthrough.
            return Ok(repr);
        }
        let cases: Arc<[i64]> = en.cases.iter().map(|c| c.value).collect();
        let check = move |v: &Value, cases: &[i64]| -> Result<(), CodecError> {
            let n = match v {
                Value::Int(i) => *i,
                Value::UInt(u) => i64::try_from(*u)
                    .map_err(|_| CodecError::UnknownEnumCase(u.to_string()))?,
                other => return Err(other.mismatch("enum value")),
            };
            if cases.contains(&n) {
                Ok(())
            } else {
                Err(CodecError::UnknownEnumCase(n.to_string()))
            }
        };

        let enc_repr = repr.clone();
        let (enc_cases, dec_cases) = (Arc::clone(&cases), cases);
        let enc_check = check;
        Ok(BinaryCodec::new(
            move |v, out| {
                enc_check(v, &enc_cases)?;
                (enc_repr.encode)(v, out)
            },
            move |r| {
                let v = (repr.decode)(r)?;
                check(&v, &dec_cases)?;
                Ok(v)
            },
        ))
    }

    fn nullable(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        inner: &NullableShape,
    ) -> Result<BinaryCodec, DeriveError> {
        let elem = b.build(inner.element)?;
        let enc_elem = elem.clone();
        Ok(BinaryCodec::new(
            move |v, out| {
                if v.is_null() {
                    out.push(0);
                    Ok(())
                } else {
                    out.push(1);
                    (enc_elem.encode)(v, out)
                }
            },
            move |r| match r.u8()? {
                0 => Ok(Value::Null),
                1 => (elem.decode)(r),
                n => Err(CodecError::Invalid(format!("bad nullable tag {n:#04x}"))),
            },
        ))
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{EnumCase, Kind, Property, Strategy};
    use pretty_assertions::assert_eq;

    fn prop(name: &str, shape: ShapeId) -> Property {
        Property {
            name: name.into(),
            shape,
            has_getter: true,
            has_setter: true,
            is_field: false,
        }
    }

    #[test]
    fn wire_layout_is_positional_and_little_endian() {
        let mut reg = Registry::new();
        let b = reg.leaf(Leaf::Bool);
        let i = reg.leaf(Leaf::Int);
        let flag = reg.add(
            "Flag",
            Kind::Object(ObjectShape {
                properties: vec![prop("flag", b), prop("count", i)],
                constructor: None,
            }),
        );
        let codec = codec(&reg, flag).unwrap();

        let v = Value::record([("flag", Value::Bool(true)), ("count", Value::Int(2))]);
        let bytes = codec.to_bytes(&v).unwrap();
        assert_eq!(bytes, vec![1, 2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(codec.from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn strings_carry_length_prefixes() {
        let mut reg = Registry::new();
        let s = reg.leaf(Leaf::Str);
        let codec = codec(&reg, s).unwrap();

        let v = Value::str("héllo");
        let bytes = codec.to_bytes(&v).unwrap();
        assert_eq!(&bytes[..4], &6u32.to_le_bytes()); // byte length, not chars
        assert_eq!(codec.from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn truncated_input_is_unexpected_eof() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let codec = codec(&reg, i).unwrap();
        let err = codec.from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, CodecError::UnexpectedEof);
    }

    #[test]
    fn leftover_input_is_trailing_bytes() {
        let mut reg = Registry::new();
        let b = reg.leaf(Leaf::Bool);
        let codec = codec(&reg, b).unwrap();
        let err = codec.from_bytes(&[1, 0xff, 0xff]).unwrap_err();
        assert_eq!(err, CodecError::TrailingBytes(2));
    }

    #[test]
    fn hostile_length_prefixes_fail_before_allocation() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let list = reg.add(
            "List<int>",
            Kind::Enumerable(EnumerableShape {
                element: i,
                rank: 1,
                strategy: Strategy::Span,
            }),
        );
        let codec = codec(&reg, list).unwrap();

        // Eight-byte message claiming four billion elements.
        let mut bytes = u32::MAX.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        let err = codec.from_bytes(&bytes).unwrap_err();
        assert_eq!(err, CodecError::UnexpectedEof);
    }

    #[test]
    fn overflowing_dimension_products_are_invalid() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let cube = reg.add(
            "int[,,]",
            Kind::Enumerable(EnumerableShape {
                element: i,
                rank: 3,
                strategy: Strategy::Span,
            }),
        );
        let codec = codec(&reg, cube).unwrap();

        let mut bytes = Vec::new();
        for _ in 0..3 {
            bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        }
        let err = codec.from_bytes(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Invalid(_)), "{err}");
    }

    #[test]
    fn unit_spends_one_wire_byte() {
        let mut reg = Registry::new();
        let u = reg.leaf(Leaf::Unit);
        let codec = codec(&reg, u).unwrap();
        assert_eq!(codec.to_bytes(&Value::Unit).unwrap(), vec![0]);
        assert_eq!(codec.from_bytes(&[0]).unwrap(), Value::Unit);
    }

    #[test]
    fn nullable_spends_one_tag_byte() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let opt = reg.add("Option<int>", Kind::Nullable(NullableShape { element: i }));
        let codec = codec(&reg, opt).unwrap();

        assert_eq!(codec.to_bytes(&Value::Null).unwrap(), vec![0]);
        let some = codec.to_bytes(&Value::Int(1)).unwrap();
        assert_eq!(some.len(), 9);
        assert_eq!(codec.from_bytes(&some).unwrap(), Value::Int(1));
        assert_eq!(codec.from_bytes(&[0]).unwrap(), Value::Null);
    }

    #[test]
    fn undeclared_enum_cases_are_rejected_both_ways() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let color = reg.add(
            "Color",
            Kind::Enum(EnumShape {
                repr: i,
                cases: vec![
                    EnumCase { name: "Red".into(), value: 0 },
                    EnumCase { name: "Green".into(), value: 1 },
                ],
            }),
        );
        let codec = codec(&reg, color).unwrap();

        let ok = codec.to_bytes(&Value::Int(1)).unwrap();
        assert_eq!(codec.from_bytes(&ok).unwrap(), Value::Int(1));

        let err = codec.to_bytes(&Value::Int(9)).unwrap_err();
        assert_eq!(err, CodecError::UnknownEnumCase("9".into()));
        let err = codec.from_bytes(&9i64.to_le_bytes()).unwrap_err();
        assert_eq!(err, CodecError::UnknownEnumCase("9".into()));
    }

    #[test]
    fn two_dimensional_arrays_write_dims_then_flat_elements() {
        let mut reg = Registry::new();
        let i = reg.leaf(Leaf::Int);
        let grid = reg.add(
            "int[,]",
            Kind::Enumerable(EnumerableShape {
                element: i,
                rank: 2,
                strategy: Strategy::Span,
            }),
        );
        let codec = codec(&reg, grid).unwrap();

        let v = Value::Seq(vec![
            Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::Seq(vec![Value::Int(4), Value::Int(5), Value::Int(6)]),
        ]);
        let bytes = codec.to_bytes(&v).unwrap();
        assert_eq!(&bytes[..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(bytes.len(), 8 + 6 * 8);
        assert_eq!(codec.from_bytes(&bytes).unwrap(), v);

        let ragged = Value::Seq(vec![
            Value::Seq(vec![Value::Int(1), Value::Int(2)]),
            Value::Seq(vec![Value::Int(3)]),
        ]);
        let err = codec.to_bytes(&ragged).unwrap_err();
        assert!(matches!(err, CodecError::Ragged { .. }), "{err}");
    }

    #[test]
    fn dictionaries_round_trip_in_pair_order() {
        let mut reg = Registry::new();
        let s = reg.leaf(Leaf::Str);
        let i = reg.leaf(Leaf::Int);
        let dict = reg.add(
            "Map<str,int>",
            Kind::Dictionary(DictionaryShape {
                key: s,
                value: i,
                strategy: Strategy::Enumerable,
            }),
        );
        let codec = codec(&reg, dict).unwrap();

        let v = Value::Map(vec![
            (Value::str("a"), Value::Int(1)),
            (Value::str("b"), Value::Int(2)),
        ]);
        let bytes = codec.to_bytes(&v).unwrap();
        assert_eq!(codec.from_bytes(&bytes).unwrap(), v);
    }

    #[test]
    fn recursive_shapes_round_trip() {
        let mut reg = Registry::new();
        let s = reg.leaf(Leaf::Str);
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
                properties: vec![prop("label", s), prop("children", children)],
                constructor: None,
            }),
        )
        .unwrap();
        let codec = codec(&reg, node).unwrap();

        let tree = Value::record([
            ("label", Value::str("root")),
            (
                "children",
                Value::Seq(vec![Value::record([
                    ("label", Value::str("kid")),
                    ("children", Value::Seq(vec![])),
                ])]),
            ),
        ]);
        let bytes = codec.to_bytes(&tree).unwrap();
        assert_eq!(codec.from_bytes(&bytes).unwrap(), tree);
    }

    #[test]
    fn timestamps_round_trip_at_microsecond_precision() {
        let mut reg = Registry::new();
        let ts = reg.leaf(Leaf::Timestamp);
        let codec = codec(&reg, ts).unwrap();

        let v = Value::Timestamp(
            chrono::DateTime::from_timestamp_micros(1_717_245_000_123_456).unwrap(),
        );
        let bytes = codec.to_bytes(&v).unwrap();
        assert_eq!(bytes.len(), 8);
        assert_eq!(codec.from_bytes(&bytes).unwrap(), v);
    }
}
