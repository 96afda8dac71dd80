//! Construction-strategy assembly for enumerable and dictionary shapes.
//!
//! Element production always comes from the recursively built child
//! artifact; only the assembly step differs per [`Strategy`]:
//! `Mutable` adds one element at a time to an empty instance, `Enumerable`
//! materializes the whole sequence and bulk-constructs, `Span` fills a
//! pre-sized pooled buffer and constructs from the buffer view. `None` is
//! rejected at build time and never reaches these functions.

use once_cell::sync::Lazy;
use std::sync::Mutex;

use crate::error::{CodecError, DeriveError};
use crate::shape::{Shape, Strategy};
use crate::value::Value;

// ————————————————————————————————————————————————————————————————————————————
// POOLED SPAN BUFFERS
// ————————————————————————————————————————————————————————————————————————————

const POOL_MAX_BUFFERS: usize = 8;
const POOL_MAX_CAPACITY: usize = 4096;

static POOL: Lazy<Mutex<Vec<Vec<Value>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Scoped lease of a pooled buffer. The buffer returns to the pool on every
/// exit path, including panics, via `Drop`.
pub struct Lease {
    buf: Vec<Value>,
}

impl Lease {
    pub fn with_capacity(n: usize) -> Self {
        // Pool contents are plain values; a poisoned lock just means we
        // allocate fresh instead.
        let recycled = POOL
            .lock()
            .map(|mut pool| pool.pop())
            .unwrap_or_default()
            .unwrap_or_default();
        let mut buf = recycled;
        buf.clear();
        buf.reserve(n);
        Lease { buf }
    }

    pub fn push(&mut self, v: Value) {
        self.buf.push(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[Value] {
        &self.buf
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        if buf.capacity() <= POOL_MAX_CAPACITY {
            if let Ok(mut pool) = POOL.lock() {
                if pool.len() < POOL_MAX_BUFFERS {
                    pool.push(buf);
                }
            }
        }
    }
}

// ————————————————————————————————————————————————————————————————————————————
// BUILD-TIME STRATEGY CHECK
// ————————————————————————————————————————————————————————————————————————————

/// Reject `Strategy::None` while composing, so the failure never defers
/// into artifact invocation.
pub fn check_strategy(shape: &Shape, strategy: Strategy) -> Result<(), DeriveError> {
    match strategy {
        Strategy::None => Err(DeriveError::UnsupportedConstructionStrategy {
            shape: shape.name.clone(),
        }),
        Strategy::Mutable | Strategy::Enumerable | Strategy::Span => Ok(()),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// SEQUENCE ASSEMBLY
// ————————————————————————————————————————————————————————————————————————————

/// Assemble a sequence per strategy. `len` is the element count the caller
/// observed in its input; only the span path requires it to be exact.
pub fn assemble_seq(
    strategy: Strategy,
    len: usize,
    items: impl Iterator<Item = Result<Value, CodecError>>,
) -> Result<Value, CodecError> {
    match strategy {
        // Empty instance, then add one element at a time.
        Strategy::Mutable => {
            let mut out = Vec::new();
            for item in items {
                out.push(item?);
            }
            Ok(Value::Seq(out))
        }
        // Materialize everything, then one bulk construction.
        Strategy::Enumerable => {
            let xs: Vec<Value> = items.collect::<Result<_, _>>()?;
            Ok(Value::Seq(xs))
        }
        // Pre-sized pooled buffer, construct from the filled view.
        Strategy::Span => {
            let mut lease = Lease::with_capacity(len);
            for item in items {
                lease.push(item?);
            }
            if lease.len() != len {
                return Err(CodecError::Invalid(format!(
                    "span construction expected {len} elements, produced {}",
                    lease.len()
                )));
            }
            Ok(Value::Seq(lease.as_slice().to_vec()))
        }
        Strategy::None => Err(CodecError::Invalid(
            "collection has no construction strategy".into(),
        )),
    }
}

/// Dictionary counterpart; pairs flow alternately (key, value) through the
/// span buffer.
pub fn assemble_map(
    strategy: Strategy,
    len: usize,
    pairs: impl Iterator<Item = Result<(Value, Value), CodecError>>,
) -> Result<Value, CodecError> {
    match strategy {
        Strategy::Mutable => {
            let mut out = Vec::new();
            for pair in pairs {
                out.push(pair?);
            }
            Ok(Value::Map(out))
        }
        Strategy::Enumerable => {
            let kv: Vec<(Value, Value)> = pairs.collect::<Result<_, _>>()?;
            Ok(Value::Map(kv))
        }
        Strategy::Span => {
            let mut lease = Lease::with_capacity(len * 2);
            for pair in pairs {
                let (k, v) = pair?;
                lease.push(k);
                lease.push(v);
            }
            if lease.len() != len * 2 {
                return Err(CodecError::Invalid(format!(
                    "span construction expected {len} pairs, produced {}",
                    lease.len() / 2
                )));
            }
            let kv = lease
                .as_slice()
                .chunks_exact(2)
                .map(|c| (c[0].clone(), c[1].clone()))
                .collect();
            Ok(Value::Map(kv))
        }
        Strategy::None => Err(CodecError::Invalid(
            "dictionary has no construction strategy".into(),
        )),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// MULTI-DIMENSIONAL ASSEMBLY (span generalization)
// ————————————————————————————————————————————————————————————————————————————

/// Walk a rank-R nested sequence and return its dimensions, failing on the
/// first pair of sibling sub-sequences that disagree on length.
pub fn rectangular_dims(v: &Value, rank: u32) -> Result<Vec<usize>, CodecError> {
    fn walk(
        v: &Value,
        level: usize,
        rank: usize,
        dims: &mut [Option<usize>],
    ) -> Result<(), CodecError> {
        if level == rank {
            return Ok(());
        }
        let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
        match dims[level] {
            None => dims[level] = Some(xs.len()),
            Some(expected) if expected != xs.len() => {
                return Err(CodecError::Ragged {
                    depth: level,
                    expected,
                    found: xs.len(),
                });
            }
            Some(_) => {}
        }
        for x in xs {
            walk(x, level + 1, rank, dims)?;
        }
        Ok(())
    }

    let mut dims = vec![None; rank as usize];
    walk(v, 0, rank as usize, &mut dims)?;
    Ok(dims.into_iter().map(|d| d.unwrap_or(0)).collect())
}

/// Rank-many nested sequences → rectangularity check → flat pooled buffer →
/// reconstructed rectangular value.
pub fn assemble_multidim(rank: u32, nested: &Value) -> Result<Value, CodecError> {
    let dims = rectangular_dims(nested, rank)?;
    let total: usize = dims.iter().product();
    let mut lease = Lease::with_capacity(total);
    flatten_into(nested, rank, &mut lease)?;
    Ok(rebuild(&dims, lease.as_slice()))
}

/// Rectangularity-checked flattening: dimensions plus row-major elements.
/// Inverse of [`unflatten_multidim`].
pub fn flatten_multidim(v: &Value, rank: u32) -> Result<(Vec<usize>, Vec<Value>), CodecError> {
    let dims = rectangular_dims(v, rank)?;
    let mut lease = Lease::with_capacity(dims.iter().product());
    flatten_into(v, rank, &mut lease)?;
    Ok((dims, lease.as_slice().to_vec()))
}

/// Rebuild nested sequences from a row-major buffer.
pub fn unflatten_multidim(dims: &[usize], flat: &[Value]) -> Value {
    rebuild(dims, flat)
}

fn flatten_into(v: &Value, rank: u32, lease: &mut Lease) -> Result<(), CodecError> {
    if rank == 0 {
        lease.push(v.clone());
        return Ok(());
    }
    let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
    for x in xs {
        flatten_into(x, rank - 1, lease)?;
    }
    Ok(())
}

fn rebuild(dims: &[usize], flat: &[Value]) -> Value {
    match dims.split_first() {
        None => flat[0].clone(),
        Some((&n, rest)) => {
            let stride: usize = rest.iter().product(); // empty product = 1
            Value::Seq(
                (0..n)
                    .map(|i| rebuild(rest, &flat[i * stride..(i + 1) * stride]))
                    .collect(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(xs: &[i64]) -> Vec<Result<Value, CodecError>> {
        xs.iter().map(|&i| Ok(Value::Int(i))).collect()
    }

    #[test]
    fn every_strategy_preserves_element_count() {
        for strategy in [Strategy::Mutable, Strategy::Enumerable, Strategy::Span] {
            for n in [0usize, 1, 5] {
                let elems: Vec<i64> = (0..n as i64).collect();
                let out = assemble_seq(strategy, n, ints(&elems).into_iter()).unwrap();
                let seq = out.as_seq().unwrap();
                assert_eq!(seq.len(), n, "{strategy:?} with {n} elements");
                for (i, v) in seq.iter().enumerate() {
                    assert_eq!(*v, Value::Int(i as i64));
                }
            }
        }
    }

    #[test]
    fn assembly_propagates_element_errors() {
        let items = vec![
            Ok(Value::Int(1)),
            Err(CodecError::MissingField("x".into())),
        ];
        for strategy in [Strategy::Mutable, Strategy::Enumerable, Strategy::Span] {
            let err = assemble_seq(strategy, 2, items.clone().into_iter()).unwrap_err();
            assert_eq!(err, CodecError::MissingField("x".into()));
        }
    }

    #[test]
    fn map_strategies_keep_pairs_in_order() {
        let pairs = |n: i64| {
            (0..n)
                .map(|i| Ok((Value::Int(i), Value::str(format!("v{i}")))))
                .collect::<Vec<_>>()
        };
        for strategy in [Strategy::Mutable, Strategy::Enumerable, Strategy::Span] {
            for n in [0i64, 1, 4] {
                let out = assemble_map(strategy, n as usize, pairs(n).into_iter()).unwrap();
                match out {
                    Value::Map(kv) => {
                        assert_eq!(kv.len(), n as usize);
                        for (i, (k, _)) in kv.iter().enumerate() {
                            assert_eq!(*k, Value::Int(i as i64));
                        }
                    }
                    other => panic!("expected map, got {}", other.kind_name()),
                }
            }
        }
    }

    #[test]
    fn rectangular_two_by_three_reports_exact_dims() {
        let v = Value::Seq(vec![
            Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
            Value::Seq(vec![Value::Int(4), Value::Int(5), Value::Int(6)]),
        ]);
        assert_eq!(rectangular_dims(&v, 2).unwrap(), vec![2, 3]);
        let rebuilt = assemble_multidim(2, &v).unwrap();
        assert_eq!(rebuilt, v);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let v = Value::Seq(vec![
            Value::Seq(vec![Value::Int(1), Value::Int(2)]),
            Value::Seq(vec![Value::Int(3)]),
        ]);
        let err = assemble_multidim(2, &v).unwrap_err();
        assert_eq!(
            err,
            CodecError::Ragged {
                depth: 1,
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn empty_outer_dimension_is_fine() {
        let v = Value::Seq(vec![]);
        assert_eq!(rectangular_dims(&v, 2).unwrap(), vec![0, 0]);
        assert_eq!(assemble_multidim(2, &v).unwrap(), Value::Seq(vec![]));
    }

    #[test]
    fn span_length_mismatch_is_an_error() {
        let items = ints(&[1, 2]);
        let err = assemble_seq(Strategy::Span, 3, items.into_iter()).unwrap_err();
        assert!(matches!(err, CodecError::Invalid(_)), "{err}");
    }
}
