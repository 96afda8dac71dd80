//! Random value generator application.
//!
//! Artifacts are `(rng, budget) → Value` functions with an explicit,
//! monotonically decreasing size budget: children always see a strictly
//! smaller budget, collection lengths are bounded by it, and at zero every
//! composite bottoms out (empty collections, absent nullables, default
//! records), so generation terminates on any shape graph including cyclic
//! ones. The PRNG is an in-crate splitmix64 seeded by the caller, making
//! the whole contract deterministic: same seed and budget, same value.

use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::derive::assemble::{self, assemble_map, assemble_seq};
use crate::derive::plan::{instantiate, plan_construction};
use crate::derive::{build_root, Builder, Deferred, Derivation};
use crate::error::DeriveError;
use crate::shape::{
    DictionaryShape, EnumShape, EnumerableShape, Leaf, NullableShape, ObjectShape, Registry,
    Shape, ShapeId,
};
use crate::value::Value;

/// Collection lengths never exceed this, whatever the budget says.
const MAX_LEN: u32 = 8;

// ————————————————————————————————————————————————————————————————————————————
// PRNG
// ————————————————————————————————————————————————————————————————————————————

/// splitmix64: tiny, fast, and plenty for test-data generation. Kept
/// in-crate so the `(seed, budget) → value` contract has no dependency on
/// another library's stream evolution.
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    fn next_below(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
    }

    fn next_bool(&mut self) -> bool {
        self.next_u64() & 1 == 1
    }

    fn next_f64(&mut self) -> f64 {
        // 53 uniform mantissa bits in [0, 1).
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    fn next_len(&mut self, budget: u32) -> usize {
        let cap = budget.min(MAX_LEN) as u64;
        self.next_below(cap + 1) as usize
    }
}

// ————————————————————————————————————————————————————————————————————————————
// ARTIFACT
// ————————————————————————————————————————————————————————————————————————————

/// Derived artifact: a deterministic value source for one shape.
#[derive(Clone)]
pub struct Generator {
    run: Arc<dyn Fn(&mut Rng, u32) -> Value + Send + Sync>,
}

impl Generator {
    fn new(run: impl Fn(&mut Rng, u32) -> Value + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(run) }
    }

    /// One value from a fresh PRNG stream.
    pub fn generate(&self, seed: u64, budget: u32) -> Value {
        (self.run)(&mut Rng::new(seed), budget)
    }

    /// One value continuing an existing stream.
    pub fn generate_with(&self, rng: &mut Rng, budget: u32) -> Value {
        (self.run)(rng, budget)
    }
}

/// Memoized public entry point.
pub fn generator(registry: &Registry, root: ShapeId) -> Result<Generator, DeriveError> {
    build_root::<RandomDerivation>(registry, root)
}

// ————————————————————————————————————————————————————————————————————————————
// LEAF TABLE
// ————————————————————————————————————————————————————————————————————————————

static LEAF_GENERATORS: Lazy<BTreeMap<Leaf, Generator>> = Lazy::new(|| {
    let mut table = BTreeMap::new();

    table.insert(Leaf::Unit, Generator::new(|_, _| Value::Unit));
    table.insert(
        Leaf::Bool,
        Generator::new(|rng, _| Value::Bool(rng.next_bool())),
    );
    table.insert(
        Leaf::Int,
        Generator::new(|rng, _| Value::Int(rng.next_u64() as i64)),
    );
    table.insert(
        Leaf::UInt,
        Generator::new(|rng, _| Value::UInt(rng.next_u64())),
    );
    table.insert(
        Leaf::Float,
        Generator::new(|rng, _| Value::float(rng.next_f64())),
    );
    table.insert(
        Leaf::Str,
        Generator::new(|rng, _| {
            let len = rng.next_below(u64::from(MAX_LEN) + 1) as usize;
            let s: String = (0..len)
                .map(|_| char::from(b'a' + rng.next_below(26) as u8))
                .collect();
            Value::Str(s)
        }),
    );
    table.insert(
        Leaf::Bytes,
        Generator::new(|rng, _| {
            let len = rng.next_below(u64::from(MAX_LEN) + 1) as usize;
            Value::Bytes((0..len).map(|_| rng.next_u64() as u8).collect())
        }),
    );
    table.insert(
        Leaf::Timestamp,
        Generator::new(|rng, _| {
            // Any second within 2000..2100, drawn uniformly.
            let base = 946_684_800i64;
            let span = 3_155_760_000u64;
            let secs = base + rng.next_below(span) as i64;
            Value::Timestamp(chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default())
        }),
    );

    table
});

// ————————————————————————————————————————————————————————————————————————————
// DERIVATION
// ————————————————————————————————————————————————————————————————————————————

pub enum RandomDerivation {}

impl Derivation for RandomDerivation {
    type Artifact = Generator;

    fn defer(cell: Deferred<Generator>) -> Generator {
        Generator::new(move |rng, budget| (cell.get().run)(rng, budget))
    }

    fn leaf(shape: &Shape, leaf: Leaf) -> Result<Generator, DeriveError> {
        LEAF_GENERATORS
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
    ) -> Result<Generator, DeriveError> {
        let registry = b.registry();
        let plan = Arc::new(plan_construction(shape, obj)?);
        // At budget zero the object bottoms out at its default record, which
        // is what makes directly self-referential shapes terminate.
        let floor = {
            let args = plan
                .slots
                .iter()
                .map(|s| {
                    s.default
                        .clone()
                        .unwrap_or_else(|| registry.default_value(s.shape))
                })
                .collect();
            let post = plan
                .post
                .iter()
                .map(|m| (m.name.clone(), registry.default_value(m.shape)))
                .collect();
            instantiate(&plan, args, post)
        };

        let slot_gens: Vec<Generator> = plan
            .slots
            .iter()
            .map(|s| b.build(s.shape))
            .collect::<Result<_, _>>()?;
        let post_gens: Vec<Generator> = plan
            .post
            .iter()
            .map(|m| b.build(m.shape))
            .collect::<Result<_, _>>()?;

        Ok(Generator::new(move |rng, budget| {
            if budget == 0 {
                return floor.clone();
            }
            let child = budget - 1;
            let args = slot_gens.iter().map(|g| (g.run)(rng, child)).collect();
            let post = plan
                .post
                .iter()
                .zip(&post_gens)
                .map(|(m, g)| (m.name.clone(), (g.run)(rng, child)))
                .collect();
            instantiate(&plan, args, post)
        }))
    }

    fn enumerable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        seq: &EnumerableShape,
    ) -> Result<Generator, DeriveError> {
        assemble::check_strategy(shape, seq.strategy)?;
        let elem = b.build(seq.element)?;
        let strategy = seq.strategy;
        let rank = seq.rank;

        Ok(Generator::new(move |rng, budget| {
            let child = budget.saturating_sub(1);
            if rank <= 1 {
                let n = rng.next_len(budget);
                assemble_seq(strategy, n, (0..n).map(|_| Ok((elem.run)(rng, child))))
                    .expect("generated elements are infallible and the count is exact")
            } else {
                // Rectangular by construction: dims drawn once, shared by
                // every row.
                let dims: Vec<usize> = (0..rank).map(|_| rng.next_len(budget)).collect();
                nest(&dims, &elem, rng, child)
            }
        }))
    }

    fn dictionary(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        dict: &DictionaryShape,
    ) -> Result<Generator, DeriveError> {
        assemble::check_strategy(shape, dict.strategy)?;
        let key = b.build(dict.key)?;
        let value = b.build(dict.value)?;
        let strategy = dict.strategy;

        Ok(Generator::new(move |rng, budget| {
            let n = rng.next_len(budget);
            let child = budget.saturating_sub(1);
            assemble_map(
                strategy,
                n,
                (0..n).map(|_| Ok(((key.run)(rng, child), (value.run)(rng, child)))),
            )
            .expect("generated entries are infallible and the count is exact")
        }))
    }

    fn enumeration(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        en: &EnumShape,
    ) -> Result<Generator, DeriveError> {
        if en.cases.is_empty() {
            return b.build(en.repr);
        }
        let cases: Arc<[i64]> = en.cases.iter().map(|c| c.value).collect();
        Ok(Generator::new(move |rng, _| {
            Value::Int(cases[rng.next_below(cases.len() as u64) as usize])
        }))
    }

    fn nullable(
        b: &mut Builder<'_, Self>,
        _shape: &Shape,
        inner: &NullableShape,
    ) -> Result<Generator, DeriveError> {
        let elem = b.build(inner.element)?;
        Ok(Generator::new(move |rng, budget| {
            if budget == 0 || rng.next_bool() {
                Value::Null
            } else {
                (elem.run)(rng, budget - 1)
            }
        }))
    }
}

fn nest(dims: &[usize], elem: &Generator, rng: &mut Rng, budget: u32) -> Value {
    match dims.split_first() {
        None => (elem.run)(rng, budget),
        Some((&n, rest)) => Value::Seq((0..n).map(|_| nest(rest, elem, rng, budget)).collect()),
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————
