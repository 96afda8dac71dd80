//! Memoized shape-visitor/builder engine.
//!
//! An application ("derivation") says how to turn each shape kind into its
//! artifact; the builder owns the per-run construction cache and walks the
//! shape graph exactly once per distinct type. Cycles are broken with a
//! pending/resolved slot: a pending slot hands out a forwarding artifact
//! that closes over an indirection cell, and composition of the real
//! artifact rebinds that cell before the run returns. Only *invocation* of
//! finished artifacts may recurse, and it does so over finite input (or a
//! shrinking budget, for the random generator).
//!
//! A single builder run is single-threaded by construction (`&mut self`);
//! for cross-thread reuse, [`SharedCache`] offers a compute-or-fetch
//! critical section so at most one thread composes a given root.

pub mod assemble;
pub mod plan;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tracing::trace;

use crate::error::DeriveError;
use crate::shape::{
    DictionaryShape, EnumShape, EnumerableShape, Kind, Leaf, NullableShape, ObjectShape, Registry,
    Shape, ShapeId,
};

// ————————————————————————————————————————————————————————————————————————————
// DEFERRED ARTIFACTS
// ————————————————————————————————————————————————————————————————————————————

/// Indirection cell backing a pending cache slot. Forwarding artifacts
/// close over this cell by reference, so resolution is visible to every
/// consumer handed out before composition finished.
pub struct Deferred<A> {
    cell: Arc<OnceCell<A>>,
}

impl<A> Clone for Deferred<A> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<A: Clone> Deferred<A> {
    fn new() -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
        }
    }

    // Slots transition pending → resolved exactly once and never regress.
    fn resolve(&self, artifact: A) {
        let already = self.cell.set(artifact).is_err();
        debug_assert!(!already, "deferred artifact resolved twice");
    }

    /// Fetch the resolved artifact. The builder resolves every cell before
    /// the root artifact escapes, so an unresolved read here is an engine
    /// bug rather than a recoverable condition.
    pub fn get(&self) -> A {
        self.cell
            .get()
            .cloned()
            .expect("deferred artifact invoked before resolution")
    }
}

enum Slot<A> {
    Pending(Deferred<A>),
    Resolved(A),
}

// ————————————————————————————————————————————————————————————————————————————
// VISITOR PROTOCOL
// ————————————————————————————————————————————————————————————————————————————

/// One application of the engine. The kind set is closed, so this is a
/// match-per-kind protocol rather than open inheritance: the builder
/// inspects `Kind` and forwards to exactly one of these functions.
///
/// Applications are zero-sized types; all state an artifact needs is
/// closed over at composition time or passed at invocation time.
pub trait Derivation: Sized {
    type Artifact: Clone;

    /// Wrap a pending slot's cell into a forwarding artifact.
    fn defer(cell: Deferred<Self::Artifact>) -> Self::Artifact;

    /// Fixed leaf table: hand-written artifacts for well-known primitive
    /// types. O(1) short-circuit; leaves never reach generic composition.
    fn leaf(shape: &Shape, leaf: Leaf) -> Result<Self::Artifact, DeriveError>;

    fn object(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        obj: &ObjectShape,
    ) -> Result<Self::Artifact, DeriveError>;

    fn enumerable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        seq: &EnumerableShape,
    ) -> Result<Self::Artifact, DeriveError>;

    fn dictionary(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        dict: &DictionaryShape,
    ) -> Result<Self::Artifact, DeriveError>;

    fn enumeration(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        en: &EnumShape,
    ) -> Result<Self::Artifact, DeriveError>;

    fn nullable(
        b: &mut Builder<'_, Self>,
        shape: &Shape,
        inner: &NullableShape,
    ) -> Result<Self::Artifact, DeriveError>;

    /// Fallback for shapes with no composition rule.
    fn opaque(shape: &Shape) -> Result<Self::Artifact, DeriveError> {
        Err(DeriveError::UnsupportedShapeKind {
            shape: shape.name.clone(),
            kind: shape.kind.name(),
        })
    }
}

// ————————————————————————————————————————————————————————————————————————————
// MEMOIZED BUILDER
// ————————————————————————————————————————————————————————————————————————————

/// Per-run construction cache plus the recursive walk. One artifact per
/// distinct shape per run; termination is bounded by registry size.
pub struct Builder<'r, D: Derivation> {
    registry: &'r Registry,
    cache: HashMap<ShapeId, Slot<D::Artifact>>,
    composed: Vec<ShapeId>,
}

impl<'r, D: Derivation> Builder<'r, D> {
    pub fn new(registry: &'r Registry) -> Self {
        Self {
            registry,
            cache: HashMap::new(),
            composed: Vec::new(),
        }
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Memoized entry point: return the artifact for `id`, composing it
    /// (and transitively its children) only on first request.
    pub fn build(&mut self, id: ShapeId) -> Result<D::Artifact, DeriveError> {
        match self.cache.get(&id) {
            Some(Slot::Resolved(artifact)) => {
                trace!(shape = %id, "cache hit");
                return Ok(artifact.clone());
            }
            Some(Slot::Pending(cell)) => {
                // Direct or mutual recursion mid-composition: hand out a
                // forwarding artifact instead of re-entering.
                trace!(shape = %id, "pending hit, deferring");
                return Ok(D::defer(cell.clone()));
            }
            None => {}
        }

        let registry = self.registry;
        let shape = registry.get(id)?;
        let cell = Deferred::new();
        self.cache.insert(id, Slot::Pending(cell.clone()));
        self.composed.push(id);
        trace!(shape = %id, name = %shape.name, kind = shape.kind.name(), "composing");

        let outcome = match &shape.kind {
            Kind::Leaf(leaf) => D::leaf(shape, *leaf),
            Kind::Object(obj) => D::object(self, shape, obj),
            Kind::Enumerable(seq) => D::enumerable(self, shape, seq),
            Kind::Dictionary(dict) => D::dictionary(self, shape, dict),
            Kind::Enum(en) => D::enumeration(self, shape, en),
            Kind::Nullable(inner) => D::nullable(self, shape, inner),
            Kind::Opaque => D::opaque(shape),
        };
        let artifact = match outcome {
            Ok(artifact) => artifact,
            Err(err) => {
                // A failed composition must not linger as a pending slot:
                // retries have to fail identically, never hand out a
                // forwarding artifact whose cell can no longer resolve.
                self.cache.remove(&id);
                return Err(err);
            }
        };

        cell.resolve(artifact.clone());
        self.cache.insert(id, Slot::Resolved(artifact.clone()));
        Ok(artifact)
    }

    /// Composition log: one entry per shape that actually went through the
    /// visitor protocol this run, in first-visit order.
    pub fn composed(&self) -> &[ShapeId] {
        &self.composed
    }

    /// Drain the resolved slots (e.g. to seed a [`SharedCache`]).
    pub fn into_artifacts(self) -> impl Iterator<Item = (ShapeId, D::Artifact)> {
        self.cache.into_iter().filter_map(|(id, slot)| match slot {
            Slot::Resolved(a) => Some((id, a)),
            Slot::Pending(_) => None,
        })
    }
}

/// Convenience: one-shot derivation of a root artifact.
pub fn build_root<D: Derivation>(
    registry: &Registry,
    id: ShapeId,
) -> Result<D::Artifact, DeriveError> {
    Builder::<D>::new(registry).build(id)
}

// ————————————————————————————————————————————————————————————————————————————
// SHARED CACHE (cross-thread compute-or-fetch)
// ————————————————————————————————————————————————————————————————————————————

/// Finished-artifact cache shareable across threads. The whole composition
/// runs inside the critical section, so at most one thread ever composes a
/// given type; races on the check are idempotent.
pub struct SharedCache<D: Derivation> {
    slots: Mutex<HashMap<ShapeId, D::Artifact>>,
}

impl<D: Derivation> Default for SharedCache<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Derivation> SharedCache<D> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_build(
        &self,
        registry: &Registry,
        id: ShapeId,
    ) -> Result<D::Artifact, DeriveError> {
        // A poisoned lock means a derivation panicked mid-run; the cache
        // may hold torn bookkeeping, so fail fast instead of serving it.
        let mut slots = self
            .slots
            .lock()
            .expect("shared artifact cache poisoned by a failed derivation");
        if let Some(artifact) = slots.get(&id) {
            return Ok(artifact.clone());
        }
        let mut builder = Builder::<D>::new(registry);
        let artifact = builder.build(id)?;
        for (child, resolved) in builder.into_artifacts() {
            slots.entry(child).or_insert(resolved);
        }
        Ok(artifact)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// TESTS
// ————————————————————————————————————————————————————————————————————————————

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;
    use crate::shape::{EnumerableShape, ObjectShape, Property, Strategy};
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    /// Trivial "dump to key/value pairs" application: every artifact maps a
    /// runtime value to its canonical form; objects re-emit their fields in
    /// property declaration order.
    enum Dump {}

    #[derive(Clone)]
    struct Dumper(Arc<dyn Fn(&Value) -> Result<Value, CodecError> + Send + Sync>);

    impl Derivation for Dump {
        type Artifact = Dumper;

        fn defer(cell: Deferred<Dumper>) -> Dumper {
            Dumper(Arc::new(move |v| (cell.get().0)(v)))
        }

        fn leaf(_shape: &Shape, _leaf: Leaf) -> Result<Dumper, DeriveError> {
            Ok(Dumper(Arc::new(|v| Ok(v.clone()))))
        }

        fn object(
            b: &mut Builder<'_, Self>,
            _shape: &Shape,
            obj: &ObjectShape,
        ) -> Result<Dumper, DeriveError> {
            let fields: Vec<(String, Dumper)> = obj
                .properties
                .iter()
                .filter(|p| p.has_getter)
                .map(|p| Ok((p.name.clone(), b.build(p.shape)?)))
                .collect::<Result<_, DeriveError>>()?;
            Ok(Dumper(Arc::new(move |v| {
                let rec = v.as_record().ok_or_else(|| v.mismatch("record"))?;
                let mut out = indexmap::IndexMap::new();
                for (name, child) in &fields {
                    let field = rec.get(name).unwrap_or(&Value::Null);
                    out.insert(name.clone(), (child.0)(field)?);
                }
                Ok(Value::Record(out))
            })))
        }

        fn enumerable(
            b: &mut Builder<'_, Self>,
            _shape: &Shape,
            seq: &EnumerableShape,
        ) -> Result<Dumper, DeriveError> {
            let elem = b.build(seq.element)?;
            Ok(Dumper(Arc::new(move |v| {
                let xs = v.as_seq().ok_or_else(|| v.mismatch("seq"))?;
                let out = xs.iter().map(|x| (elem.0)(x)).collect::<Result<_, _>>()?;
                Ok(Value::Seq(out))
            })))
        }

        fn dictionary(
            b: &mut Builder<'_, Self>,
            _shape: &Shape,
            dict: &DictionaryShape,
        ) -> Result<Dumper, DeriveError> {
            let _ = b.build(dict.key)?;
            let _ = b.build(dict.value)?;
            Ok(Dumper(Arc::new(|v| Ok(v.clone()))))
        }

        fn enumeration(
            b: &mut Builder<'_, Self>,
            _shape: &Shape,
            en: &EnumShape,
        ) -> Result<Dumper, DeriveError> {
            b.build(en.repr)
        }

        fn nullable(
            b: &mut Builder<'_, Self>,
            _shape: &Shape,
            inner: &NullableShape,
        ) -> Result<Dumper, DeriveError> {
            let elem = b.build(inner.element)?;
            Ok(Dumper(Arc::new(move |v| {
                if v.is_null() {
                    Ok(Value::Null)
                } else {
                    (elem.0)(v)
                }
            })))
        }
    }

    fn prop(name: &str, shape: ShapeId) -> Property {
        Property {
            name: name.into(),
            shape,
            has_getter: true,
            has_setter: true,
            is_field: false,
        }
    }

    /// `Pair { Name: string, Scores: List<int> }`, both leaves reachable
    /// more than once via a second property pair.
    fn pair_registry() -> (Registry, ShapeId) {
        let mut reg = Registry::new();
        let s = reg.leaf(Leaf::Str);
        let i = reg.leaf(Leaf::Int);
        let scores = reg.add(
            "List<int>",
            Kind::Enumerable(EnumerableShape {
                element: i,
                rank: 1,
                strategy: Strategy::Mutable,
            }),
        );
        let pair = reg.add(
            "Pair",
            Kind::Object(ObjectShape {
                properties: vec![prop("Name", s), prop("Scores", scores)],
                constructor: None,
            }),
        );
        (reg, pair)
    }

    #[test]
    fn end_to_end_pair_dump_in_declaration_order() {
        let (reg, pair) = pair_registry();
        let mut b = Builder::<Dump>::new(&reg);
        let artifact = b.build(pair).unwrap();

        let input = Value::record([
            ("Name", Value::str("ada")),
            ("Scores", Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)])),
        ]);
        let out = (artifact.0)(&input).unwrap();
        let rec = out.as_record().unwrap();
        let entries: Vec<(&str, &Value)> = rec.iter().map(|(k, v)| (k.as_str(), v)).collect();
        assert_eq!(entries[0], ("Name", &Value::str("ada")));
        assert_eq!(
            entries[1],
            (
                "Scores",
                &Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
            )
        );
    }

    #[test]
    fn visitor_runs_exactly_once_per_shape() {
        let (mut reg, _) = pair_registry();
        // A second object referencing the same leaves.
        let s = reg.leaf(Leaf::Str);
        let i = reg.leaf(Leaf::Int);
        let other = reg.add(
            "Other",
            Kind::Object(ObjectShape {
                properties: vec![prop("a", s), prop("b", i), prop("c", s)],
                constructor: None,
            }),
        );
        let pair = reg.find("Pair").unwrap();

        let mut b = Builder::<Dump>::new(&reg);
        b.build(pair).unwrap();
        b.build(other).unwrap();
        b.build(pair).unwrap(); // repeat: resolved hit, no re-composition

        for id in [s, i, pair, other] {
            let n = b.composed().iter().filter(|&&x| x == id).count();
            assert_eq!(n, 1, "shape {id} composed {n} times");
        }
    }

    #[test]
    fn cyclic_shape_graph_terminates_and_forwards() {
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
                properties: vec![prop("children", children)],
                constructor: None,
            }),
        )
        .unwrap();

        let mut b = Builder::<Dump>::new(&reg);
        let artifact = b.build(node).unwrap();
        assert_eq!(b.composed().iter().filter(|&&x| x == node).count(), 1);

        // The nested artifact went through a pending slot; after resolution
        // it must behave identically to the direct reference.
        let leaf_node = Value::record([("children", Value::Seq(vec![]))]);
        let tree = Value::record([("children", Value::Seq(vec![leaf_node.clone()]))]);
        let out = (artifact.0)(&tree).unwrap();
        assert_eq!(out, tree);
        assert_eq!((artifact.0)(&leaf_node).unwrap(), leaf_node);
    }

    #[test]
    fn opaque_shapes_fail_with_unsupported_kind() {
        let mut reg = Registry::new();
        let mystery = reg.reserve("Mystery");
        let err = Builder::<Dump>::new(&reg).build(mystery).map(|_| ()).unwrap_err();
        assert!(matches!(err, DeriveError::UnsupportedShapeKind { .. }), "{err}");
    }

    #[test]
    fn failed_compositions_do_not_linger_as_pending_slots() {
        let mut reg = Registry::new();
        let mystery = reg.reserve("Mystery");
        let holder = reg.add(
            "Holder",
            Kind::Object(ObjectShape {
                properties: vec![prop("inner", mystery)],
                constructor: None,
            }),
        );

        let mut b = Builder::<Dump>::new(&reg);
        assert!(b.build(holder).is_err());
        // Retries fail identically; a failed build must never leave behind
        // a pending slot whose forwarding artifact can no longer resolve.
        assert!(b.build(mystery).is_err());
        assert!(b.build(holder).is_err());
    }

    #[test]
    fn shared_cache_composes_each_root_once_across_threads() {
        let (reg, pair) = pair_registry();
        let cache = SharedCache::<Dump>::new();

        let artifacts: Vec<Dumper> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| cache.get_or_build(&reg, pair).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // The critical section covers composition, so every caller holds a
        // clone of the one artifact the winning thread built.
        for a in &artifacts[1..] {
            assert!(Arc::ptr_eq(&artifacts[0].0, &a.0));
        }
        let again = cache.get_or_build(&reg, pair).unwrap();
        assert!(Arc::ptr_eq(&artifacts[0].0, &again.0));
    }
}
