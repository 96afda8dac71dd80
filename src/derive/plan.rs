//! Object composition: construction plans and argument state.
//!
//! A plan splits an object shape into the slots that ride in the argument
//! state (constructor parameters, then required/init-only members — these
//! are always populated before the instance escapes) and the optional
//! members applied after construction. Every application reuses the same
//! plan; only what it does per slot differs.

use indexmap::IndexMap;

use crate::error::{CodecError, DeriveError};
use crate::shape::{ObjectShape, Registry, Shape, ShapeId};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Parameter,
    /// Required/init-only member folded into the constructor call.
    Initializer,
}

#[derive(Debug, Clone)]
pub struct ArgSlot {
    /// Canonical member name: the case-insensitively matching property's
    /// name when one exists, otherwise the declared parameter name.
    pub name: String,
    pub shape: ShapeId,
    pub required: bool,
    pub default: Option<Value>,
    pub kind: SlotKind,
}

#[derive(Debug, Clone)]
pub struct PostMember {
    pub name: String,
    pub shape: ShapeId,
}

#[derive(Debug, Clone)]
pub struct ConstructionPlan {
    /// Argument-state layout, in declaration order.
    pub slots: Vec<ArgSlot>,
    /// Optional settable members, applied post-construction.
    pub post: Vec<PostMember>,
}

impl ConstructionPlan {
    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    /// Precompute the per-slot fallback used when input omits a slot:
    /// declared default first, then the shape default for optional slots.
    /// `None` marks a required slot with no fallback. Resolved at build
    /// time so artifacts do not hold on to the registry.
    pub fn slot_fallbacks(&self, registry: &Registry) -> Vec<Option<Value>> {
        self.slots
            .iter()
            .map(|slot| match (&slot.default, slot.required) {
                (Some(d), _) => Some(d.clone()),
                (None, true) => None,
                (None, false) => Some(registry.default_value(slot.shape)),
            })
            .collect()
    }

    /// Defaults for optional post-construction members omitted from input.
    pub fn post_fallbacks(&self, registry: &Registry) -> Vec<Value> {
        self.post
            .iter()
            .map(|m| registry.default_value(m.shape))
            .collect()
    }
}

/// Resolve an object shape into a construction plan.
///
/// Name matching between parameters and properties is case-insensitive,
/// ties resolved in property-declaration order (replicated source-material
/// policy). A settable property covered by a slot is never applied again
/// post-construction.
pub fn plan_construction(shape: &Shape, obj: &ObjectShape) -> Result<ConstructionPlan, DeriveError> {
    let eq_ci = |a: &str, b: &str| a.eq_ignore_ascii_case(b);
    // First case-insensitive match wins, in property-declaration order.
    let canonical = |name: &str| {
        obj.properties
            .iter()
            .find(|p| eq_ci(&p.name, name))
            .map(|p| p.name.clone())
            .unwrap_or_else(|| name.to_string())
    };

    let Some(ctor) = &obj.constructor else {
        // No constructor: default-construct, then apply every settable
        // property in property order.
        let post: Vec<PostMember> = obj
            .properties
            .iter()
            .filter(|p| p.has_setter)
            .map(|p| PostMember {
                name: p.name.clone(),
                shape: p.shape,
            })
            .collect();
        if post.is_empty() {
            return Err(DeriveError::NoUsableConstructor {
                shape: shape.name.clone(),
            });
        }
        return Ok(ConstructionPlan { slots: Vec::new(), post });
    };

    let mut slots: Vec<ArgSlot> = ctor
        .parameters
        .iter()
        .map(|p| ArgSlot {
            name: canonical(&p.name),
            shape: p.shape,
            required: p.required,
            default: p.default.clone(),
            kind: SlotKind::Parameter,
        })
        .collect();
    // Required/init-only members join the argument state: many target
    // representations forbid mutating them post-construction.
    slots.extend(ctor.initializers.iter().filter(|m| m.required).map(|m| ArgSlot {
        name: canonical(&m.name),
        shape: m.shape,
        required: true,
        default: None,
        kind: SlotKind::Initializer,
    }));

    let mut post: Vec<PostMember> = Vec::new();
    let covered = |name: &str, slots: &[ArgSlot], post: &[PostMember]| {
        slots.iter().any(|s| eq_ci(&s.name, name)) || post.iter().any(|m| eq_ci(&m.name, name))
    };
    for m in ctor.initializers.iter().filter(|m| !m.required) {
        if !covered(&m.name, &slots, &post) {
            post.push(PostMember {
                name: canonical(&m.name),
                shape: m.shape,
            });
        }
    }
    for p in obj.properties.iter().filter(|p| p.has_setter) {
        if !covered(&p.name, &slots, &post) {
            post.push(PostMember {
                name: p.name.clone(),
                shape: p.shape,
            });
        }
    }

    if slots.is_empty() && post.is_empty() {
        return Err(DeriveError::NoUsableConstructor {
            shape: shape.name.clone(),
        });
    }
    Ok(ConstructionPlan { slots, post })
}

// ————————————————————————————————————————————————————————————————————————————
// ARGUMENT STATE
// ————————————————————————————————————————————————————————————————————————————

/// Mutable composite shaped to exactly the plan's slot count, created fresh
/// per construction call and consumed once the instance is produced.
///
/// Slot arity is only known at run time here, so the representation is a
/// uniform value slice rather than a typed tuple.
#[derive(Debug)]
pub struct ArgumentState {
    slots: Box<[Value]>,
    filled: Box<[bool]>,
}

impl ArgumentState {
    pub fn new(arity: usize) -> Self {
        Self {
            slots: vec![Value::Null; arity].into_boxed_slice(),
            filled: vec![false; arity].into_boxed_slice(),
        }
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.slots[index] = value;
        self.filled[index] = true;
    }

    /// Complete the state: unset slots take their precomputed fallback
    /// (see [`ConstructionPlan::slot_fallbacks`]); an unset required slot
    /// is a runtime error of the invoking application.
    pub fn finish(
        self,
        plan: &ConstructionPlan,
        fallbacks: &[Option<Value>],
    ) -> Result<Vec<Value>, CodecError> {
        debug_assert_eq!(fallbacks.len(), plan.slots.len());
        let mut out = Vec::with_capacity(self.slots.len());
        let values = self.slots.into_vec().into_iter();
        for (i, (value, filled)) in values.zip(self.filled.into_vec()).enumerate() {
            if filled {
                out.push(value);
            } else {
                match &fallbacks[i] {
                    Some(fallback) => out.push(fallback.clone()),
                    None => return Err(CodecError::MissingField(plan.slots[i].name.clone())),
                }
            }
        }
        Ok(out)
    }
}

/// Invoke the "constructor": materialize the record from completed argument
/// state, then lay optional members after it. Argument slots land first, so
/// required/init-only members are in place before the record escapes.
pub fn instantiate(
    plan: &ConstructionPlan,
    args: Vec<Value>,
    post: Vec<(String, Value)>,
) -> Value {
    debug_assert_eq!(args.len(), plan.slots.len());
    let mut rec = IndexMap::with_capacity(plan.slots.len() + post.len());
    for (slot, value) in plan.slots.iter().zip(args) {
        rec.insert(slot.name.clone(), value);
    }
    for (name, value) in post {
        rec.insert(name, value);
    }
    Value::Record(rec)
}
