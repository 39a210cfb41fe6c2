//! Symbolic tensor slots.
//!
//! A [`Variable`] names a logical tensor (its shape plus two flags) without
//! owning memory. The bytes live in [`crate::Storage`], keyed by the
//! variable's [`VariableId`]. Two variables with identical shapes are still
//! different keys.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::Shape;

static NEXT_VARIABLE_ID: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a [`Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableId(u64);

impl VariableId {
    fn next() -> Self {
        Self(NEXT_VARIABLE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle to a logical tensor slot.
///
/// - `trainable`: a weight or bias, updated by the optimizer.
/// - `preservable`: storage survives a batch-size change (trainable implies
///   preservable; batch-norm running statistics are preservable only).
///
/// Cloning a `Variable` keeps its identity. Use [`Variable::detached`] for a
/// new slot with the same shape and flags.
#[derive(Debug, Clone)]
pub struct Variable {
    id: VariableId,
    shape: Shape,
    trainable: bool,
    preservable: bool,
}

impl Variable {
    /// A per-batch slot (activations, caches).
    pub fn new(shape: Shape) -> Self {
        Self::with_flags(shape, false, false)
    }

    /// A trainable parameter.
    pub fn trainable(shape: Shape) -> Self {
        Self::with_flags(shape, true, true)
    }

    /// Non-trainable state that must survive batch-size changes.
    pub fn preservable(shape: Shape) -> Self {
        Self::with_flags(shape, false, true)
    }

    fn with_flags(shape: Shape, trainable: bool, preservable: bool) -> Self {
        Self {
            id: VariableId::next(),
            shape,
            trainable,
            preservable,
        }
    }

    #[inline]
    pub fn id(&self) -> VariableId {
        self.id
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    #[inline]
    pub fn element_count(&self) -> usize {
        self.shape.element_count()
    }

    #[inline]
    pub fn is_trainable(&self) -> bool {
        self.trainable
    }

    #[inline]
    pub fn is_preservable(&self) -> bool {
        self.preservable
    }

    /// Re-key this slot to a new shape.
    ///
    /// Storage notices the change on next access and reallocates (or, for
    /// preservable slots with the same element count, reshapes in place).
    pub fn set_shape(&mut self, shape: Shape) {
        self.shape = shape;
    }

    /// Fresh identity with the same shape and flags.
    pub fn detached(&self) -> Self {
        Self::with_flags(self.shape.clone(), self.trainable, self.preservable)
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
