//! Virtual register descriptors.
//!
//! A [`Value`] names one storage slot of the downstream VM: a tensor, scalar
//! or sequence. Values are owned by the [`Model`](super::Model) arena and
//! refer to their producer and consumers through non-owning node indices, so
//! the producer/consumer back-reference cycle never turns into an ownership
//! cycle.

use super::tensor::TensorType;
use super::NodeId;

/// Which partition of its scope a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Formal input of its scope.
    Input,
    /// Declared output of its scope.
    Output,
    /// Scope-local intermediate.
    Temp,
    /// Placeholder for an omitted optional operand. Never receives a
    /// register id and is never dereferenced.
    Null,
}

/// A virtual register descriptor.
///
/// The register id itself is assigned lazily by the emitter and lives in the
/// emitter's own tables; the graph model stays immutable during emission.
#[derive(Debug)]
pub struct Value {
    pub name: String,
    pub kind: ValueKind,
    /// Static type, when shape inference upstream produced one.
    pub ty: Option<TensorType>,
    /// The single node producing this value, if any.
    pub producer: Option<NodeId>,
    /// Consuming nodes, one entry per operand occurrence, in use order.
    pub consumers: Vec<NodeId>,
}

impl Value {
    pub(super) fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        let name = name.into();
        // An empty name marks an omitted optional operand.
        let kind = if name.is_empty() { ValueKind::Null } else { kind };
        Value { name, kind, ty: None, producer: None, consumers: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.kind == ValueKind::Null
    }

    /// Static size in bytes, when both dtype and all dims are known.
    pub fn nbytes(&self) -> Option<i64> {
        self.ty.as_ref().and_then(TensorType::nbytes)
    }
}
