//! tenvm - Tensor dataflow graphs compiled to register-VM bytecode.
//!
//! The crate takes a finalized [`Model`] (a scheduled tensor dataflow graph
//! with nested conditionals, loops and fusion groups) and translates it into
//! a flat register-VM [`Program`]: named `In`/`Out` staging at the
//! boundaries, one instruction per operation in schedule order, explicit
//! `Free` at every value's statically-last use so the VM never garbage
//! collects, and plain jumps with backpatched targets for the structured
//! control flow. Translation is all-or-nothing: any structural violation,
//! unsupported operation or malformed attribute fails the whole model.
//!
//! # Primary Usage
//!
//! ```
//! use tenvm::{emit_model, Attrs, EmitOptions, Model, OpKind};
//!
//! let mut model = Model::new("main");
//! let g = model.root();
//! let x = model.add_input(g, "x");
//! let y = model.add_output(g, "y");
//! model.add_node(g, OpKind::Relu, "relu0", vec![x], vec![y], Attrs::default());
//!
//! let program = emit_model(&model, &EmitOptions::default()).unwrap();
//! assert!(!program.is_empty());
//! ```
//!
//! # Architecture
//!
//! - [`graph`] - Arena-owned model: graphs, nodes, values, typed ids
//! - [`emit`] - The emitter, register lifetimes, programs, fusion backends
//! - [`error`] - The fatal error taxonomy shared by every stage

pub mod emit;
pub mod error;
pub mod graph;

pub use emit::{
    emit_model, emit_model_with_kernels, CompiledKernel, EmitOptions, Instruction, KernelArtifact,
    KernelCompiler, KernelRequest, Opcode, Operand, Program, RegId, ValueDesc, PENDING_TARGET,
};
pub use error::{EmitError, EmitResult};
pub use graph::{
    Attrs, Dtype, FusionStrategy, Graph, GraphId, Model, Node, NodeId, OpKind, Tensor, TensorType,
    Value, ValueId, ValueKind,
};
