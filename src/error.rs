// This module defines error types for the tenvm emitter using the thiserror crate for
// idiomatic Rust error handling. EmitError is the main error enum covering the fatal
// failure taxonomy of translation: structural violations (arity mismatches between a
// construct node and its branches/body, missing mandatory operands, infinite-loop
// configurations), unsupported operations (an op kind outside the closed supported set),
// malformed attributes (asymmetric padding, unknown direction strings, bad dtype widths),
// duplicate identities (an id assigned twice, which signals an upstream invariant breach)
// and external kernel compilation failures. Each variant carries the offending
// node/value context for debugging. The module also provides EmitResult<T> as a
// convenience alias. Every variant is unconditionally fatal: translation is
// all-or-nothing and produces no partial program.

//! Error types for bytecode emission.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for graph-to-bytecode translation.
#[derive(Error, Debug)]
pub enum EmitError {
    #[error("structural violation at {node}: {reason}")]
    StructuralViolation { node: String, reason: String },

    #[error("unsupported operation at {node}: {reason}")]
    UnsupportedOperation { node: String, reason: String },

    #[error("malformed attribute at {node}: {reason}")]
    MalformedAttribute { node: String, reason: String },

    #[error("duplicate identity for value {value}: {reason}")]
    DuplicateIdentity { value: String, reason: String },

    #[error("kernel compilation failed for {node}: {reason}")]
    KernelCompile { node: String, reason: String },
}

/// Result type alias for emission operations.
pub type EmitResult<T> = Result<T, EmitError>;
