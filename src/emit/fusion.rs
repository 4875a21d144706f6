// This module lowers fusion groups: subgraphs an upstream pass carved out so an
// external kernel compiler can turn them into one fast kernel. The emitter stays
// agnostic of any particular backend behind the KernelCompiler trait; it packages the
// fused body plus typed input/output interface descriptions into a KernelRequest, hands
// it over, and emits a single call instruction referencing the returned artifact. Which
// external strategies are honored is controlled by EmitOptions; a group whose declared
// strategy is disabled, or any compiler failure, falls back to nothing: inline emission
// of the body when the strategy is Inline, a fatal KernelCompile error otherwise, since
// silently deoptimizing a group the upstream pass promised to fuse would mask real
// configuration mistakes.

//! External kernel compilation interface for fused subgraphs.

use crate::error::{EmitError, EmitResult};
use crate::graph::{Dtype, FusionStrategy, GraphId, Model, Node, NodeId, ValueId};

use super::program::{Opcode, Operand, RegId};
use super::Emitter;

/// Shape and dtype of one value crossing a fused-subgraph boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueDesc {
    pub name: String,
    pub dtype: Option<Dtype>,
    pub shape: Vec<i64>,
}

/// Everything a backend needs to compile one fused subgraph.
#[derive(Debug)]
pub struct KernelRequest<'a> {
    /// Scheduled nodes of the fused body.
    pub nodes: &'a [NodeId],
    /// Upstream-assigned group id, unique per model.
    pub fusion_group: i64,
    pub inputs: Vec<ValueDesc>,
    pub outputs: Vec<ValueDesc>,
}

/// Artifact handed back by a kernel compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum KernelArtifact {
    /// A shared library on disk exposing one entry symbol.
    Library { path: String, symbol: String },
    /// Kernel source text compiled by the VM at load time.
    Source { text: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledKernel {
    pub artifact: KernelArtifact,
    /// Shape of the fused computation's result buffer.
    pub output_shape: Vec<i64>,
}

/// Compiles one fused subgraph into an executable artifact.
///
/// Errors are reported as plain strings; the emitter wraps them with node
/// context into [`EmitError::KernelCompile`].
pub trait KernelCompiler {
    fn compile(&self, model: &Model, request: &KernelRequest<'_>) -> Result<CompiledKernel, String>;
}

fn structural(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::StructuralViolation { node: node.debug_string(), reason: reason.into() }
}

fn compile_error(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::KernelCompile { node: node.debug_string(), reason: reason.into() }
}

impl<'a> Emitter<'a> {
    pub(crate) fn emit_fusion_group(&mut self, node: &Node) -> EmitResult<()> {
        let model = self.model;
        if node.subgraphs.len() != 1 {
            return Err(structural(node, format!("expected 1 fused body, got {}", node.subgraphs.len())));
        }
        let body = node.subgraphs[0];
        let g = model.graph(body);
        if g.inputs.len() != node.inputs.len() {
            return Err(structural(
                node,
                format!("body declares {} formals for {} inputs", g.inputs.len(), node.inputs.len()),
            ));
        }
        if g.outputs.len() != node.outputs.len() {
            return Err(structural(
                node,
                format!("body yields {} outputs, node declares {}", g.outputs.len(), node.outputs.len()),
            ));
        }

        let strategy = node.attrs.fusion_strategy;
        let sequence = model.computation_sequence(body);
        let summary: Vec<String> = sequence.iter().map(|&n| model.node(n).op.to_string()).collect();
        log::debug!("fusion group {} [{}]: {}", node.attrs.fusion_group, summary.join("+"), node.name);

        match strategy {
            FusionStrategy::Library if self.opts.use_library_backend => {
                let kernel = self.compile_kernel(node, &sequence)?;
                let KernelArtifact::Library { path, symbol } = kernel.artifact else {
                    return Err(compile_error(node, "backend returned a source artifact for the library strategy"));
                };
                let (outs, ins) = self.boundary_regs(node)?;
                self.push_op(
                    node,
                    Opcode::CallLibraryKernel,
                    vec![
                        Operand::Regs(outs),
                        Operand::Regs(ins),
                        Operand::Str(path),
                        Operand::Str(symbol),
                        Operand::Ints(kernel.output_shape),
                    ],
                );
                Ok(())
            }
            FusionStrategy::Source if self.opts.use_source_backend => {
                let kernel = self.compile_kernel(node, &sequence)?;
                let KernelArtifact::Source { text } = kernel.artifact else {
                    return Err(compile_error(node, "backend returned a library artifact for the source strategy"));
                };
                let (outs, ins) = self.boundary_regs(node)?;
                self.push_op(
                    node,
                    Opcode::CallSourceKernel,
                    vec![
                        Operand::Regs(outs),
                        Operand::Regs(ins),
                        Operand::Str(text),
                        Operand::Int(node.attrs.fusion_group),
                    ],
                );
                Ok(())
            }
            _ => self.emit_inline(node, body),
        }
    }

    fn compile_kernel(&self, node: &Node, sequence: &[NodeId]) -> EmitResult<CompiledKernel> {
        let model = self.model;
        let Some(kernels) = self.kernels else {
            return Err(compile_error(node, "an external strategy is enabled but no kernel compiler was supplied"));
        };
        let request = KernelRequest {
            nodes: sequence,
            fusion_group: node.attrs.fusion_group,
            inputs: node.inputs.iter().map(|&v| self.describe(v)).collect(),
            outputs: node.outputs.iter().map(|&v| self.describe(v)).collect(),
        };
        kernels.compile(model, &request).map_err(|reason| compile_error(node, reason))
    }

    fn describe(&self, value: ValueId) -> ValueDesc {
        let v = self.model.value(value);
        ValueDesc {
            name: v.name.clone(),
            dtype: v.ty.as_ref().map(|t| t.dtype),
            shape: v.ty.as_ref().map(|t| t.dims.clone()).unwrap_or_default(),
        }
    }

    fn boundary_regs(&self, node: &Node) -> EmitResult<(Vec<RegId>, Vec<RegId>)> {
        let mut outs = Vec::with_capacity(node.outputs.len());
        for i in 0..node.outputs.len() {
            outs.push(self.out_id(node, i)?);
        }
        let mut ins = Vec::with_capacity(node.inputs.len());
        for i in 0..node.inputs.len() {
            ins.push(self.in_id(node, i)?);
        }
        Ok((outs, ins))
    }

    /// Fallback lowering: run the fused body in place, exactly as if the
    /// fusion pass had never grouped it.
    fn emit_inline(&mut self, node: &Node, body: GraphId) -> EmitResult<()> {
        let model = self.model;
        self.regs.assign_graph_ids(model, body)?;
        let g = model.graph(body);
        let formals = g.inputs.clone();
        let body_outputs = g.outputs.clone();

        for (i, &formal) in formals.iter().enumerate() {
            let binding = self.in_id(node, i)?;
            let reg = self.regs.get(model, formal)?;
            self.push_op(node, Opcode::Identity, vec![Operand::Reg(reg), Operand::Reg(binding)]);
        }
        self.emit_graph(body, true, &body_outputs)?;
        for &formal in &formals {
            let reg = self.regs.get(model, formal)?;
            self.free(reg);
        }
        for (i, &result) in body_outputs.iter().enumerate() {
            self.yield_result(node, i, result)?;
        }
        Ok(())
    }
}
