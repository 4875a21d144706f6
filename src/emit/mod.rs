// This module is the heart of the crate: the single-pass emitter that walks a finalized
// graph in its precomputed schedule order and appends VM instructions to the Program.
// emit_model drives the top-level protocol: assign register ids to the root scope's
// values, stage named In instructions for graph inputs before their first use, dispatch
// each node (emit/dispatch.rs), free registers at their statically-last use through the
// ScopeLiveness bookkeeping, then emit named Out instructions plus frees for the
// declared outputs. Nested scopes (fusion bodies, conditional branches, loop bodies)
// re-enter the same emit_graph walk recursively with fresh id ranges layered on the
// running counter. EmitOptions is the explicit immutable configuration value threaded
// into the entry point, replacing any ambient global flags: it selects which external
// fusion backends are enabled and whether the per-register memory dump is logged.

//! Graph-to-bytecode emission.

use hashbrown::HashSet;

use crate::error::EmitResult;
use crate::graph::{GraphId, Model, Node, NodeId, ValueId, ValueKind};

mod constants;
mod control;
mod dispatch;
pub mod fusion;
pub mod program;
pub mod regalloc;

pub use fusion::{CompiledKernel, KernelArtifact, KernelCompiler, KernelRequest, ValueDesc};
pub use program::{Instruction, Opcode, Operand, Program, RegId, PENDING_TARGET};
pub use regalloc::{RegisterAllocator, ScopeLiveness};

/// Immutable emission configuration, threaded into the entry point.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Allow fusion groups declaring the library strategy to call the
    /// external kernel compiler.
    pub use_library_backend: bool,
    /// Allow fusion groups declaring the source strategy to call the
    /// external kernel compiler.
    pub use_source_backend: bool,
    /// Log a per-register id/name/byte-size report and a running memory
    /// total after emission. Informational only.
    pub dump_registers: bool,
}

/// Policy for binding a value into a consuming construct.
///
/// Move is chosen when the source has exactly one remaining consumer; it
/// avoids quadratic copying in append/pop-style sequence operations and must
/// never change observable results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindPolicy {
    Move,
    Copy,
}

/// Translate a finalized model into a VM program. Fusion groups declaring an
/// external strategy are lowered inline unless the matching backend is
/// enabled in `opts`; an enabled backend needs a kernel compiler, supplied
/// via [`emit_model_with_kernels`].
pub fn emit_model(model: &Model, opts: &EmitOptions) -> EmitResult<Program> {
    Emitter::new(model, opts, None).run()
}

/// Translate with an external kernel compiler for fused subgraphs.
pub fn emit_model_with_kernels(
    model: &Model,
    opts: &EmitOptions,
    kernels: &dyn KernelCompiler,
) -> EmitResult<Program> {
    Emitter::new(model, opts, Some(kernels)).run()
}

pub(crate) struct Emitter<'a> {
    pub(crate) model: &'a Model,
    pub(crate) opts: &'a EmitOptions,
    pub(crate) kernels: Option<&'a dyn KernelCompiler>,
    pub(crate) regs: RegisterAllocator,
    emitted: HashSet<NodeId>,
    warned: HashSet<&'static str>,
    pub(crate) prog: Program,
}

impl<'a> Emitter<'a> {
    fn new(model: &'a Model, opts: &'a EmitOptions, kernels: Option<&'a dyn KernelCompiler>) -> Self {
        Emitter {
            model,
            opts,
            kernels,
            regs: RegisterAllocator::new(),
            emitted: HashSet::new(),
            warned: HashSet::new(),
            prog: Program::new(),
        }
    }

    fn run(mut self) -> EmitResult<Program> {
        let model = self.model;
        let root = model.root();
        self.regs.assign_graph_ids(model, root)?;
        let outputs = model.graph(root).outputs.clone();
        self.emit_graph(root, false, &outputs)?;
        self.emit_outputs(&outputs)?;
        if self.opts.dump_registers {
            self.dump_registers();
        }
        log::debug!(
            "emitted {} instructions for graph {:?}",
            self.prog.len(),
            model.graph(root).name
        );
        Ok(self.prog)
    }

    /// Emit one scope: walk its computation sequence, dispatch each node and
    /// free registers at their statically-last use. Nested scopes do not
    /// track their formals here; the construct lowering frees them.
    pub(crate) fn emit_graph(
        &mut self,
        graph: GraphId,
        nested: bool,
        outputs: &[ValueId],
    ) -> EmitResult<()> {
        let model = self.model;
        let mut live = ScopeLiveness::new(model, graph, !nested, outputs);
        let mut staged: HashSet<ValueId> = HashSet::new();

        for node_id in model.computation_sequence(graph) {
            if !self.emitted.insert(node_id) {
                continue;
            }
            let node = model.node(node_id);

            if !nested {
                for &input in &node.inputs {
                    let value = model.value(input);
                    if value.kind != ValueKind::Input || !staged.insert(input) {
                        continue;
                    }
                    let reg = self.regs.get(model, input)?;
                    self.prog.push(Instruction {
                        opcode: Opcode::In,
                        operands: vec![Operand::Reg(reg), Operand::Str(value.name.clone())],
                        debug: value.name.clone(),
                        order: -1,
                    });
                }
            }

            self.emit_node(node_id)?;

            for &output in &node.outputs {
                if live.take_pending_output(output) {
                    continue;
                }
                let value = model.value(output);
                if value.kind == ValueKind::Temp && value.consumers.is_empty() {
                    let reg = self.regs.get(model, output)?;
                    self.free(reg);
                }
            }
            for &input in &node.inputs {
                if live.consume(input) {
                    let reg = self.regs.get(model, input)?;
                    self.free(reg);
                }
            }
        }
        Ok(())
    }

    fn emit_outputs(&mut self, outputs: &[ValueId]) -> EmitResult<()> {
        let model = self.model;
        for &output in outputs {
            let value = model.value(output);
            if value.is_null() {
                self.warn_once("null-graph-output", "a null graph output was dropped");
                continue;
            }
            let reg = self.regs.get(model, output)?;
            self.prog.push(Instruction {
                opcode: Opcode::Out,
                operands: vec![Operand::Str(value.name.clone()), Operand::Reg(reg)],
                debug: value.name.clone(),
                order: -1,
            });
            self.free(reg);
        }
        Ok(())
    }

    /// Append one instruction attributed to `node`.
    pub(crate) fn push_op(&mut self, node: &Node, opcode: Opcode, operands: Vec<Operand>) {
        self.prog.push(Instruction {
            opcode,
            operands,
            debug: node.debug_string(),
            order: node.order.unwrap_or(-1),
        });
    }

    /// Release a register after its statically-last use.
    pub(crate) fn free(&mut self, reg: RegId) {
        self.prog.push(Instruction {
            opcode: Opcode::Free,
            operands: vec![Operand::Reg(reg)],
            debug: String::new(),
            order: -1,
        });
    }

    /// Copy `src` into `dst` and release `src`.
    pub(crate) fn move_reg(&mut self, node: &Node, dst: RegId, src: RegId) {
        self.push_op(node, Opcode::Identity, vec![Operand::Reg(dst), Operand::Reg(src)]);
        self.free(src);
    }

    /// Bind policy for feeding `value` into a consuming construct.
    pub(crate) fn bind_policy(&self, value: ValueId) -> BindPolicy {
        if self.model.value(value).consumers.len() == 1 {
            BindPolicy::Move
        } else {
            BindPolicy::Copy
        }
    }

    /// Warn about a supported-but-incomplete behavior, once per cause.
    pub(crate) fn warn_once(&mut self, key: &'static str, message: &str) {
        if self.warned.insert(key) {
            log::warn!("{message}");
        }
    }

    fn dump_registers(&self) {
        let mut assignments: Vec<_> = self.regs.assignments().collect();
        assignments.sort_by_key(|&(_, reg)| reg);
        log::debug!("=== {} registers ===", assignments.len());
        let mut total: i64 = 0;
        for (value, reg) in assignments {
            let value = self.model.value(value);
            let nbytes = value.nbytes().unwrap_or(0);
            total += nbytes;
            log::debug!("{reg}: {} {nbytes}", value.name);
        }
        log::debug!("total size of all registers: {}MB", total / 1000 / 1000);
    }
}
