// This module lowers the two structured control-flow constructs into plain jumps over
// the linear instruction sequence. A conditional becomes a JmpTrue over the else-block
// followed by an unconditional Jmp over the then-block; a loop becomes synthesized
// iteration/condition registers, a pre-loop skip check, the body followed by its
// bookkeeping tail, and a single conditional backward jump. Forward jump targets are
// emitted with the pending sentinel and backpatched as soon as the intervening code
// length is known; the one backward jump needs no patching because its target already
// exists. Branch and body scopes bind their formal inputs by explicit copies from the
// enclosing scope's registers and hand results back by moves into the construct node's
// output registers, so each arm leaves identical register state behind.

use crate::error::{EmitError, EmitResult};
use crate::graph::{Dtype, GraphId, Node, ValueId};

use super::program::{Opcode, Operand, RegId, PENDING_TARGET};
use super::Emitter;

fn structural(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::StructuralViolation { node: node.debug_string(), reason: reason.into() }
}

impl<'a> Emitter<'a> {
    pub(crate) fn emit_if(&mut self, node: &Node) -> EmitResult<()> {
        let model = self.model;
        if node.subgraphs.len() != 2 {
            return Err(structural(node, format!("expected 2 branch bodies, got {}", node.subgraphs.len())));
        }
        if node.inputs.is_empty() {
            return Err(structural(node, "missing selector input".to_string()));
        }
        let (then_body, else_body) = (node.subgraphs[0], node.subgraphs[1]);
        let num_bound = node.inputs.len() - 1;
        for &body in &[then_body, else_body] {
            let g = model.graph(body);
            if g.inputs.len() != num_bound {
                return Err(structural(
                    node,
                    format!("branch {:?} declares {} formals for {num_bound} bound inputs", g.name, g.inputs.len()),
                ));
            }
            if g.outputs.len() != node.outputs.len() {
                return Err(structural(
                    node,
                    format!("branch {:?} yields {} outputs, node declares {}", g.name, g.outputs.len(), node.outputs.len()),
                ));
            }
        }

        let selector = self.in_id(node, 0)?;
        let mut bindings = Vec::with_capacity(num_bound);
        for i in 0..num_bound {
            bindings.push(self.in_id(node, i + 1)?);
        }
        self.regs.assign_graph_ids(model, then_body)?;
        self.regs.assign_graph_ids(model, else_body)?;

        // Fall through into the else-branch; JmpTrue skips over it.
        let branch_jmp = self.prog.len();
        self.push_op(
            node,
            Opcode::JmpTrue,
            vec![Operand::Reg(selector), Operand::Int(PENDING_TARGET)],
        );
        self.emit_branch(node, else_body, &bindings)?;
        let done_jmp = self.prog.len();
        self.push_op(node, Opcode::Jmp, vec![Operand::Int(PENDING_TARGET)]);
        let then_start = self.prog.len();
        self.prog.patch_jump(branch_jmp, then_start);
        self.emit_branch(node, then_body, &bindings)?;
        let done = self.prog.len();
        self.prog.patch_jump(done_jmp, done);
        Ok(())
    }

    /// Emit one conditional arm: bind the formals, run the body, free the
    /// formals and move the body outputs into the node's output registers.
    fn emit_branch(&mut self, node: &Node, body: GraphId, bindings: &[RegId]) -> EmitResult<()> {
        let model = self.model;
        let g = model.graph(body);
        let formals = g.inputs.clone();
        let body_outputs = g.outputs.clone();

        for (i, &formal) in formals.iter().enumerate() {
            let reg = self.regs.get(model, formal)?;
            self.push_op(node, Opcode::Identity, vec![Operand::Reg(reg), Operand::Reg(bindings[i])]);
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

    /// Hand one scope result back into output slot `i` of the construct.
    /// A null body result materializes as NullConstant so both arms define
    /// the slot; an undeclared node output releases the body register.
    pub(crate) fn yield_result(&mut self, node: &Node, i: usize, result: ValueId) -> EmitResult<()> {
        let model = self.model;
        let out = self.opt_out_id(node, i)?;
        if model.value(result).is_null() {
            if !out.is_none() {
                self.push_op(node, Opcode::NullConstant, vec![Operand::Reg(out)]);
            }
            return Ok(());
        }
        let reg = self.regs.get(model, result)?;
        if out.is_none() {
            self.free(reg);
        } else {
            self.move_reg(node, out, reg);
        }
        Ok(())
    }

    pub(crate) fn emit_loop(&mut self, node: &Node) -> EmitResult<()> {
        let model = self.model;
        if node.subgraphs.len() != 1 {
            return Err(structural(node, format!("expected 1 loop body, got {}", node.subgraphs.len())));
        }
        if node.inputs.len() < 2 {
            return Err(structural(node, format!("expected at least 2 inputs, got {}", node.inputs.len())));
        }
        let body = node.subgraphs[0];
        let g = model.graph(body);
        let num_states = node.inputs.len() - 2;
        if g.inputs.len() != node.inputs.len() {
            return Err(structural(
                node,
                format!("body declares {} formals for {} loop inputs", g.inputs.len(), node.inputs.len()),
            ));
        }
        if g.outputs.len() < 1 + num_states {
            return Err(structural(
                node,
                format!("body yields {} outputs, need at least {}", g.outputs.len(), 1 + num_states),
            ));
        }
        let num_scans = g.outputs.len() - 1 - num_states;
        if node.outputs.len() != num_states + num_scans {
            return Err(structural(
                node,
                format!("node declares {} outputs for {num_states} states and {num_scans} scans", node.outputs.len()),
            ));
        }

        let trip = self.opt_in_id(node, 0)?;
        let terminal = self.opt_in_id(node, 1)?;
        if trip.is_none() && terminal.is_none() {
            return Err(structural(node, "neither trip count nor terminal condition is bound".to_string()));
        }

        self.regs.assign_graph_ids(model, body)?;
        let formals = g.inputs.clone();
        let body_outputs = g.outputs.clone();
        let iter_reg = self.regs.get(model, formals[0])?;
        let cond_reg = self.regs.get(model, formals[1])?;
        let mut state_regs = Vec::with_capacity(num_states);
        for &formal in &formals[2..] {
            state_regs.push(self.regs.get(model, formal)?);
        }

        // Iteration counter and running condition.
        self.int_scalar(node, iter_reg, 0, Dtype::Int64);
        self.int_scalar(node, cond_reg, 1, Dtype::Bool);
        for i in 0..num_states {
            let init = self.in_id(node, i + 2)?;
            self.push_op(node, Opcode::Identity, vec![Operand::Reg(state_regs[i]), Operand::Reg(init)]);
        }
        let mut scan_accs = Vec::with_capacity(num_scans);
        for _ in 0..num_scans {
            let acc = self.regs.fresh();
            self.push_op(node, Opcode::SequenceCreate, vec![Operand::Reg(acc)]);
            scan_accs.push(acc);
        }

        // Pre-loop skip check; a zero trip count or a false terminal
        // condition means the body never runs.
        let mut skip_cond = RegId::NONE;
        if !trip.is_none() {
            let zero = self.regs.fresh();
            self.int_scalar(node, zero, 0, Dtype::Int64);
            let reg = self.regs.fresh();
            self.push_op(node, Opcode::Greater, vec![Operand::Reg(reg), Operand::Reg(trip), Operand::Reg(zero)]);
            self.free(zero);
            skip_cond = reg;
        }
        if !terminal.is_none() {
            if skip_cond.is_none() {
                let reg = self.regs.fresh();
                self.push_op(node, Opcode::Identity, vec![Operand::Reg(reg), Operand::Reg(terminal)]);
                skip_cond = reg;
            } else {
                let reg = self.regs.fresh();
                self.push_op(node, Opcode::Mul, vec![Operand::Reg(reg), Operand::Reg(skip_cond), Operand::Reg(terminal)]);
                self.free(skip_cond);
                skip_cond = reg;
            }
        }
        let skip_jmp = self.prog.len();
        self.push_op(node, Opcode::JmpFalse, vec![Operand::Reg(skip_cond), Operand::Int(PENDING_TARGET)]);

        let loop_begin = self.prog.len();
        self.emit_graph(body, true, &body_outputs)?;

        // Tail bookkeeping: advance the counter, then refresh the formals
        // from the body outputs for the next iteration.
        let one = self.regs.fresh();
        self.int_scalar(node, one, 1, Dtype::Int64);
        let next_iter = self.regs.fresh();
        self.push_op(node, Opcode::Add, vec![Operand::Reg(next_iter), Operand::Reg(iter_reg), Operand::Reg(one)]);
        self.free(one);
        for &formal in &formals {
            let reg = self.regs.get(model, formal)?;
            self.free(reg);
        }
        self.move_reg(node, iter_reg, next_iter);
        let cond_out = self.regs.get(model, body_outputs[0])?;
        self.move_reg(node, cond_reg, cond_out);
        for i in 0..num_states {
            let result = body_outputs[1 + i];
            if model.value(result).is_null() {
                self.push_op(node, Opcode::NullConstant, vec![Operand::Reg(state_regs[i])]);
            } else {
                let reg = self.regs.get(model, result)?;
                self.move_reg(node, state_regs[i], reg);
            }
        }
        for i in 0..num_scans {
            let reg = self.regs.get(model, body_outputs[1 + num_states + i])?;
            self.push_op(node, Opcode::SequenceAppend, vec![Operand::Reg(scan_accs[i]), Operand::Reg(reg)]);
            self.free(reg);
        }

        // Continuation: fold the trip count into the running condition.
        if terminal.is_none() {
            self.free(cond_reg);
            self.push_op(node, Opcode::Greater, vec![Operand::Reg(cond_reg), Operand::Reg(trip), Operand::Reg(iter_reg)]);
        } else if !trip.is_none() {
            let below = self.regs.fresh();
            self.push_op(node, Opcode::Greater, vec![Operand::Reg(below), Operand::Reg(trip), Operand::Reg(iter_reg)]);
            let combined = self.regs.fresh();
            self.push_op(node, Opcode::Mul, vec![Operand::Reg(combined), Operand::Reg(cond_reg), Operand::Reg(below)]);
            self.free(below);
            self.free(cond_reg);
            self.move_reg(node, cond_reg, combined);
        }
        self.push_op(node, Opcode::JmpTrue, vec![Operand::Reg(cond_reg), Operand::Int(loop_begin as i64)]);

        let after_loop = self.prog.len();
        self.prog.patch_jump(skip_jmp, after_loop);
        self.free(skip_cond);

        // Final states live in the (possibly never refreshed) formals.
        for i in 0..num_states {
            let out = self.opt_out_id(node, i)?;
            if out.is_none() {
                self.free(state_regs[i]);
            } else {
                self.move_reg(node, out, state_regs[i]);
            }
        }
        let stack_axis = node.attrs.stack_axis;
        for i in 0..num_scans {
            let out = self.opt_out_id(node, num_states + i)?;
            if out.is_none() {
                self.free(scan_accs[i]);
                continue;
            }
            self.push_op(
                node,
                Opcode::SequenceStack,
                vec![Operand::Reg(out), Operand::Reg(scan_accs[i]), Operand::Int(stack_axis)],
            );
            self.free(scan_accs[i]);
        }
        self.free(iter_reg);
        self.free(cond_reg);
        Ok(())
    }

    pub(crate) fn int_scalar(&mut self, node: &Node, reg: RegId, value: i64, dtype: Dtype) {
        self.push_op(
            node,
            Opcode::IntScalarConstant,
            vec![Operand::Reg(reg), Operand::Int(value), Operand::Int(dtype.code())],
        );
    }
}
