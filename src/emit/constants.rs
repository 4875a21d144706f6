// This module lowers compile-time constant payloads into literal instructions. The
// float/int split follows the tensor's dtype, the element readers dispatch on byte
// width, and a width without a reader is surfaced as MalformedAttribute with the node
// context attached. Rank-0 tensors become scalar literal instructions, everything else
// becomes a buffer literal carrying the element vector plus the shape; either form also
// carries the numeric dtype tag so the VM can materialize the exact element type.
// Constant sequences reuse the same per-element lowering into scratch registers and
// assemble the result with SequenceCreate/SequenceAppend, releasing each scratch
// register after it is appended.

use crate::error::{EmitError, EmitResult};
use crate::graph::{Node, Tensor};

use super::program::{Opcode, Operand, RegId};
use super::Emitter;

fn malformed(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::MalformedAttribute { node: node.debug_string(), reason: reason.into() }
}

impl<'a> Emitter<'a> {
    pub(crate) fn emit_constant(&mut self, node: &Node) -> EmitResult<()> {
        if !node.inputs.is_empty() || node.outputs.len() != 1 {
            return Err(EmitError::StructuralViolation {
                node: node.debug_string(),
                reason: "expected no inputs and exactly 1 output".to_string(),
            });
        }
        let tensor = node
            .attrs
            .tensor
            .as_ref()
            .ok_or_else(|| malformed(node, "missing tensor payload".to_string()))?;
        let out = self.out_id(node, 0)?;
        self.emit_constant_impl(node, tensor, out)
    }

    pub(crate) fn emit_constant_sequence(&mut self, node: &Node) -> EmitResult<()> {
        if !node.inputs.is_empty() || node.outputs.len() != 1 {
            return Err(EmitError::StructuralViolation {
                node: node.debug_string(),
                reason: "expected no inputs and exactly 1 output".to_string(),
            });
        }
        let out = self.out_id(node, 0)?;
        let mut elements = Vec::with_capacity(node.attrs.tensors.len());
        for tensor in &node.attrs.tensors {
            let reg = self.regs.fresh();
            self.emit_constant_impl(node, tensor, reg)?;
            elements.push(reg);
        }
        self.push_op(node, Opcode::SequenceCreate, vec![Operand::Reg(out)]);
        for reg in elements {
            self.push_op(node, Opcode::SequenceAppend, vec![Operand::Reg(out), Operand::Reg(reg)]);
            self.free(reg);
        }
        Ok(())
    }

    fn emit_constant_impl(&mut self, node: &Node, tensor: &Tensor, out: RegId) -> EmitResult<()> {
        let dtype = tensor.dtype();
        let code = dtype.code();
        let n = tensor.num_elements();
        if dtype.is_float() {
            let mut values = Vec::with_capacity(n);
            for i in 0..n {
                values.push(tensor.float_element(i).map_err(|e| malformed(node, e.to_string()))?);
            }
            if tensor.dims().is_empty() {
                self.push_op(
                    node,
                    Opcode::FloatScalarConstant,
                    vec![Operand::Reg(out), Operand::Float(values[0]), Operand::Int(code)],
                );
            } else {
                let shape = tensor.dims().to_vec();
                self.push_op(
                    node,
                    Opcode::FloatConstant,
                    vec![Operand::Reg(out), Operand::Floats(values), Operand::Int(code), Operand::Ints(shape)],
                );
            }
        } else {
            let mut values = Vec::with_capacity(n);
            for i in 0..n {
                values.push(tensor.int_element(i).map_err(|e| malformed(node, e.to_string()))?);
            }
            if tensor.dims().is_empty() {
                self.push_op(
                    node,
                    Opcode::IntScalarConstant,
                    vec![Operand::Reg(out), Operand::Int(values[0]), Operand::Int(code)],
                );
            } else {
                let shape = tensor.dims().to_vec();
                self.push_op(
                    node,
                    Opcode::IntConstant,
                    vec![Operand::Reg(out), Operand::Ints(values), Operand::Int(code), Operand::Ints(shape)],
                );
            }
        }
        Ok(())
    }
}
