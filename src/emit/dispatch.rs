// This module contains the per-node lowering dispatch: operand resolution (mandatory
// operands are fatal when missing or null, optional operands collapse to the absent-id
// sentinel), arity validation, attribute normalization (symmetric padding collapse,
// stride defaulting, direction-string mapping) and the big match that routes each
// operation kind to a direct 1:1 lowering, a parametrized lowering, or one of the four
// structural lowerings implemented in the sibling modules. An operation kind without a
// lowering is rejected as UnsupportedOperation: a configuration error, never recovered.

use crate::error::{EmitError, EmitResult};
use crate::graph::{Node, NodeId, OpKind};

use super::program::{Opcode, Operand, RegId};
use super::{BindPolicy, Emitter};

fn structural(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::StructuralViolation { node: node.debug_string(), reason: reason.into() }
}

fn malformed(node: &Node, reason: impl Into<String>) -> EmitError {
    EmitError::MalformedAttribute { node: node.debug_string(), reason: reason.into() }
}

impl<'a> Emitter<'a> {
    pub(crate) fn emit_node(&mut self, node_id: NodeId) -> EmitResult<()> {
        let model = self.model;
        let node = model.node(node_id);

        use Opcode as Op;
        match node.op {
            // Direct unary lowerings.
            OpKind::Neg => self.simple_unary(node, Op::Neg),
            OpKind::Reciprocal => self.simple_unary(node, Op::Reciprocal),
            OpKind::Exp => self.simple_unary(node, Op::Exp),
            OpKind::Log => self.simple_unary(node, Op::Log),
            OpKind::Sqrt => self.simple_unary(node, Op::Sqrt),
            OpKind::Tanh => self.simple_unary(node, Op::Tanh),
            OpKind::Abs => self.simple_unary(node, Op::Abs),
            OpKind::Relu => self.simple_unary(node, Op::Relu),
            OpKind::Floor => self.simple_unary(node, Op::Floor),
            OpKind::Ceil => self.simple_unary(node, Op::Ceil),
            OpKind::Sigmoid => self.simple_unary(node, Op::Sigmoid),
            OpKind::Not => self.simple_unary(node, Op::Not),
            OpKind::Identity => self.simple_unary(node, Op::Identity),

            // Direct binary lowerings.
            OpKind::Add => self.simple_binary(node, Op::Add),
            OpKind::Sub => self.simple_binary(node, Op::Sub),
            OpKind::Mul => self.simple_binary(node, Op::Mul),
            OpKind::Div => self.simple_binary(node, Op::Div),
            OpKind::Pow => self.simple_binary(node, Op::Pow),
            OpKind::Equal => self.simple_binary(node, Op::Equal),
            OpKind::Greater => self.simple_binary(node, Op::Greater),
            OpKind::And => self.simple_binary(node, Op::And),
            OpKind::Or => self.simple_binary(node, Op::Or),
            OpKind::Xor => self.simple_binary(node, Op::Xor),
            OpKind::MatMul => self.simple_binary(node, Op::MatMul),

            OpKind::Gemm => self.emit_gemm(node),
            OpKind::Conv => self.emit_conv(node),
            OpKind::MaxPool => self.emit_pool(node, Op::MaxPool, None),
            OpKind::AveragePool => {
                let extra = Operand::Int(node.attrs.count_include_pad as i64);
                self.emit_pool(node, Op::AveragePool, Some(extra))
            }

            OpKind::Reshape => self.simple_binary(node, Op::Reshape),
            OpKind::Expand => self.simple_binary(node, Op::Expand),
            OpKind::Squeeze => self.emit_axes_op(node, Op::Squeeze),
            OpKind::Unsqueeze => self.emit_axes_op(node, Op::Unsqueeze),
            OpKind::Transpose => {
                self.require_io(node, 1, 1)?;
                let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
                let perm = node.attrs.perm.clone();
                self.push_op(node, Op::Transpose, vec![Operand::Reg(out), Operand::Reg(inp), Operand::Ints(perm)]);
                Ok(())
            }
            OpKind::Shape => self.simple_unary(node, Op::Shape),
            OpKind::Size => self.simple_unary(node, Op::Size),
            OpKind::Pad => self.emit_pad(node),
            OpKind::Slice => self.emit_slice(node),
            OpKind::Gather => {
                self.require_io(node, 2, 1)?;
                let (out, data, indices) = (self.out_id(node, 0)?, self.in_id(node, 0)?, self.in_id(node, 1)?);
                let axis = node.attrs.axis;
                self.push_op(
                    node,
                    Op::Gather,
                    vec![Operand::Reg(out), Operand::Reg(data), Operand::Reg(indices), Operand::Int(axis)],
                );
                Ok(())
            }
            OpKind::Concat => self.emit_concat(node),
            OpKind::Split => self.emit_split(node),
            OpKind::Clip => {
                self.require_io(node, 1, 1)?;
                let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
                let (min, max) = (node.attrs.min, node.attrs.max);
                self.push_op(
                    node,
                    Op::Clip,
                    vec![Operand::Reg(out), Operand::Reg(inp), Operand::Float(min), Operand::Float(max)],
                );
                Ok(())
            }

            OpKind::Softmax => self.emit_softmax(node, Op::Softmax),
            OpKind::LogSoftmax => self.emit_softmax(node, Op::LogSoftmax),
            OpKind::Dropout => self.emit_dropout(node),

            OpKind::ReduceSum => self.emit_reduce(node, Op::ReduceSum),
            OpKind::ReduceMax => self.emit_reduce(node, Op::ReduceMax),
            OpKind::ReduceMean => self.emit_reduce(node, Op::ReduceMean),
            OpKind::Cast => self.emit_cast(node),

            OpKind::Rnn => self.emit_rnn(node),
            OpKind::Gru => self.emit_gru(node),
            OpKind::Lstm => self.emit_lstm(node),

            OpKind::SequenceCreate => {
                self.require_io(node, 0, 1)?;
                let out = self.out_id(node, 0)?;
                self.push_op(node, Op::SequenceCreate, vec![Operand::Reg(out)]);
                Ok(())
            }
            OpKind::SequenceSize => self.simple_unary_as(node, Op::SequenceSize),
            OpKind::SequenceAppend => self.emit_sequence_append(node),
            OpKind::SequencePop => self.emit_sequence_pop(node),
            OpKind::SequenceLookup => self.simple_binary_as(node, Op::SequenceLookup),
            OpKind::SequenceStack => self.emit_sequence_axis_op(node, Op::SequenceStack),
            OpKind::SequenceConcat => self.emit_sequence_concat(node),
            OpKind::SequenceSeparate => self.emit_sequence_axis_op(node, Op::SequenceSeparate),
            OpKind::SequenceRange => self.emit_sequence_range(node),

            OpKind::NullConstant => {
                self.require_io(node, 0, 1)?;
                let out = self.out_id(node, 0)?;
                self.push_op(node, Op::NullConstant, vec![Operand::Reg(out)]);
                Ok(())
            }

            // Structural lowerings.
            OpKind::If => self.emit_if(node),
            OpKind::Loop => self.emit_loop(node),
            OpKind::FusionGroup => self.emit_fusion_group(node),
            OpKind::Constant => self.emit_constant(node),
            OpKind::ConstantSequence => self.emit_constant_sequence(node),

            OpKind::Einsum | OpKind::TopK | OpKind::NonZero => Err(EmitError::UnsupportedOperation {
                node: node.debug_string(),
                reason: format!("no lowering for operation kind {}", node.op),
            }),
        }
    }

    // ── Operand resolution ──────────────────────────────────────────────

    /// Register id of a mandatory input; missing or null is fatal.
    pub(crate) fn in_id(&self, node: &Node, i: usize) -> EmitResult<RegId> {
        match node.inputs.get(i) {
            Some(&v) if !self.model.value(v).is_null() => self.regs.get(self.model, v),
            _ => Err(structural(node, format!("input {i} is mandatory"))),
        }
    }

    /// Register id of an optional input; absent or null collapses to the
    /// sentinel.
    pub(crate) fn opt_in_id(&self, node: &Node, i: usize) -> EmitResult<RegId> {
        match node.inputs.get(i) {
            Some(&v) if !self.model.value(v).is_null() => self.regs.get(self.model, v),
            _ => Ok(RegId::NONE),
        }
    }

    /// Register id of a mandatory output; missing or null is fatal.
    pub(crate) fn out_id(&self, node: &Node, i: usize) -> EmitResult<RegId> {
        match node.outputs.get(i) {
            Some(&v) if !self.model.value(v).is_null() => self.regs.get(self.model, v),
            _ => Err(structural(node, format!("output {i} is mandatory"))),
        }
    }

    /// Register id of an optional output; absent or null collapses to the
    /// sentinel.
    pub(crate) fn opt_out_id(&self, node: &Node, i: usize) -> EmitResult<RegId> {
        match node.outputs.get(i) {
            Some(&v) if !self.model.value(v).is_null() => self.regs.get(self.model, v),
            _ => Ok(RegId::NONE),
        }
    }

    fn require_io(&self, node: &Node, n_in: usize, n_out: usize) -> EmitResult<()> {
        if node.inputs.len() != n_in {
            return Err(structural(node, format!("expected {n_in} inputs, got {}", node.inputs.len())));
        }
        if node.outputs.len() != n_out {
            return Err(structural(node, format!("expected {n_out} outputs, got {}", node.outputs.len())));
        }
        Ok(())
    }

    // ── Attribute normalization ─────────────────────────────────────────

    /// Pads default to zero per spatial axis; otherwise the list must encode
    /// identical begin/end halves and is collapsed to the begin half.
    fn norm_pads(&self, node: &Node) -> EmitResult<Vec<i64>> {
        let pads = &node.attrs.pads;
        if pads.is_empty() {
            return Ok(vec![0, 0]);
        }
        if pads.len() % 2 != 0 {
            return Err(malformed(node, format!("pad list has odd length {}", pads.len())));
        }
        let half = pads.len() / 2;
        for i in 0..half {
            if pads[i] != pads[i + half] {
                return Err(malformed(node, format!("asymmetric padding {pads:?}")));
            }
        }
        Ok(pads[..half].to_vec())
    }

    /// Strides default to 1 per axis.
    fn norm_strides(&self, node: &Node) -> Vec<i64> {
        if node.attrs.strides.is_empty() {
            vec![1, 1]
        } else {
            node.attrs.strides.clone()
        }
    }

    fn direction_code(&self, node: &Node) -> EmitResult<i64> {
        match node.attrs.direction.as_str() {
            "" | "forward" => Ok(0),
            "reverse" => Ok(1),
            "bidirectional" => Ok(2),
            other => Err(malformed(node, format!("unknown direction {other:?}"))),
        }
    }

    // ── Simple lowerings ────────────────────────────────────────────────

    fn simple_unary(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        self.simple_unary_as(node, opcode)
    }

    fn simple_unary_as(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        self.push_op(node, opcode, vec![Operand::Reg(out), Operand::Reg(inp)]);
        Ok(())
    }

    fn simple_binary(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 2, 1)?;
        self.simple_binary_as(node, opcode)
    }

    fn simple_binary_as(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        let (out, lhs, rhs) = (self.out_id(node, 0)?, self.in_id(node, 0)?, self.in_id(node, 1)?);
        self.push_op(node, opcode, vec![Operand::Reg(out), Operand::Reg(lhs), Operand::Reg(rhs)]);
        Ok(())
    }

    // ── Parametrized lowerings ──────────────────────────────────────────

    fn emit_gemm(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 3, 1)?;
        let (out, a, b, c) =
            (self.out_id(node, 0)?, self.in_id(node, 0)?, self.in_id(node, 1)?, self.in_id(node, 2)?);
        let attrs = &node.attrs;
        let operands = vec![
            Operand::Reg(out),
            Operand::Reg(a),
            Operand::Reg(b),
            Operand::Reg(c),
            Operand::Float(attrs.alpha),
            Operand::Float(attrs.beta),
            Operand::Int(attrs.trans_a as i64),
            Operand::Int(attrs.trans_b as i64),
        ];
        self.push_op(node, Opcode::Gemm, operands);
        Ok(())
    }

    fn emit_conv(&mut self, node: &Node) -> EmitResult<()> {
        if node.inputs.len() < 2 || node.inputs.len() > 3 {
            return Err(structural(node, format!("expected 2 or 3 inputs, got {}", node.inputs.len())));
        }
        if node.outputs.len() != 1 {
            return Err(structural(node, format!("expected 1 output, got {}", node.outputs.len())));
        }
        for &d in &node.attrs.dilations {
            if d != 1 {
                return Err(EmitError::UnsupportedOperation {
                    node: node.debug_string(),
                    reason: format!("dilation {d} is not supported"),
                });
            }
        }
        let (out, x, w, bias) =
            (self.out_id(node, 0)?, self.in_id(node, 0)?, self.in_id(node, 1)?, self.opt_in_id(node, 2)?);
        let strides = self.norm_strides(node);
        let pads = self.norm_pads(node)?;
        let operands = vec![
            Operand::Reg(out),
            Operand::Reg(x),
            Operand::Reg(w),
            Operand::Reg(bias),
            Operand::Ints(strides),
            Operand::Ints(pads),
        ];
        self.push_op(node, Opcode::Conv, operands);
        Ok(())
    }

    /// Pools always carry an auxiliary second output the runtime uses for
    /// the backward pass; when the graph does not declare it, it goes into a
    /// fresh temporary freed right away.
    fn emit_pool(&mut self, node: &Node, opcode: Opcode, extra: Option<Operand>) -> EmitResult<()> {
        if node.inputs.len() != 1 {
            return Err(structural(node, format!("expected 1 input, got {}", node.inputs.len())));
        }
        if node.outputs.is_empty() || node.outputs.len() > 2 {
            return Err(structural(node, format!("expected 1 or 2 outputs, got {}", node.outputs.len())));
        }
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let aux = if node.outputs.len() == 2 { self.opt_out_id(node, 1)? } else { RegId::NONE };
        let (aux, scratch) = if aux.is_none() { (self.regs.fresh(), true) } else { (aux, false) };
        let kernel_shape = node.attrs.kernel_shape.clone();
        let strides = self.norm_strides(node);
        let pads = self.norm_pads(node)?;
        let mut operands = vec![
            Operand::Reg(out),
            Operand::Reg(aux),
            Operand::Reg(inp),
            Operand::Ints(kernel_shape),
            Operand::Ints(strides),
            Operand::Ints(pads),
        ];
        operands.extend(extra);
        self.push_op(node, opcode, operands);
        if scratch {
            self.free(aux);
        }
        Ok(())
    }

    fn emit_axes_op(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let axes = node.attrs.axes.clone();
        self.push_op(node, opcode, vec![Operand::Reg(out), Operand::Reg(inp), Operand::Ints(axes)]);
        Ok(())
    }

    fn emit_pad(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        if node.attrs.mode != "constant" {
            return Err(EmitError::UnsupportedOperation {
                node: node.debug_string(),
                reason: format!("only constant padding is supported, got {:?}", node.attrs.mode),
            });
        }
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let pads = node.attrs.pads.clone();
        let value = node.attrs.value;
        self.push_op(
            node,
            Opcode::Pad,
            vec![Operand::Reg(out), Operand::Reg(inp), Operand::Ints(pads), Operand::Float(value)],
        );
        Ok(())
    }

    fn emit_slice(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let attrs = &node.attrs;
        if attrs.starts.is_empty() || attrs.starts.len() != attrs.ends.len() {
            return Err(malformed(
                node,
                format!("starts/ends must be non-empty and equal length, got {}/{}", attrs.starts.len(), attrs.ends.len()),
            ));
        }
        let axes = if attrs.axes.is_empty() {
            (0..attrs.starts.len() as i64).collect()
        } else if attrs.axes.len() == attrs.starts.len() {
            attrs.axes.clone()
        } else {
            return Err(malformed(node, "axes length does not match starts".to_string()));
        };
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let (starts, ends) = (attrs.starts.clone(), attrs.ends.clone());
        self.push_op(
            node,
            Opcode::Slice,
            vec![
                Operand::Reg(out),
                Operand::Reg(inp),
                Operand::Ints(axes),
                Operand::Ints(starts),
                Operand::Ints(ends),
            ],
        );
        Ok(())
    }

    fn emit_concat(&mut self, node: &Node) -> EmitResult<()> {
        if node.outputs.len() != 1 {
            return Err(structural(node, format!("expected 1 output, got {}", node.outputs.len())));
        }
        let out = self.out_id(node, 0)?;
        let mut ins = Vec::with_capacity(node.inputs.len());
        for i in 0..node.inputs.len() {
            ins.push(self.in_id(node, i)?);
        }
        let axis = node.attrs.axis;
        self.push_op(node, Opcode::Concat, vec![Operand::Reg(out), Operand::Regs(ins), Operand::Int(axis)]);
        Ok(())
    }

    fn emit_split(&mut self, node: &Node) -> EmitResult<()> {
        if node.inputs.len() != 1 {
            return Err(structural(node, format!("expected 1 input, got {}", node.inputs.len())));
        }
        let inp = self.in_id(node, 0)?;
        let mut outs = Vec::with_capacity(node.outputs.len());
        for i in 0..node.outputs.len() {
            outs.push(self.out_id(node, i)?);
        }
        let (axis, split) = (node.attrs.axis, node.attrs.split.clone());
        self.push_op(
            node,
            Opcode::Split,
            vec![Operand::Regs(outs), Operand::Reg(inp), Operand::Int(axis), Operand::Ints(split)],
        );
        Ok(())
    }

    fn emit_softmax(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let axis = if node.attrs.axis < 0 { 1 } else { node.attrs.axis };
        self.push_op(node, opcode, vec![Operand::Reg(out), Operand::Reg(inp), Operand::Int(axis)]);
        Ok(())
    }

    fn emit_dropout(&mut self, node: &Node) -> EmitResult<()> {
        if node.inputs.len() != 1 {
            return Err(structural(node, format!("expected 1 input, got {}", node.inputs.len())));
        }
        if node.outputs.is_empty() || node.outputs.len() > 2 {
            return Err(structural(node, format!("expected 1 or 2 outputs, got {}", node.outputs.len())));
        }
        if node.outputs.len() == 2 {
            self.warn_once("dropout-mask", "the mask output of Dropout is not handled yet");
        }
        let (out, mask, inp) = (self.out_id(node, 0)?, self.opt_out_id(node, 1)?, self.in_id(node, 0)?);
        let ratio = node.attrs.ratio;
        self.push_op(
            node,
            Opcode::Dropout,
            vec![Operand::Reg(out), Operand::Reg(mask), Operand::Reg(inp), Operand::Float(ratio)],
        );
        Ok(())
    }

    fn emit_reduce(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let (axes, keepdims) = (node.attrs.axes.clone(), node.attrs.keepdims);
        self.push_op(
            node,
            opcode,
            vec![Operand::Reg(out), Operand::Reg(inp), Operand::Ints(axes), Operand::Int(keepdims as i64)],
        );
        Ok(())
    }

    fn emit_cast(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let to = node.attrs.to.ok_or_else(|| malformed(node, "missing target dtype".to_string()))?;
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        self.push_op(node, Opcode::Cast, vec![Operand::Reg(out), Operand::Reg(inp), Operand::Int(to.code())]);
        Ok(())
    }

    fn emit_rnn(&mut self, node: &Node) -> EmitResult<()> {
        let operands = vec![
            Operand::Reg(self.opt_out_id(node, 0)?),
            Operand::Reg(self.opt_out_id(node, 1)?),
            Operand::Reg(self.in_id(node, 0)?),
            Operand::Reg(self.in_id(node, 1)?),
            Operand::Reg(self.in_id(node, 2)?),
            Operand::Reg(self.opt_in_id(node, 3)?),
            Operand::Reg(self.opt_in_id(node, 4)?),
            Operand::Reg(self.opt_in_id(node, 5)?),
            Operand::Int(node.attrs.hidden_size),
            Operand::Int(self.direction_code(node)?),
        ];
        self.push_op(node, Opcode::Rnn, operands);
        Ok(())
    }

    fn emit_gru(&mut self, node: &Node) -> EmitResult<()> {
        let operands = vec![
            Operand::Reg(self.opt_out_id(node, 0)?),
            Operand::Reg(self.opt_out_id(node, 1)?),
            Operand::Reg(self.in_id(node, 0)?),
            Operand::Reg(self.in_id(node, 1)?),
            Operand::Reg(self.in_id(node, 2)?),
            Operand::Reg(self.opt_in_id(node, 3)?),
            Operand::Reg(self.opt_in_id(node, 4)?),
            Operand::Reg(self.opt_in_id(node, 5)?),
            Operand::Int(node.attrs.hidden_size),
            Operand::Int(node.attrs.linear_before_reset as i64),
            Operand::Int(self.direction_code(node)?),
        ];
        self.push_op(node, Opcode::Gru, operands);
        Ok(())
    }

    fn emit_lstm(&mut self, node: &Node) -> EmitResult<()> {
        let operands = vec![
            Operand::Reg(self.opt_out_id(node, 0)?),
            Operand::Reg(self.opt_out_id(node, 1)?),
            Operand::Reg(self.opt_out_id(node, 2)?),
            Operand::Reg(self.in_id(node, 0)?),
            Operand::Reg(self.in_id(node, 1)?),
            Operand::Reg(self.in_id(node, 2)?),
            Operand::Reg(self.opt_in_id(node, 3)?),
            Operand::Reg(self.opt_in_id(node, 4)?),
            Operand::Reg(self.opt_in_id(node, 5)?),
            Operand::Reg(self.opt_in_id(node, 6)?),
            Operand::Reg(self.opt_in_id(node, 7)?),
            Operand::Int(node.attrs.hidden_size),
            Operand::Int(self.direction_code(node)?),
        ];
        self.push_op(node, Opcode::Lstm, operands);
        Ok(())
    }

    // ── Sequence lowerings ──────────────────────────────────────────────

    fn bind_sequence(&mut self, node: &Node, dst: RegId, src: RegId) {
        // Move when this node is the sole remaining consumer; avoids O(N^2)
        // copies in the common append chain.
        let opcode = match self.bind_policy(node.inputs[0]) {
            BindPolicy::Move => Opcode::SequenceMove,
            BindPolicy::Copy => Opcode::SequenceCopy,
        };
        self.push_op(node, opcode, vec![Operand::Reg(dst), Operand::Reg(src)]);
    }

    fn emit_sequence_append(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 2, 1)?;
        let (out, seq, elem) = (self.out_id(node, 0)?, self.in_id(node, 0)?, self.in_id(node, 1)?);
        self.bind_sequence(node, out, seq);
        self.push_op(node, Opcode::SequenceAppend, vec![Operand::Reg(out), Operand::Reg(elem)]);
        Ok(())
    }

    fn emit_sequence_pop(&mut self, node: &Node) -> EmitResult<()> {
        self.require_io(node, 1, 2)?;
        let (rest, elem, seq) = (self.out_id(node, 0)?, self.out_id(node, 1)?, self.in_id(node, 0)?);
        self.bind_sequence(node, rest, seq);
        self.push_op(node, Opcode::SequencePop, vec![Operand::Reg(elem), Operand::Reg(rest)]);
        Ok(())
    }

    fn emit_sequence_axis_op(&mut self, node: &Node, opcode: Opcode) -> EmitResult<()> {
        self.require_io(node, 1, 1)?;
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let axis = node.attrs.axis;
        self.push_op(node, opcode, vec![Operand::Reg(out), Operand::Reg(inp), Operand::Int(axis)]);
        Ok(())
    }

    fn emit_sequence_concat(&mut self, node: &Node) -> EmitResult<()> {
        if node.inputs.len() != 1 {
            return Err(structural(node, format!("expected 1 input, got {}", node.inputs.len())));
        }
        if node.outputs.is_empty() || node.outputs.len() > 2 {
            return Err(structural(node, format!("expected 1 or 2 outputs, got {}", node.outputs.len())));
        }
        let (out, inp) = (self.out_id(node, 0)?, self.in_id(node, 0)?);
        let aux = if node.outputs.len() == 2 { self.opt_out_id(node, 1)? } else { RegId::NONE };
        let (aux, scratch) = if aux.is_none() { (self.regs.fresh(), true) } else { (aux, false) };
        let axis = node.attrs.axis;
        self.push_op(
            node,
            Opcode::SequenceConcat,
            vec![Operand::Reg(out), Operand::Reg(aux), Operand::Reg(inp), Operand::Int(axis)],
        );
        if scratch {
            self.free(aux);
        }
        Ok(())
    }

    fn emit_sequence_range(&mut self, node: &Node) -> EmitResult<()> {
        if node.inputs.is_empty() || node.inputs.len() > 3 {
            return Err(structural(node, format!("expected 1 to 3 inputs, got {}", node.inputs.len())));
        }
        if node.outputs.len() != 1 {
            return Err(structural(node, format!("expected 1 output, got {}", node.outputs.len())));
        }
        let operands = vec![
            Operand::Reg(self.out_id(node, 0)?),
            Operand::Reg(self.in_id(node, 0)?),
            Operand::Reg(self.opt_in_id(node, 1)?),
            Operand::Reg(self.opt_in_id(node, 2)?),
        ];
        self.push_op(node, Opcode::SequenceRange, operands);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{EmitOptions, Emitter};
    use crate::graph::{Attrs, Model};

    fn fixture(attrs: Attrs) -> (Model, Node) {
        let model = Model::new("g");
        let node = Node {
            op: OpKind::Conv,
            name: "n".to_string(),
            inputs: vec![],
            outputs: vec![],
            subgraphs: vec![],
            order: Some(0),
            detached: false,
            attrs,
        };
        (model, node)
    }

    fn with_emitter<R>(model: &Model, f: impl FnOnce(&Emitter<'_>) -> R) -> R {
        let opts = EmitOptions::default();
        let emitter = Emitter::new(model, &opts, None);
        f(&emitter)
    }

    #[test]
    fn test_pads_default_to_zero() {
        let (model, node) = fixture(Attrs::default());
        let pads = with_emitter(&model, |e| e.norm_pads(&node)).unwrap();
        assert_eq!(pads, vec![0, 0]);
    }

    #[test]
    fn test_symmetric_pads_collapse_to_begin_half() {
        let (model, node) = fixture(Attrs { pads: vec![1, 2, 1, 2], ..Attrs::default() });
        let pads = with_emitter(&model, |e| e.norm_pads(&node)).unwrap();
        assert_eq!(pads, vec![1, 2]);
    }

    #[test]
    fn test_asymmetric_pads_are_malformed() {
        let (model, node) = fixture(Attrs { pads: vec![1, 2, 3, 4], ..Attrs::default() });
        let err = with_emitter(&model, |e| e.norm_pads(&node)).unwrap_err();
        assert!(matches!(err, EmitError::MalformedAttribute { .. }));
    }

    #[test]
    fn test_odd_pad_list_is_malformed() {
        let (model, node) = fixture(Attrs { pads: vec![1, 2, 1], ..Attrs::default() });
        let err = with_emitter(&model, |e| e.norm_pads(&node)).unwrap_err();
        assert!(matches!(err, EmitError::MalformedAttribute { .. }));
    }

    #[test]
    fn test_strides_default_to_one() {
        let (model, node) = fixture(Attrs::default());
        assert_eq!(with_emitter(&model, |e| e.norm_strides(&node)), vec![1, 1]);
    }

    #[test]
    fn test_direction_mapping() {
        for (dir, want) in [("", 0), ("forward", 0), ("reverse", 1), ("bidirectional", 2)] {
            let (model, node) = fixture(Attrs { direction: dir.to_string(), ..Attrs::default() });
            assert_eq!(with_emitter(&model, |e| e.direction_code(&node)).unwrap(), want);
        }
        let (model, node) = fixture(Attrs { direction: "sideways".to_string(), ..Attrs::default() });
        let err = with_emitter(&model, |e| e.direction_code(&node)).unwrap_err();
        assert!(matches!(err, EmitError::MalformedAttribute { .. }));
    }
}
