//! Graph nodes: one operation each, with typed operand lists and attributes.

use std::fmt;

use super::tensor::{Dtype, Tensor};
use super::{GraphId, ValueId};

/// Closed set of operation kinds the graph model can carry.
///
/// The emitter lowers most of these; kinds it has no lowering for are
/// rejected as `UnsupportedOperation` at translation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    // Elementwise unary.
    Neg,
    Reciprocal,
    Exp,
    Log,
    Sqrt,
    Tanh,
    Abs,
    Relu,
    Floor,
    Ceil,
    Sigmoid,
    Not,
    Identity,
    // Elementwise binary.
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Equal,
    Greater,
    And,
    Or,
    Xor,
    // Linear algebra and convolution.
    MatMul,
    Gemm,
    Conv,
    MaxPool,
    AveragePool,
    // Shape manipulation.
    Reshape,
    Expand,
    Squeeze,
    Unsqueeze,
    Transpose,
    Shape,
    Size,
    Pad,
    Slice,
    Gather,
    Concat,
    Split,
    Clip,
    // Activations and normalization.
    Softmax,
    LogSoftmax,
    Dropout,
    // Reductions and conversion.
    ReduceSum,
    ReduceMax,
    ReduceMean,
    Cast,
    // Recurrent.
    Rnn,
    Gru,
    Lstm,
    // Sequences.
    SequenceCreate,
    SequenceSize,
    SequenceAppend,
    SequencePop,
    SequenceLookup,
    SequenceStack,
    SequenceConcat,
    SequenceSeparate,
    SequenceRange,
    // Structural constructs and literals.
    If,
    Loop,
    FusionGroup,
    Constant,
    ConstantSequence,
    NullConstant,
    // Carried by the model but without a lowering.
    Einsum,
    TopK,
    NonZero,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a fusion group should be lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionStrategy {
    /// Emit the body inline through the regular per-scope algorithm.
    #[default]
    Inline,
    /// Delegate to an external compiler producing a loadable library+symbol.
    Library,
    /// Delegate to an external compiler producing inline source text.
    Source,
}

/// Attribute bag attached to a node. Which fields are meaningful depends on
/// the operation kind; unused fields stay at their defaults.
#[derive(Debug, Clone)]
pub struct Attrs {
    pub alpha: f64,
    pub beta: f64,
    pub trans_a: bool,
    pub trans_b: bool,
    pub axis: i64,
    pub axes: Vec<i64>,
    pub keepdims: bool,
    pub kernel_shape: Vec<i64>,
    pub strides: Vec<i64>,
    pub pads: Vec<i64>,
    pub dilations: Vec<i64>,
    pub perm: Vec<i64>,
    pub starts: Vec<i64>,
    pub ends: Vec<i64>,
    pub split: Vec<i64>,
    pub to: Option<Dtype>,
    pub mode: String,
    pub value: f64,
    pub min: f64,
    pub max: f64,
    pub hidden_size: i64,
    pub direction: String,
    pub linear_before_reset: bool,
    pub ratio: f64,
    pub count_include_pad: bool,
    pub stack_axis: i64,
    pub fusion_strategy: FusionStrategy,
    pub fusion_group: i64,
    pub tensor: Option<Tensor>,
    pub tensors: Vec<Tensor>,
}

impl Default for Attrs {
    fn default() -> Self {
        Attrs {
            alpha: 1.0,
            beta: 1.0,
            trans_a: false,
            trans_b: false,
            axis: 0,
            axes: Vec::new(),
            keepdims: true,
            kernel_shape: Vec::new(),
            strides: Vec::new(),
            pads: Vec::new(),
            dilations: Vec::new(),
            perm: Vec::new(),
            starts: Vec::new(),
            ends: Vec::new(),
            split: Vec::new(),
            to: None,
            mode: "constant".to_string(),
            value: 0.0,
            min: f64::MIN,
            max: f64::MAX,
            hidden_size: 0,
            direction: String::new(),
            linear_before_reset: false,
            ratio: 0.5,
            count_include_pad: false,
            stack_axis: 0,
            fusion_strategy: FusionStrategy::Inline,
            fusion_group: 0,
            tensor: None,
            tensors: Vec::new(),
        }
    }
}

/// One computation step.
#[derive(Debug)]
pub struct Node {
    pub op: OpKind,
    pub name: String,
    /// Ordered operands; entries may point at null placeholder values.
    pub inputs: Vec<ValueId>,
    /// Ordered results; entries may point at null placeholder values.
    pub outputs: Vec<ValueId>,
    /// Nested subgraphs this node introduces, in construct-specific order
    /// (If: then, else; Loop/FusionGroup: body).
    pub subgraphs: Vec<GraphId>,
    /// Schedule-order index assigned upstream. `None` means the node was
    /// never scheduled and is excluded from emission.
    pub order: Option<i64>,
    /// Pruned nodes are kept in the arena but excluded from emission.
    pub detached: bool,
    pub attrs: Attrs,
}

impl Node {
    /// Short context string used in diagnostics and debug annotations.
    pub fn debug_string(&self) -> String {
        format!("{}({})", self.op, self.name)
    }
}
