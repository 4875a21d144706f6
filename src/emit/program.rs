// This module defines the output artifact of translation: the Program, an ordered,
// append-only sequence of Instructions for the downstream register VM. RegId is the
// scope-local virtual register id with an explicit absent sentinel for omitted optional
// operands; Operand covers register ids, register lists, scalar and vector literals and
// strings; Opcode is the closed VM opcode set, defined through a small macro that also
// derives the mnemonic table and the u16 round-trip used by the binary container. The
// Program supports exactly one later in-place mutation per instruction: patching the
// target of a previously emitted jump once the intervening code length is known. A
// portable little-endian binary container (to_bytes/from_bytes) lets the artifact be
// handed to a VM loader in another process.

//! Linear instruction sequence for the register VM.

use std::fmt;

/// A scope-local virtual register id.
///
/// `RegId::NONE` is the reserved absent-id sentinel meaning "no operand
/// bound", used for optional inputs/outputs and null values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegId(pub i32);

impl RegId {
    pub const NONE: RegId = RegId(-1);

    pub fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for RegId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("$none")
        } else {
            write!(f, "${}", self.0)
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $code:literal,)*) => {
        /// Closed opcode set of the target VM.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum Opcode {
            $($name = $code,)*
        }

        impl Opcode {
            pub fn from_u16(code: u16) -> Option<Opcode> {
                match code {
                    $($code => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    // Program protocol.
    In = 1,
    Out = 2,
    Free = 3,
    Jmp = 4,
    JmpTrue = 5,
    JmpFalse = 6,
    Identity = 7,
    NullConstant = 8,
    // Literals.
    IntScalarConstant = 10,
    FloatScalarConstant = 11,
    IntConstant = 12,
    FloatConstant = 13,
    // Elementwise unary.
    Neg = 20,
    Reciprocal = 21,
    Exp = 22,
    Log = 23,
    Sqrt = 24,
    Tanh = 25,
    Abs = 26,
    Relu = 27,
    Floor = 28,
    Ceil = 29,
    Sigmoid = 30,
    Not = 31,
    // Elementwise binary.
    Add = 40,
    Sub = 41,
    Mul = 42,
    Div = 43,
    Pow = 44,
    Equal = 45,
    Greater = 46,
    And = 47,
    Or = 48,
    Xor = 49,
    // Linear algebra and convolution.
    MatMul = 60,
    Gemm = 61,
    Conv = 62,
    MaxPool = 63,
    AveragePool = 64,
    // Shape manipulation.
    Reshape = 70,
    Expand = 71,
    Squeeze = 72,
    Unsqueeze = 73,
    Transpose = 74,
    Shape = 75,
    Size = 76,
    Pad = 77,
    Slice = 78,
    Gather = 79,
    Concat = 80,
    Split = 81,
    Clip = 82,
    // Activations and reductions.
    Softmax = 90,
    LogSoftmax = 91,
    Dropout = 92,
    ReduceSum = 93,
    ReduceMax = 94,
    ReduceMean = 95,
    Cast = 96,
    // Recurrent.
    Rnn = 100,
    Gru = 101,
    Lstm = 102,
    // Sequences.
    SequenceCreate = 110,
    SequenceSize = 111,
    SequenceAppend = 112,
    SequencePop = 113,
    SequenceLookup = 114,
    SequenceStack = 115,
    SequenceConcat = 116,
    SequenceSeparate = 117,
    SequenceRange = 118,
    SequenceMove = 119,
    SequenceCopy = 120,
    // External kernels.
    CallLibraryKernel = 130,
    CallSourceKernel = 131,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// One instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(RegId),
    Regs(Vec<RegId>),
    Int(i64),
    Float(f64),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Str(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Regs(rs) => {
                f.write_str("[")?;
                for (i, r) in rs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{r}")?;
                }
                f.write_str("]")
            }
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v}"),
            Operand::Ints(vs) => write!(f, "{vs:?}"),
            Operand::Floats(vs) => write!(f, "{vs:?}"),
            Operand::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// Sentinel jump target emitted before the real target is known.
pub const PENDING_TARGET: i64 = -1;

/// One VM instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    /// Free-text debug annotation, usually the source node context.
    pub debug: String,
    /// Schedule-order id of the source node, or -1 for synthetic
    /// instructions.
    pub order: i64,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for op in &self.operands {
            write!(f, " {op}")?;
        }
        if !self.debug.is_empty() {
            write!(f, "  ; {}", self.debug)?;
        }
        Ok(())
    }
}

/// Ordered, append-only instruction sequence.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Program {
    insts: Vec<Instruction>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    pub fn insts(&self) -> &[Instruction] {
        &self.insts
    }

    pub fn push(&mut self, inst: Instruction) {
        self.insts.push(inst);
    }

    /// Patch the pending jump target of the instruction at `index` to
    /// `target`. Each jump is patched at most once; the operand must still
    /// hold the pending sentinel.
    pub fn patch_jump(&mut self, index: usize, target: usize) {
        let inst = &mut self.insts[index];
        let slot = match inst.opcode {
            Opcode::Jmp => 0,
            Opcode::JmpTrue | Opcode::JmpFalse => 1,
            other => panic!("patch_jump on non-jump opcode {other}"),
        };
        match &mut inst.operands[slot] {
            Operand::Int(t) if *t == PENDING_TARGET => *t = target as i64,
            other => panic!("jump at {index} already patched or malformed: {other}"),
        }
    }

    /// Encode into the portable little-endian binary container.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf.extend_from_slice(&(self.insts.len() as u32).to_le_bytes());
        for inst in &self.insts {
            buf.extend_from_slice(&(inst.opcode as u16).to_le_bytes());
            buf.extend_from_slice(&inst.order.to_le_bytes());
            write_str(&mut buf, &inst.debug);
            buf.extend_from_slice(&(inst.operands.len() as u16).to_le_bytes());
            for op in &inst.operands {
                write_operand(&mut buf, op);
            }
        }
        buf
    }

    /// Decode a program previously produced by [`Program::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> Option<Program> {
        let mut r = Reader { data, pos: 0 };
        if r.take(MAGIC.len())? != MAGIC {
            return None;
        }
        if r.u16()? != FORMAT_VERSION {
            return None;
        }
        let count = r.u32()? as usize;
        let mut insts = Vec::with_capacity(count);
        for _ in 0..count {
            let opcode = Opcode::from_u16(r.u16()?)?;
            let order = r.i64()?;
            let debug = r.string()?;
            let operand_count = r.u16()? as usize;
            let mut operands = Vec::with_capacity(operand_count);
            for _ in 0..operand_count {
                operands.push(read_operand(&mut r)?);
            }
            insts.push(Instruction { opcode, operands, debug, order });
        }
        Some(Program { insts })
    }
}

const MAGIC: &[u8] = b"TVMP";
const FORMAT_VERSION: u16 = 1;

const TAG_REG: u8 = 0;
const TAG_REGS: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_INTS: u8 = 4;
const TAG_FLOATS: u8 = 5;
const TAG_STR: u8 = 6;

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn write_operand(buf: &mut Vec<u8>, op: &Operand) {
    match op {
        Operand::Reg(r) => {
            buf.push(TAG_REG);
            buf.extend_from_slice(&r.0.to_le_bytes());
        }
        Operand::Regs(rs) => {
            buf.push(TAG_REGS);
            buf.extend_from_slice(&(rs.len() as u32).to_le_bytes());
            for r in rs {
                buf.extend_from_slice(&r.0.to_le_bytes());
            }
        }
        Operand::Int(v) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Operand::Float(v) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Operand::Ints(vs) => {
            buf.push(TAG_INTS);
            buf.extend_from_slice(&(vs.len() as u32).to_le_bytes());
            for v in vs {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        Operand::Floats(vs) => {
            buf.push(TAG_FLOATS);
            buf.extend_from_slice(&(vs.len() as u32).to_le_bytes());
            for v in vs {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        Operand::Str(s) => {
            buf.push(TAG_STR);
            write_str(buf, s);
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        if end > self.data.len() {
            return None;
        }
        let out = &self.data[self.pos..end];
        self.pos = end;
        Some(out)
    }

    fn u16(&mut self) -> Option<u16> {
        Some(u16::from_le_bytes(self.take(2)?.try_into().ok()?))
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn i32(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn i64(&mut self) -> Option<i64> {
        Some(i64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn f64(&mut self) -> Option<f64> {
        Some(f64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn string(&mut self) -> Option<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }
}

fn read_operand(r: &mut Reader<'_>) -> Option<Operand> {
    let tag = r.take(1)?[0];
    match tag {
        TAG_REG => Some(Operand::Reg(RegId(r.i32()?))),
        TAG_REGS => {
            let len = r.u32()? as usize;
            let mut rs = Vec::with_capacity(len);
            for _ in 0..len {
                rs.push(RegId(r.i32()?));
            }
            Some(Operand::Regs(rs))
        }
        TAG_INT => Some(Operand::Int(r.i64()?)),
        TAG_FLOAT => Some(Operand::Float(r.f64()?)),
        TAG_INTS => {
            let len = r.u32()? as usize;
            let mut vs = Vec::with_capacity(len);
            for _ in 0..len {
                vs.push(r.i64()?);
            }
            Some(Operand::Ints(vs))
        }
        TAG_FLOATS => {
            let len = r.u32()? as usize;
            let mut vs = Vec::with_capacity(len);
            for _ in 0..len {
                vs.push(r.f64()?);
            }
            Some(Operand::Floats(vs))
        }
        TAG_STR => Some(Operand::Str(r.string()?)),
        _ => None,
    }
}
