// Shared helpers for the integration tests: a scalar mini-interpreter that executes
// the integer/jump/sequence subset of the instruction set, and a register-discipline
// checker that verifies every Free targets a live register and nothing leaks.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};

use tenvm::{Opcode, Operand, Program};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Runtime cell of the mini-interpreter: integer scalars and sequences are
/// enough to exercise the program protocol end to end.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Seq(Vec<Cell>),
    Null,
}

impl Cell {
    pub fn as_int(&self) -> i64 {
        match self {
            Cell::Int(v) => *v,
            other => panic!("expected an integer cell, got {other:?}"),
        }
    }

    pub fn as_seq(&self) -> &[Cell] {
        match self {
            Cell::Seq(vs) => vs,
            other => panic!("expected a sequence cell, got {other:?}"),
        }
    }
}

pub struct Run {
    pub outputs: HashMap<String, Cell>,
    /// Dynamic instruction count, including every loop iteration.
    pub executed: usize,
}

impl Run {
    pub fn output(&self, name: &str) -> &Cell {
        self.outputs.get(name).unwrap_or_else(|| panic!("no output named {name:?}"))
    }
}

fn reg_at(operands: &[Operand], i: usize) -> i32 {
    match operands[i] {
        Operand::Reg(r) => r.0,
        ref other => panic!("operand {i} is not a register: {other:?}"),
    }
}

fn int_at(operands: &[Operand], i: usize) -> i64 {
    match operands[i] {
        Operand::Int(v) => v,
        ref other => panic!("operand {i} is not an int: {other:?}"),
    }
}

fn str_at(operands: &[Operand], i: usize) -> &str {
    match operands[i] {
        Operand::Str(ref s) => s,
        ref other => panic!("operand {i} is not a string: {other:?}"),
    }
}

/// Execute a program over named integer inputs.
pub fn interpret(prog: &Program, inputs: &[(&str, i64)]) -> Run {
    let inputs: HashMap<&str, i64> = inputs.iter().copied().collect();
    let mut regs: HashMap<i32, Cell> = HashMap::new();
    let mut outputs = HashMap::new();
    let insts = prog.insts();
    let mut pc = 0usize;
    let mut executed = 0usize;

    let load = |regs: &HashMap<i32, Cell>, r: i32| -> Cell {
        regs.get(&r).unwrap_or_else(|| panic!("read of dead register ${r}")).clone()
    };
    let load_int = |regs: &HashMap<i32, Cell>, r: i32| load(regs, r).as_int();

    while pc < insts.len() {
        executed += 1;
        assert!(executed < 100_000, "runaway program at pc {pc}");
        let inst = &insts[pc];
        let ops = &inst.operands;
        pc += 1;
        match inst.opcode {
            Opcode::In => {
                let name = str_at(ops, 1);
                let v = *inputs.get(name).unwrap_or_else(|| panic!("no input named {name:?}"));
                regs.insert(reg_at(ops, 0), Cell::Int(v));
            }
            Opcode::Out => {
                outputs.insert(str_at(ops, 0).to_string(), load(&regs, reg_at(ops, 1)));
            }
            Opcode::Free => {
                regs.remove(&reg_at(ops, 0));
            }
            Opcode::Jmp => pc = int_at(ops, 0) as usize,
            Opcode::JmpTrue => {
                if load_int(&regs, reg_at(ops, 0)) != 0 {
                    pc = int_at(ops, 1) as usize;
                }
            }
            Opcode::JmpFalse => {
                if load_int(&regs, reg_at(ops, 0)) == 0 {
                    pc = int_at(ops, 1) as usize;
                }
            }
            Opcode::Identity => {
                let v = load(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), v);
            }
            Opcode::IntScalarConstant => {
                regs.insert(reg_at(ops, 0), Cell::Int(int_at(ops, 1)));
            }
            Opcode::NullConstant => {
                regs.insert(reg_at(ops, 0), Cell::Null);
            }
            Opcode::Neg => {
                let v = load_int(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), Cell::Int(-v));
            }
            Opcode::Relu => {
                let v = load_int(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), Cell::Int(v.max(0)));
            }
            Opcode::Not => {
                let v = load_int(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), Cell::Int((v == 0) as i64));
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Greater | Opcode::Equal => {
                let a = load_int(&regs, reg_at(ops, 1));
                let b = load_int(&regs, reg_at(ops, 2));
                let v = match inst.opcode {
                    Opcode::Add => a + b,
                    Opcode::Sub => a - b,
                    Opcode::Mul => a * b,
                    Opcode::Greater => (a > b) as i64,
                    _ => (a == b) as i64,
                };
                regs.insert(reg_at(ops, 0), Cell::Int(v));
            }
            Opcode::SequenceCreate => {
                regs.insert(reg_at(ops, 0), Cell::Seq(Vec::new()));
            }
            Opcode::SequenceAppend => {
                let elem = load(&regs, reg_at(ops, 1));
                match regs.get_mut(&reg_at(ops, 0)) {
                    Some(Cell::Seq(vs)) => vs.push(elem),
                    other => panic!("append to non-sequence {other:?}"),
                }
            }
            Opcode::SequenceMove => {
                let src = reg_at(ops, 1);
                let v = regs.remove(&src).unwrap_or_else(|| panic!("move of dead register ${src}"));
                regs.insert(reg_at(ops, 0), v);
            }
            Opcode::SequenceCopy => {
                let v = load(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), v);
            }
            Opcode::SequencePop => {
                let elem = match regs.get_mut(&reg_at(ops, 1)) {
                    Some(Cell::Seq(vs)) => vs.pop().unwrap_or_else(|| panic!("pop from empty sequence")),
                    other => panic!("pop from non-sequence {other:?}"),
                };
                regs.insert(reg_at(ops, 0), elem);
            }
            Opcode::SequenceSize => {
                let n = load(&regs, reg_at(ops, 1)).as_seq().len() as i64;
                regs.insert(reg_at(ops, 0), Cell::Int(n));
            }
            Opcode::SequenceStack => {
                let v = load(&regs, reg_at(ops, 1));
                regs.insert(reg_at(ops, 0), v);
            }
            other => panic!("mini-interpreter does not handle {other}"),
        }
    }
    Run { outputs, executed }
}

fn defined_slots(opcode: Opcode) -> usize {
    match opcode {
        Opcode::MaxPool
        | Opcode::AveragePool
        | Opcode::SequenceConcat
        | Opcode::SequencePop
        | Opcode::Dropout
        | Opcode::Rnn
        | Opcode::Gru => 2,
        Opcode::Lstm => 3,
        _ => 1,
    }
}

/// Walk the instruction sequence in static order and verify free-on-last-use
/// discipline: every Free targets a register defined since its previous Free,
/// and nothing stays live past the end of the program.
pub fn check_register_discipline(prog: &Program) {
    let mut live: HashSet<i32> = HashSet::new();
    for (i, inst) in prog.insts().iter().enumerate() {
        let ops = &inst.operands;
        match inst.opcode {
            Opcode::Free => {
                let r = reg_at(ops, 0);
                assert!(live.remove(&r), "instruction {i}: free of dead register ${r}");
            }
            Opcode::Out | Opcode::Jmp | Opcode::JmpTrue | Opcode::JmpFalse => {}
            Opcode::Split | Opcode::CallLibraryKernel | Opcode::CallSourceKernel => {
                if let Operand::Regs(rs) = &ops[0] {
                    for r in rs {
                        live.insert(r.0);
                    }
                }
            }
            opcode => {
                for slot in 0..defined_slots(opcode) {
                    if let Operand::Reg(r) = ops[slot] {
                        if !r.is_none() {
                            live.insert(r.0);
                        }
                    }
                }
            }
        }
    }
    assert!(live.is_empty(), "registers leaked past the end of the program: {live:?}");
}

/// Indices of all instructions with the given opcode.
pub fn find_all(prog: &Program, opcode: Opcode) -> Vec<usize> {
    prog.insts()
        .iter()
        .enumerate()
        .filter(|(_, inst)| inst.opcode == opcode)
        .map(|(i, _)| i)
        .collect()
}
