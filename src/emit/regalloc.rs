// This module implements register id assignment and per-scope liveness tracking.
// RegisterAllocator hands out dense, monotonically increasing virtual register ids:
// assign_graph_ids maps a scope's values in fixed input/temp/output order (null outputs
// receive no id), failing with DuplicateIdentity on any collision since a value with two
// ids signals an upstream invariant breach; fresh() draws anonymous temporaries from the
// same running counter so nested scopes layer their id ranges on the outer space and no
// two simultaneously-live values ever share an id. ScopeLiveness holds the per-scope use
// counts seeded from consumer-node counts plus the pending-outputs set; consume()
// reports when a value's statically-last use has passed so the emitter can free its
// register immediately, while declared scope outputs are only ticked off the pending set
// and left for the caller to release after the output copy.

//! Register id assignment and per-scope liveness.

use hashbrown::{HashMap, HashSet};

use crate::error::{EmitError, EmitResult};
use crate::graph::{GraphId, Model, ValueId};

use super::program::RegId;

/// Assigns scope-local virtual register ids.
#[derive(Debug)]
pub struct RegisterAllocator {
    next_id: i32,
    ids: HashMap<ValueId, RegId>,
}

impl Default for RegisterAllocator {
    fn default() -> Self {
        // Id 0 is reserved; live ids start at 1.
        RegisterAllocator { next_id: 1, ids: HashMap::new() }
    }
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign ids to every value entering a scope, in input, temp, output
    /// order. Null outputs are tolerated and receive no id.
    pub fn assign_graph_ids(&mut self, model: &Model, graph: GraphId) -> EmitResult<()> {
        let g = model.graph(graph);
        for &v in g.inputs.iter().chain(&g.temps) {
            self.insert(model, v)?;
        }
        for &v in &g.outputs {
            if model.value(v).is_null() {
                continue;
            }
            self.insert(model, v)?;
        }
        Ok(())
    }

    fn insert(&mut self, model: &Model, value: ValueId) -> EmitResult<()> {
        let id = RegId(self.next_id);
        if self.ids.insert(value, id).is_some() {
            return Err(EmitError::DuplicateIdentity {
                value: model.value(value).name.clone(),
                reason: "value assigned a register id twice".to_string(),
            });
        }
        self.next_id += 1;
        Ok(())
    }

    /// Register id of a value. The value must be non-null and already
    /// assigned.
    pub fn get(&self, model: &Model, value: ValueId) -> EmitResult<RegId> {
        let v = model.value(value);
        if v.is_null() {
            return Err(EmitError::StructuralViolation {
                node: v.name.clone(),
                reason: "null value used where a bound register is required".to_string(),
            });
        }
        self.ids.get(&value).copied().ok_or_else(|| EmitError::StructuralViolation {
            node: v.name.clone(),
            reason: "value has no assigned register".to_string(),
        })
    }

    /// Draw a fresh anonymous temporary from the running counter.
    pub fn fresh(&mut self) -> RegId {
        let id = RegId(self.next_id);
        self.next_id += 1;
        id
    }

    /// All assigned (value, register) pairs, unordered.
    pub fn assignments(&self) -> impl Iterator<Item = (ValueId, RegId)> + '_ {
        self.ids.iter().map(|(&v, &r)| (v, r))
    }
}

/// Per-scope use counts and pending outputs.
pub struct ScopeLiveness {
    use_counts: HashMap<ValueId, usize>,
    pending_outputs: HashSet<ValueId>,
}

impl ScopeLiveness {
    /// Seed use counts from consumer-node counts. Scope inputs are tracked
    /// only at top level; in nested scopes the construct lowering frees its
    /// formals explicitly.
    pub fn new(model: &Model, graph: GraphId, track_inputs: bool, outputs: &[ValueId]) -> Self {
        let g = model.graph(graph);
        let mut use_counts = HashMap::new();
        if track_inputs {
            for &v in &g.inputs {
                use_counts.insert(v, model.value(v).consumers.len());
            }
        }
        for &v in &g.temps {
            use_counts.insert(v, model.value(v).consumers.len());
        }
        ScopeLiveness { use_counts, pending_outputs: outputs.iter().copied().collect() }
    }

    /// Record one consuming use; true when that was the statically-last use
    /// and the register should be freed now.
    pub fn consume(&mut self, value: ValueId) -> bool {
        match self.use_counts.get_mut(&value) {
            Some(count) => {
                debug_assert!(*count > 0, "use count underflow");
                *count -= 1;
                *count == 0
            }
            None => false,
        }
    }

    /// Tick a produced value off the pending-outputs set; true if it is a
    /// declared scope output (and must never be auto-freed).
    pub fn take_pending_output(&mut self, value: ValueId) -> bool {
        self.pending_outputs.remove(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Attrs, OpKind};

    #[test]
    fn test_ids_increase_in_partition_order() {
        let mut model = Model::new("g");
        let g = model.root();
        let x = model.add_input(g, "x");
        let t = model.add_temp(g, "t");
        let y = model.add_output(g, "y");

        let mut regs = RegisterAllocator::new();
        regs.assign_graph_ids(&model, g).unwrap();
        assert_eq!(regs.get(&model, x).unwrap(), RegId(1));
        assert_eq!(regs.get(&model, t).unwrap(), RegId(2));
        assert_eq!(regs.get(&model, y).unwrap(), RegId(3));
        assert_eq!(regs.fresh(), RegId(4));
    }

    #[test]
    fn test_double_assignment_is_duplicate_identity() {
        let mut model = Model::new("g");
        let g = model.root();
        model.add_input(g, "x");
        let mut regs = RegisterAllocator::new();
        regs.assign_graph_ids(&model, g).unwrap();
        let err = regs.assign_graph_ids(&model, g).unwrap_err();
        assert!(matches!(err, EmitError::DuplicateIdentity { .. }));
    }

    #[test]
    fn test_null_output_gets_no_id() {
        let mut model = Model::new("g");
        let g = model.root();
        let out = model.add_value(g, "", crate::graph::ValueKind::Output);
        let mut regs = RegisterAllocator::new();
        regs.assign_graph_ids(&model, g).unwrap();
        assert!(regs.get(&model, out).is_err());
    }

    #[test]
    fn test_use_counts_reach_zero_once() {
        let mut model = Model::new("g");
        let g = model.root();
        let x = model.add_input(g, "x");
        let t = model.add_temp(g, "t");
        let y = model.add_output(g, "y");
        model.add_node(g, OpKind::Relu, "n0", vec![x], vec![t], Attrs::default());
        model.add_node(g, OpKind::Add, "n1", vec![t, t], vec![y], Attrs::default());

        let mut live = ScopeLiveness::new(&model, g, true, &[y]);
        assert!(live.consume(x));
        assert!(!live.consume(t));
        assert!(live.consume(t));
        assert!(!live.consume(y)); // outputs are not tracked
        assert!(live.take_pending_output(y));
        assert!(!live.take_pending_output(y));
    }
}
