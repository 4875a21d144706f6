// This module implements the graph model the emitter consumes: a Model arena that owns
// every graph, node and value in index-addressed vectors, with typed id newtypes
// (GraphId, NodeId, ValueId) as non-owning handles. Producer/consumer back-references
// are stored as plain node indices, so the naturally cyclic reference structure of a
// dataflow graph never becomes an ownership cycle. Each Graph is one scope: input,
// output and temp value partitions plus an ordered node list; construct nodes (If,
// Loop, FusionGroup) reference their exclusively-owned subgraphs by GraphId. The module
// also provides the construction API used by the upstream graph-building stage and by
// tests, and the computation-sequence query the emitter walks: live (non-detached)
// nodes sorted ascending by their upstream-assigned schedule order.

//! Arena-owned tensor dataflow graph model.

pub mod node;
pub mod tensor;
pub mod value;

pub use node::{Attrs, FusionStrategy, Node, OpKind};
pub use tensor::{Dtype, ElementError, Tensor, TensorType};
pub use value::{Value, ValueKind};

/// Handle to a graph (scope) in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u32);

/// Handle to a node in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

/// Handle to a value in a [`Model`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

/// One scope: the top-level graph or the body of a nested construct.
///
/// A graph lists its value partitions and nodes by handle; the [`Model`]
/// owns the storage.
#[derive(Debug, Default)]
pub struct Graph {
    pub name: String,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
    pub temps: Vec<ValueId>,
    pub nodes: Vec<NodeId>,
}

/// Owns every graph, node and value reachable from the root graph.
#[derive(Debug)]
pub struct Model {
    graphs: Vec<Graph>,
    nodes: Vec<Node>,
    values: Vec<Value>,
    root: GraphId,
    next_order: i64,
}

impl Model {
    /// Create a model with an empty root graph.
    pub fn new(name: impl Into<String>) -> Self {
        let root = Graph { name: name.into(), ..Graph::default() };
        Model { graphs: vec![root], nodes: Vec::new(), values: Vec::new(), root: GraphId(0), next_order: 0 }
    }

    pub fn root(&self) -> GraphId {
        self.root
    }

    pub fn graph(&self, id: GraphId) -> &Graph {
        &self.graphs[id.0 as usize]
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    /// Add a nested graph; the caller hands the id to exactly one construct
    /// node.
    pub fn add_graph(&mut self, name: impl Into<String>) -> GraphId {
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(Graph { name: name.into(), ..Graph::default() });
        id
    }

    /// Add a value to a graph partition. An empty name yields a null
    /// placeholder value; a null value is still listed under the requested
    /// partition so positional output slots line up.
    pub fn add_value(&mut self, graph: GraphId, name: impl Into<String>, kind: ValueKind) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        let value = Value::new(name, kind);
        let is_null = value.is_null();
        self.values.push(value);
        let graph = &mut self.graphs[graph.0 as usize];
        match kind {
            // Output slots keep their position even when null.
            ValueKind::Output => graph.outputs.push(id),
            ValueKind::Input if !is_null => graph.inputs.push(id),
            ValueKind::Temp if !is_null => graph.temps.push(id),
            _ => {}
        }
        id
    }

    pub fn add_input(&mut self, graph: GraphId, name: impl Into<String>) -> ValueId {
        self.add_value(graph, name, ValueKind::Input)
    }

    pub fn add_output(&mut self, graph: GraphId, name: impl Into<String>) -> ValueId {
        self.add_value(graph, name, ValueKind::Output)
    }

    pub fn add_temp(&mut self, graph: GraphId, name: impl Into<String>) -> ValueId {
        self.add_value(graph, name, ValueKind::Temp)
    }

    /// Add a null placeholder for an omitted optional operand.
    pub fn add_null(&mut self, _graph: GraphId) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new("", ValueKind::Null));
        id
    }

    /// Attach a static type to a value.
    pub fn set_value_type(&mut self, value: ValueId, ty: TensorType) {
        self.values[value.0 as usize].ty = Some(ty);
    }

    /// Add a node without subgraphs.
    pub fn add_node(
        &mut self,
        graph: GraphId,
        op: OpKind,
        name: impl Into<String>,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
        attrs: Attrs,
    ) -> NodeId {
        self.add_construct(graph, op, name, inputs, outputs, Vec::new(), attrs)
    }

    /// Add a node that owns nested subgraphs (If/Loop/FusionGroup).
    pub fn add_construct(
        &mut self,
        graph: GraphId,
        op: OpKind,
        name: impl Into<String>,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
        subgraphs: Vec<GraphId>,
        attrs: Attrs,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        for &input in &inputs {
            self.values[input.0 as usize].consumers.push(id);
        }
        for &output in &outputs {
            let value = &mut self.values[output.0 as usize];
            if !value.is_null() {
                assert!(
                    value.producer.is_none(),
                    "value {} already has a producer",
                    value.name
                );
                value.producer = Some(id);
            }
        }
        let order = self.next_order;
        self.next_order += 1;
        self.nodes.push(Node {
            op,
            name: name.into(),
            inputs,
            outputs,
            subgraphs,
            order: Some(order),
            detached: false,
            attrs,
        });
        self.graphs[graph.0 as usize].nodes.push(id);
        id
    }

    /// Overwrite the schedule order decided upstream. `None` excludes the
    /// node from emission.
    pub fn set_order(&mut self, node: NodeId, order: Option<i64>) {
        self.nodes[node.0 as usize].order = order;
    }

    /// Mark a node pruned; it stays in the arena but is never emitted.
    pub fn detach_node(&mut self, node: NodeId) {
        self.nodes[node.0 as usize].detached = true;
    }

    /// All non-detached nodes of a graph, in insertion order.
    pub fn live_nodes(&self, graph: GraphId) -> Vec<NodeId> {
        self.graph(graph)
            .nodes
            .iter()
            .copied()
            .filter(|&n| !self.node(n).detached)
            .collect()
    }

    /// Live nodes of a graph ordered ascending by schedule order. Nodes
    /// without an order are unreachable and excluded.
    pub fn computation_sequence(&self, graph: GraphId) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .graph(graph)
            .nodes
            .iter()
            .copied()
            .filter(|&n| !self.node(n).detached && self.node(n).order.is_some())
            .collect();
        nodes.sort_by_key(|&n| self.node(n).order);
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_computation_sequence_orders_by_schedule() {
        let mut model = Model::new("g");
        let g = model.root();
        let x = model.add_input(g, "x");
        let t = model.add_temp(g, "t");
        let y = model.add_output(g, "y");
        let n0 = model.add_node(g, OpKind::Relu, "n0", vec![x], vec![t], Attrs::default());
        let n1 = model.add_node(g, OpKind::Neg, "n1", vec![t], vec![y], Attrs::default());
        // Reverse the upstream schedule.
        model.set_order(n0, Some(10));
        model.set_order(n1, Some(5));
        assert_eq!(model.computation_sequence(g), vec![n1, n0]);
    }

    #[test]
    fn test_detached_and_unordered_nodes_are_excluded() {
        let mut model = Model::new("g");
        let g = model.root();
        let x = model.add_input(g, "x");
        let a = model.add_temp(g, "a");
        let b = model.add_temp(g, "b");
        let c = model.add_temp(g, "c");
        let n0 = model.add_node(g, OpKind::Relu, "n0", vec![x], vec![a], Attrs::default());
        let n1 = model.add_node(g, OpKind::Relu, "n1", vec![x], vec![b], Attrs::default());
        let n2 = model.add_node(g, OpKind::Relu, "n2", vec![x], vec![c], Attrs::default());
        model.detach_node(n1);
        model.set_order(n2, None);
        assert_eq!(model.computation_sequence(g), vec![n0]);
        assert_eq!(model.live_nodes(g), vec![n0, n2]);
    }

    #[test]
    fn test_producer_consumer_wiring() {
        let mut model = Model::new("g");
        let g = model.root();
        let x = model.add_input(g, "x");
        let y = model.add_output(g, "y");
        let n = model.add_node(g, OpKind::Relu, "n", vec![x, x], vec![y], Attrs::default());
        assert_eq!(model.value(x).consumers, vec![n, n]);
        assert_eq!(model.value(y).producer, Some(n));
    }

    #[test]
    #[should_panic(expected = "already has a producer")]
    fn test_second_producer_panics() {
        let mut model = Model::new("g");
        let g = model.root();
        let y = model.add_output(g, "y");
        model.add_node(g, OpKind::SequenceCreate, "n0", vec![], vec![y], Attrs::default());
        model.add_node(g, OpKind::SequenceCreate, "n1", vec![], vec![y], Attrs::default());
    }

    #[test]
    fn test_null_output_slot_stays_positional() {
        let mut model = Model::new("g");
        let g = model.root();
        let out = model.add_value(g, "", ValueKind::Output);
        assert!(model.value(out).is_null());
        assert_eq!(model.graph(g).outputs, vec![out]);
    }
}
