//! Dependence graph over program values
//!
//! An arena of nodes referenced by stable integer indices, with adjacency
//! stored as index-keyed edge lists tagged by edge kind. Strongly connected
//! components and their topological order are recomputed on demand into
//! fresh arrays; nothing is ever deleted in place.

use {
    crate::ir::{BinaryAluOp, BlockId, Function, Inst, Module, Operand, Terminator, ValueId},
    crate::range::sign_extend,
    std::collections::HashMap,
};

/// Index of a node in the graph arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Dependence edge flavor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    /// Value flow
    Data,
    /// Ordering constraint from a symbolic bound to its gating node
    Control,
}

/// Unary operation payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOpKind {
    /// Truncation to the destination width
    Trunc {
        /// Destination width in bits
        to: u32,
    },
    /// Zero extension from the source width
    ZExt {
        /// Source width in bits
        from: u32,
    },
    /// Sign extension from the source width
    SExt {
        /// Source width in bits
        from: u32,
    },
    /// Value-preserving reinterpretation
    BitCast,
    /// Memory read pass-through
    Load,
    /// Memory write pass-through
    Store,
}

/// Closed set of node kinds; evaluation dispatches by exhaustive match
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A source value or literal
    Variable {
        /// The wrapped SSA value, absent for literals
        value: Option<ValueId>,
        /// Literal payload, sign-extended to the analysis width
        constant: Option<i128>,
    },
    /// Two-operand arithmetic; operand order is the pred list order
    Binary(BinaryAluOp),
    /// Cast or memory pass-through
    Unary(UnaryOpKind),
    /// Control-flow merge
    Phi,
    /// Gating point carrying a branch-derived constraint
    Sigma,
    /// Call result; without data predecessors the callee effect is unknown
    Call {
        /// Callee name, checked against the ignore list
        callee: String,
    },
    /// A memory slot merging every store reaching it
    Memory {
        /// Slot name
        slot: String,
    },
}

/// One graph node with tagged adjacency
#[derive(Debug, Clone)]
pub struct Node {
    /// Node payload
    pub kind: NodeKind,
    /// Incoming edges
    pub preds: Vec<(NodeId, EdgeKind)>,
    /// Outgoing edges
    pub succs: Vec<(NodeId, EdgeKind)>,
}

/// Placement of a gating operation, used by the constraint injector
#[derive(Debug, Clone)]
pub struct SigmaSite {
    /// The sigma operation node
    pub op: NodeId,
    /// Owning function name
    pub function: String,
    /// Block the sigma lives in, one of the branch successors
    pub block: BlockId,
    /// The value being gated
    pub source: ValueId,
}

const UNVISITED: u32 = u32::MAX;

/// The dependence graph arena
#[derive(Debug, Default)]
pub struct DepGraph {
    nodes: Vec<Node>,
    value_map: HashMap<ValueId, NodeId>,
    sigma_sites: Vec<SigmaSite>,
    scc_id: Vec<u32>,
    sccs: Vec<Vec<NodeId>>,
    topo: Vec<u32>,
}

impl DepGraph {
    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when the graph holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node accessor
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// The node representing a source value, if it is in the graph
    pub fn find_node(&self, value: ValueId) -> Option<NodeId> {
        self.value_map.get(&value).copied()
    }

    /// Recorded gating sites
    pub fn sigma_sites(&self) -> &[SigmaSite] {
        &self.sigma_sites
    }

    /// Appends a node and returns its id
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        if let NodeKind::Variable {
            value: Some(value), ..
        } = &kind
        {
            self.value_map.insert(*value, id);
        }
        self.nodes.push(Node {
            kind,
            preds: Vec::new(),
            succs: Vec::new(),
        });
        id
    }

    // Rebinds `value` to `node`. A placeholder made by a forward reference
    // hands its outgoing edges over, with consumer pred slots rewritten in
    // place so operand order survives, and is left detached.
    pub(crate) fn replace_value_node(&mut self, value: ValueId, node: NodeId) {
        if let Some(old) = self.value_map.insert(value, node) {
            let succs = std::mem::take(&mut self.nodes[old.index()].succs);
            for &(succ, _) in &succs {
                for pred in &mut self.nodes[succ.index()].preds {
                    if pred.0 == old {
                        pred.0 = node;
                    }
                }
            }
            self.nodes[node.index()].succs.extend(succs);
            if let NodeKind::Variable { value: held, .. } = &mut self.nodes[old.index()].kind {
                *held = None;
            }
        }
    }

    /// Adds an edge of the given kind
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, kind: EdgeKind) {
        self.nodes[from.index()].succs.push((to, kind));
        self.nodes[to.index()].preds.push((from, kind));
    }

    /// Adds a control dependence edge, ordering `from` before `to`
    pub fn add_control_edge(&mut self, from: NodeId, to: NodeId) {
        self.add_edge(from, to, EdgeKind::Control);
    }

    /// Data predecessors of a node, in operand order
    pub fn data_preds(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .preds
            .iter()
            .filter(|(_, kind)| *kind == EdgeKind::Data)
            .map(|(pred, _)| *pred)
    }

    /// Data successors of a node
    pub fn data_succs(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.node(id)
            .succs
            .iter()
            .filter(|(_, kind)| *kind == EdgeKind::Data)
            .map(|(succ, _)| *succ)
    }

    /// SCC id of a node; valid after [`DepGraph::recompute_sccs`]
    pub fn scc_id(&self, id: NodeId) -> u32 {
        self.scc_id[id.index()]
    }

    /// Members of an SCC
    pub fn scc_members(&self, scc: u32) -> &[NodeId] {
        &self.sccs[scc as usize]
    }

    /// SCC ids in dependency order: an SCC appears after every SCC
    /// feeding it along any edge kind
    pub fn scc_topological_order(&self) -> &[u32] {
        &self.topo
    }

    /// Recomputes SCC membership and the topological order from scratch.
    /// Iterative Tarjan; the emission order is reversed to place
    /// predecessors before successors.
    pub fn recompute_sccs(&mut self) {
        let n = self.nodes.len();
        let mut index_of = vec![UNVISITED; n];
        let mut low = vec![0u32; n];
        let mut on_stack = vec![false; n];
        let mut stack: Vec<usize> = Vec::new();
        let mut next_index = 0u32;
        self.scc_id = vec![0; n];
        self.sccs.clear();

        for root in 0..n {
            if index_of[root] != UNVISITED {
                continue;
            }
            let mut frames: Vec<(usize, usize)> = vec![(root, 0)];
            index_of[root] = next_index;
            low[root] = next_index;
            next_index += 1;
            stack.push(root);
            on_stack[root] = true;

            while let Some(frame) = frames.last_mut() {
                let v = frame.0;
                let child = if frame.1 < self.nodes[v].succs.len() {
                    let child = frame.1;
                    frame.1 += 1;
                    Some(child)
                } else {
                    None
                };
                match child {
                    Some(child) => {
                        let w = self.nodes[v].succs[child].0.index();
                        if index_of[w] == UNVISITED {
                            index_of[w] = next_index;
                            low[w] = next_index;
                            next_index += 1;
                            stack.push(w);
                            on_stack[w] = true;
                            frames.push((w, 0));
                        } else if on_stack[w] {
                            low[v] = low[v].min(index_of[w]);
                        }
                    }
                    None => {
                        frames.pop();
                        if let Some(parent) = frames.last() {
                            let p = parent.0;
                            low[p] = low[p].min(low[v]);
                        }
                        if low[v] == index_of[v] {
                            let scc_index = self.sccs.len() as u32;
                            let mut members = Vec::new();
                            while let Some(w) = stack.pop() {
                                on_stack[w] = false;
                                self.scc_id[w] = scc_index;
                                members.push(NodeId(w as u32));
                                if w == v {
                                    break;
                                }
                            }
                            self.sccs.push(members);
                        }
                    }
                }
            }
        }
        self.topo = (0..self.sccs.len() as u32).rev().collect();
    }
}

struct CallSite {
    op: Option<NodeId>,
    callee: String,
    args: Vec<NodeId>,
}

/// Constructs dependence graphs from IR functions or whole modules
pub struct GraphBuilder<'a> {
    module: &'a Module,
    graph: DepGraph,
    memory: HashMap<String, NodeId>,
    call_sites: Vec<CallSite>,
    width: u32,
}

impl<'a> GraphBuilder<'a> {
    fn new(module: &'a Module, width: u32) -> Self {
        Self {
            module,
            graph: DepGraph::default(),
            memory: HashMap::new(),
            call_sites: Vec::new(),
            width,
        }
    }

    /// Builds the graph of a single function; calls degrade to unknown effects
    pub fn build_function(module: &'a Module, function: &Function, width: u32) -> DepGraph {
        let mut builder = Self::new(module, width);
        builder.add_function(function);
        builder.graph
    }

    /// Builds a whole-program graph. With `link_calls` set, arguments flow
    /// into parameters and returned values flow back to call sites;
    /// otherwise every call stays opaque.
    pub fn build_module(module: &'a Module, width: u32, link_calls: bool) -> DepGraph {
        let mut builder = Self::new(module, width);
        for function in &module.functions {
            builder.add_function(function);
        }
        if link_calls {
            builder.link_call_sites();
        }
        builder.graph
    }

    fn var_node(&mut self, value: ValueId) -> NodeId {
        if let Some(id) = self.graph.find_node(value) {
            return id;
        }
        self.graph.add_node(NodeKind::Variable {
            value: Some(value),
            constant: None,
        })
    }

    fn const_node(&mut self, value: i128, width: u32) -> NodeId {
        self.graph.add_node(NodeKind::Variable {
            value: None,
            constant: Some(sign_extend(value, width)),
        })
    }

    fn operand_node(&mut self, operand: &Operand) -> NodeId {
        match operand {
            Operand::Value(id) => self.var_node(*id),
            Operand::Const { value, width } => self.const_node(*value, *width),
        }
    }

    fn memory_node(&mut self, slot: &str) -> NodeId {
        if let Some(id) = self.memory.get(slot) {
            return *id;
        }
        let id = self.graph.add_node(NodeKind::Memory {
            slot: slot.to_string(),
        });
        self.memory.insert(slot.to_string(), id);
        id
    }

    fn operand_width(&self, operand: &Operand) -> u32 {
        match operand {
            Operand::Value(id) => self.module.value_width(*id).unwrap_or(self.width),
            Operand::Const { width, .. } => *width,
        }
    }

    fn add_function(&mut self, function: &Function) {
        for &param in &function.params {
            self.var_node(param);
        }
        for (block, inst) in function.insts() {
            match inst {
                Inst::Binary { dest, op, lhs, rhs } => {
                    let lhs_node = self.operand_node(lhs);
                    let rhs_node = self.operand_node(rhs);
                    let op_node = self.graph.add_node(NodeKind::Binary(*op));
                    let dest_node = self.var_node(*dest);
                    self.graph.add_edge(lhs_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(rhs_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(op_node, dest_node, EdgeKind::Data);
                }
                Inst::Cast { dest, op, src } => {
                    let src_node = self.operand_node(src);
                    let from = self.operand_width(src);
                    let to = self.module.value_width(*dest).unwrap_or(self.width);
                    let kind = match op {
                        crate::ir::CastOp::Trunc => UnaryOpKind::Trunc { to },
                        crate::ir::CastOp::ZExt => UnaryOpKind::ZExt { from },
                        crate::ir::CastOp::SExt => UnaryOpKind::SExt { from },
                        crate::ir::CastOp::BitCast => UnaryOpKind::BitCast,
                    };
                    let op_node = self.graph.add_node(NodeKind::Unary(kind));
                    let dest_node = self.var_node(*dest);
                    self.graph.add_edge(src_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(op_node, dest_node, EdgeKind::Data);
                }
                Inst::Phi { dest, incoming } => {
                    let op_node = self.graph.add_node(NodeKind::Phi);
                    for (operand, _) in incoming {
                        let source = self.operand_node(operand);
                        self.graph.add_edge(source, op_node, EdgeKind::Data);
                    }
                    let dest_node = self.var_node(*dest);
                    self.graph.add_edge(op_node, dest_node, EdgeKind::Data);
                }
                Inst::Sigma { dest, src } => {
                    let src_node = self.var_node(*src);
                    let op_node = self.graph.add_node(NodeKind::Sigma);
                    let dest_node = self.var_node(*dest);
                    self.graph.add_edge(src_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(op_node, dest_node, EdgeKind::Data);
                    self.graph.sigma_sites.push(SigmaSite {
                        op: op_node,
                        function: function.name.clone(),
                        block,
                        source: *src,
                    });
                }
                Inst::Call { dest, callee, args } => {
                    let arg_nodes: Vec<NodeId> =
                        args.iter().map(|arg| self.operand_node(arg)).collect();
                    // The call node is the result value's node, so consumers
                    // see the callee directly when filtering ignored calls.
                    // Any forward-reference placeholder is spliced out.
                    let op_node = dest.map(|dest| {
                        let op_node = self.graph.add_node(NodeKind::Call {
                            callee: callee.clone(),
                        });
                        self.graph.replace_value_node(dest, op_node);
                        op_node
                    });
                    self.call_sites.push(CallSite {
                        op: op_node,
                        callee: callee.clone(),
                        args: arg_nodes,
                    });
                }
                Inst::Load { dest, slot } => {
                    let slot_node = self.memory_node(slot);
                    let op_node = self.graph.add_node(NodeKind::Unary(UnaryOpKind::Load));
                    let dest_node = self.var_node(*dest);
                    self.graph.add_edge(slot_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(op_node, dest_node, EdgeKind::Data);
                }
                Inst::Store { slot, src } => {
                    let src_node = self.operand_node(src);
                    let op_node = self.graph.add_node(NodeKind::Unary(UnaryOpKind::Store));
                    let slot_node = self.memory_node(slot);
                    self.graph.add_edge(src_node, op_node, EdgeKind::Data);
                    self.graph.add_edge(op_node, slot_node, EdgeKind::Data);
                }
            }
        }
    }

    // Interprocedural value flow: arguments into parameters, returned
    // values back into the call result. External callees get no edges and
    // keep their unknown effect.
    fn link_call_sites(&mut self) {
        for site in std::mem::take(&mut self.call_sites) {
            let callee = match self.module.function(&site.callee) {
                Some(callee) => callee,
                None => continue,
            };
            for (arg_node, &param) in site.args.iter().zip(callee.params.iter()) {
                let param_node = self.var_node(param);
                self.graph.add_edge(*arg_node, param_node, EdgeKind::Data);
            }
            if let Some(op_node) = site.op {
                for block in &callee.blocks {
                    if let Terminator::Return(Some(operand)) = &block.terminator {
                        let ret_node = self.operand_node(operand);
                        self.graph.add_edge(ret_node, op_node, EdgeKind::Data);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_graph() -> DepGraph {
        // a -> b -> c with a back edge c -> b
        let mut g = DepGraph::default();
        let a = g.add_node(NodeKind::Variable {
            value: None,
            constant: Some(1),
        });
        let b = g.add_node(NodeKind::Phi);
        let c = g.add_node(NodeKind::Binary(BinaryAluOp::Add));
        g.add_edge(a, b, EdgeKind::Data);
        g.add_edge(b, c, EdgeKind::Data);
        g.add_edge(c, b, EdgeKind::Data);
        g.recompute_sccs();
        g
    }

    #[test]
    fn test_scc_detects_cycle() {
        let g = chain_graph();
        assert_eq!(g.scc_id(NodeId(1)), g.scc_id(NodeId(2)));
        assert_ne!(g.scc_id(NodeId(0)), g.scc_id(NodeId(1)));
    }

    #[test]
    fn test_topological_order_puts_sources_first() {
        let g = chain_graph();
        let order = g.scc_topological_order();
        let pos_a = order
            .iter()
            .position(|&scc| scc == g.scc_id(NodeId(0)))
            .unwrap();
        let pos_cycle = order
            .iter()
            .position(|&scc| scc == g.scc_id(NodeId(1)))
            .unwrap();
        assert!(pos_a < pos_cycle);
    }

    #[test]
    fn test_control_edge_orders_sccs() {
        let mut g = DepGraph::default();
        let bound = g.add_node(NodeKind::Phi);
        let sigma = g.add_node(NodeKind::Sigma);
        g.add_control_edge(bound, sigma);
        g.recompute_sccs();
        let order = g.scc_topological_order();
        let pos_bound = order
            .iter()
            .position(|&scc| scc == g.scc_id(bound))
            .unwrap();
        let pos_sigma = order
            .iter()
            .position(|&scc| scc == g.scc_id(sigma))
            .unwrap();
        assert!(pos_bound < pos_sigma);
    }
}
