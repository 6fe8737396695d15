//! SCC-ordered fixpoint solver with widening and narrowing
//!
//! Each strongly connected component of the dependence graph is solved to
//! a local fixpoint before the next one starts: a growth phase widens the
//! member states, symbolic constraints are then fixed against their
//! now-stable bounds, and a narrowing phase recovers the precision the
//! widening gave up. The topological order over components guarantees a
//! solved component is never revisited.

use {
    crate::branch::build_value_branch_map,
    crate::graph::{DepGraph, GraphBuilder, NodeId, NodeKind, UnaryOpKind},
    crate::interval::IntervalConstraint,
    crate::ir::{BinaryAluOp, Function, Module, ValueId},
    crate::range::{self, Range},
    crate::seeds::{self, SeedError},
    log::{debug, trace},
    serde::Serialize,
    std::{
        cmp,
        collections::{HashMap, HashSet},
        path::Path,
    },
};

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Exact growth iterations allowed per node before Cousot widening
    /// kicks in; the narrowing phase reuses the same bound
    pub iteration_threshold: u32,
    /// Analysis bit width; defaults to the widest integer type in the
    /// analyzed module
    pub max_bit_width: Option<u32>,
    /// Propagate values across call sites in `analyze_module`. When off,
    /// calls are treated as opaque even with the callee's body available
    pub interprocedural: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iteration_threshold: 1,
            max_bit_width: None,
            interprocedural: true,
        }
    }
}

/// Errors reported by the analysis entry points
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AnalysisError {
    /// The requested function is not defined in the module
    #[error("function {0:?} is not defined in the module")]
    UnknownFunction(String),
}

/// Aggregate counters of one analysis run
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisStats {
    /// Variable nodes in the dependence graph
    pub variables: usize,
    /// Operation nodes in the dependence graph
    pub operations: usize,
    /// Strongly connected components
    pub sccs: usize,
    /// Growth-phase state changes
    pub widening_iterations: usize,
    /// Narrowing-phase state changes
    pub narrowing_iterations: usize,
    /// Symbolic constraints fixed into concrete intervals
    pub futures_resolved: usize,
    /// States degraded to the unconstrained interval
    pub precision_losses: usize,
}

/// One value's final interval, with the range in display form
#[derive(Debug, Clone, Serialize)]
pub struct ValueRangeEntry {
    /// Owning function
    pub function: String,
    /// Value name
    pub name: String,
    /// Final interval in `[L, U]` text form
    pub range: String,
}

/// Serializable summary of an analysis run
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    /// Run counters
    pub stats: AnalysisStats,
    /// Per-value final intervals, in value id order
    pub values: Vec<ValueRangeEntry>,
}

/// The interprocedural range analysis engine
#[derive(Debug, Default)]
pub struct RangeAnalysis {
    config: Config,
    seeds: HashMap<(String, String), Range>,
    ignored: HashSet<String>,
    graph: DepGraph,
    constraints: HashMap<NodeId, IntervalConstraint>,
    out: Vec<Range>,
    fallback: Vec<Range>,
    widen_count: Vec<u32>,
    narrow_count: Vec<u32>,
    width: u32,
    stats: AnalysisStats,
}

impl RangeAnalysis {
    /// Creates an engine with the given configuration
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Preloads the initial state of one value
    pub fn add_seed(&mut self, function: &str, value_name: &str, range: Range) {
        self.seeds
            .insert((function.to_string(), value_name.to_string()), range);
    }

    /// Loads seed ranges from a file, merging over existing seeds
    pub fn load_seed_file(&mut self, path: &Path) -> Result<(), SeedError> {
        self.seeds.extend(seeds::load_seed_file(path)?);
        Ok(())
    }

    /// Excludes a function's call results from union computations
    pub fn ignore_function(&mut self, name: &str) {
        self.ignored.insert(name.to_string());
    }

    /// Loads an ignore-list file, merging over the existing list
    pub fn load_ignored_file(&mut self, path: &Path) -> Result<(), SeedError> {
        self.ignored.extend(seeds::load_ignored_functions(path)?);
        Ok(())
    }

    /// Runs the whole-module analysis with value flow across call sites
    pub fn analyze_module(&mut self, module: &Module) {
        let width = self.analysis_width(module);
        let graph = GraphBuilder::build_module(module, width, self.config.interprocedural);
        let functions: Vec<&Function> = module.functions.iter().collect();
        self.run(module, graph, width, &functions);
    }

    /// Runs a single-function analysis; calls degrade to unknown effects
    pub fn analyze_function(&mut self, module: &Module, name: &str) -> Result<(), AnalysisError> {
        let function = module
            .function(name)
            .ok_or_else(|| AnalysisError::UnknownFunction(name.to_string()))?;
        let width = self.analysis_width(module);
        let graph = GraphBuilder::build_function(module, function, width);
        self.run(module, graph, width, &[function]);
        Ok(())
    }

    /// The final interval of a value. Total: values the graph never
    /// represented come back unconstrained.
    pub fn get_range(&self, value: ValueId) -> Range {
        match self.graph.find_node(value) {
            Some(node) => self.out[node.index()],
            None => Range::full(),
        }
    }

    /// Counters of the last run
    pub fn stats(&self) -> &AnalysisStats {
        &self.stats
    }

    /// Summarizes the last run over all of the module's named values
    pub fn report(&self, module: &Module) -> AnalysisReport {
        let values = module
            .values
            .iter()
            .enumerate()
            .map(|(index, info)| ValueRangeEntry {
                function: info.function.clone(),
                name: info.name.clone(),
                range: self.get_range(ValueId(index as u32)).to_string(),
            })
            .collect();
        AnalysisReport {
            stats: self.stats.clone(),
            values,
        }
    }

    fn analysis_width(&self, module: &Module) -> u32 {
        self.config
            .max_bit_width
            .unwrap_or_else(|| module.max_bit_width())
    }

    fn run(&mut self, module: &Module, mut graph: DepGraph, width: u32, functions: &[&Function]) {
        self.width = width;
        self.constraints.clear();
        self.stats = AnalysisStats::default();
        for function in functions {
            let branch_map = build_value_branch_map(module, function);
            self.inject_constraints(&mut graph, function, &branch_map);
        }
        graph.recompute_sccs();

        for index in 0..graph.len() {
            match graph.node(NodeId(index as u32)).kind {
                NodeKind::Variable { .. } => self.stats.variables += 1,
                _ => self.stats.operations += 1,
            }
        }
        self.stats.sccs = graph.scc_topological_order().len();
        debug!(
            "range analysis at width {}: {} nodes in {} sccs",
            width,
            graph.len(),
            self.stats.sccs,
        );

        let seeded = self.seeded_nodes(module, &graph);
        // A variable narrower than the analysis width degrades to its own
        // type's signed range, not to the unconstrained interval.
        self.fallback = (0..graph.len())
            .map(|index| match &graph.node(NodeId(index as u32)).kind {
                NodeKind::Variable {
                    value: Some(value),
                    constant: None,
                } => match module.value_width(*value) {
                    Some(w) if w < width => {
                        Range::new(range::min_signed(w), range::max_signed(w))
                    }
                    _ => Range::full(),
                },
                _ => Range::full(),
            })
            .collect();
        self.out = vec![Range::unknown(); graph.len()];
        self.widen_count = vec![0; graph.len()];
        self.narrow_count = vec![0; graph.len()];
        for (&node, &range) in &seeded {
            self.out[node.index()] = range;
        }
        self.graph = graph;

        let order: Vec<u32> = self.graph.scc_topological_order().to_vec();
        let seeded: HashSet<NodeId> = seeded.keys().copied().collect();
        for scc in order {
            self.solve_scc(scc, &seeded);
        }
    }

    /// Binds branch constraints to the gating nodes placed in their
    /// destination blocks. A symbolic constraint also gets a control edge
    /// from its bound so the SCC order finalizes the bound first.
    fn inject_constraints(
        &mut self,
        graph: &mut DepGraph,
        function: &Function,
        branch_map: &crate::branch::ValueBranchMap,
    ) {
        let sites = graph.sigma_sites().to_vec();
        for site in sites {
            if site.function != function.name {
                continue;
            }
            for branch_constraint in branch_map.get(site.source) {
                if branch_constraint.block != site.block {
                    continue;
                }
                match &branch_constraint.constraint {
                    IntervalConstraint::Symb(symb) => {
                        if self.constraints.contains_key(&site.op) {
                            continue;
                        }
                        if let Some(bound_node) = graph.find_node(symb.bound()) {
                            graph.add_control_edge(bound_node, site.op);
                            self.constraints
                                .insert(site.op, branch_constraint.constraint.clone());
                        }
                    }
                    IntervalConstraint::Basic(basic) => {
                        let merged = match self.constraints.get(&site.op) {
                            Some(IntervalConstraint::Basic(existing)) => {
                                existing.range().intersect_with(basic.range())
                            }
                            Some(IntervalConstraint::Symb(_)) => continue,
                            None => *basic.range(),
                        };
                        self.constraints
                            .insert(site.op, IntervalConstraint::basic(merged));
                    }
                }
            }
        }
    }

    fn seeded_nodes(&self, module: &Module, graph: &DepGraph) -> HashMap<NodeId, Range> {
        let mut seeded = HashMap::new();
        if self.seeds.is_empty() {
            return seeded;
        }
        for (index, info) in module.values.iter().enumerate() {
            let key = (info.function.clone(), info.name.clone());
            if let Some(range) = self.seeds.get(&key) {
                if let Some(node) = graph.find_node(ValueId(index as u32)) {
                    seeded.insert(node, *range);
                }
            }
        }
        seeded
    }

    fn solve_scc(&mut self, scc: u32, seeded: &HashSet<NodeId>) {
        let members: Vec<NodeId> = self.graph.scc_members(scc).to_vec();
        let in_scc: HashSet<NodeId> = members.iter().copied().collect();

        // Growth: widen until stable, starting from nodes fed only by
        // already-solved components, sources, and seeds.
        let mut worklist: Vec<NodeId> = members
            .iter()
            .copied()
            .filter(|&node| {
                self.graph.data_preds(node).next().is_none()
                    || self.graph.data_preds(node).any(|pred| !in_scc.contains(&pred))
                    || seeded.contains(&node)
            })
            .collect();
        while let Some(node) = worklist.pop() {
            if self.join(node) {
                self.stats.widening_iterations += 1;
                for succ in self.graph.data_succs(node) {
                    if in_scc.contains(&succ) {
                        worklist.push(succ);
                    }
                }
            }
        }
        for &node in &members {
            if self.out[node.index()].is_unknown() {
                self.out[node.index()] = self.fallback[node.index()];
                self.stats.precision_losses += 1;
            }
        }

        // Future resolution: the control edge placed the bound's component
        // before this one, so its state is final here.
        for &node in &members {
            let symb = match self.constraints.get(&node) {
                Some(IntervalConstraint::Symb(symb)) => symb.clone(),
                _ => continue,
            };
            let bound_range = match self.graph.find_node(symb.bound()) {
                Some(bound_node) => self.out[bound_node.index()],
                None => Range::full(),
            };
            let fixed = symb.fix(&bound_range, &self.out[node.index()]);
            trace!("fixed future at node {}: {}", node.0, fixed);
            self.constraints.insert(node, IntervalConstraint::basic(fixed));
            self.stats.futures_resolved += 1;
        }

        // Narrowing: gating nodes always re-evaluate, as do nodes with
        // fresh data from outside the component.
        let mut worklist: Vec<NodeId> = members
            .iter()
            .copied()
            .filter(|&node| {
                matches!(self.graph.node(node).kind, NodeKind::Sigma)
                    || self.graph.data_preds(node).any(|pred| !in_scc.contains(&pred))
            })
            .collect();
        while let Some(node) = worklist.pop() {
            if self.meet(node) {
                self.stats.narrowing_iterations += 1;
                for succ in self.graph.data_succs(node) {
                    if in_scc.contains(&succ) {
                        worklist.push(succ);
                    }
                }
            }
        }
    }

    /// Joins the recomputed value of a node into its state, widening once
    /// the per-node budget of exact unions is spent. Returns whether the
    /// stored state changed.
    fn join(&mut self, node: NodeId) -> bool {
        let new = self.evaluate(node);
        let index = node.index();
        let old = self.out[index];
        if old.is_unknown() {
            if new.is_unknown() {
                return false;
            }
            self.out[index] = new;
            return true;
        }
        if new.is_unknown() || new.is_empty() {
            return false;
        }
        if self.widen_count[index] < self.config.iteration_threshold {
            self.widen_count[index] += 1;
            let unioned = old.union_with(&new);
            if unioned != old {
                self.out[index] = unioned;
                return true;
            }
            return false;
        }
        let grew_down = new.lower() < old.lower();
        let grew_up = new.upper() > old.upper();
        let widened = if grew_down && grew_up {
            Range::full()
        } else if grew_down {
            Range::new(range::MIN, old.upper())
        } else if grew_up {
            Range::new(old.lower(), range::MAX)
        } else {
            return false;
        };
        if widened != old {
            self.out[index] = widened;
            return true;
        }
        false
    }

    /// Meets the recomputed value of a node into its state, preferring to
    /// replace infinite bounds with finite ones. The count only advances
    /// when the state changes. Returns whether it did.
    fn meet(&mut self, node: NodeId) -> bool {
        let index = node.index();
        if self.narrow_count[index] >= self.config.iteration_threshold {
            return false;
        }
        let new = self.evaluate(node);
        let old = self.out[index];
        if new.is_unknown() {
            return false;
        }
        if new.is_empty() || old.is_empty() || old.is_unknown() {
            if new == old {
                return false;
            }
            self.out[index] = new;
            self.narrow_count[index] += 1;
            return true;
        }
        let mut lower = old.lower();
        if lower == range::MIN && new.lower() != range::MIN {
            lower = new.lower();
        } else {
            let smin = cmp::min(old.lower(), new.lower());
            if smin != old.lower() {
                lower = smin;
            }
        }
        let mut upper = old.upper();
        if upper == range::MAX && new.upper() != range::MAX {
            upper = new.upper();
        } else {
            let smax = cmp::max(old.upper(), new.upper());
            if smax != old.upper() {
                upper = smax;
            }
        }
        let mut tightened = Range::new(lower, upper);
        if matches!(self.graph.node(node).kind, NodeKind::Sigma) {
            if let Some(constraint) = self.constraints.get(&node) {
                tightened = tightened.intersect_with(&constraint.range());
            }
        }
        if tightened != old {
            self.out[index] = tightened;
            self.narrow_count[index] += 1;
            return true;
        }
        false
    }

    fn evaluate(&self, node: NodeId) -> Range {
        match &self.graph.node(node).kind {
            NodeKind::Variable {
                constant: Some(value),
                ..
            } => Range::constant(*value),
            NodeKind::Variable { .. } | NodeKind::Phi | NodeKind::Memory { .. } => {
                self.union_of_preds(node)
            }
            NodeKind::Sigma => {
                let base = self.union_of_preds(node);
                if base.is_unknown() {
                    return base;
                }
                match self.constraints.get(&node) {
                    Some(constraint) => base.intersect_with(&constraint.range()),
                    None => base,
                }
            }
            NodeKind::Call { .. } => {
                if self.graph.data_preds(node).next().is_none() {
                    // Callee effect unknown
                    return Range::full();
                }
                self.union_of_preds(node)
            }
            NodeKind::Binary(op) => {
                let mut preds = self.graph.data_preds(node);
                let (lhs, rhs) = match (preds.next(), preds.next()) {
                    (Some(lhs), Some(rhs)) => (lhs, rhs),
                    _ => return Range::full(),
                };
                let lhs = self.out[lhs.index()];
                let rhs = self.out[rhs.index()];
                if lhs.is_unknown() || rhs.is_unknown() {
                    return Range::unknown();
                }
                self.apply_binary(*op, &lhs, &rhs)
            }
            NodeKind::Unary(kind) => {
                let pred = match self.graph.data_preds(node).next() {
                    Some(pred) => pred,
                    None => return Range::full(),
                };
                let operand = self.out[pred.index()];
                if operand.is_unknown() || operand.is_empty() {
                    return operand;
                }
                match kind {
                    UnaryOpKind::Trunc { to } => operand.truncate(*to),
                    UnaryOpKind::ZExt { from } => operand.zext_or_trunc(*from),
                    UnaryOpKind::SExt { from } => operand.sext_or_trunc(*from),
                    UnaryOpKind::BitCast | UnaryOpKind::Load | UnaryOpKind::Store => operand,
                }
            }
        }
    }

    // Call results of ignored functions must not poison the union.
    fn union_of_preds(&self, node: NodeId) -> Range {
        let mut acc = Range::unknown();
        for pred in self.graph.data_preds(node) {
            if let NodeKind::Call { callee } = &self.graph.node(pred).kind {
                if self.ignored.contains(callee) {
                    continue;
                }
            }
            acc = acc.union_with(&self.out[pred.index()]);
        }
        acc
    }

    fn apply_binary(&self, op: BinaryAluOp, lhs: &Range, rhs: &Range) -> Range {
        match op {
            BinaryAluOp::Add => lhs.add(rhs),
            BinaryAluOp::Sub => lhs.sub(rhs),
            BinaryAluOp::Mul => lhs.mul(rhs),
            BinaryAluOp::UDiv => lhs.udiv(rhs),
            BinaryAluOp::SDiv => lhs.sdiv(rhs),
            BinaryAluOp::URem => lhs.urem(rhs),
            BinaryAluOp::SRem => lhs.srem(rhs),
            BinaryAluOp::Shl => lhs.shl(rhs),
            BinaryAluOp::Lshr => lhs.lshr(rhs),
            BinaryAluOp::Ashr => lhs.ashr(rhs),
            BinaryAluOp::And => lhs.and(rhs),
            BinaryAluOp::Or => lhs.or(rhs, self.width),
            BinaryAluOp::Xor => lhs.xor(rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::graph::EdgeKind,
        crate::ir::{CmpPredicate, FunctionBuilder, Operand},
    };

    // while (i < n) i = i + 1, with unknown n
    fn counting_loop(module: &mut Module) {
        let mut fb = FunctionBuilder::new(module, "count");
        let n = fb.int_param("n", 64);
        let entry = fb.entry();
        let header = fb.block("header");
        let body = fb.block("body");
        let exit = fb.block("exit");
        fb.jump(header);
        fb.switch_to(header);
        // Back edge names the increment defined below, ids are sequential
        let i1 = fb.phi(
            "i1",
            64,
            vec![
                (Operand::const_int(0, 64), entry),
                (Operand::Value(ValueId(3)), body),
            ],
        );
        fb.cond_br(
            CmpPredicate::Slt,
            Operand::Value(i1),
            Operand::Value(n),
            body,
            exit,
        );
        fb.switch_to(body);
        let i2 = fb.sigma("i2", i1);
        let i3 = fb.binary(
            "i3",
            64,
            crate::ir::BinaryAluOp::Add,
            Operand::Value(i2),
            Operand::const_int(1, 64),
        );
        let _ = i3;
        fb.jump(header);
        fb.switch_to(exit);
        fb.ret(Some(Operand::Value(i1)));
        fb.finish();
    }

    #[test]
    fn test_unknown_function_error() {
        let module = Module::default();
        let mut analysis = RangeAnalysis::new(Config::default());
        assert_eq!(
            analysis.analyze_function(&module, "missing"),
            Err(AnalysisError::UnknownFunction("missing".to_string()))
        );
    }

    #[test]
    fn test_widening_self_loop_terminates() {
        // i = i + 1 with no branch bound at all: the loop-carried value
        // must still reach a fixed state.
        let mut module = Module::default();
        let mut fb = FunctionBuilder::new(&mut module, "diverge");
        let entry = fb.entry();
        let header = fb.block("header");
        fb.jump(header);
        fb.switch_to(header);
        let i1 = fb.phi(
            "i1",
            64,
            vec![
                (Operand::const_int(0, 64), entry),
                (Operand::Value(ValueId(1)), header),
            ],
        );
        let i2 = fb.binary(
            "i2",
            64,
            BinaryAluOp::Add,
            Operand::Value(i1),
            Operand::const_int(1, 64),
        );
        let _ = i2;
        fb.jump(header);
        fb.finish();

        let mut analysis = RangeAnalysis::new(Config::default());
        analysis.analyze_function(&module, "diverge").unwrap();
        let result = analysis.get_range(i1);
        assert!(result.contains(0));
        assert_eq!(result.upper(), range::MAX);
        assert!(result.lower() == 0 || result.lower() == range::MIN);
    }

    #[test]
    fn test_symbolic_bound_resolves_against_parameter() {
        let mut module = Module::default();
        counting_loop(&mut module);
        let mut analysis = RangeAnalysis::new(Config::default());
        analysis.analyze_function(&module, "count").unwrap();
        let i1 = module.find_value("count", "i1").unwrap();
        let result = analysis.get_range(i1);
        // n itself is unconstrained, so the header value stays wide but
        // the run must terminate and include the initial 0.
        assert!(result.contains(0));
    }

    #[test]
    fn test_seed_preloads_initial_state() {
        let mut module = Module::default();
        let mut fb = FunctionBuilder::new(&mut module, "f");
        let k = fb.int_param("k", 64);
        fb.ret(Some(Operand::Value(k)));
        fb.finish();

        let mut analysis = RangeAnalysis::new(Config::default());
        analysis.add_seed("f", "k", Range::new(-3, 9));
        analysis.analyze_function(&module, "f").unwrap();
        assert_eq!(analysis.get_range(k), Range::new(-3, 9));
    }

    #[test]
    fn test_narrowing_only_replaces_infinite_bounds() {
        // Hand-built post-growth states of a gated counting loop: the
        // header phi widened to [0, +inf], the gate capped at 99, the
        // increment already finite. Every meet must land inside the state
        // it replaces, and only the infinite bound may move.
        let mut graph = DepGraph::default();
        let zero = graph.add_node(NodeKind::Variable {
            value: None,
            constant: Some(0),
        });
        let phi = graph.add_node(NodeKind::Phi);
        let gate = graph.add_node(NodeKind::Sigma);
        let one = graph.add_node(NodeKind::Variable {
            value: None,
            constant: Some(1),
        });
        let step = graph.add_node(NodeKind::Binary(BinaryAluOp::Add));
        graph.add_edge(zero, phi, EdgeKind::Data);
        graph.add_edge(step, phi, EdgeKind::Data);
        graph.add_edge(phi, gate, EdgeKind::Data);
        graph.add_edge(gate, step, EdgeKind::Data);
        graph.add_edge(one, step, EdgeKind::Data);

        let mut analysis = RangeAnalysis::new(Config::default());
        analysis.graph = graph;
        analysis
            .constraints
            .insert(gate, IntervalConstraint::basic(Range::new(range::MIN, 99)));
        analysis.out = vec![
            Range::constant(0),
            Range::new(0, range::MAX),
            Range::new(0, 99),
            Range::constant(1),
            Range::new(1, 100),
        ];
        analysis.narrow_count = vec![0; 5];

        let members = [phi, gate, step];
        let mut tightened = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for &node in &members {
                let before = analysis.out[node.index()];
                if analysis.meet(node) {
                    changed = true;
                    tightened += 1;
                }
                let after = analysis.out[node.index()];
                assert!(
                    before.contains_range(&after),
                    "meet loosened {} to {}",
                    before,
                    after
                );
            }
        }
        assert_eq!(tightened, 1);
        assert_eq!(analysis.out[phi.index()], Range::new(0, 100));
        assert_eq!(analysis.out[gate.index()], Range::new(0, 99));
        assert_eq!(analysis.out[step.index()], Range::new(1, 100));
    }

    #[test]
    fn test_report_lists_every_value() {
        let mut module = Module::default();
        counting_loop(&mut module);
        let mut analysis = RangeAnalysis::new(Config::default());
        analysis.analyze_function(&module, "count").unwrap();
        let report = analysis.report(&module);
        assert_eq!(report.values.len(), module.values.len());
        assert!(report.values.iter().all(|entry| entry.function == "count"));
        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("\"sccs\""));
    }
}
