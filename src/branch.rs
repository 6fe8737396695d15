//! Extraction of interval constraints from control flow
//!
//! Every conditional branch on an integer comparison splits the range of
//! the compared values between its successors. This pass walks a function
//! once and records, per value, which interval holds on entry to which
//! block. The solver later attaches these records to the gating nodes
//! placed in those blocks.

use {
    crate::interval::IntervalConstraint,
    crate::ir::{BlockId, CmpPredicate, Function, Inst, Module, Operand, Terminator, Ty, ValueId},
    crate::range::{self, sign_extend, Range},
    std::collections::HashMap,
};

/// An interval known to hold for a value inside one block
#[derive(Debug, Clone)]
pub struct BranchConstraint {
    /// Block the constraint is valid in
    pub block: BlockId,
    /// The interval, concrete or symbolic
    pub constraint: IntervalConstraint,
}

/// All branch-derived constraints of one function, keyed by value
#[derive(Debug, Default)]
pub struct ValueBranchMap {
    entries: HashMap<ValueId, Vec<BranchConstraint>>,
}

impl ValueBranchMap {
    fn push(&mut self, value: ValueId, block: BlockId, constraint: IntervalConstraint) {
        self.entries.entry(value).or_default().push(BranchConstraint {
            block,
            constraint,
        });
    }

    /// Constraints recorded for a value
    pub fn get(&self, value: ValueId) -> &[BranchConstraint] {
        self.entries.get(&value).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Iterates over all (value, constraints) pairs
    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &[BranchConstraint])> {
        self.entries
            .iter()
            .map(|(value, list)| (*value, list.as_slice()))
    }
}

/// The interval implied by `x pred c` holding true
fn range_for_predicate(pred: CmpPredicate, c: i128) -> Range {
    match pred {
        CmpPredicate::Eq => Range::constant(c),
        CmpPredicate::Ne => Range::full(),
        CmpPredicate::Slt => Range::new(range::MIN, c.saturating_sub(1)),
        CmpPredicate::Sle => Range::new(range::MIN, c),
        CmpPredicate::Sgt => Range::new(c.saturating_add(1), range::MAX),
        CmpPredicate::Sge => Range::new(c, range::MAX),
    }
}

/// Collects branch constraints for one function.
///
/// Comparisons against a literal yield concrete intervals on both edges;
/// comparisons between two values yield symbolic intervals that name the
/// other operand as a future bound. Constraints on the result of a cast
/// are also attached to the cast source, so gating reaches values defined
/// before the cast.
pub fn build_value_branch_map(module: &Module, function: &Function) -> ValueBranchMap {
    let mut map = ValueBranchMap::default();
    for block in &function.blocks {
        match &block.terminator {
            Terminator::CondBr {
                pred,
                lhs,
                rhs,
                on_true,
                on_false,
            } => {
                record_comparison(module, function, &mut map, *pred, lhs, rhs, *on_true, *on_false);
            }
            Terminator::Switch { on, cases, default } => {
                let value = match on.as_value() {
                    Some(value) if is_integer(module, value) => value,
                    _ => continue,
                };
                for (label, target) in cases {
                    let width = module.value_width(value).unwrap_or(64);
                    let point = Range::constant(sign_extend(*label, width));
                    attach(module, function, &mut map, value, *target, IntervalConstraint::basic(point));
                }
                if let Some(target) = default {
                    // The default edge excludes finitely many points, which
                    // the interval domain cannot represent.
                    attach(
                        module,
                        function,
                        &mut map,
                        value,
                        *target,
                        IntervalConstraint::basic(Range::full()),
                    );
                }
            }
            _ => {}
        }
    }
    map
}

#[allow(clippy::too_many_arguments)]
fn record_comparison(
    module: &Module,
    function: &Function,
    map: &mut ValueBranchMap,
    pred: CmpPredicate,
    lhs: &Operand,
    rhs: &Operand,
    on_true: BlockId,
    on_false: BlockId,
) {
    match (lhs, rhs) {
        (Operand::Value(a), Operand::Const { value, width }) => {
            let c = sign_extend(*value, *width);
            constrain_against_const(module, function, map, *a, pred, c, on_true, on_false);
        }
        (Operand::Const { value, width }, Operand::Value(b)) => {
            // Normalize `c pred b` to `b pred' c`
            let c = sign_extend(*value, *width);
            constrain_against_const(module, function, map, *b, pred.swapped(), c, on_true, on_false);
        }
        (Operand::Value(a), Operand::Value(b)) => {
            if !is_integer(module, *a) || !is_integer(module, *b) {
                return;
            }
            attach(module, function, map, *a, on_true, IntervalConstraint::symbolic(*b, pred));
            attach(
                module,
                function,
                map,
                *a,
                on_false,
                IntervalConstraint::symbolic(*b, pred.inverse()),
            );
            let swapped = pred.swapped();
            attach(module, function, map, *b, on_true, IntervalConstraint::symbolic(*a, swapped));
            attach(
                module,
                function,
                map,
                *b,
                on_false,
                IntervalConstraint::symbolic(*a, swapped.inverse()),
            );
        }
        // Constant folding upstream is expected to remove these
        (Operand::Const { .. }, Operand::Const { .. }) => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn constrain_against_const(
    module: &Module,
    function: &Function,
    map: &mut ValueBranchMap,
    value: ValueId,
    pred: CmpPredicate,
    c: i128,
    on_true: BlockId,
    on_false: BlockId,
) {
    if !is_integer(module, value) {
        return;
    }
    attach(
        module,
        function,
        map,
        value,
        on_true,
        IntervalConstraint::basic(range_for_predicate(pred, c)),
    );
    attach(
        module,
        function,
        map,
        value,
        on_false,
        IntervalConstraint::basic(range_for_predicate(pred.inverse(), c)),
    );
}

/// Records a constraint for `value`, and for its cast source when `value`
/// is defined by a cast of another value.
fn attach(
    module: &Module,
    function: &Function,
    map: &mut ValueBranchMap,
    value: ValueId,
    block: BlockId,
    constraint: IntervalConstraint,
) {
    map.push(value, block, constraint.clone());
    if let Some(Inst::Cast { src, .. }) = function.defining_inst(value) {
        if let Some(source) = src.as_value() {
            if is_integer(module, source) {
                map.push(source, block, constraint);
            }
        }
    }
}

fn is_integer(module: &Module, value: ValueId) -> bool {
    matches!(module.value(value).ty, Ty::Int(_))
}
