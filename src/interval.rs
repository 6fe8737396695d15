//! Branch-derived interval constraints
//!
//! A constraint attached to one side of a branch is either a concrete
//! interval or a symbolic one whose bound names another value that has not
//! been computed yet. Symbolic constraints are the future value mechanism:
//! once the bound's final interval is known the constraint is fixed into a
//! concrete interval and stored back in its slot.

use crate::{
    ir::{CmpPredicate, ValueId},
    range::{Range, MAX, MIN},
};

/// A concrete interval constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicInterval {
    range: Range,
}

impl BasicInterval {
    /// Wraps a concrete range
    pub fn new(range: Range) -> Self {
        Self { range }
    }

    /// The wrapped range
    pub fn range(&self) -> &Range {
        &self.range
    }
}

/// An interval bounded by another, not yet finalized, value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbInterval {
    bound: ValueId,
    predicate: CmpPredicate,
}

impl SymbInterval {
    /// Creates a symbolic constraint `sink predicate bound`
    pub fn new(bound: ValueId, predicate: CmpPredicate) -> Self {
        Self { bound, predicate }
    }

    /// The value whose final interval will fix this constraint
    pub fn bound(&self) -> ValueId {
        self.bound
    }

    /// The comparison relating the constrained value to the bound
    pub fn predicate(&self) -> CmpPredicate {
        self.predicate
    }

    /// Resolves the constraint into a concrete interval from the final
    /// range of the bound and the current range of the constrained value.
    /// Pure: callers store the result back into the constraint slot.
    pub fn fix(&self, bound: &Range, sink: &Range) -> Range {
        let l = bound.lower();
        let u = bound.upper();
        let lower = sink.lower();
        let upper = sink.upper();
        match self.predicate {
            CmpPredicate::Eq => Range::new(l, u),
            CmpPredicate::Sle => Range::new(lower, u),
            CmpPredicate::Slt => {
                if u != MAX {
                    Range::new(lower, u - 1)
                } else {
                    Range::new(lower, u)
                }
            }
            CmpPredicate::Sge => Range::new(l, upper),
            CmpPredicate::Sgt => {
                if l != MIN {
                    Range::new(l + 1, upper)
                } else {
                    Range::new(l, upper)
                }
            }
            // A disequality carries no interval information
            CmpPredicate::Ne => Range::full(),
        }
    }
}

/// A constraint slot attached to a gating node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntervalConstraint {
    /// Concrete from the start, or fixed from a symbolic constraint
    Basic(BasicInterval),
    /// Awaiting the bound value's final interval
    Symb(SymbInterval),
}

impl IntervalConstraint {
    /// Concrete constraint from a range
    pub fn basic(range: Range) -> Self {
        IntervalConstraint::Basic(BasicInterval::new(range))
    }

    /// Symbolic constraint from a bound and predicate
    pub fn symbolic(bound: ValueId, predicate: CmpPredicate) -> Self {
        IntervalConstraint::Symb(SymbInterval::new(bound, predicate))
    }

    /// The interval currently implied by the constraint. A symbolic
    /// constraint implies nothing until fixed.
    pub fn range(&self) -> Range {
        match self {
            IntervalConstraint::Basic(basic) => *basic.range(),
            IntervalConstraint::Symb(_) => Range::full(),
        }
    }

    /// True while the constraint still names an unresolved bound
    pub fn is_symbolic(&self) -> bool {
        matches!(self, IntervalConstraint::Symb(_))
    }

    /// The symbolic payload, if any
    pub fn as_symbolic(&self) -> Option<&SymbInterval> {
        match self {
            IntervalConstraint::Symb(symb) => Some(symb),
            IntervalConstraint::Basic(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_upper_bound_predicates() {
        let symb = SymbInterval::new(ValueId(7), CmpPredicate::Slt);
        let bound = Range::new(0, 100);
        let sink = Range::new(-5, MAX);
        // sink < bound: keep the sink lower bound, cap at bound.upper - 1
        assert_eq!(symb.fix(&bound, &sink), Range::new(-5, 99));

        let symb = SymbInterval::new(ValueId(7), CmpPredicate::Sle);
        assert_eq!(symb.fix(&bound, &sink), Range::new(-5, 100));
    }

    #[test]
    fn test_fix_lower_bound_predicates() {
        let bound = Range::new(10, 20);
        let sink = Range::new(MIN, 50);
        let symb = SymbInterval::new(ValueId(3), CmpPredicate::Sgt);
        assert_eq!(symb.fix(&bound, &sink), Range::new(11, 50));
        let symb = SymbInterval::new(ValueId(3), CmpPredicate::Sge);
        assert_eq!(symb.fix(&bound, &sink), Range::new(10, 50));
    }

    #[test]
    fn test_fix_at_infinity_does_not_step() {
        let symb = SymbInterval::new(ValueId(1), CmpPredicate::Slt);
        let bound = Range::full();
        let sink = Range::new(0, 0);
        assert_eq!(symb.fix(&bound, &sink), Range::new(0, MAX));
    }

    #[test]
    fn test_equality_adopts_bound() {
        let symb = SymbInterval::new(ValueId(1), CmpPredicate::Eq);
        let bound = Range::new(4, 8);
        assert_eq!(symb.fix(&bound, &Range::full()), Range::new(4, 8));
    }

    #[test]
    fn test_symbolic_slot_implies_nothing_until_fixed() {
        let slot = IntervalConstraint::symbolic(ValueId(2), CmpPredicate::Slt);
        assert!(slot.is_symbolic());
        assert!(slot.range().is_full_set());
        let fixed = IntervalConstraint::basic(Range::new(0, 9));
        assert_eq!(fixed.range(), Range::new(0, 9));
    }
}
