//! Interprocedural interval range analysis.
//!
//! The engine over-approximates the set of runtime values every integer
//! variable of a program can take, as a contiguous range with infinite
//! sentinels. Branch conditions are turned into interval constraints
//! attached to gating points, and a fixpoint solver with bounded widening
//! and narrowing runs over the strongly connected components of the value
//! dependence graph, one component at a time in topological order.

#![warn(missing_docs)]
#![allow(clippy::arithmetic_side_effects)]

pub mod branch;
pub mod graph;
pub mod interval;
pub mod ir;
pub mod range;
pub mod seeds;
pub mod solver;
