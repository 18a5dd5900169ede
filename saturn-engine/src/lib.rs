//! The saturation engine: options, containers, inference engines and the
//! given-clause driver, on top of `saturn-ir` and `saturn-index`.

pub mod demodulation;
pub mod env;
pub mod options;
pub mod passive;
pub mod redundancy;
pub mod resolution;
pub mod saturation;
pub mod selection;
pub mod simplify;
pub mod stats;
pub mod superposition;
pub mod theory;

pub use crate::env::Env;
pub use crate::options::{
    DemodulationMode, DemodulationRedundancyCheck, LiteralSelector, Options, PredicateSplit,
    ReducibilityCheck, SaturationAlgorithm, SplitFeature, UnificationIndexKind,
    UnificationWithAbstraction,
};
pub use crate::saturation::{solve, Proof, ProofStep, SolveResult, TerminationReason};
pub use crate::stats::Statistics;
