//! Shared data model of the prover: hash-consed terms and literals, the
//! clause arena, the simplification ordering and the Robinson substitution
//! engine that all indices and inference engines are built on.

use lalrpop_intern::InternedString;

pub mod clause;
pub mod flat;
pub mod interner;
pub mod kbo;
pub mod renaming;
pub mod signature;
pub mod subst;

pub type Identifier = InternedString;

pub use crate::clause::{Clause, ClauseId, ClauseStore, Color, Inference, InputType, Rule, Store};
pub use crate::interner::{Header, LiteralId, TermData, TermId, TermStore};
pub use crate::kbo::{Comparison, Kbo};
pub use crate::renaming::Renaming;
pub use crate::signature::{Functor, Interpreted, Predicate, Signature, Sort};
pub use crate::subst::{Bank, ResultSubstitution, RobSubstitution, Snapshot, TermSpec, VarSpec};

/// Many of the operations in this crate either succeed or fail to produce a
/// unifier/match; there is no error information beyond that.
pub type Fallible<T> = Result<T, NoUnifier>;

/// Indicates that unification (or matching) cannot be completed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NoUnifier;
