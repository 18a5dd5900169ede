//! Indexing structures of the prover: the fingerprint pre-filter, the
//! substitution tree and the code-tree matcher, plus the concrete index
//! wrappers consumed by the inference engines.

pub mod code_tree;
pub mod fingerprint;
pub mod skiplist;
pub mod subst_tree;
pub mod term_index;

use saturn_ir::{ClauseId, LiteralId, TermId};

/// What a leaf of a term index stores: the indexed term together with the
/// literal and clause it came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Entry {
    pub clause: ClauseId,
    pub literal: LiteralId,
    pub term: TermId,
}
