//! The run context: every shared structure of one `solve()` call in a
//! single struct threaded by reference. There are no globals.

use saturn_ir::{ClauseStore, Kbo, Signature, TermStore};

use crate::options::Options;
use crate::stats::Statistics;

pub struct Env {
    pub store: TermStore,
    pub sig: Signature,
    pub ordering: Kbo,
    pub options: Options,
    pub stats: Statistics,
    pub clauses: ClauseStore,
}

impl Env {
    pub fn new(sig: Signature, options: Options) -> Env {
        Env {
            store: TermStore::new(),
            sig,
            ordering: Kbo::new(),
            options,
            stats: Statistics::default(),
            clauses: ClauseStore::new(),
        }
    }
}
