//! Flat terms: a pre-expanded preorder traversal of a term, the input form
//! of the code-tree matcher. Each entry keeps the id of the subterm rooted
//! there, and each function entry records where its subterm ends, so the
//! matcher can skip an entire argument and compare bound subterms in O(1).

use crate::interner::{TermData, TermId, TermStore};
use crate::signature::Functor;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlatEntry {
    /// An application; `end` is the index one past the entries of this
    /// subterm.
    Fun {
        functor: Functor,
        end: u32,
        term: TermId,
    },
    Var { var: u32, term: TermId },
}

impl FlatEntry {
    pub fn term(&self) -> TermId {
        match self {
            FlatEntry::Fun { term, .. } | FlatEntry::Var { term, .. } => *term,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatTerm {
    entries: Vec<FlatEntry>,
}

impl FlatTerm {
    pub fn of_term(store: &TermStore, t: TermId) -> FlatTerm {
        let mut entries = vec![];
        flatten(store, t, &mut entries);
        FlatTerm { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, i: usize) -> FlatEntry {
        self.entries[i]
    }

    /// The index one past the subterm that starts at `i`.
    pub fn end_of(&self, i: usize) -> usize {
        match self.entries[i] {
            FlatEntry::Fun { end, .. } => end as usize,
            FlatEntry::Var { .. } => i + 1,
        }
    }
}

fn flatten(store: &TermStore, t: TermId, out: &mut Vec<FlatEntry>) {
    match store.data(t) {
        TermData::Var(v) | TermData::SpecialVar(v) => out.push(FlatEntry::Var { var: *v, term: t }),
        TermData::App { functor, args } => {
            let at = out.len();
            out.push(FlatEntry::Fun {
                functor: *functor,
                end: 0,
                term: t,
            });
            for &a in args {
                flatten(store, a, out);
            }
            let end = out.len() as u32;
            if let FlatEntry::Fun { end: e, .. } = &mut out[at] {
                *e = end;
            }
        }
    }
}
