//! Variable renaming: maps the ordinary variables of a term to a canonical
//! numbering in order of first occurrence. Index keys are normalized this
//! way before insertion, so α-variants share one key.

use rustc_hash::FxHashMap;

use crate::interner::{LiteralId, TermData, TermId, TermStore};
use crate::signature::Signature;

#[derive(Default, Debug)]
pub struct Renaming {
    map: FxHashMap<u32, u32>,
    next: u32,
}

impl Renaming {
    pub fn new() -> Renaming {
        Renaming::default()
    }

    pub fn rename_var(&mut self, var: u32) -> u32 {
        let next = self.next;
        let renamed = *self.map.entry(var).or_insert(next);
        if renamed == next {
            self.next += 1;
        }
        renamed
    }

    /// Applied to each key component in turn, first-occurrence ids are
    /// stable for a fixed component order.
    pub fn normalize_term(&mut self, store: &mut TermStore, sig: &Signature, t: TermId) -> TermId {
        match store.data(t) {
            TermData::Var(v) => {
                let v = *v;
                let renamed = self.rename_var(v);
                store.var(renamed)
            }
            TermData::SpecialVar(_) => t,
            TermData::App { functor, args } => {
                let functor = *functor;
                let args = args.clone();
                let new_args: Vec<TermId> = args
                    .iter()
                    .map(|&a| self.normalize_term(store, sig, a))
                    .collect();
                store.app(sig, functor, new_args)
            }
        }
    }

    pub fn normalize_literal(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        l: LiteralId,
    ) -> LiteralId {
        let header = store.lit_header(l);
        let args: Vec<TermId> = store.lit_args(l).to_vec();
        let new_args: Vec<TermId> = args
            .iter()
            .map(|&a| self.normalize_term(store, sig, a))
            .collect();
        store.literal(sig, header.predicate(), header.polarity(), new_args)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::Sort;

    #[test]
    fn variants_normalize_to_the_same_term() {
        let mut sig = Signature::new();
        let mut store = TermStore::new();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let x = store.var(7);
        let y = store.var(3);
        let t1 = store.app(&sig, f, vec![x, y]);
        let u = store.var(1);
        let v = store.var(9);
        let t2 = store.app(&sig, f, vec![u, v]);
        let n1 = Renaming::new().normalize_term(&mut store, &sig, t1);
        let n2 = Renaming::new().normalize_term(&mut store, &sig, t2);
        assert_eq!(n1, n2);
    }

    #[test]
    fn repeated_variables_keep_their_identity() {
        let mut sig = Signature::new();
        let mut store = TermStore::new();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let x = store.var(5);
        let t = store.app(&sig, f, vec![x, x]);
        let n = Renaming::new().normalize_term(&mut store, &sig, t);
        let x0 = store.var(0);
        assert_eq!(n, store.app(&sig, f, vec![x0, x0]));
    }
}
