//! Robinson unification and matching over banked variables, with scoped
//! backtracking.
//!
//! A variable is identified by its index *and a bank*: the same variable
//! index in two different banks is two different variables. This is how one
//! substitution relates a query clause (bank 0) and a result clause
//! (bank 1) without renaming either. Two banks are reserved: `SPECIAL` for
//! the special variables of the indexing structures, and `UNBOUND` for the
//! output naming of variables that remain unbound when a substitution is
//! applied.
//!
//! All destructive operations record their bindings on a trail; callers
//! take a [`Snapshot`] before speculative work and either `commit` or
//! `rollback_to` it, in the same shape as an inference-table snapshot.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::interner::{LiteralId, TermData, TermId, TermStore};
use crate::signature::Signature;
use crate::{Fallible, NoUnifier};

/// A variable bank. Banks 0, 1, 2, … are ordinary; two banks are reserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bank(pub i32);

impl Bank {
    /// The bank of all special (index-internal) variables.
    pub const SPECIAL: Bank = Bank(-2);
    /// The output bank: unbound variables are renamed into it by `apply`.
    pub const UNBOUND: Bank = Bank(-1);

    pub const QUERY: Bank = Bank(0);
    pub const RESULT: Bank = Bank(1);
    /// The bank index keys are normalized into inside substitution trees.
    pub const NORM: Bank = Bank(2);
}

/// A variable together with its bank.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct VarSpec {
    pub var: u32,
    pub bank: Bank,
}

/// A term together with the bank its ordinary variables live in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TermSpec {
    pub term: TermId,
    pub bank: Bank,
}

impl TermSpec {
    pub fn new(term: TermId, bank: Bank) -> TermSpec {
        TermSpec { term, bank }
    }

    /// The variable this spec denotes. Special variables always live in the
    /// `SPECIAL` bank, whatever bank the enclosing term carried.
    pub fn var_spec(&self, store: &TermStore) -> Option<VarSpec> {
        match store.data(self.term) {
            TermData::Var(v) => Some(VarSpec {
                var: *v,
                bank: self.bank,
            }),
            TermData::SpecialVar(v) => Some(VarSpec {
                var: *v,
                bank: Bank::SPECIAL,
            }),
            TermData::App { .. } => None,
        }
    }

    fn is_var(&self, store: &TermStore) -> bool {
        store.is_var(self.term)
    }

    /// Best-effort content equality without dereferencing: equal ids in
    /// equal banks, or an id that cannot contain variables at all.
    fn same_content(&self, other: &TermSpec, store: &TermStore) -> bool {
        self.term == other.term
            && (self.bank == other.bank || (!store.is_var(self.term) && store.is_ground(self.term)))
    }
}

/// A point on the binding trail that can be rolled back to.
#[derive(Copy, Clone, Debug)]
pub struct Snapshot {
    trail_len: usize,
}

/// The substitution: banked bindings with union-find-style chain
/// dereferencing and an explicit trail.
#[derive(Default)]
pub struct RobSubstitution {
    bindings: FxHashMap<VarSpec, TermSpec>,
    trail: Vec<VarSpec>,
    next_unbound: u32,
}

impl RobSubstitution {
    pub fn new() -> RobSubstitution {
        RobSubstitution::default()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            trail_len: self.trail.len(),
        }
    }

    pub fn rollback_to(&mut self, snapshot: Snapshot) {
        while self.trail.len() > snapshot.trail_len {
            let v = self.trail.pop().unwrap();
            self.bindings.remove(&v);
        }
    }

    pub fn commit(&mut self, _snapshot: Snapshot) {
        // Bindings stay on the trail so an enclosing snapshot can still
        // undo them.
    }

    pub fn reset(&mut self) {
        self.bindings.clear();
        self.trail.clear();
        self.next_unbound = 0;
    }

    fn bind(&mut self, v: VarSpec, t: TermSpec) {
        debug_assert!(v.bank != Bank::UNBOUND);
        debug_assert!(!self.bindings.contains_key(&v));
        self.trail.push(v);
        self.bindings.insert(v, t);
    }

    /// Binds a special variable of the indexing layer.
    pub fn bind_special_var(&mut self, var: u32, t: TermSpec) {
        self.bind(
            VarSpec {
                var,
                bank: Bank::SPECIAL,
            },
            t,
        );
    }

    pub fn lookup(&self, v: VarSpec) -> Option<TermSpec> {
        self.bindings.get(&v).copied()
    }

    /// The fully dereferenced binding of `v`: an application, or the last
    /// (unbound) variable of the chain. `None` if `v` itself is unbound.
    pub fn resolve(&self, store: &TermStore, v: VarSpec) -> Option<TermSpec> {
        let t = *self.bindings.get(&v)?;
        Some(self.deref_bound(store, t))
    }

    /// Follows the binding chain from `t`: the result is an application, or
    /// the final (unbound or output-bank) variable of the chain.
    pub fn deref_bound(&self, store: &TermStore, mut t: TermSpec) -> TermSpec {
        loop {
            let Some(v) = t.var_spec(store) else { return t };
            if v.bank == Bank::UNBOUND {
                return t;
            }
            match self.bindings.get(&v) {
                Some(&next) => t = next,
                None => return t,
            }
        }
    }

    fn root(&self, store: &TermStore, mut v: VarSpec) -> VarSpec {
        loop {
            match self.bindings.get(&v) {
                Some(next) => match next.var_spec(store) {
                    Some(nv) if nv.bank != Bank::UNBOUND => v = nv,
                    _ => return v,
                },
                None => return v,
            }
        }
    }

    pub fn is_unbound(&self, store: &TermStore, v: VarSpec) -> bool {
        let r = self.root(store, v);
        match self.bindings.get(&r) {
            None => true,
            Some(t) => t.is_var(store),
        }
    }

    /// Occurs check on the dereferenced subterm DAG, with a seen-set so
    /// shared subterms are visited once.
    fn occurs(&self, store: &TermStore, v: VarSpec, t: TermSpec) -> bool {
        let v = self.root(store, v);
        let t = self.deref_bound(store, t);
        if t.is_var(store) {
            return false;
        }
        let mut seen: FxHashSet<VarSpec> = FxHashSet::default();
        let mut todo = vec![t];
        while let Some(t) = todo.pop() {
            if let Some(tv) = t.var_spec(store) {
                let tv = self.root(store, tv);
                if tv == v {
                    return true;
                }
                if seen.insert(tv) {
                    let dt = self.deref_bound(store, TermSpec::new(t.term, t.bank));
                    if !dt.is_var(store) {
                        todo.push(dt);
                    }
                }
            } else if let Some((_, args)) = store.as_app(t.term) {
                todo.extend(args.iter().map(|&a| TermSpec::new(a, t.bank)));
            }
        }
        false
    }

    pub fn unify_ids(
        &mut self,
        store: &TermStore,
        t1: TermId,
        b1: Bank,
        t2: TermId,
        b2: Bank,
    ) -> bool {
        self.unify(store, TermSpec::new(t1, b1), TermSpec::new(t2, b2))
            .is_ok()
    }

    /// Robinson unification with an explicit worklist. An
    /// encountered-pair cache keeps shared subterm pairs from being solved
    /// more than once, which would otherwise be exponential on DAGs.
    /// On failure all bindings made by this call are rolled back.
    pub fn unify(&mut self, store: &TermStore, s: TermSpec, t: TermSpec) -> Fallible<()> {
        debug!(?s, ?t, "unify");
        if s.same_content(&t, store) {
            return Ok(());
        }
        let snapshot = self.snapshot();
        let mut todo: Vec<(TermSpec, TermSpec)> = vec![(s, t)];
        let mut encountered: FxHashSet<(TermSpec, TermSpec)> = FxHashSet::default();

        while let Some((a, b)) = todo.pop() {
            let da = self.deref_bound(store, a);
            let db = self.deref_bound(store, b);
            if da.same_content(&db, store) {
                continue;
            }
            match (da.var_spec(store), db.var_spec(store)) {
                (Some(va), _) if va.bank != Bank::UNBOUND && !self.occurs(store, va, db) => {
                    self.bind(va, db);
                }
                (_, Some(vb)) if vb.bank != Bank::UNBOUND && !self.occurs(store, vb, da) => {
                    self.bind(vb, da);
                }
                (None, None) => {
                    let (fa, args_a) = store.as_app(da.term).unwrap();
                    let (fb, args_b) = store.as_app(db.term).unwrap();
                    if fa != fb {
                        self.rollback_to(snapshot);
                        return Err(NoUnifier);
                    }
                    for (&x, &y) in args_a.iter().zip(args_b.iter()) {
                        let pair = (TermSpec::new(x, da.bank), TermSpec::new(y, db.bank));
                        let var_var = pair.0.is_var(store) && pair.1.is_var(store);
                        if var_var || encountered.insert(pair) {
                            todo.push(pair);
                        }
                    }
                }
                _ => {
                    // A variable whose occurs check failed, or an
                    // output-bank variable against a non-variable.
                    self.rollback_to(snapshot);
                    return Err(NoUnifier);
                }
            }
        }
        self.commit(snapshot);
        Ok(())
    }

    /// One-sided matching of `instance` onto the pattern `base`: ordinary
    /// variables are assigned only in `base_bank`, but special variables
    /// may be bound on either side (they occur only in the internal terms
    /// of substitution trees, and instance retrieval elaborates them while
    /// it descends). On failure all bindings made by this call are rolled
    /// back.
    pub fn match_(
        &mut self,
        store: &TermStore,
        base: TermSpec,
        instance: TermSpec,
        base_bank: Bank,
    ) -> Fallible<()> {
        debug!(?base, ?instance, "match");
        let snapshot = self.snapshot();
        let mut todo: Vec<(TermSpec, TermSpec)> = vec![(base, instance)];

        while let Some((b, i)) = todo.pop() {
            let db = self.deref_special(store, b);
            let di = self.deref_special(store, i);
            if db.same_content(&di, store) {
                continue;
            }
            let bv = db.var_spec(store);
            let iv = di.var_spec(store);
            match (bv, iv) {
                (Some(v), _) if v.bank == Bank::SPECIAL => {
                    self.bind(v, di);
                }
                (_, Some(v)) if v.bank == Bank::SPECIAL => {
                    self.bind(v, db);
                }
                (Some(v), _) if v.bank == base_bank => match self.bindings.get(&v) {
                    Some(&bound) => todo.push((bound, di)),
                    None => self.bind(v, di),
                },
                (Some(v), Some(w)) if v == w => {}
                (None, None) => {
                    let (fb, args_b) = store.as_app(db.term).unwrap();
                    let (fi, args_i) = store.as_app(di.term).unwrap();
                    if fb != fi {
                        self.rollback_to(snapshot);
                        return Err(NoUnifier);
                    }
                    for (&x, &y) in args_b.iter().zip(args_i.iter()) {
                        todo.push((TermSpec::new(x, db.bank), TermSpec::new(y, di.bank)));
                    }
                }
                _ => {
                    self.rollback_to(snapshot);
                    return Err(NoUnifier);
                }
            }
        }
        self.commit(snapshot);
        Ok(())
    }

    /// Dereferences only special-variable chains, leaving ordinary
    /// variables alone (matching must see them unexpanded to enforce
    /// one-sidedness).
    fn deref_special(&self, store: &TermStore, mut t: TermSpec) -> TermSpec {
        loop {
            match t.var_spec(store) {
                Some(v) if v.bank == Bank::SPECIAL => match self.bindings.get(&v) {
                    Some(&next) => t = next,
                    None => return t,
                },
                _ => return t,
            }
        }
    }

    /// Applies the substitution: bound variables are replaced by their
    /// (recursively applied) bindings, unbound ordinary variables are named
    /// apart into the output bank. The result never contains special
    /// variables.
    pub fn apply(&mut self, store: &mut TermStore, sig: &Signature, t: TermSpec) -> TermId {
        let d = self.deref_bound(store, t);
        match store.data(d.term) {
            TermData::Var(v) => {
                if d.bank == Bank::UNBOUND {
                    return d.term;
                }
                let v = VarSpec {
                    var: *v,
                    bank: d.bank,
                };
                self.name_apart(store, v)
            }
            TermData::SpecialVar(v) => {
                // A live special variable here means an index leaked its
                // internal state; see the invariant-violation error kind.
                debug_assert!(false, "special variable {v} reached apply unbound");
                let v = VarSpec {
                    var: *v,
                    bank: Bank::SPECIAL,
                };
                self.name_apart(store, v)
            }
            TermData::App { functor, args } => {
                let functor = *functor;
                let args = args.clone();
                let new_args: Vec<TermId> = args
                    .iter()
                    .map(|&a| self.apply(store, sig, TermSpec::new(a, d.bank)))
                    .collect();
                store.app(sig, functor, new_args)
            }
        }
    }

    /// Like [`apply`](Self::apply), but unbound variables of
    /// `identity_bank` stay themselves instead of being named apart.
    /// Matching a pattern against a stored instance binds every pattern
    /// variable, so rewriting inside the stored clause needs the stored
    /// side untouched.
    pub fn apply_identity(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        t: TermSpec,
        identity_bank: Bank,
    ) -> TermId {
        let d = self.deref_bound(store, t);
        match store.data(d.term) {
            TermData::Var(_) => {
                if d.bank == identity_bank || d.bank == Bank::UNBOUND {
                    d.term
                } else {
                    let v = d.var_spec(store).unwrap();
                    self.name_apart(store, v)
                }
            }
            TermData::SpecialVar(v) => {
                debug_assert!(false, "special variable {v} reached apply unbound");
                d.term
            }
            TermData::App { functor, args } => {
                let functor = *functor;
                let args = args.clone();
                let new_args: Vec<TermId> = args
                    .iter()
                    .map(|&a| self.apply_identity(store, sig, TermSpec::new(a, d.bank), identity_bank))
                    .collect();
                store.app(sig, functor, new_args)
            }
        }
    }

    fn name_apart(&mut self, store: &mut TermStore, v: VarSpec) -> TermId {
        let out = store.var(self.next_unbound);
        self.next_unbound += 1;
        self.bind(v, TermSpec::new(out, Bank::UNBOUND));
        out
    }

    pub fn apply_literal(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        l: LiteralId,
        bank: Bank,
    ) -> LiteralId {
        let header = store.lit_header(l);
        let args: Vec<TermId> = store.lit_args(l).to_vec();
        let new_args: Vec<TermId> = args
            .iter()
            .map(|&a| self.apply(store, sig, TermSpec::new(a, bank)))
            .collect();
        store.literal(sig, header.predicate(), header.polarity(), new_args)
    }

    /// True if the substitution maps the variables of `t` (in `bank`) to
    /// pairwise distinct variables, i.e. restricted to `t` it is a
    /// renaming. Consulted by the encompassment check of demodulation.
    pub fn is_renaming_on(&self, store: &TermStore, t: TermId, bank: Bank) -> bool {
        let mut images: FxHashSet<VarSpec> = FxHashSet::default();
        for var in store.vars(t).iter() {
            let node = store
                .existing_var(var)
                .expect("variables of an interned term are interned");
            let d = self.deref_bound(store, TermSpec::new(node, bank));
            match d.var_spec(store) {
                Some(img) => {
                    if !images.insert(img) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        true
    }
}

/// A substitution together with the two banks a retrieval related: apply a
/// term of the query clause with [`apply_to_query`], a term of the stored
/// (result) clause with [`apply_to_result`].
///
/// [`apply_to_query`]: ResultSubstitution::apply_to_query
/// [`apply_to_result`]: ResultSubstitution::apply_to_result
pub struct ResultSubstitution<'a> {
    pub subst: &'a mut RobSubstitution,
    pub query_bank: Bank,
    pub result_bank: Bank,
}

impl<'a> ResultSubstitution<'a> {
    pub fn new(
        subst: &'a mut RobSubstitution,
        query_bank: Bank,
        result_bank: Bank,
    ) -> ResultSubstitution<'a> {
        ResultSubstitution {
            subst,
            query_bank,
            result_bank,
        }
    }

    pub fn apply_to_query(&mut self, store: &mut TermStore, sig: &Signature, t: TermId) -> TermId {
        self.subst.apply(store, sig, TermSpec::new(t, self.query_bank))
    }

    pub fn apply_to_result(&mut self, store: &mut TermStore, sig: &Signature, t: TermId) -> TermId {
        self.subst.apply(store, sig, TermSpec::new(t, self.result_bank))
    }

    pub fn apply_to_query_literal(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        l: LiteralId,
    ) -> LiteralId {
        self.subst.apply_literal(store, sig, l, self.query_bank)
    }

    pub fn apply_to_result_literal(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        l: LiteralId,
    ) -> LiteralId {
        self.subst.apply_literal(store, sig, l, self.result_bank)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::Sort;

    fn setup() -> (Signature, TermStore) {
        (Signature::new(), TermStore::new())
    }

    #[test]
    fn unify_binds_both_sides_equal() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let y = store.var(1);
        // f(x, a) =? f(a, y)
        let s = store.app(&sig, f, vec![x, ca]);
        let t = store.app(&sig, f, vec![ca, y]);
        let mut subst = RobSubstitution::new();
        assert!(subst.unify_ids(&store, s, Bank::QUERY, t, Bank::RESULT));
        let s_applied = subst.apply(&mut store, &sig, TermSpec::new(s, Bank::QUERY));
        let t_applied = subst.apply(&mut store, &sig, TermSpec::new(t, Bank::RESULT));
        assert_eq!(s_applied, t_applied);
    }

    #[test]
    fn occurs_check_rejects_cyclic_binding() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let x = store.var(0);
        let fx = store.app(&sig, f, vec![x]);
        let mut subst = RobSubstitution::new();
        assert!(!subst.unify_ids(&store, x, Bank::QUERY, fx, Bank::QUERY));
        // In distinct banks x and f(x) are unifiable: x/0 := f(x/1).
        assert!(subst.unify_ids(&store, x, Bank::QUERY, fx, Bank::RESULT));
    }

    #[test]
    fn failed_unification_leaves_no_bindings() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        let x = store.var(0);
        // f(x, a) vs f(b, b): x binds to b, then a vs b fails.
        let s = store.app(&sig, f, vec![x, ca]);
        let t = store.app(&sig, f, vec![cb, cb]);
        let mut subst = RobSubstitution::new();
        assert!(!subst.unify_ids(&store, s, Bank::QUERY, t, Bank::RESULT));
        assert!(subst
            .lookup(VarSpec {
                var: 0,
                bank: Bank::QUERY
            })
            .is_none());
    }

    #[test]
    fn match_is_one_sided() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let fx = store.app(&sig, f, vec![x]);
        let fa = store.app(&sig, f, vec![ca]);
        let mut subst = RobSubstitution::new();
        // f(x) matches f(a) …
        assert!(subst
            .match_(
                &store,
                TermSpec::new(fx, Bank::QUERY),
                TermSpec::new(fa, Bank::RESULT),
                Bank::QUERY,
            )
            .is_ok());
        let applied = subst.apply(&mut store, &sig, TermSpec::new(fx, Bank::QUERY));
        assert_eq!(applied, fa);
        // … but f(a) does not match f(x): instance variables are rigid.
        let mut subst = RobSubstitution::new();
        assert!(subst
            .match_(
                &store,
                TermSpec::new(fa, Bank::QUERY),
                TermSpec::new(fx, Bank::RESULT),
                Bank::QUERY,
            )
            .is_err());
    }

    #[test]
    fn match_binds_consistently() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        let x = store.var(0);
        let fxx = store.app(&sig, f, vec![x, x]);
        let faa = store.app(&sig, f, vec![ca, ca]);
        let fab = store.app(&sig, f, vec![ca, cb]);
        let mut subst = RobSubstitution::new();
        assert!(subst
            .match_(
                &store,
                TermSpec::new(fxx, Bank::QUERY),
                TermSpec::new(faa, Bank::RESULT),
                Bank::QUERY,
            )
            .is_ok());
        let mut subst = RobSubstitution::new();
        assert!(subst
            .match_(
                &store,
                TermSpec::new(fxx, Bank::QUERY),
                TermSpec::new(fab, Bank::RESULT),
                Bank::QUERY,
            )
            .is_err());
    }

    #[test]
    fn snapshot_rollback_restores_state() {
        let (mut sig, mut store) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let mut subst = RobSubstitution::new();
        let snapshot = subst.snapshot();
        assert!(subst.unify_ids(&store, x, Bank::QUERY, ca, Bank::RESULT));
        subst.rollback_to(snapshot);
        assert!(subst
            .lookup(VarSpec {
                var: 0,
                bank: Bank::QUERY
            })
            .is_none());
    }

    #[test]
    fn apply_names_unbound_variables_apart() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let x = store.var(4);
        let y = store.var(9);
        let t = store.app(&sig, f, vec![x, y]);
        let mut subst = RobSubstitution::new();
        let applied = subst.apply(&mut store, &sig, TermSpec::new(t, Bank::QUERY));
        let v0 = store.var(0);
        let v1 = store.var(1);
        assert_eq!(applied, store.app(&sig, f, vec![v0, v1]));
    }

    #[test]
    fn shared_subterms_unify_in_linear_pairs() {
        // f(x1, …, xn, g(x1), …, g(xn)) against its shifted copy is the
        // classic exponential case when pairs are revisited.
        let (mut sig, mut store) = setup();
        let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let n = 16;
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2 * n], Sort::INDIVIDUAL);
        let mut args1 = vec![];
        let mut args2 = vec![];
        for i in 0..n as u32 {
            args1.push(store.var(i));
            args2.push(store.var(i + 1));
        }
        for i in 0..n as u32 {
            let v1 = store.var(i);
            let v2 = store.var(i + 1);
            let g1 = store.app(&sig, g, vec![v1]);
            let g2 = store.app(&sig, g, vec![v2]);
            args1.push(g1);
            args2.push(g2);
        }
        let t1 = store.app(&sig, f, args1);
        let t2 = store.app(&sig, f, args2);
        let mut subst = RobSubstitution::new();
        assert!(subst.unify_ids(&store, t1, Bank::QUERY, t2, Bank::QUERY));
    }
}
