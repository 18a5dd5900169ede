//! The term store: a hash-consed arena of shared, immutable terms and
//! literals.
//!
//! Interning canonicalizes structurally equal terms to a unique node, so id
//! equality is structural equality. Every application node caches its
//! weight, its ground flag and the set of ordinary variables occurring in
//! it; these are consulted constantly by the ordering and the indices and
//! must never be recomputed by traversal on hot paths.

use rustc_hash::FxHashMap;

use crate::signature::{Functor, Predicate, Signature};

/// Index of a shared term node in the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId {
    pub index: u32,
}

/// Index of a shared literal node in the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LiteralId {
    pub index: u32,
}

/// A literal header: predicate and polarity combined into one number, used
/// to hash literals into rewrite banks and to key literal indices. The
/// complement of a header flips the low bit.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Header(pub u32);

impl Header {
    pub fn new(predicate: Predicate, polarity: bool) -> Header {
        Header(predicate.index << 1 | polarity as u32)
    }

    pub fn complement(self) -> Header {
        Header(self.0 ^ 1)
    }

    pub fn polarity(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn predicate(self) -> Predicate {
        Predicate { index: self.0 >> 1 }
    }
}

/// One shared term node.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TermData {
    /// An ordinary variable, free in clauses.
    Var(u32),
    /// A special variable; these occur only inside indexing structures and
    /// must never leak into clauses or result substitutions.
    SpecialVar(u32),
    /// An application of a functor to argument terms.
    App { functor: Functor, args: Vec<TermId> },
}

/// A set of ordinary variable indices, kept as a bitset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VarSet {
    words: Vec<u64>,
}

impl VarSet {
    pub fn singleton(var: u32) -> VarSet {
        let mut s = VarSet::default();
        s.insert(var);
        s
    }

    pub fn insert(&mut self, var: u32) {
        let word = (var / 64) as usize;
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (var % 64);
    }

    pub fn contains(&self, var: u32) -> bool {
        let word = (var / 64) as usize;
        self.words.get(word).map_or(false, |w| w & (1 << (var % 64)) != 0)
    }

    pub fn union_with(&mut self, other: &VarSet) {
        if self.words.len() < other.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            (0..64).filter(move |b| w & (1 << b) != 0).map(move |b| i as u32 * 64 + b)
        })
    }
}

struct TermNode {
    data: TermData,
    weight: u32,
    ground: bool,
    vars: VarSet,
}

struct LiteralNode {
    header: Header,
    args: Vec<TermId>,
    weight: u32,
    ground: bool,
    vars: VarSet,
}

/// The arena of shared terms and literals.
///
/// There is exactly one store per run; it is the only shared-mutable
/// structure, and its single writer (interning) is nested inside the
/// single-threaded saturation loop.
pub struct TermStore {
    terms: Vec<TermNode>,
    literals: Vec<LiteralNode>,
    app_ids: FxHashMap<(Functor, Vec<TermId>), TermId>,
    var_ids: FxHashMap<u32, TermId>,
    special_ids: FxHashMap<u32, TermId>,
    literal_ids: FxHashMap<(Header, Vec<TermId>), LiteralId>,
    next_fresh_var: u32,
}

impl Default for TermStore {
    fn default() -> Self {
        TermStore::new()
    }
}

impl TermStore {
    pub fn new() -> Self {
        TermStore {
            terms: vec![],
            literals: vec![],
            app_ids: FxHashMap::default(),
            var_ids: FxHashMap::default(),
            special_ids: FxHashMap::default(),
            literal_ids: FxHashMap::default(),
            next_fresh_var: 0,
        }
    }

    pub fn var(&mut self, var: u32) -> TermId {
        if let Some(&id) = self.var_ids.get(&var) {
            return id;
        }
        self.next_fresh_var = self.next_fresh_var.max(var + 1);
        let id = self.push(TermNode {
            data: TermData::Var(var),
            weight: 1,
            ground: false,
            vars: VarSet::singleton(var),
        });
        self.var_ids.insert(var, id);
        id
    }

    pub fn special_var(&mut self, var: u32) -> TermId {
        if let Some(&id) = self.special_ids.get(&var) {
            return id;
        }
        let id = self.push(TermNode {
            data: TermData::SpecialVar(var),
            weight: 1,
            ground: false,
            vars: VarSet::default(),
        });
        self.special_ids.insert(var, id);
        id
    }

    /// The node of an already-interned variable. Variables occurring in an
    /// interned term always have a node.
    pub fn existing_var(&self, var: u32) -> Option<TermId> {
        self.var_ids.get(&var).copied()
    }

    /// A variable index that has not been used in any term so far.
    pub fn fresh_var(&mut self) -> u32 {
        let v = self.next_fresh_var;
        self.next_fresh_var += 1;
        v
    }

    /// Canonical insertion: interning the same functor/argument structure
    /// twice yields the same id.
    pub fn app(&mut self, sig: &Signature, functor: Functor, args: Vec<TermId>) -> TermId {
        debug_assert_eq!(sig.function(functor).arity, args.len());
        if let Some(&id) = self.app_ids.get(&(functor, args.clone())) {
            return id;
        }
        let mut weight = sig.function_weight(functor);
        let mut ground = true;
        let mut vars = VarSet::default();
        for &arg in &args {
            let node = &self.terms[arg.index as usize];
            weight += node.weight;
            ground &= node.ground;
            vars.union_with(&node.vars);
        }
        let id = self.push(TermNode {
            data: TermData::App {
                functor,
                args: args.clone(),
            },
            weight,
            ground,
            vars,
        });
        self.app_ids.insert((functor, args), id);
        id
    }

    pub fn constant(&mut self, sig: &Signature, functor: Functor) -> TermId {
        self.app(sig, functor, vec![])
    }

    pub fn literal(
        &mut self,
        sig: &Signature,
        predicate: Predicate,
        polarity: bool,
        args: Vec<TermId>,
    ) -> LiteralId {
        debug_assert_eq!(sig.predicate(predicate).arity, args.len());
        let header = Header::new(predicate, polarity);
        if let Some(&id) = self.literal_ids.get(&(header, args.clone())) {
            return id;
        }
        let mut weight = 1;
        let mut ground = true;
        let mut vars = VarSet::default();
        for &arg in &args {
            let node = &self.terms[arg.index as usize];
            weight += node.weight;
            ground &= node.ground;
            vars.union_with(&node.vars);
        }
        let id = LiteralId {
            index: self.literals.len() as u32,
        };
        self.literals.push(LiteralNode {
            header,
            args: args.clone(),
            weight,
            ground,
            vars,
        });
        self.literal_ids.insert((header, args), id);
        id
    }

    pub fn equality(&mut self, sig: &Signature, polarity: bool, lhs: TermId, rhs: TermId) -> LiteralId {
        self.literal(sig, Predicate::EQUALITY, polarity, vec![lhs, rhs])
    }

    fn push(&mut self, node: TermNode) -> TermId {
        let id = TermId {
            index: self.terms.len() as u32,
        };
        self.terms.push(node);
        id
    }

    pub fn data(&self, t: TermId) -> &TermData {
        &self.terms[t.index as usize].data
    }

    pub fn weight(&self, t: TermId) -> u32 {
        self.terms[t.index as usize].weight
    }

    pub fn is_ground(&self, t: TermId) -> bool {
        self.terms[t.index as usize].ground
    }

    pub fn vars(&self, t: TermId) -> &VarSet {
        &self.terms[t.index as usize].vars
    }

    pub fn is_var(&self, t: TermId) -> bool {
        matches!(self.data(t), TermData::Var(_) | TermData::SpecialVar(_))
    }

    pub fn as_app(&self, t: TermId) -> Option<(Functor, &[TermId])> {
        match self.data(t) {
            TermData::App { functor, args } => Some((*functor, args)),
            _ => None,
        }
    }

    pub fn lit_header(&self, l: LiteralId) -> Header {
        self.literals[l.index as usize].header
    }

    pub fn lit_predicate(&self, l: LiteralId) -> Predicate {
        self.lit_header(l).predicate()
    }

    pub fn lit_polarity(&self, l: LiteralId) -> bool {
        self.lit_header(l).polarity()
    }

    pub fn lit_args(&self, l: LiteralId) -> &[TermId] {
        &self.literals[l.index as usize].args
    }

    pub fn lit_weight(&self, l: LiteralId) -> u32 {
        self.literals[l.index as usize].weight
    }

    pub fn lit_is_ground(&self, l: LiteralId) -> bool {
        self.literals[l.index as usize].ground
    }

    pub fn lit_vars(&self, l: LiteralId) -> &VarSet {
        &self.literals[l.index as usize].vars
    }

    pub fn lit_is_equality(&self, l: LiteralId) -> bool {
        self.lit_predicate(l) == Predicate::EQUALITY
    }

    pub fn lit_negate(&mut self, sig: &Signature, l: LiteralId) -> LiteralId {
        let header = self.lit_header(l);
        let args = self.lit_args(l).to_vec();
        self.literal(sig, header.predicate(), !header.polarity(), args)
    }

    /// Given one side of an equality literal, the other side.
    pub fn other_equality_side(&self, l: LiteralId, side: TermId) -> TermId {
        debug_assert!(self.lit_is_equality(l));
        let args = self.lit_args(l);
        if args[0] == side {
            args[1]
        } else {
            debug_assert_eq!(args[1], side);
            args[0]
        }
    }

    /// Preorder iteration over all non-variable subterms of `t`, including
    /// `t` itself when it is an application.
    pub fn non_var_subterms(&self, t: TermId) -> SubtermIter<'_> {
        SubtermIter {
            store: self,
            stack: vec![t],
        }
    }

    /// Non-variable subterms of a literal. For positive equalities callers
    /// usually restrict to one side; this walks all argument positions.
    pub fn lit_non_var_subterms(&self, l: LiteralId) -> SubtermIter<'_> {
        SubtermIter {
            store: self,
            stack: self.lit_args(l).iter().rev().copied().collect(),
        }
    }

    /// `t` with every occurrence of `from` replaced by `to`. Shared
    /// subterms make this a straightforward bottom-up rebuild.
    pub fn replace(&mut self, sig: &Signature, t: TermId, from: TermId, to: TermId) -> TermId {
        if t == from {
            return to;
        }
        match self.data(t) {
            TermData::Var(_) | TermData::SpecialVar(_) => t,
            TermData::App { functor, args } => {
                if !self.contains_subterm(t, from) {
                    return t;
                }
                let functor = *functor;
                let args = args.clone();
                let new_args: Vec<TermId> =
                    args.iter().map(|&a| self.replace(sig, a, from, to)).collect();
                self.app(sig, functor, new_args)
            }
        }
    }

    pub fn replace_in_literal(
        &mut self,
        sig: &Signature,
        l: LiteralId,
        from: TermId,
        to: TermId,
    ) -> LiteralId {
        let header = self.lit_header(l);
        let args: Vec<TermId> = self.lit_args(l).to_vec();
        let new_args: Vec<TermId> =
            args.iter().map(|&a| self.replace(sig, a, from, to)).collect();
        self.literal(sig, header.predicate(), header.polarity(), new_args)
    }

    pub fn contains_subterm(&self, t: TermId, sub: TermId) -> bool {
        if t == sub {
            return true;
        }
        match self.data(t) {
            TermData::Var(_) | TermData::SpecialVar(_) => false,
            TermData::App { args, .. } => args.iter().any(|&a| self.contains_subterm(a, sub)),
        }
    }

    /// The top symbol of `t`, or `None` for variables. Children of
    /// substitution-tree nodes dispatch on this.
    pub fn top(&self, t: TermId) -> Option<Functor> {
        match self.data(t) {
            TermData::App { functor, .. } => Some(*functor),
            _ => None,
        }
    }
}

pub struct SubtermIter<'a> {
    store: &'a TermStore,
    stack: Vec<TermId>,
}

impl<'a> Iterator for SubtermIter<'a> {
    type Item = TermId;

    fn next(&mut self) -> Option<TermId> {
        while let Some(t) = self.stack.pop() {
            match self.store.data(t) {
                TermData::Var(_) | TermData::SpecialVar(_) => continue,
                TermData::App { args, .. } => {
                    self.stack.extend(args.iter().rev().copied());
                    return Some(t);
                }
            }
        }
        None
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
    fn interning_is_idempotent() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let t1 = store.app(&sig, f, vec![ca]);
        let t2 = store.app(&sig, f, vec![ca]);
        assert_eq!(t1, t2);
    }

    #[test]
    fn weight_is_sum_of_functor_weights() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let t = store.app(&sig, f, vec![ca, x]);
        assert_eq!(store.weight(t), 3);
        assert!(!store.is_ground(t));
        assert!(store.vars(t).contains(0));
    }

    #[test]
    fn literal_weight_exceeds_arity() {
        let (mut sig, mut store) = setup();
        let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL; 2]);
        let x = store.var(0);
        let y = store.var(1);
        let l = store.literal(&sig, p, true, vec![x, y]);
        assert!(store.lit_weight(l) >= 2 + 1);
        assert!(!store.lit_is_ground(l));
    }

    #[test]
    fn header_complement_flips_polarity() {
        let h = Header::new(Predicate { index: 3 }, true);
        assert_eq!(h.complement().predicate(), Predicate { index: 3 });
        assert!(!h.complement().polarity());
    }

    #[test]
    fn replace_rewrites_all_occurrences() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        let t = store.app(&sig, f, vec![ca, ca]);
        let r = store.replace(&sig, t, ca, cb);
        assert_eq!(r, store.app(&sig, f, vec![cb, cb]));
    }

    #[test]
    fn subterm_iteration_is_preorder() {
        let (mut sig, mut store) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let x = store.var(0);
        let gx = store.app(&sig, g, vec![x]);
        let fgx = store.app(&sig, f, vec![gx]);
        let subterms: Vec<_> = store.non_var_subterms(fgx).collect();
        assert_eq!(subterms, vec![fgx, gx]);
    }
}
