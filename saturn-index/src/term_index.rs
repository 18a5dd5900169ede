//! The concrete indices the inference engines talk to: substitution-tree
//! and fingerprint term indices behind one retrieval surface, the literal
//! index for resolution and unit subsumption, and the code-tree index over
//! demodulator left-hand sides.
//!
//! All of them normalize stored keys by first-occurrence renaming into the
//! `NORM` bank. Leaf data keeps the original ids plus the normalized key
//! (and, where an engine needs it, the normalized companion term), so a
//! retrieval substitution can be applied to the stored side without
//! re-deriving the renaming.

use itertools::Itertools;
use rustc_hash::FxHashMap;

use saturn_ir::flat::FlatTerm;
use saturn_ir::{
    Bank, ClauseId, Functor, Header, LiteralId, Renaming, ResultSubstitution, RobSubstitution,
    Signature, TermData, TermId, TermSpec, TermStore,
};

use crate::code_tree::{CodeTree, CodeTreeMatcher};
use crate::fingerprint::{FingerprintUnifications, TermFingerprintIndex};
use crate::subst_tree::{RetrievalMode, SubstitutionTree, TreeRetrieval};
use crate::Entry;

/// Leaf data of the term trees: original ids plus the normalized key and
/// an optional normalized auxiliary term (the other side of an equality).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TreeLeaf {
    pub entry: Entry,
    pub norm_key: TermId,
    pub aux: Option<TermId>,
}

/// Leaf data of the literal index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LitLeaf {
    pub clause: ClauseId,
    pub literal: LiteralId,
    pub norm_literal: LiteralId,
}

/// Leaf data of the demodulation code tree: `lhs → rhs` with both sides
/// under one renaming.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DemodLeaf {
    pub clause: ClauseId,
    pub literal: LiteralId,
    pub lhs: TermId,
    pub norm_lhs: TermId,
    pub norm_rhs: TermId,
}

/// Substitutes the (normalized) variables of `t` through `bind`.
/// Positions `bind` does not cover keep their variable.
pub fn instantiate(
    store: &mut TermStore,
    sig: &Signature,
    t: TermId,
    bind: &impl Fn(u32) -> Option<TermId>,
) -> TermId {
    match store.data(t) {
        TermData::Var(v) => bind(*v).unwrap_or(t),
        TermData::SpecialVar(_) => t,
        TermData::App { functor, args } => {
            let functor = *functor;
            let args = args.clone();
            let new_args: Vec<TermId> = args
                .iter()
                .map(|&a| instantiate(store, sig, a, bind))
                .collect();
            store.app(sig, functor, new_args)
        }
    }
}

/// The substitution-tree-backed term index: one tree per root functor,
/// with constants and bare-variable keys held in side tables.
#[derive(Default)]
pub struct TermSubstTreeIndex {
    trees: FxHashMap<Functor, SubstitutionTree<TreeLeaf>>,
    consts: FxHashMap<Functor, Vec<TreeLeaf>>,
    vars: Vec<TreeLeaf>,
}

impl TermSubstTreeIndex {
    pub fn new() -> TermSubstTreeIndex {
        TermSubstTreeIndex::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
            && self.consts.values().all(Vec::is_empty)
            && self.trees.values().all(SubstitutionTree::is_empty)
    }

    fn make_leaf(
        store: &mut TermStore,
        sig: &Signature,
        term: TermId,
        literal: LiteralId,
        clause: ClauseId,
        aux: Option<TermId>,
    ) -> (TreeLeaf, Vec<(u32, TermId)>) {
        let mut renaming = Renaming::new();
        let norm_key = renaming.normalize_term(store, sig, term);
        let aux = aux.map(|a| renaming.normalize_term(store, sig, a));
        let bindings = match store.data(norm_key) {
            TermData::App { args, .. } => args
                .clone()
                .into_iter()
                .enumerate()
                .map(|(i, a)| (i as u32, a))
                .collect(),
            _ => vec![],
        };
        (
            TreeLeaf {
                entry: Entry {
                    clause,
                    literal,
                    term,
                },
                norm_key,
                aux,
            },
            bindings,
        )
    }

    pub fn insert(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        term: TermId,
        literal: LiteralId,
        clause: ClauseId,
        aux: Option<TermId>,
    ) {
        let (leaf, bindings) = Self::make_leaf(store, sig, term, literal, clause, aux);
        match store.data(term) {
            TermData::Var(_) | TermData::SpecialVar(_) => {
                if !self.vars.contains(&leaf) {
                    self.vars.push(leaf);
                }
            }
            TermData::App { functor, args } if args.is_empty() => {
                let bucket = self.consts.entry(*functor).or_default();
                if !bucket.contains(&leaf) {
                    bucket.push(leaf);
                }
            }
            TermData::App { functor, args } => {
                let functor = *functor;
                let arity = args.len() as u32;
                self.trees
                    .entry(functor)
                    .or_insert_with(|| SubstitutionTree::new(arity))
                    .insert(store, sig, bindings, leaf);
            }
        }
    }

    pub fn remove(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        term: TermId,
        literal: LiteralId,
        clause: ClauseId,
        aux: Option<TermId>,
    ) {
        let (leaf, bindings) = Self::make_leaf(store, sig, term, literal, clause, aux);
        match store.data(term) {
            TermData::Var(_) | TermData::SpecialVar(_) => self.vars.retain(|l| *l != leaf),
            TermData::App { functor, args } if args.is_empty() => {
                if let Some(bucket) = self.consts.get_mut(functor) {
                    bucket.retain(|l| *l != leaf);
                }
            }
            TermData::App { functor, .. } => {
                if let Some(tree) = self.trees.get_mut(functor) {
                    tree.remove(store, bindings, leaf);
                }
            }
        }
    }

    /// Retrieval in any of the four modes. The query is a plain term in
    /// the query bank.
    pub fn retrieve<'i>(
        &'i self,
        store: &TermStore,
        query: TermId,
        mode: RetrievalMode,
    ) -> TreeIndexRetrieval<'i> {
        let query_is_var = store.is_var(query);
        let mut flat_queue: Vec<TreeLeaf> = vec![];
        let mut tree_queue: Vec<&'i SubstitutionTree<TreeLeaf>> = vec![];

        // Bare-variable keys relate to every query in some mode; constants
        // and trees depend on the query's top.
        flat_queue.extend(self.vars.iter().copied());
        if query_is_var {
            // A variable query reaches everything except in
            // generalization/variant mode, where only variables qualify.
            if matches!(mode, RetrievalMode::Unifiers | RetrievalMode::Instances) {
                for k in self.consts.keys().sorted() {
                    flat_queue.extend(self.consts[k].iter().copied());
                }
                for k in self.trees.keys().sorted() {
                    tree_queue.push(&self.trees[k]);
                }
            }
        } else if let Some((functor, args)) = store.as_app(query) {
            if args.is_empty() {
                if let Some(bucket) = self.consts.get(&functor) {
                    flat_queue.extend(bucket.iter().copied());
                }
            } else if let Some(tree) = self.trees.get(&functor) {
                tree_queue.push(tree);
            }
        }
        flat_queue.reverse();
        tree_queue.reverse();

        TreeIndexRetrieval {
            mode,
            query,
            query_is_var,
            flat_queue,
            tree_queue,
            flat_subst: RobSubstitution::new(),
            current_tree: None,
            last_from_tree: false,
        }
    }
}

/// Iterator over index hits; [`unifier`](Self::unifier) exposes the
/// substitution of the last hit until the next resume.
pub struct TreeIndexRetrieval<'i> {
    mode: RetrievalMode,
    query: TermId,
    query_is_var: bool,
    flat_queue: Vec<TreeLeaf>,
    tree_queue: Vec<&'i SubstitutionTree<TreeLeaf>>,
    flat_subst: RobSubstitution,
    current_tree: Option<TreeRetrieval<'i, TreeLeaf>>,
    last_from_tree: bool,
}

/// Relates query and stored key directly, outside the tree (variable and
/// constant keys).
fn relate(
    subst: &mut RobSubstitution,
    store: &TermStore,
    mode: RetrievalMode,
    query: TermId,
    stored_norm: TermId,
) -> bool {
    let q = TermSpec::new(query, Bank::QUERY);
    let s = TermSpec::new(stored_norm, Bank::NORM);
    match mode {
        RetrievalMode::Unifiers => subst.unify(store, q, s).is_ok(),
        RetrievalMode::Generalizations => subst.match_(store, s, q, Bank::NORM).is_ok(),
        RetrievalMode::Instances => subst.match_(store, q, s, Bank::QUERY).is_ok(),
        RetrievalMode::Variants => {
            subst.match_(store, s, q, Bank::NORM).is_ok()
                && subst.match_(store, q, s, Bank::QUERY).is_ok()
        }
    }
}

impl<'i> TreeIndexRetrieval<'i> {
    pub fn next(&mut self, store: &TermStore) -> Option<TreeLeaf> {
        loop {
            if let Some(tree) = &mut self.current_tree {
                match tree.next(store) {
                    Some(leaf) => {
                        if self.query_is_var
                            && !relate(
                                tree.subst_mut(),
                                store,
                                self.mode,
                                self.query,
                                leaf.norm_key,
                            )
                        {
                            continue;
                        }
                        self.last_from_tree = true;
                        return Some(leaf);
                    }
                    None => self.current_tree = None,
                }
            }
            if let Some(leaf) = self.flat_queue.pop() {
                self.flat_subst.reset();
                if relate(&mut self.flat_subst, store, self.mode, self.query, leaf.norm_key) {
                    self.last_from_tree = false;
                    return Some(leaf);
                }
                continue;
            }
            let tree = self.tree_queue.pop()?;
            let mut subst = RobSubstitution::new();
            if !self.query_is_var {
                if let Some((_, args)) = store.as_app(self.query) {
                    for (i, &a) in args.iter().enumerate() {
                        subst.bind_special_var(i as u32, TermSpec::new(a, Bank::QUERY));
                    }
                }
            }
            self.current_tree = Some(tree.retrieve(subst, self.mode));
        }
    }

    pub fn unifier(&mut self) -> ResultSubstitution<'_> {
        if self.last_from_tree {
            self.current_tree
                .as_mut()
                .expect("unifier of a tree hit")
                .unifier()
        } else {
            ResultSubstitution::new(&mut self.flat_subst, Bank::QUERY, Bank::NORM)
        }
    }
}

/// The unification-candidate index of the superposition subterm side,
/// selectable between the substitution tree and the fingerprint filter.
pub enum UnificationIndex {
    Tree(TermSubstTreeIndex),
    Fingerprint(TermFingerprintIndex),
}

impl UnificationIndex {
    pub fn insert(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        term: TermId,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        match self {
            UnificationIndex::Tree(t) => t.insert(store, sig, term, literal, clause, None),
            UnificationIndex::Fingerprint(f) => f.insert(store, term, literal, clause),
        }
    }

    pub fn remove(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        term: TermId,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        match self {
            UnificationIndex::Tree(t) => t.remove(store, sig, term, literal, clause, None),
            UnificationIndex::Fingerprint(f) => f.remove(store, term, literal, clause),
        }
    }

    pub fn unifications<'i>(&'i self, store: &TermStore, query: TermId) -> Unifications<'i> {
        match self {
            UnificationIndex::Tree(t) => {
                Unifications::Tree(t.retrieve(store, query, RetrievalMode::Unifiers))
            }
            UnificationIndex::Fingerprint(f) => Unifications::Fingerprint(f.unifications(store, query)),
        }
    }
}

pub enum Unifications<'i> {
    Tree(TreeIndexRetrieval<'i>),
    Fingerprint(FingerprintUnifications<'i>),
}

impl<'i> Unifications<'i> {
    pub fn next(&mut self, store: &TermStore) -> Option<Entry> {
        match self {
            Unifications::Tree(t) => t.next(store).map(|leaf| leaf.entry),
            Unifications::Fingerprint(f) => f.next(store),
        }
    }

    pub fn unifier(&mut self) -> ResultSubstitution<'_> {
        match self {
            Unifications::Tree(t) => t.unifier(),
            Unifications::Fingerprint(f) => f.unifier(),
        }
    }
}

/// The literal index: one substitution tree per literal header, used for
/// binary resolution (complement retrieval) and unit subsumption
/// (generalization retrieval).
#[derive(Default)]
pub struct LiteralSubstTreeIndex {
    trees: FxHashMap<Header, SubstitutionTree<LitLeaf>>,
    props: FxHashMap<Header, Vec<LitLeaf>>,
}

impl LiteralSubstTreeIndex {
    pub fn new() -> LiteralSubstTreeIndex {
        LiteralSubstTreeIndex::default()
    }

    fn make_leaf(
        store: &mut TermStore,
        sig: &Signature,
        literal: LiteralId,
        clause: ClauseId,
    ) -> (LitLeaf, Vec<(u32, TermId)>) {
        let mut renaming = Renaming::new();
        let norm_literal = renaming.normalize_literal(store, sig, literal);
        let bindings = store
            .lit_args(norm_literal)
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, a)| (i as u32, a))
            .collect();
        (
            LitLeaf {
                clause,
                literal,
                norm_literal,
            },
            bindings,
        )
    }

    pub fn insert(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        let (leaf, bindings) = Self::make_leaf(store, sig, literal, clause);
        let header = store.lit_header(literal);
        if bindings.is_empty() {
            let bucket = self.props.entry(header).or_default();
            if !bucket.contains(&leaf) {
                bucket.push(leaf);
            }
        } else {
            let arity = bindings.len() as u32;
            self.trees
                .entry(header)
                .or_insert_with(|| SubstitutionTree::new(arity))
                .insert(store, sig, bindings, leaf);
        }
    }

    pub fn remove(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        let (leaf, bindings) = Self::make_leaf(store, sig, literal, clause);
        let header = store.lit_header(literal);
        if bindings.is_empty() {
            if let Some(bucket) = self.props.get_mut(&header) {
                bucket.retain(|l| *l != leaf);
            }
        } else if let Some(tree) = self.trees.get_mut(&header) {
            tree.remove(store, bindings, leaf);
        }
    }

    /// Stored literals relating to `query` under `mode`; with
    /// `complement`, literals with the complementary header instead.
    pub fn retrieve<'i>(
        &'i self,
        store: &TermStore,
        query: LiteralId,
        complement: bool,
        mode: RetrievalMode,
    ) -> LitIndexRetrieval<'i> {
        let mut header = store.lit_header(query);
        if complement {
            header = header.complement();
        }
        let args = store.lit_args(query).to_vec();
        let (flat_queue, tree) = if args.is_empty() {
            (
                self.props.get(&header).cloned().unwrap_or_default(),
                None,
            )
        } else {
            (vec![], self.trees.get(&header))
        };
        LitIndexRetrieval {
            mode,
            args,
            flat_queue,
            tree,
            flat_subst: RobSubstitution::new(),
            current: None,
            last_from_tree: false,
        }
    }
}

pub struct LitIndexRetrieval<'i> {
    mode: RetrievalMode,
    args: Vec<TermId>,
    flat_queue: Vec<LitLeaf>,
    tree: Option<&'i SubstitutionTree<LitLeaf>>,
    flat_subst: RobSubstitution,
    current: Option<TreeRetrieval<'i, LitLeaf>>,
    last_from_tree: bool,
}

impl<'i> LitIndexRetrieval<'i> {
    pub fn next(&mut self, store: &TermStore) -> Option<LitLeaf> {
        loop {
            if let Some(tree) = &mut self.current {
                match tree.next(store) {
                    Some(leaf) => {
                        self.last_from_tree = true;
                        return Some(leaf);
                    }
                    None => {
                        self.current = None;
                        return None;
                    }
                }
            }
            if let Some(leaf) = self.flat_queue.pop() {
                // Propositional literals: the header match is the whole
                // test, the unifier is empty.
                self.flat_subst.reset();
                self.last_from_tree = false;
                return Some(leaf);
            }
            let tree = self.tree.take()?;
            let mut subst = RobSubstitution::new();
            for (i, &a) in self.args.iter().enumerate() {
                subst.bind_special_var(i as u32, TermSpec::new(a, Bank::QUERY));
            }
            self.current = Some(tree.retrieve(subst, self.mode));
        }
    }

    pub fn unifier(&mut self) -> ResultSubstitution<'_> {
        if self.last_from_tree {
            self.current
                .as_mut()
                .expect("unifier of a tree hit")
                .unifier()
        } else {
            ResultSubstitution::new(&mut self.flat_subst, Bank::QUERY, Bank::NORM)
        }
    }
}

/// Demodulator index: a code tree over normalized left-hand sides.
#[derive(Default)]
pub struct DemodulationLhsIndex {
    tree: CodeTree<DemodLeaf>,
}

impl DemodulationLhsIndex {
    pub fn new() -> DemodulationLhsIndex {
        DemodulationLhsIndex::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn make_leaf(
        store: &mut TermStore,
        sig: &Signature,
        lhs: TermId,
        rhs: TermId,
        literal: LiteralId,
        clause: ClauseId,
    ) -> DemodLeaf {
        let mut renaming = Renaming::new();
        let norm_lhs = renaming.normalize_term(store, sig, lhs);
        let norm_rhs = renaming.normalize_term(store, sig, rhs);
        DemodLeaf {
            clause,
            literal,
            lhs,
            norm_lhs,
            norm_rhs,
        }
    }

    pub fn insert(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        lhs: TermId,
        rhs: TermId,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        let leaf = Self::make_leaf(store, sig, lhs, rhs, literal, clause);
        self.tree.insert(store, leaf.norm_lhs, leaf);
    }

    pub fn remove(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        lhs: TermId,
        rhs: TermId,
        literal: LiteralId,
        clause: ClauseId,
    ) {
        let leaf = Self::make_leaf(store, sig, lhs, rhs, literal, clause);
        self.tree.remove(store, leaf.norm_lhs, leaf);
    }

    /// Demodulators whose left-hand side generalizes `query`.
    pub fn generalizations(&self, store: &TermStore, query: TermId) -> CodeTreeMatcher<'_, DemodLeaf> {
        self.tree.matcher(FlatTerm::of_term(store, query))
    }
}
