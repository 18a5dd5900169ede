//! The substitution tree: the primary indexed map from terms (or literal
//! argument vectors) to leaf data, supporting retrieval of unifiers,
//! generalizations, instances and variants.
//!
//! Every inner node binds one special variable; its children carry the
//! template terms that variable may take, disambiguated by the template's
//! top symbol. Inserted keys are already normalized by first-occurrence
//! variable renaming (into the `NORM` bank), so α-variant keys share a
//! path. When a new key disagrees with an existing template below a shared
//! prefix, the template is generalized: the disagreement positions become
//! fresh special variables and the old subtree is demoted under a chain of
//! nodes binding them.
//!
//! Retrieval is a depth-first traversal keeping a backtrack stack of
//! substitution snapshots: one choice point per inner node, one snapshot
//! per choice point, so abandoning a dead subtree is a single rollback.

use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::debug;

use saturn_ir::{
    Bank, ResultSubstitution, RobSubstitution, Signature, Snapshot, TermData, TermId, TermSpec,
    TermStore, VarSpec,
};

use crate::skiplist::SkipList;

const SMALL_MAX: usize = 8;
const SKIP_MAX: usize = 32;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeRef(u32);

/// Dispatch key of a child: the top of its template. Templates are never
/// bare special variables (disagreements happen strictly below a shared
/// top), so ordinary variables and functors suffice.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum ChildKey {
    Var(u32),
    Fun(u32),
}

fn child_key(store: &TermStore, t: TermId) -> ChildKey {
    match store.data(t) {
        TermData::Var(v) => ChildKey::Var(*v),
        TermData::SpecialVar(_) => unreachable!("template with special-variable top"),
        TermData::App { functor, .. } => ChildKey::Fun(functor.index),
    }
}

/// The three physical child-container layouts. A container upgrades itself
/// when it outgrows its layout; it never downgrades.
enum Children {
    Small(Vec<(ChildKey, NodeRef)>),
    Skip(SkipList<ChildKey, NodeRef>),
    Hash(FxHashMap<ChildKey, NodeRef>),
}

impl Children {
    fn new() -> Children {
        Children::Small(vec![])
    }

    fn len(&self) -> usize {
        match self {
            Children::Small(v) => v.len(),
            Children::Skip(l) => l.len(),
            Children::Hash(m) => m.len(),
        }
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, key: ChildKey) -> Option<NodeRef> {
        match self {
            Children::Small(v) => v.iter().find(|(k, _)| *k == key).map(|(_, n)| *n),
            Children::Skip(l) => l.get(&key).copied(),
            Children::Hash(m) => m.get(&key).copied(),
        }
    }

    fn insert(&mut self, key: ChildKey, node: NodeRef) {
        match self {
            Children::Small(v) => {
                debug_assert!(v.iter().all(|(k, _)| *k != key));
                v.push((key, node));
                if v.len() > SMALL_MAX {
                    let mut list = SkipList::new();
                    for (k, n) in v.drain(..) {
                        list.insert(k, n);
                    }
                    *self = Children::Skip(list);
                }
            }
            Children::Skip(l) => {
                l.insert(key, node);
                if l.len() > SKIP_MAX {
                    let map = l.iter().map(|(k, n)| (*k, *n)).collect();
                    *self = Children::Hash(map);
                }
            }
            Children::Hash(m) => {
                m.insert(key, node);
            }
        }
    }

    fn remove(&mut self, key: ChildKey) {
        match self {
            Children::Small(v) => v.retain(|(k, _)| *k != key),
            Children::Skip(l) => {
                l.remove(&key);
            }
            Children::Hash(m) => {
                m.remove(&key);
            }
        }
    }

    /// All children, variable-topped ones first, in a fixed order.
    fn all(&self) -> Vec<NodeRef> {
        match self {
            Children::Skip(l) => l.iter().map(|(_, n)| *n).collect(),
            Children::Small(v) => v
                .iter()
                .sorted_by_key(|(k, _)| *k)
                .map(|(_, n)| *n)
                .collect(),
            Children::Hash(m) => m
                .iter()
                .sorted_by_key(|(k, _)| **k)
                .map(|(_, n)| *n)
                .collect(),
        }
    }

    /// The candidates compatible with a rigid query top: every
    /// variable-topped child plus the child with the same functor.
    fn compatible(&self, key: ChildKey) -> Vec<NodeRef> {
        let mut out: Vec<NodeRef> = match self {
            Children::Small(v) => v
                .iter()
                .filter(|(k, _)| matches!(k, ChildKey::Var(_)))
                .sorted_by_key(|(k, _)| *k)
                .map(|(_, n)| *n)
                .collect(),
            Children::Skip(l) => l
                .iter()
                .take_while(|(k, _)| matches!(k, ChildKey::Var(_)))
                .map(|(_, n)| *n)
                .collect(),
            Children::Hash(m) => m
                .iter()
                .filter(|(k, _)| matches!(k, ChildKey::Var(_)))
                .sorted_by_key(|(k, _)| **k)
                .map(|(_, n)| *n)
                .collect(),
        };
        if let Some(n) = self.get(key) {
            out.push(n);
        }
        out
    }
}

enum TreeNode<D> {
    Inner {
        /// Template bound to the parent's child variable.
        term: TermId,
        /// The special variable this node's children bind.
        child_var: u32,
        children: Children,
    },
    Leaf {
        term: TermId,
        entries: Vec<D>,
    },
}

impl<D> TreeNode<D> {
    fn term(&self) -> TermId {
        match self {
            TreeNode::Inner { term, .. } | TreeNode::Leaf { term, .. } => *term,
        }
    }

    fn set_term(&mut self, t: TermId) {
        match self {
            TreeNode::Inner { term, .. } | TreeNode::Leaf { term, .. } => *term = t,
        }
    }

    fn children(&self) -> Option<&Children> {
        match self {
            TreeNode::Inner { children, .. } => Some(children),
            TreeNode::Leaf { .. } => None,
        }
    }
}

/// Retrieval modes of [`SubstitutionTree::retrieve`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RetrievalMode {
    /// Stored keys unifiable with the query.
    Unifiers,
    /// Stored keys of which the query is an instance.
    Generalizations,
    /// Stored keys that are instances of the query.
    Instances,
    /// Stored keys equal to the query up to variable renaming.
    Variants,
}

/// One substitution tree; all keys share a top symbol and bind the special
/// variables `0 .. arity`. The per-symbol dispatch lives in the wrappers.
pub struct SubstitutionTree<D> {
    nodes: Vec<Option<TreeNode<D>>>,
    free: Vec<u32>,
    root: Children,
    next_spec_var: u32,
    len: usize,
}

impl<D: Copy + Eq + std::fmt::Debug> SubstitutionTree<D> {
    /// `arity` is the number of root bindings every key carries; special
    /// variables `0 .. arity` are reserved for them.
    pub fn new(arity: u32) -> SubstitutionTree<D> {
        SubstitutionTree {
            nodes: vec![],
            free: vec![],
            root: Children::new(),
            next_spec_var: arity,
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of stored leaf entries.
    pub fn len(&self) -> usize {
        self.len
    }

    fn alloc(&mut self, node: TreeNode<D>) -> NodeRef {
        match self.free.pop() {
            Some(i) => {
                self.nodes[i as usize] = Some(node);
                NodeRef(i)
            }
            None => {
                self.nodes.push(Some(node));
                NodeRef(self.nodes.len() as u32 - 1)
            }
        }
    }

    fn node(&self, r: NodeRef) -> &TreeNode<D> {
        self.nodes[r.0 as usize].as_ref().expect("live tree node")
    }

    fn node_mut(&mut self, r: NodeRef) -> &mut TreeNode<D> {
        self.nodes[r.0 as usize].as_mut().expect("live tree node")
    }

    fn release(&mut self, r: NodeRef) {
        self.nodes[r.0 as usize] = None;
        self.free.push(r.0);
    }

    fn fresh_spec_var(&mut self) -> u32 {
        let v = self.next_spec_var;
        self.next_spec_var += 1;
        v
    }

    fn children_at(&self, at: Option<NodeRef>) -> &Children {
        match at {
            None => &self.root,
            Some(n) => self.node(n).children().expect("inner position"),
        }
    }

    fn children_at_mut(&mut self, at: Option<NodeRef>) -> &mut Children {
        match at {
            None => &mut self.root,
            Some(n) => match self.node_mut(n) {
                TreeNode::Inner { children, .. } => children,
                TreeNode::Leaf { .. } => unreachable!("inner position"),
            },
        }
    }

    /// Inserts a key (the bag of `(special var -> term)` bindings derived
    /// from the indexed term's argument list) with its leaf data.
    /// Inserting a duplicate leaf is silently idempotent.
    pub fn insert(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        bindings: Vec<(u32, TermId)>,
        data: D,
    ) {
        debug!(?bindings, ?data, "subst-tree insert");
        debug_assert!(!bindings.is_empty());
        let mut pending: FxHashMap<u32, TermId> = bindings.into_iter().collect();
        let mut cur_var = smallest_key(&pending).expect("nonempty key");
        let mut at: Option<NodeRef> = None;

        loop {
            let t = pending.remove(&cur_var).expect("binding for child variable");
            let key = child_key(store, t);
            let Some(child) = self.children_at(at).get(key) else {
                let fresh = self.build_chain(store, t, &mut pending, data);
                self.children_at_mut(at).insert(key, fresh);
                self.len += 1;
                return;
            };

            // Partial match of the child template against the key term.
            let template = self.node(child).term();
            let mut templ_res = vec![];
            let mut key_res = vec![];
            let generalization = self.common_generalization(
                store,
                sig,
                template,
                t,
                &mut pending,
                &mut templ_res,
                &mut key_res,
            );
            if !templ_res.is_empty() {
                self.split(store, child, generalization, &templ_res);
                pending.extend(key_res);
            }

            match self.node_mut(child) {
                TreeNode::Leaf { entries, .. } => {
                    debug_assert!(pending.is_empty(), "leaf reached with pending bindings");
                    if entries.contains(&data) {
                        return;
                    }
                    entries.push(data);
                    self.len += 1;
                    return;
                }
                TreeNode::Inner { child_var, .. } => {
                    cur_var = *child_var;
                    at = Some(child);
                }
            }
        }
    }

    /// A fresh chain of nodes for the remaining bindings, ending in a leaf.
    /// The returned node's template is `first`.
    fn build_chain(
        &mut self,
        store: &TermStore,
        first: TermId,
        pending: &mut FxHashMap<u32, TermId>,
        data: D,
    ) -> NodeRef {
        let mut rest: Vec<(u32, TermId)> = pending.drain().collect();
        rest.sort_by_key(|&(v, _)| v);

        let last_term = rest.last().map_or(first, |&(_, t)| t);
        let mut node = self.alloc(TreeNode::Leaf {
            term: last_term,
            entries: vec![data],
        });
        for i in (0..rest.len()).rev() {
            let term = if i == 0 { first } else { rest[i - 1].1 };
            let key = child_key(store, self.node(node).term());
            let mut children = Children::new();
            children.insert(key, node);
            node = self.alloc(TreeNode::Inner {
                term,
                child_var: rest[i].0,
                children,
            });
        }
        node
    }

    /// The common generalization of `template` and `key`. Special
    /// variables in the template absorb the corresponding key subterms
    /// into `pending`; rigid disagreements introduce fresh special
    /// variables, recorded with their two sides in `templ_res`/`key_res`.
    fn common_generalization(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        template: TermId,
        key: TermId,
        pending: &mut FxHashMap<u32, TermId>,
        templ_res: &mut Vec<(u32, TermId)>,
        key_res: &mut Vec<(u32, TermId)>,
    ) -> TermId {
        if template == key {
            return template;
        }
        match (store.data(template), store.data(key)) {
            (TermData::SpecialVar(v), _) => {
                pending.insert(*v, key);
                template
            }
            (TermData::App { functor: f, args: a }, TermData::App { functor: g, args: b })
                if f == g =>
            {
                let functor = *f;
                let (a, b) = (a.clone(), b.clone());
                let new_args: Vec<TermId> = a
                    .iter()
                    .zip(b.iter())
                    .map(|(&ta, &ka)| {
                        self.common_generalization(store, sig, ta, ka, pending, templ_res, key_res)
                    })
                    .collect();
                store.app(sig, functor, new_args)
            }
            _ => {
                let s = self.fresh_spec_var();
                templ_res.push((s, template));
                key_res.push((s, key));
                store.special_var(s)
            }
        }
    }

    /// Demotes `child` under its generalized template: `child` becomes an
    /// inner node with template `generalization`, and its previous content
    /// survives below a chain binding the residue variables.
    fn split(
        &mut self,
        store: &TermStore,
        child: NodeRef,
        generalization: TermId,
        templ_res: &[(u32, TermId)],
    ) {
        debug_assert!(!templ_res.is_empty());
        let mut demoted = self.nodes[child.0 as usize].take().expect("live tree node");

        let (mut above_var, last_term) = {
            let &(v, t) = templ_res.last().unwrap();
            (v, t)
        };
        demoted.set_term(last_term);
        let mut below = self.alloc(demoted);

        for &(var, term) in templ_res[..templ_res.len() - 1].iter().rev() {
            let key = child_key(store, self.node(below).term());
            let mut children = Children::new();
            children.insert(key, below);
            below = self.alloc(TreeNode::Inner {
                term,
                child_var: above_var,
                children,
            });
            above_var = var;
        }

        let key = child_key(store, self.node(below).term());
        let mut children = Children::new();
        children.insert(key, below);
        self.nodes[child.0 as usize] = Some(TreeNode::Inner {
            term: generalization,
            child_var: above_var,
            children,
        });
    }

    /// Removes a previously inserted key/data pair and prunes emptied
    /// nodes. Removing an absent pair is a no-op returning `false`.
    pub fn remove(&mut self, store: &TermStore, bindings: Vec<(u32, TermId)>, data: D) -> bool {
        let mut pending: FxHashMap<u32, TermId> = bindings.into_iter().collect();
        let Some(mut cur_var) = smallest_key(&pending) else {
            return false;
        };
        let mut at: Option<NodeRef> = None;
        let mut path: Vec<(Option<NodeRef>, ChildKey, NodeRef)> = vec![];

        loop {
            let Some(t) = pending.remove(&cur_var) else {
                return false;
            };
            let key = child_key(store, t);
            let Some(child) = self.children_at(at).get(key) else {
                return false;
            };
            if !follows_template(store, self.node(child).term(), t, &mut pending) {
                return false;
            }
            path.push((at, key, child));
            match self.node_mut(child) {
                TreeNode::Leaf { entries, .. } => {
                    let before = entries.len();
                    entries.retain(|e| *e != data);
                    if entries.len() == before {
                        return false;
                    }
                    let emptied = entries.is_empty();
                    self.len -= 1;
                    if emptied {
                        self.prune(path);
                    }
                    return true;
                }
                TreeNode::Inner { child_var, .. } => {
                    cur_var = *child_var;
                    at = Some(child);
                }
            }
        }
    }

    /// Unlinks the node at the end of `path` and every ancestor left
    /// childless by it.
    fn prune(&mut self, path: Vec<(Option<NodeRef>, ChildKey, NodeRef)>) {
        for (parent, key, node) in path.into_iter().rev() {
            self.release(node);
            self.children_at_mut(parent).remove(key);
            let parent_empty = match parent {
                None => false,
                Some(p) => self.node(p).children().map_or(false, Children::is_empty),
            };
            if !parent_empty {
                return;
            }
        }
    }

    /// Starts a retrieval. The query bindings must already be in `subst`:
    /// special variables `0 .. arity` bound to the query arguments in the
    /// query bank. Retrieval never fails; an unmatched query yields an
    /// empty sequence.
    pub fn retrieve(&self, subst: RobSubstitution, mode: RetrievalMode) -> TreeRetrieval<'_, D> {
        let snapshot = subst.snapshot();
        TreeRetrieval {
            tree: self,
            mode,
            subst,
            stack: vec![Choice {
                parent: None,
                var: 0,
                candidates: vec![],
                idx: 0,
                snapshot,
                expanded: false,
            }],
            leaf: None,
        }
    }
}

fn smallest_key(pending: &FxHashMap<u32, TermId>) -> Option<u32> {
    pending.keys().copied().min()
}

/// Walks `template` against the removal key: special variables absorb into
/// `pending`, everything else must coincide exactly.
fn follows_template(
    store: &TermStore,
    template: TermId,
    key: TermId,
    pending: &mut FxHashMap<u32, TermId>,
) -> bool {
    if template == key {
        return true;
    }
    match (store.data(template), store.data(key)) {
        (TermData::SpecialVar(v), _) => {
            pending.insert(*v, key);
            true
        }
        (TermData::App { functor: f, args: a }, TermData::App { functor: g, args: b })
            if f == g =>
        {
            let (a, b) = (a.clone(), b.clone());
            a.iter().zip(b.iter()).all(|(&ta, &ka)| follows_template(store, ta, ka, pending))
        }
        _ => false,
    }
}

struct Choice {
    /// `None` is the root children container.
    parent: Option<NodeRef>,
    /// The special variable the children of `parent` bind.
    var: u32,
    candidates: Vec<NodeRef>,
    idx: usize,
    /// Substitution state on entry to this decision point.
    snapshot: Snapshot,
    expanded: bool,
}

/// The retrieval state machine: a stack of index-tree positions, one
/// substitution snapshot per position, and a cursor into the current
/// leaf's entry list.
pub struct TreeRetrieval<'t, D> {
    tree: &'t SubstitutionTree<D>,
    mode: RetrievalMode,
    subst: RobSubstitution,
    stack: Vec<Choice>,
    leaf: Option<(NodeRef, usize)>,
}

impl<'t, D: Copy + Eq + std::fmt::Debug> TreeRetrieval<'t, D> {
    pub fn next(&mut self, store: &TermStore) -> Option<D> {
        loop {
            if let Some((leaf, cursor)) = self.leaf {
                if let TreeNode::Leaf { entries, .. } = self.tree.node(leaf) {
                    if cursor < entries.len() {
                        self.leaf = Some((leaf, cursor + 1));
                        return Some(entries[cursor]);
                    }
                }
                self.leaf = None;
            }

            let top = self.stack.len().checked_sub(1)?;
            if !self.stack[top].expanded {
                let (parent, var) = (self.stack[top].parent, self.stack[top].var);
                let candidates = self.candidates_for(store, parent, var);
                let choice = &mut self.stack[top];
                choice.candidates = candidates;
                choice.expanded = true;
            }

            let choice = &mut self.stack[top];
            if choice.idx == choice.candidates.len() {
                let snapshot = choice.snapshot;
                self.subst.rollback_to(snapshot);
                self.stack.pop();
                continue;
            }
            let candidate = choice.candidates[choice.idx];
            let (var, snapshot) = (choice.var, choice.snapshot);
            choice.idx += 1;

            self.subst.rollback_to(snapshot);
            if !self.associate(store, var, self.tree.node(candidate).term()) {
                continue;
            }
            match self.tree.node(candidate) {
                TreeNode::Leaf { .. } => {
                    self.leaf = Some((candidate, 0));
                }
                TreeNode::Inner { child_var, .. } => {
                    let snapshot = self.subst.snapshot();
                    self.stack.push(Choice {
                        parent: Some(candidate),
                        var: *child_var,
                        candidates: vec![],
                        idx: 0,
                        snapshot,
                        expanded: false,
                    });
                }
            }
        }
    }

    /// The children worth trying for the current binding of `var`: all of
    /// them when the binding is (or ends in) a variable, otherwise the
    /// matching functor child plus the variable-topped ones.
    fn candidates_for(
        &self,
        store: &TermStore,
        parent: Option<NodeRef>,
        var: u32,
    ) -> Vec<NodeRef> {
        let children = self.tree.children_at(parent);
        let spec = VarSpec {
            var,
            bank: Bank::SPECIAL,
        };
        match self.subst.resolve(store, spec) {
            Some(q) => match store.data(q.term) {
                TermData::App { functor, .. } => children.compatible(ChildKey::Fun(functor.index)),
                _ => children.all(),
            },
            None => children.all(),
        }
    }

    /// Relates the current binding of special variable `var` with a child
    /// template according to the retrieval mode. On failure any partial
    /// bindings have been rolled back.
    fn associate(&mut self, store: &TermStore, var: u32, template: TermId) -> bool {
        let spec = VarSpec {
            var,
            bank: Bank::SPECIAL,
        };
        let template = TermSpec::new(template, Bank::NORM);
        let bound = self.subst.resolve(store, spec);
        match self.mode {
            RetrievalMode::Unifiers => match bound {
                None => {
                    self.subst.bind_special_var(var, template);
                    true
                }
                Some(q) => self.subst.unify(store, q, template).is_ok(),
            },
            RetrievalMode::Generalizations => {
                let q = bound.expect("query bindings cover generalization retrieval");
                self.subst.match_(store, template, q, Bank::NORM).is_ok()
            }
            RetrievalMode::Instances => match bound {
                // The position was swallowed by a query variable; keep
                // elaborating the stored structure below it.
                None => {
                    self.subst.bind_special_var(var, template);
                    true
                }
                Some(q) => self.subst.match_(store, q, template, Bank::QUERY).is_ok(),
            },
            RetrievalMode::Variants => {
                let q = bound.expect("query bindings cover variant retrieval");
                let snapshot = self.subst.snapshot();
                let ok = self.subst.match_(store, template, q, Bank::NORM).is_ok()
                    && self.subst.match_(store, q, template, Bank::QUERY).is_ok();
                if !ok {
                    self.subst.rollback_to(snapshot);
                }
                ok
            }
        }
    }

    /// The substitution relating query (bank 0) and the last yielded leaf
    /// (stored keys in the normalized bank). Valid until the next `next`.
    pub fn unifier(&mut self) -> ResultSubstitution<'_> {
        ResultSubstitution::new(&mut self.subst, Bank::QUERY, Bank::NORM)
    }

    pub fn subst_mut(&mut self) -> &mut RobSubstitution {
        &mut self.subst
    }
}
