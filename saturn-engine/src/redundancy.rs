//! Conditional redundancy: per-clause cover trees of substitutions under
//! which an inference with the clause is known to be repeatable and hence
//! redundant.
//!
//! A cover key is the tuple of σ-images of the clause's variables, renamed
//! component by component, in tuple order, into a canonical numbering,
//! then packed under a tuple functor and stored as a pattern in a code
//! tree. Checking asks whether the current substitution tuple is an
//! instance of a stored key whose side conditions (an ordering constraint
//! and a set of side literals) hold.

use rustc_hash::FxHashMap;

use saturn_ir::flat::FlatTerm;
use saturn_ir::{
    Bank, ClauseId, Comparison, Functor, LiteralId, Renaming, RobSubstitution, Sort, TermId,
    TermSpec,
};
use tracing::debug;

use saturn_index::code_tree::CodeTree;
use saturn_index::term_index::instantiate;

use crate::env::Env;

struct CoverEntry {
    /// `lhs ≻ rhs` must hold under the matched bindings.
    constraint: Option<(TermId, TermId)>,
    /// Side literals that must be present among the partner's literals.
    lits: Vec<LiteralId>,
}

struct CoverTree {
    /// The clause's variables, ascending; fixes the tuple component order.
    vars: Vec<u32>,
    tree: CodeTree<u32>,
    entries: Vec<CoverEntry>,
}

#[derive(Default)]
pub struct ConditionalRedundancyHandler {
    enabled: bool,
    data: FxHashMap<ClauseId, CoverTree>,
    tuple_functors: FxHashMap<usize, Functor>,
}

impl ConditionalRedundancyHandler {
    pub fn new(enabled: bool) -> ConditionalRedundancyHandler {
        ConditionalRedundancyHandler {
            enabled,
            ..ConditionalRedundancyHandler::default()
        }
    }

    pub fn drop_clause(&mut self, clause: ClauseId) {
        self.data.remove(&clause);
    }

    fn tuple_functor(&mut self, env: &mut Env, arity: usize) -> Functor {
        *self.tuple_functors.entry(arity).or_insert_with(|| {
            env.sig.add_function(
                &format!("$tuple{arity}"),
                vec![Sort::INDIVIDUAL; arity],
                Sort::INDIVIDUAL,
            )
        })
    }

    fn clause_vars(env: &Env, clause: ClauseId) -> Vec<u32> {
        let mut vars: Vec<u32> = vec![];
        for &lit in env.clauses[clause].literals() {
            for v in env.store.lit_vars(lit).iter() {
                if !vars.contains(&v) {
                    vars.push(v);
                }
            }
        }
        vars.sort_unstable();
        vars
    }

    /// The σ-images of the clause's variables, computed without disturbing
    /// the caller's substitution.
    fn images(
        env: &mut Env,
        subst: &mut RobSubstitution,
        bank: Bank,
        vars: &[u32],
    ) -> Vec<TermId> {
        let snapshot = subst.snapshot();
        let images = vars
            .iter()
            .map(|&v| {
                let node = env.store.var(v);
                subst.apply(&mut env.store, &env.sig, TermSpec::new(node, bank))
            })
            .collect();
        subst.rollback_to(snapshot);
        images
    }

    /// True if the substitution is covered for `clause`: the inference may
    /// be skipped. `partner_lits` are the σ-applied literals of the other
    /// premise.
    pub fn check(
        &mut self,
        env: &mut Env,
        clause: ClauseId,
        subst: &mut RobSubstitution,
        bank: Bank,
        partner_lits: &[LiteralId],
    ) -> bool {
        if !self.enabled {
            return false;
        }
        let Some(cover) = self.data.get(&clause) else {
            return false;
        };
        let vars = cover.vars.clone();
        let images = Self::images(env, subst, bank, &vars);
        let functor = self.tuple_functor(env, images.len());
        let tuple = env.store.app(&env.sig, functor, images);
        let cover = self.data.get(&clause).expect("cover tree still present");

        let flat = FlatTerm::of_term(&env.store, tuple);
        let mut matcher = cover.tree.matcher(flat);
        let mut redundant = false;
        'matches: while let Some(hits) = matcher.next() {
            for &idx in hits {
                let entry = &cover.entries[idx as usize];
                if let Some((lhs, rhs)) = entry.constraint {
                    let lhs = instantiate(&mut env.store, &env.sig, lhs, &|v| matcher.binding(v));
                    let rhs = instantiate(&mut env.store, &env.sig, rhs, &|v| matcher.binding(v));
                    if env.ordering.compare(&env.store, &env.sig, lhs, rhs) != Comparison::Greater {
                        continue;
                    }
                }
                let lits_ok = entry.lits.iter().all(|&l| {
                    let inst = instantiate_literal(env, l, &|v| matcher.binding(v));
                    partner_lits.contains(&inst)
                });
                if lits_ok {
                    redundant = true;
                    break 'matches;
                }
            }
        }
        if redundant {
            debug!(?clause, "inference covered by conditional redundancy");
            env.stats.inferences_skipped_as_redundant += 1;
        }
        redundant
    }

    /// Extends the cover of `clause` with the current substitution.
    pub fn insert(
        &mut self,
        env: &mut Env,
        clause: ClauseId,
        subst: &mut RobSubstitution,
        bank: Bank,
        constraint: Option<(TermId, TermId)>,
        lits: Vec<LiteralId>,
    ) {
        if !self.enabled {
            return;
        }
        let vars = match self.data.get(&clause) {
            Some(cover) => cover.vars.clone(),
            None => Self::clause_vars(env, clause),
        };
        let images = Self::images(env, subst, bank, &vars);
        let arity = images.len();
        let functor = self.tuple_functor(env, arity);

        // One renaming, applied to each component in turn: the tuple
        // images first, then the constraint sides, then the side literals.
        let mut renaming = Renaming::new();
        let norm_images: Vec<TermId> = images
            .into_iter()
            .map(|t| renaming.normalize_term(&mut env.store, &env.sig, t))
            .collect();
        let norm_constraint = constraint.map(|(lhs, rhs)| {
            let lhs = renaming.normalize_term(&mut env.store, &env.sig, lhs);
            let rhs = renaming.normalize_term(&mut env.store, &env.sig, rhs);
            (lhs, rhs)
        });
        let norm_lits: Vec<LiteralId> = lits
            .into_iter()
            .map(|l| renaming.normalize_literal(&mut env.store, &env.sig, l))
            .collect();

        let pattern = env.store.app(&env.sig, functor, norm_images);
        let cover = self.data.entry(clause).or_insert_with(|| CoverTree {
            vars,
            tree: CodeTree::new(),
            entries: vec![],
        });
        let idx = cover.entries.len() as u32;
        cover.entries.push(CoverEntry {
            constraint: norm_constraint,
            lits: norm_lits,
        });
        cover.tree.insert(&env.store, pattern, idx);
    }
}

fn instantiate_literal(
    env: &mut Env,
    lit: LiteralId,
    bind: &impl Fn(u32) -> Option<TermId>,
) -> LiteralId {
    let header = env.store.lit_header(lit);
    let args: Vec<TermId> = env.store.lit_args(lit).to_vec();
    let new_args: Vec<TermId> = args
        .iter()
        .map(|&a| instantiate(&mut env.store, &env.sig, a, bind))
        .collect();
    env.store
        .literal(&env.sig, header.predicate(), header.polarity(), new_args)
}
