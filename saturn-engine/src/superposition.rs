//! Superposition: the main generating inference on equalities.
//!
//! Forward mode rewrites inside the given clause with active equations
//! (the equation LHS index answers unification queries for each rewritable
//! subterm); backward mode rewrites active clauses with the given clause's
//! equations (the subterm index answers queries for each equation side).
//! Both directions funnel into one `perform` with the two premises in
//! opposite variable banks.

use tracing::debug;

use saturn_ir::{
    Bank, ClauseId, Comparison, Inference, LiteralId, RobSubstitution, Rule, TermId, TermSpec,
};

use saturn_index::subst_tree::RetrievalMode;
use saturn_index::term_index::{TermSubstTreeIndex, UnificationIndex};

use crate::env::Env;
use crate::passive::Limits;
use crate::redundancy::ConditionalRedundancyHandler;

/// The non-variable subterms of a literal that superposition may rewrite:
/// everything for a non-equational literal, subterms of the not-smaller
/// sides for an equality.
pub fn rewritable_subterms(env: &Env, lit: LiteralId) -> Vec<TermId> {
    let mut roots: Vec<TermId> = vec![];
    if env.store.lit_is_equality(lit) {
        let args = env.store.lit_args(lit);
        let (l, r) = (args[0], args[1]);
        match env.ordering.equality_argument_order(&env.store, &env.sig, lit) {
            Comparison::Greater => roots.push(l),
            Comparison::Less => roots.push(r),
            _ => {
                roots.push(l);
                roots.push(r);
            }
        }
    } else {
        roots.extend(env.store.lit_args(lit).iter().copied());
    }
    let mut out = vec![];
    for root in roots {
        for sub in env.store.non_var_subterms(root) {
            if !out.contains(&sub) {
                out.push(sub);
            }
        }
    }
    out
}

/// The sides of a positive equality usable as a rewriting left-hand side:
/// those not below the other side, variables excluded.
pub fn superposition_lhs_sides(env: &Env, lit: LiteralId) -> Vec<(TermId, TermId)> {
    debug_assert!(env.store.lit_is_equality(lit) && env.store.lit_polarity(lit));
    let args = env.store.lit_args(lit);
    let (l, r) = (args[0], args[1]);
    let mut out = vec![];
    match env.ordering.equality_argument_order(&env.store, &env.sig, lit) {
        Comparison::Greater => out.push((l, r)),
        Comparison::Less => out.push((r, l)),
        _ => {
            out.push((l, r));
            out.push((r, l));
        }
    }
    out.retain(|&(lhs, _)| !env.store.is_var(lhs));
    out
}

struct Premise {
    clause: ClauseId,
    literal: LiteralId,
    term: TermId,
    bank: Bank,
}

/// One superposition step: rewrite `rw.term` inside `rw.literal` with the
/// equation `eq.term ≈ rhs` under the unifier already in `subst`.
#[allow(clippy::too_many_arguments)]
fn perform(
    env: &mut Env,
    redundancy: &mut ConditionalRedundancyHandler,
    limits: Limits,
    rw: Premise,
    eq: Premise,
    subst: &mut RobSubstitution,
) -> Option<ClauseId> {
    let Some(color) = env.clauses[rw.clause]
        .color()
        .merge(env.clauses[eq.clause].color())
    else {
        env.stats.inferences_skipped_due_to_colors += 1;
        return None;
    };

    let rhs = env.store.other_equality_side(eq.literal, eq.term);
    // The equation must rewrite downwards: skip when σ turns it around.
    if env
        .ordering
        .is_greater_under(&mut env.store, &env.sig, subst, eq.bank, rhs, eq.term)
    {
        return None;
    }

    // Conditional redundancy: the handler may know this instance is
    // covered by earlier work on either premise.
    let rw_lit_s = subst.apply_literal(&mut env.store, &env.sig, rw.literal, rw.bank);
    let eq_lit_s = subst.apply_literal(&mut env.store, &env.sig, eq.literal, eq.bank);
    if redundancy.check(env, eq.clause, subst, eq.bank, &[rw_lit_s])
        || redundancy.check(env, rw.clause, subst, rw.bank, &[eq_lit_s])
    {
        return None;
    }

    let rw_term_s = subst.apply(&mut env.store, &env.sig, TermSpec::new(rw.term, rw.bank));
    let tgt_s = subst.apply(&mut env.store, &env.sig, TermSpec::new(rhs, eq.bank));
    let new_lit = env.store.replace_in_literal(&env.sig, rw_lit_s, rw_term_s, tgt_s);

    let mut literals = vec![new_lit];
    let rw_lits: Vec<LiteralId> = env.clauses[rw.clause].literals().to_vec();
    for l in rw_lits {
        if l != rw.literal {
            literals.push(subst.apply_literal(&mut env.store, &env.sig, l, rw.bank));
        }
    }
    let eq_lits: Vec<LiteralId> = env.clauses[eq.clause].literals().to_vec();
    for l in eq_lits {
        if l != eq.literal {
            literals.push(subst.apply_literal(&mut env.store, &env.sig, l, eq.bank));
        }
    }

    let age = env.clauses[rw.clause]
        .age()
        .max(env.clauses[eq.clause].age())
        + 1;
    let weight: u32 = literals.iter().map(|&l| env.store.lit_weight(l)).sum();
    if !limits.admits(age, weight) {
        env.stats.inferences_aborted_by_limits += 1;
        return None;
    }

    // Extend the cover of the rewritten clause: with a unit, unsplit
    // equation this instance is now demodulator-redundant, conditionally
    // on the equation's orientation when σ leaves it open.
    if env.clauses[eq.clause].len() == 1 && env.clauses[eq.clause].no_splits() {
        let oriented =
            env.ordering
                .is_greater_under(&mut env.store, &env.sig, subst, eq.bank, eq.term, rhs);
        let constraint = if oriented {
            None
        } else {
            let lhs_s = subst.apply(&mut env.store, &env.sig, TermSpec::new(eq.term, eq.bank));
            Some((lhs_s, tgt_s))
        };
        redundancy.insert(env, rw.clause, subst, rw.bank, constraint, vec![]);
    }

    let conclusion = env.clauses.create(
        literals,
        age,
        color,
        Inference::new(Rule::Superposition, vec![rw.clause, eq.clause]),
    );
    debug!(rw = ?rw.clause, eq = ?eq.clause, ?conclusion, "superposition");
    env.stats.superpositions += 1;
    Some(conclusion)
}

/// Forward superposition: rewrite the given clause's selected literals
/// with active equations.
pub fn forward_superposition(
    env: &mut Env,
    lhs_index: &TermSubstTreeIndex,
    redundancy: &mut ConditionalRedundancyHandler,
    limits: Limits,
    given: ClauseId,
) -> Vec<ClauseId> {
    let mut out = vec![];
    let selected: Vec<LiteralId> = env.clauses[given].selected_literals().to_vec();
    for lit in selected {
        for sub in rewritable_subterms(env, lit) {
            let mut hits = vec![];
            {
                let mut it = lhs_index.retrieve(&env.store, sub, RetrievalMode::Unifiers);
                while let Some(leaf) = it.next(&env.store) {
                    hits.push(leaf);
                }
            }
            for leaf in hits {
                let mut subst = RobSubstitution::new();
                if subst
                    .unify(
                        &env.store,
                        TermSpec::new(sub, Bank::QUERY),
                        TermSpec::new(leaf.entry.term, Bank::RESULT),
                    )
                    .is_err()
                {
                    continue;
                }
                let conclusion = perform(
                    env,
                    redundancy,
                    limits,
                    Premise {
                        clause: given,
                        literal: lit,
                        term: sub,
                        bank: Bank::QUERY,
                    },
                    Premise {
                        clause: leaf.entry.clause,
                        literal: leaf.entry.literal,
                        term: leaf.entry.term,
                        bank: Bank::RESULT,
                    },
                    &mut subst,
                );
                out.extend(conclusion);
            }
        }
    }
    out
}

/// Backward superposition: rewrite active clauses with the given clause's
/// equations.
pub fn backward_superposition(
    env: &mut Env,
    subterm_index: &UnificationIndex,
    redundancy: &mut ConditionalRedundancyHandler,
    limits: Limits,
    given: ClauseId,
) -> Vec<ClauseId> {
    let mut out = vec![];
    let selected: Vec<LiteralId> = env.clauses[given].selected_literals().to_vec();
    for lit in selected {
        if !env.store.lit_is_equality(lit) || !env.store.lit_polarity(lit) {
            continue;
        }
        for (lhs, _) in superposition_lhs_sides(env, lit) {
            let mut hits = vec![];
            {
                let mut it = subterm_index.unifications(&env.store, lhs);
                while let Some(entry) = it.next(&env.store) {
                    hits.push(entry);
                }
            }
            for entry in hits {
                if entry.clause == given {
                    continue;
                }
                let mut subst = RobSubstitution::new();
                if subst
                    .unify(
                        &env.store,
                        TermSpec::new(lhs, Bank::QUERY),
                        TermSpec::new(entry.term, Bank::RESULT),
                    )
                    .is_err()
                {
                    continue;
                }
                let conclusion = perform(
                    env,
                    redundancy,
                    limits,
                    Premise {
                        clause: entry.clause,
                        literal: entry.literal,
                        term: entry.term,
                        bank: Bank::RESULT,
                    },
                    Premise {
                        clause: given,
                        literal: lit,
                        term: lhs,
                        bank: Bank::QUERY,
                    },
                    &mut subst,
                );
                out.extend(conclusion);
            }
        }
    }
    out
}
