//! Forward and backward demodulation: rewriting with oriented unit
//! equations.
//!
//! Forward demodulation rewrites a clause with the active demodulators
//! (code-tree lookup per subterm); backward demodulation uses a freshly
//! activated equation to rewrite the active clauses it matches (instance
//! retrieval in the subterm index). The redundancy check at the top level
//! of equality literals, including its encompassment variant, follows
//! the standard conditions for keeping non-unit demodulation complete.

use rustc_hash::FxHashSet;

use tracing::debug;

use saturn_ir::{
    Bank, ClauseId, Comparison, Inference, LiteralId, RobSubstitution, Rule, TermData, TermId,
    TermSpec,
};

use saturn_index::subst_tree::RetrievalMode;
use saturn_index::term_index::{instantiate, DemodLeaf, DemodulationLhsIndex, TermSubstTreeIndex};

use crate::env::Env;
use crate::options::{DemodulationMode, DemodulationRedundancyCheck};

pub enum ForwardDemodulation {
    /// Nothing applied.
    None,
    /// The rewritten clause is a tautology; the original is redundant
    /// outright.
    Deleted { premise: ClauseId },
    /// The clause was rewritten.
    Rewritten { replacement: ClauseId, premise: ClauseId },
}

/// Rewrites the first reducible subterm of `clause` with an active
/// demodulator.
pub fn forward_demodulate(
    env: &mut Env,
    index: &DemodulationLhsIndex,
    clause: ClauseId,
) -> ForwardDemodulation {
    if env.options.forward_demodulation == DemodulationMode::Off || index.is_empty() {
        return ForwardDemodulation::None;
    }
    let preordered_only = env.options.forward_demodulation == DemodulationMode::Preordered;
    let encompassing =
        env.options.demodulation_redundancy_check == DemodulationRedundancyCheck::Encompass;
    let check_off = env.options.demodulation_redundancy_check == DemodulationRedundancyCheck::Off;

    let literals: Vec<LiteralId> = env.clauses[clause].literals().to_vec();
    let len = literals.len();
    let mut attempted: FxHashSet<TermId> = FxHashSet::default();

    for (li, &lit) in literals.iter().enumerate() {
        let subterms: Vec<TermId> = env
            .store
            .lit_non_var_subterms(lit)
            .collect();
        for trm in subterms {
            if !attempted.insert(trm) {
                // Already tried this shared subterm (and with it all of
                // its subterms) without success.
                continue;
            }
            let mut toplevel_check = !check_off
                && env.store.lit_is_equality(lit)
                && env.store.lit_args(lit).contains(&trm);
            if encompassing {
                // Encompassing demodulation is always fine into negative
                // literals and non-units.
                toplevel_check &= env.store.lit_polarity(lit) && len == 1;
            }

            let mut matcher = index.generalizations(&env.store, trm);
            let mut bindings_of: Vec<(DemodLeaf, Vec<(u32, TermId)>)> = vec![];
            while let Some(found) = matcher.next() {
                for &leaf in found {
                    let vars: Vec<(u32, TermId)> = env
                        .store
                        .vars(leaf.norm_lhs)
                        .iter()
                        .filter_map(|v| matcher.binding(v).map(|t| (v, t)))
                        .collect();
                    bindings_of.push((leaf, vars));
                }
            }
            drop(matcher);

            for (leaf, bindings) in bindings_of {
                if !env.clauses[clause]
                    .color()
                    .compatible(env.clauses[leaf.clause].color())
                {
                    continue;
                }
                let lookup = |v: u32| bindings.iter().find(|&&(w, _)| w == v).map(|&(_, t)| t);
                let rhs_s = instantiate(&mut env.store, &env.sig, leaf.norm_rhs, &lookup);

                let arg_order = env
                    .ordering
                    .compare(&env.store, &env.sig, leaf.norm_lhs, leaf.norm_rhs);
                let preordered = arg_order == Comparison::Greater;
                if !preordered
                    && (preordered_only
                        || env.ordering.compare(&env.store, &env.sig, trm, rhs_s)
                            != Comparison::Greater)
                {
                    continue;
                }

                let mut toplevel_check = toplevel_check;
                if toplevel_check && encompassing {
                    // Rewriting the smaller side of the equality is fine.
                    let lit_order =
                        env.ordering.equality_argument_order(&env.store, &env.sig, lit);
                    let args = env.store.lit_args(lit);
                    if (trm == args[0] && lit_order == Comparison::Less)
                        || (trm == args[1] && lit_order == Comparison::Greater)
                    {
                        toplevel_check = false;
                    }
                }
                if toplevel_check
                    && !passes_toplevel_check(env, &literals, li, lit, trm, rhs_s, &bindings, encompassing)
                {
                    continue;
                }

                let res_lit = env.store.replace_in_literal(&env.sig, lit, trm, rhs_s);
                if env.store.lit_is_equality(res_lit)
                    && env.store.lit_polarity(res_lit)
                    && env.store.lit_args(res_lit)[0] == env.store.lit_args(res_lit)[1]
                {
                    env.stats.forward_demodulations_to_tautology += 1;
                    return ForwardDemodulation::Deleted { premise: leaf.clause };
                }

                let mut new_lits = vec![res_lit];
                new_lits.extend(literals.iter().copied().filter(|&l| l != lit));
                let age = env.clauses[clause].age();
                let color = env.clauses[clause].color();
                let replacement = env.clauses.create(
                    new_lits,
                    age,
                    color,
                    Inference::new(Rule::ForwardDemodulation, vec![clause, leaf.clause]),
                );
                debug!(?clause, demodulator = ?leaf.clause, ?replacement, "forward demodulation");
                env.stats.forward_demodulations += 1;
                return ForwardDemodulation::Rewritten {
                    replacement,
                    premise: leaf.clause,
                };
            }
        }
    }
    ForwardDemodulation::None
}

/// The completeness check for rewriting at the top of a positive equality:
/// without it, `s = t` with `s = t1 ∨ C` could erase the only maximal
/// occurrence. Returns true when the rewrite may proceed.
#[allow(clippy::too_many_arguments)]
fn passes_toplevel_check(
    env: &mut Env,
    literals: &[LiteralId],
    li: usize,
    lit: LiteralId,
    trm: TermId,
    rhs_s: TermId,
    bindings: &[(u32, TermId)],
    encompassing: bool,
) -> bool {
    let other = env.store.other_equality_side(lit, trm);
    if env.ordering.compare(&env.store, &env.sig, rhs_s, other) == Comparison::Less {
        return true;
    }
    if encompassing {
        // Last chance: under encompassment the rewrite stands whenever
        // the matcher is a proper instance, i.e. not a renaming.
        let renaming = {
            let mut images: FxHashSet<TermId> = FxHashSet::default();
            bindings
                .iter()
                .all(|&(_, t)| matches!(env.store.data(t), TermData::Var(_)) && images.insert(t))
        };
        !renaming
    } else {
        // Classic check: the demodulator instance must not be maximal in
        // the clause.
        let eq_lit_s = env.store.equality(&env.sig, true, trm, rhs_s);
        let is_max = literals.iter().enumerate().all(|(li2, &other_lit)| {
            li2 == li
                || env
                    .ordering
                    .compare_literals(&env.store, &env.sig, eq_lit_s, other_lit)
                    != Comparison::Less
        });
        !is_max
    }
}

/// Backward demodulation: the given clause, if it is a freshly activated
/// oriented unit equation, rewrites matching active clauses. Victims are
/// returned with their replacements; the driver removes them from every
/// index.
pub fn backward_demodulate(
    env: &mut Env,
    subterm_index: &TermSubstTreeIndex,
    given: ClauseId,
) -> Vec<(ClauseId, ClauseId)> {
    let mut out = vec![];
    if env.options.backward_demodulation == DemodulationMode::Off {
        return out;
    }
    let Some(eq_lit) = env.clauses[given].as_unit_equality(&env.store) else {
        return out;
    };
    let preordered_only = env.options.backward_demodulation == DemodulationMode::Preordered;
    let args = env.store.lit_args(eq_lit).to_vec();
    let order = env
        .ordering
        .equality_argument_order(&env.store, &env.sig, eq_lit);
    let sides: Vec<(TermId, TermId)> = match order {
        Comparison::Greater => vec![(args[0], args[1])],
        Comparison::Less => vec![(args[1], args[0])],
        _ if preordered_only => vec![],
        _ => vec![(args[0], args[1]), (args[1], args[0])],
    };

    let mut rewritten: FxHashSet<ClauseId> = FxHashSet::default();
    for (lhs, rhs) in sides {
        if env.store.is_var(lhs) {
            continue;
        }
        let mut hits = vec![];
        {
            let mut it = subterm_index.retrieve(&env.store, lhs, RetrievalMode::Instances);
            while let Some(leaf) = it.next(&env.store) {
                hits.push(leaf.entry);
            }
        }
        for entry in hits {
            if entry.clause == given || rewritten.contains(&entry.clause) {
                continue;
            }
            if !env.clauses[given]
                .color()
                .compatible(env.clauses[entry.clause].color())
            {
                continue;
            }
            let mut subst = RobSubstitution::new();
            if subst
                .match_(
                    &env.store,
                    TermSpec::new(lhs, Bank::QUERY),
                    TermSpec::new(entry.term, Bank::RESULT),
                    Bank::QUERY,
                )
                .is_err()
            {
                continue;
            }
            let rhs_s = subst.apply_identity(
                &mut env.store,
                &env.sig,
                TermSpec::new(rhs, Bank::QUERY),
                Bank::RESULT,
            );
            if env.ordering.compare(&env.store, &env.sig, entry.term, rhs_s)
                != Comparison::Greater
            {
                continue;
            }
            let victim_lits: Vec<LiteralId> = env.clauses[entry.clause].literals().to_vec();
            let new_lits: Vec<LiteralId> = victim_lits
                .iter()
                .map(|&l| env.store.replace_in_literal(&env.sig, l, entry.term, rhs_s))
                .collect();
            let age = env.clauses[entry.clause].age();
            let color = env.clauses[entry.clause].color();
            let replacement = env.clauses.create(
                new_lits,
                age,
                color,
                Inference::new(Rule::BackwardDemodulation, vec![entry.clause, given]),
            );
            debug!(victim = ?entry.clause, ?given, ?replacement, "backward demodulation");
            env.stats.backward_demodulations += 1;
            rewritten.insert(entry.clause);
            out.push((entry.clause, replacement));
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::Options;
    use saturn_ir::{Color, InputType, Signature, Sort};

    fn env() -> Env {
        Env::new(Signature::new(), Options::default())
    }

    fn input(env: &mut Env, literals: Vec<LiteralId>) -> ClauseId {
        env.clauses.create(
            literals,
            0,
            Color::Transparent,
            saturn_ir::Inference::input(InputType::Axiom),
        )
    }

    #[test]
    fn forward_rewriting_strictly_decreases() {
        let mut env = env();
        let f = env
            .sig
            .add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let p = env.sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let x = env.store.var(0);
        let fx = env.store.app(&env.sig, f, vec![x]);
        let fa = env.store.app(&env.sig, f, vec![ca]);

        // Demodulator f(x) → x, target p(f(a)).
        let eq_lit = env.store.equality(&env.sig, true, fx, x);
        let demodulator = input(&mut env, vec![eq_lit]);
        let mut index = DemodulationLhsIndex::new();
        index.insert(&mut env.store, &env.sig, fx, x, eq_lit, demodulator);

        let target_lit = env.store.literal(&env.sig, p, true, vec![fa]);
        let target = input(&mut env, vec![target_lit]);
        match forward_demodulate(&mut env, &index, target) {
            ForwardDemodulation::Rewritten { replacement, premise } => {
                assert_eq!(premise, demodulator);
                let pa = env.store.literal(&env.sig, p, true, vec![ca]);
                assert_eq!(env.clauses[replacement].literals(), &[pa]);
                assert_eq!(
                    env.clauses[replacement].inference().rule,
                    Rule::ForwardDemodulation
                );
                // The rewrite goes strictly downwards in the ordering.
                assert_eq!(
                    env.ordering
                        .compare_literals(&env.store, &env.sig, pa, target_lit),
                    Comparison::Less
                );
            }
            _ => panic!("expected a rewrite"),
        }
        assert_eq!(env.stats.forward_demodulations, 1);
    }

    #[test]
    fn unorientable_demodulators_apply_only_downhill() {
        let mut env = env();
        let p = env.sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let b = env.sig.add_constant("b", Sort::INDIVIDUAL);
        let mul = env
            .sig
            .add_function("mul", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let cb = env.store.constant(&env.sig, b);
        let x = env.store.var(0);
        let y = env.store.var(1);
        let mul_xy = env.store.app(&env.sig, mul, vec![x, y]);
        let mul_yx = env.store.app(&env.sig, mul, vec![y, x]);

        // Commutativity is incomparable as written; each instance must
        // pass the match-time ordering check.
        let eq_lit = env.store.equality(&env.sig, true, mul_xy, mul_yx);
        let demodulator = input(&mut env, vec![eq_lit]);
        let mut index = DemodulationLhsIndex::new();
        index.insert(&mut env.store, &env.sig, mul_xy, mul_yx, eq_lit, demodulator);

        // mul(b, a) rewrites to the smaller mul(a, b)…
        let mul_ba = env.store.app(&env.sig, mul, vec![cb, ca]);
        let downhill_lit = env.store.literal(&env.sig, p, true, vec![mul_ba]);
        let downhill = input(&mut env, vec![downhill_lit]);
        let mul_ab = env.store.app(&env.sig, mul, vec![ca, cb]);
        match forward_demodulate(&mut env, &index, downhill) {
            ForwardDemodulation::Rewritten { replacement, .. } => {
                let expected = env.store.literal(&env.sig, p, true, vec![mul_ab]);
                assert_eq!(env.clauses[replacement].literals(), &[expected]);
            }
            _ => panic!("expected a rewrite"),
        }

        // …but mul(a, b) must not rewrite upwards.
        let uphill_lit = env.store.literal(&env.sig, p, true, vec![mul_ab]);
        let uphill = input(&mut env, vec![uphill_lit]);
        assert!(matches!(
            forward_demodulate(&mut env, &index, uphill),
            ForwardDemodulation::None
        ));
    }

    #[test]
    fn backward_rewrites_matching_active_clauses() {
        let mut env = env();
        let f = env
            .sig
            .add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let p = env.sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let x = env.store.var(0);
        let fx = env.store.app(&env.sig, f, vec![x]);
        let fa = env.store.app(&env.sig, f, vec![ca]);

        // Victim p(f(a)) with its subterms indexed, as activation leaves
        // them; the fresh equation f(x) ≈ x rewrites it.
        let victim_lit = env.store.literal(&env.sig, p, true, vec![fa]);
        let victim = input(&mut env, vec![victim_lit]);
        let mut index = TermSubstTreeIndex::new();
        index.insert(&mut env.store, &env.sig, fa, victim_lit, victim, None);
        index.insert(&mut env.store, &env.sig, ca, victim_lit, victim, None);

        let eq_lit = env.store.equality(&env.sig, true, fx, x);
        let given = input(&mut env, vec![eq_lit]);
        let out = backward_demodulate(&mut env, &index, given);
        assert_eq!(out.len(), 1);
        let (rewritten, replacement) = out[0];
        assert_eq!(rewritten, victim);
        let pa = env.store.literal(&env.sig, p, true, vec![ca]);
        assert_eq!(env.clauses[replacement].literals(), &[pa]);
        assert_eq!(
            env.clauses[replacement].inference().rule,
            Rule::BackwardDemodulation
        );
        assert_eq!(env.stats.backward_demodulations, 1);
    }
}
