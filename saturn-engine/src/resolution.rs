//! Binary resolution, equality resolution and equality factoring.
//!
//! All three share the selection discipline of superposition: the
//! resolved/factored literal must be selected in the given clause, and the
//! partner literal selected in its own clause (the resolution index only
//! ever contains selected literals of active clauses).

use tracing::debug;

use saturn_ir::{
    Bank, ClauseId, Color, Comparison, Inference, LiteralId, RobSubstitution, Rule, TermSpec,
};

use saturn_index::subst_tree::RetrievalMode;
use saturn_index::term_index::LiteralSubstTreeIndex;

use crate::env::Env;
use crate::passive::Limits;
use crate::redundancy::ConditionalRedundancyHandler;

fn conclusion_admitted(env: &mut Env, limits: Limits, age: u32, literals: &[LiteralId]) -> bool {
    let weight: u32 = literals.iter().map(|&l| env.store.lit_weight(l)).sum();
    if limits.admits(age, weight) {
        true
    } else {
        env.stats.inferences_aborted_by_limits += 1;
        false
    }
}

fn merged_color(env: &Env, a: ClauseId, b: ClauseId) -> Option<Color> {
    env.clauses[a].color().merge(env.clauses[b].color())
}

/// Binary resolution of the given clause against the active resolution
/// index.
pub fn binary_resolution(
    env: &mut Env,
    index: &LiteralSubstTreeIndex,
    redundancy: &mut ConditionalRedundancyHandler,
    limits: Limits,
    given: ClauseId,
) -> Vec<ClauseId> {
    let mut out = vec![];
    let selected: Vec<LiteralId> = env.clauses[given].selected_literals().to_vec();
    let given_lits: Vec<LiteralId> = env.clauses[given].literals().to_vec();

    for lit in selected {
        if env.store.lit_is_equality(lit) {
            continue;
        }
        let mut hits = vec![];
        {
            let mut it = index.retrieve(&env.store, lit, true, RetrievalMode::Unifiers);
            while let Some(leaf) = it.next(&env.store) {
                hits.push(leaf);
            }
        }
        for leaf in hits {
            let Some(color) = merged_color(env, given, leaf.clause) else {
                env.stats.inferences_skipped_due_to_colors += 1;
                continue;
            };
            let mut subst = RobSubstitution::new();
            if !unify_atoms(env, &mut subst, lit, leaf.literal) {
                continue;
            }

            let partner_lits: Vec<LiteralId> = env.clauses[leaf.clause].literals().to_vec();
            // The σ-applied resolved literals key the redundancy covers:
            // resolving the same instance against another copy of a unit
            // premise would repeat known work.
            let partner_res =
                subst.apply_literal(&mut env.store, &env.sig, leaf.literal, Bank::RESULT);
            let given_res = subst.apply_literal(&mut env.store, &env.sig, lit, Bank::QUERY);
            if redundancy.check(env, given, &mut subst, Bank::QUERY, &[partner_res])
                || redundancy.check(env, leaf.clause, &mut subst, Bank::RESULT, &[given_res])
            {
                continue;
            }
            if env.clauses[leaf.clause].len() == 1
                && env.store.lit_polarity(leaf.literal)
                && env.clauses[leaf.clause].no_splits()
            {
                redundancy.insert(env, given, &mut subst, Bank::QUERY, None, vec![partner_res]);
            }
            if env.clauses[given].len() == 1
                && env.store.lit_polarity(lit)
                && env.clauses[given].no_splits()
            {
                redundancy.insert(env, leaf.clause, &mut subst, Bank::RESULT, None, vec![given_res]);
            }

            let rest1: Vec<LiteralId> = given_lits
                .iter()
                .filter(|&&l| l != lit)
                .map(|&l| subst.apply_literal(&mut env.store, &env.sig, l, Bank::QUERY))
                .collect();
            let rest2: Vec<LiteralId> = partner_lits
                .iter()
                .filter(|&&l| l != leaf.literal)
                .map(|&l| subst.apply_literal(&mut env.store, &env.sig, l, Bank::RESULT))
                .collect();
            let mut literals = rest1;
            literals.extend(rest2);
            let age = env.clauses[given]
                .age()
                .max(env.clauses[leaf.clause].age())
                + 1;
            if !conclusion_admitted(env, limits, age, &literals) {
                continue;
            }
            let conclusion = env.clauses.create(
                literals,
                age,
                color,
                Inference::new(Rule::BinaryResolution, vec![given, leaf.clause]),
            );
            debug!(?given, partner = ?leaf.clause, ?conclusion, "binary resolution");
            env.stats.resolutions += 1;
            out.push(conclusion);
        }
    }
    out
}

fn unify_atoms(env: &Env, subst: &mut RobSubstitution, a: LiteralId, b: LiteralId) -> bool {
    debug_assert_eq!(
        env.store.lit_predicate(a),
        env.store.lit_predicate(b),
    );
    let a_args = env.store.lit_args(a).to_vec();
    let b_args = env.store.lit_args(b).to_vec();
    a_args.iter().zip(b_args.iter()).all(|(&x, &y)| {
        subst
            .unify(
                &env.store,
                TermSpec::new(x, Bank::QUERY),
                TermSpec::new(y, Bank::RESULT),
            )
            .is_ok()
    })
}

/// Equality resolution: from `s ≉ t ∨ C` with σ = mgu(s, t), derive `Cσ`.
pub fn equality_resolution(env: &mut Env, limits: Limits, given: ClauseId) -> Vec<ClauseId> {
    let mut out = vec![];
    let selected: Vec<LiteralId> = env.clauses[given].selected_literals().to_vec();
    let given_lits: Vec<LiteralId> = env.clauses[given].literals().to_vec();

    for lit in selected {
        if !env.store.lit_is_equality(lit) || env.store.lit_polarity(lit) {
            continue;
        }
        let args = env.store.lit_args(lit).to_vec();
        let mut subst = RobSubstitution::new();
        if subst
            .unify(
                &env.store,
                TermSpec::new(args[0], Bank::QUERY),
                TermSpec::new(args[1], Bank::QUERY),
            )
            .is_err()
        {
            continue;
        }
        let literals: Vec<LiteralId> = given_lits
            .iter()
            .filter(|&&l| l != lit)
            .map(|&l| subst.apply_literal(&mut env.store, &env.sig, l, Bank::QUERY))
            .collect();
        let age = env.clauses[given].age() + 1;
        if !conclusion_admitted(env, limits, age, &literals) {
            continue;
        }
        let color = env.clauses[given].color();
        let conclusion = env.clauses.create(
            literals,
            age,
            color,
            Inference::new(Rule::EqualityResolution, vec![given]),
        );
        env.stats.equality_resolutions += 1;
        out.push(conclusion);
    }
    out
}

/// Equality factoring: from `s ≈ t ∨ s' ≈ t' ∨ C` with σ = mgu(s, s'),
/// derive `(t ≉ t' ∨ s' ≈ t' ∨ C)σ`, provided neither `tσ` nor `t'σ` is
/// above `sσ`.
pub fn equality_factoring(env: &mut Env, limits: Limits, given: ClauseId) -> Vec<ClauseId> {
    let mut out = vec![];
    if env.clauses[given].len() <= 1 {
        return out;
    }
    let selected: Vec<LiteralId> = env.clauses[given].selected_literals().to_vec();
    let given_lits: Vec<LiteralId> = env.clauses[given].literals().to_vec();

    for s_lit in selected {
        if !env.store.lit_is_equality(s_lit) || !env.store.lit_polarity(s_lit) {
            continue;
        }
        for s_lhs in factoring_sides(env, s_lit) {
            for &f_lit in &given_lits {
                if f_lit == s_lit
                    || !env.store.lit_is_equality(f_lit)
                    || !env.store.lit_polarity(f_lit)
                {
                    continue;
                }
                let f_args = env.store.lit_args(f_lit).to_vec();
                for f_lhs in [f_args[0], f_args[1]] {
                    let mut subst = RobSubstitution::new();
                    if subst
                        .unify(
                            &env.store,
                            TermSpec::new(s_lhs, Bank::QUERY),
                            TermSpec::new(f_lhs, Bank::QUERY),
                        )
                        .is_err()
                    {
                        continue;
                    }
                    let s_rhs = env.store.other_equality_side(s_lit, s_lhs);
                    let f_rhs = env.store.other_equality_side(f_lit, f_lhs);
                    let s_lhs_s =
                        subst.apply(&mut env.store, &env.sig, TermSpec::new(s_lhs, Bank::QUERY));
                    let s_rhs_s =
                        subst.apply(&mut env.store, &env.sig, TermSpec::new(s_rhs, Bank::QUERY));
                    if matches!(
                        env.ordering.compare(&env.store, &env.sig, s_rhs_s, s_lhs_s),
                        Comparison::Greater | Comparison::Equal
                    ) {
                        continue;
                    }
                    let f_rhs_s =
                        subst.apply(&mut env.store, &env.sig, TermSpec::new(f_rhs, Bank::QUERY));
                    if matches!(
                        env.ordering.compare(&env.store, &env.sig, f_rhs_s, s_lhs_s),
                        Comparison::Greater | Comparison::Equal
                    ) {
                        continue;
                    }

                    let mut literals =
                        vec![env.store.equality(&env.sig, false, s_rhs_s, f_rhs_s)];
                    literals.extend(
                        given_lits
                            .iter()
                            .filter(|&&l| l != s_lit)
                            .map(|&l| {
                                subst.apply_literal(&mut env.store, &env.sig, l, Bank::QUERY)
                            }),
                    );
                    let age = env.clauses[given].age() + 1;
                    if !conclusion_admitted(env, limits, age, &literals) {
                        continue;
                    }
                    let color = env.clauses[given].color();
                    let conclusion = env.clauses.create(
                        literals,
                        age,
                        color,
                        Inference::new(Rule::EqualityFactoring, vec![given]),
                    );
                    env.stats.equality_factorings += 1;
                    out.push(conclusion);
                }
            }
        }
    }
    out
}

/// The sides of a positive equality usable as the factored-out term: those
/// not below the other side.
fn factoring_sides(env: &Env, lit: LiteralId) -> Vec<saturn_ir::TermId> {
    let args = env.store.lit_args(lit);
    let (l, r) = (args[0], args[1]);
    match env.ordering.equality_argument_order(&env.store, &env.sig, lit) {
        Comparison::Greater => vec![l],
        Comparison::Less => vec![r],
        _ => vec![l, r],
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::Options;
    use saturn_ir::{InputType, Signature, Sort};

    fn env() -> Env {
        Env::new(Signature::new(), Options::default())
    }

    /// A clause with its selection fixed, as activation would leave it.
    fn clause(env: &mut Env, literals: Vec<LiteralId>, selected: usize) -> ClauseId {
        let id = env.clauses.create(
            literals.clone(),
            0,
            Color::Transparent,
            Inference::input(InputType::Axiom),
        );
        env.clauses[id].set_selection(literals, selected);
        id
    }

    #[test]
    fn resolves_complementary_selected_literals() {
        let mut env = env();
        let p = env.sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let q = env.sig.add_predicate("q", vec![Sort::INDIVIDUAL]);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let x = env.store.var(0);
        let pa = env.store.literal(&env.sig, p, true, vec![ca]);
        let npx = env.store.literal(&env.sig, p, false, vec![x]);
        let qx = env.store.literal(&env.sig, q, true, vec![x]);

        let unit = clause(&mut env, vec![pa], 1);
        let mut index = LiteralSubstTreeIndex::new();
        index.insert(&mut env.store, &env.sig, pa, unit);

        // ¬p(x) ∨ q(x) against p(a) resolves to q(a).
        let given = clause(&mut env, vec![npx, qx], 1);
        let mut redundancy = ConditionalRedundancyHandler::new(false);
        let out = binary_resolution(&mut env, &index, &mut redundancy, Limits::default(), given);
        assert_eq!(out.len(), 1);
        let qa = env.store.literal(&env.sig, q, true, vec![ca]);
        assert_eq!(env.clauses[out[0]].literals(), &[qa]);
        assert_eq!(env.clauses[out[0]].inference().rule, Rule::BinaryResolution);
        assert_eq!(env.stats.resolutions, 1);
    }

    #[test]
    fn equality_resolution_discharges_unifiable_disequations() {
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

        // f(x) ≉ f(a) ∨ p(x) yields p(a) under x ↦ a.
        let neq = env.store.equality(&env.sig, false, fx, fa);
        let px = env.store.literal(&env.sig, p, true, vec![x]);
        let given = clause(&mut env, vec![neq, px], 1);
        let out = equality_resolution(&mut env, Limits::default(), given);
        assert_eq!(out.len(), 1);
        let pa = env.store.literal(&env.sig, p, true, vec![ca]);
        assert_eq!(env.clauses[out[0]].literals(), &[pa]);
        assert_eq!(env.clauses[out[0]].inference().rule, Rule::EqualityResolution);
        assert_eq!(env.stats.equality_resolutions, 1);

        // Ground distinct sides have no unifier, so nothing is derived.
        let b = env.sig.add_constant("b", Sort::INDIVIDUAL);
        let cb = env.store.constant(&env.sig, b);
        let ground = env.store.equality(&env.sig, false, ca, cb);
        let given = clause(&mut env, vec![ground], 1);
        assert!(equality_resolution(&mut env, Limits::default(), given).is_empty());
        assert_eq!(env.stats.equality_resolutions, 1);
    }

    #[test]
    fn equality_factoring_merges_shared_left_hand_sides() {
        let mut env = env();
        let f = env
            .sig
            .add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let b = env.sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let cb = env.store.constant(&env.sig, b);
        let x = env.store.var(0);
        let fx = env.store.app(&env.sig, f, vec![x]);

        // f(x) ≈ a ∨ f(x) ≈ b factors into a ≉ b ∨ f(x) ≈ b (and the
        // symmetric conclusion from the other selected literal).
        let l1 = env.store.equality(&env.sig, true, fx, ca);
        let l2 = env.store.equality(&env.sig, true, fx, cb);
        let given = clause(&mut env, vec![l1, l2], 2);
        let out = equality_factoring(&mut env, Limits::default(), given);
        assert_eq!(out.len(), 2);
        let neq_ab = env.store.equality(&env.sig, false, ca, cb);
        let neq_ba = env.store.equality(&env.sig, false, cb, ca);
        assert_eq!(env.clauses[out[0]].literals(), &[neq_ab, l2]);
        assert_eq!(env.clauses[out[1]].literals(), &[neq_ba, l1]);
        assert_eq!(env.clauses[out[0]].inference().rule, Rule::EqualityFactoring);
        assert_eq!(env.stats.equality_factorings, 2);
    }

    #[test]
    fn equality_factoring_rejects_uphill_results() {
        let mut env = env();
        let f = env
            .sig
            .add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let g = env
            .sig
            .add_function("g", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = env.store.constant(&env.sig, a);
        let x = env.store.var(0);
        let fx = env.store.app(&env.sig, f, vec![x]);
        let heavy = env.store.app(&env.sig, g, vec![fx, fx]);

        // f(x) ≈ g(f(x), f(x)) ∨ f(x) ≈ a: factoring out f(x) would keep
        // the larger side g(f(x), f(x)) above it, which the ordering
        // side-condition rejects; the f(x)-topped sides of the two
        // literals cannot unify with the other candidates either.
        let l1 = env.store.equality(&env.sig, true, fx, heavy);
        let l2 = env.store.equality(&env.sig, true, fx, ca);
        let given = clause(&mut env, vec![l1, l2], 2);
        let out = equality_factoring(&mut env, Limits::default(), given);
        assert!(out.is_empty());
        assert_eq!(env.stats.equality_factorings, 0);
    }
}
