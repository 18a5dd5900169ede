//! Literal selection. The selector runs once, when a clause is activated;
//! it reorders the literal array so the selected literals form a prefix
//! and fixes the prefix length for the rest of the clause's life.

use saturn_ir::{Comparison, LiteralId};

use crate::env::Env;
use crate::options::LiteralSelector;

/// The selected prefix for `literals` under the configured selector:
/// the reordered array and the selection count.
pub fn select(env: &Env, literals: &[LiteralId]) -> (Vec<LiteralId>, usize) {
    match env.options.literal_selector {
        LiteralSelector::Total => (literals.to_vec(), literals.len()),
        LiteralSelector::MaximalOnly => maximal_prefix(env, literals),
        LiteralSelector::CompleteSelection => {
            // Selecting one negative literal keeps the calculus complete
            // and cuts the search space; fall back to the maximal
            // literals for positive clauses.
            let negatives: Vec<LiteralId> = literals
                .iter()
                .copied()
                .filter(|&l| !env.store.lit_polarity(l))
                .collect();
            match pick_heaviest(env, &negatives) {
                Some(chosen) => {
                    let mut out = vec![chosen];
                    out.extend(literals.iter().copied().filter(|&l| l != chosen));
                    (out, 1)
                }
                None => maximal_prefix(env, literals),
            }
        }
    }
}

fn pick_heaviest(env: &Env, literals: &[LiteralId]) -> Option<LiteralId> {
    literals
        .iter()
        .copied()
        .max_by_key(|&l| (env.store.lit_weight(l), l))
}

/// Literals not strictly below any other literal of the clause.
fn maximal_prefix(env: &Env, literals: &[LiteralId]) -> (Vec<LiteralId>, usize) {
    let mut selected = vec![];
    let mut rest = vec![];
    for (i, &l) in literals.iter().enumerate() {
        let dominated = literals.iter().enumerate().any(|(j, &m)| {
            i != j
                && env
                    .ordering
                    .compare_literals(&env.store, &env.sig, l, m)
                    == Comparison::Less
        });
        if dominated {
            rest.push(l);
        } else {
            selected.push(l);
        }
    }
    let count = selected.len();
    selected.extend(rest);
    (selected, count)
}
