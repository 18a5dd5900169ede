//! Immediate simplification, applied to every clause before it enters
//! passive: interpreted evaluation, trivial-inequality and duplicate
//! literal removal, tautology deletion.

use rustc_hash::FxHashSet;

use saturn_ir::{ClauseId, Inference, LiteralId, Rule};

use crate::env::Env;
use crate::theory::{evaluate_literal, LitEval};

pub enum Immediate {
    Keep,
    /// The clause is valid and may be discarded.
    Tautology,
    /// The clause was replaced by a simpler one.
    Replaced(ClauseId),
}

pub fn immediate_simplify(env: &mut Env, id: ClauseId) -> Immediate {
    let literals: Vec<LiteralId> = env.clauses[id].literals().to_vec();
    let mut out: Vec<LiteralId> = vec![];
    let mut changed = false;
    let mut theory_changed = false;

    for &lit in &literals {
        let lit = match evaluate_literal(env, lit) {
            Ok(LitEval::Unchanged) => lit,
            Ok(LitEval::Changed(l)) => {
                env.stats.evaluations += 1;
                theory_changed = true;
                changed = true;
                l
            }
            Ok(LitEval::True) => {
                env.stats.evaluations += 1;
                return Immediate::Tautology;
            }
            Ok(LitEval::False) => {
                env.stats.evaluations += 1;
                theory_changed = true;
                changed = true;
                continue;
            }
            Err(_) => {
                // Overflow: the literal is kept as written and the clause
                // leaves the theory-aware queues.
                env.clauses[id].mark_not_normalizable();
                env.stats.not_normalizable += 1;
                lit
            }
        };

        // s ≈ s is valid, s ≉ s is unsatisfiable.
        if env.store.lit_is_equality(lit) {
            let args = env.store.lit_args(lit);
            if args[0] == args[1] {
                if env.store.lit_polarity(lit) {
                    env.stats.tautologies_deleted += 1;
                    return Immediate::Tautology;
                }
                env.stats.trivial_inequalities_removed += 1;
                changed = true;
                continue;
            }
        }

        if out.contains(&lit) {
            env.stats.duplicate_literals_removed += 1;
            changed = true;
            continue;
        }
        out.push(lit);
    }

    // p ∨ ¬p.
    let headers: FxHashSet<_> = out.iter().map(|&l| env.store.lit_header(l)).collect();
    for &lit in &out {
        let complement_header = env.store.lit_header(lit).complement();
        if headers.contains(&complement_header) {
            let args = env.store.lit_args(lit).to_vec();
            let complement = out.iter().any(|&m| {
                env.store.lit_header(m) == complement_header && env.store.lit_args(m) == args
            });
            if complement {
                env.stats.tautologies_deleted += 1;
                return Immediate::Tautology;
            }
        }
    }

    if !changed {
        return Immediate::Keep;
    }
    let rule = if theory_changed {
        Rule::Evaluation
    } else {
        Rule::TrivialityRemoval
    };
    let age = env.clauses[id].age();
    let color = env.clauses[id].color();
    let replacement = env
        .clauses
        .create(out, age, color, Inference::new(rule, vec![id]));
    Immediate::Replaced(replacement)
}
