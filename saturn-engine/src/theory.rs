//! Interpreted evaluation: normalizes ground integer arithmetic inside
//! literals with checked operations. Overflow abandons the current
//! simplification and marks the clause as not normalizable, keeping it out
//! of the theory-aware queues.

use saturn_ir::{Interpreted, LiteralId, TermData, TermId};

use crate::env::Env;

/// Arithmetic overflow during normalization.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Overflow;

/// Outcome of evaluating a single literal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LitEval {
    Unchanged,
    Changed(LiteralId),
    /// The literal is valid; the clause is a tautology.
    True,
    /// The literal is unsatisfiable; drop it from the clause.
    False,
}

fn as_int_constant(env: &Env, t: TermId) -> Option<i64> {
    let (functor, args) = env.store.as_app(t)?;
    if !args.is_empty() {
        return None;
    }
    match env.sig.function(functor).interpreted {
        Some(Interpreted::IntConstant(n)) => Some(n),
        _ => None,
    }
}

fn evaluate_term(env: &mut Env, t: TermId) -> Result<TermId, Overflow> {
    let TermData::App { functor, args } = env.store.data(t) else {
        return Ok(t);
    };
    let functor = *functor;
    let args = args.clone();
    let new_args: Vec<TermId> = args
        .iter()
        .map(|&a| evaluate_term(env, a))
        .collect::<Result<_, _>>()?;

    let interpreted = env.sig.function(functor).interpreted;
    let folded = match interpreted {
        Some(Interpreted::Sum) => {
            match (as_int_constant(env, new_args[0]), as_int_constant(env, new_args[1])) {
                (Some(a), Some(b)) => Some(a.checked_add(b).ok_or(Overflow)?),
                _ => None,
            }
        }
        Some(Interpreted::Product) => {
            match (as_int_constant(env, new_args[0]), as_int_constant(env, new_args[1])) {
                (Some(a), Some(b)) => Some(a.checked_mul(b).ok_or(Overflow)?),
                _ => None,
            }
        }
        Some(Interpreted::UnaryMinus) => match as_int_constant(env, new_args[0]) {
            Some(a) => Some(a.checked_neg().ok_or(Overflow)?),
            _ => None,
        },
        _ => None,
    };
    match folded {
        Some(n) => {
            let c = env.sig.integer_constant(n);
            Ok(env.store.constant(&env.sig, c))
        }
        None => Ok(env.store.app(&env.sig, functor, new_args)),
    }
}

/// Evaluates the interpreted parts of a literal. Equalities between
/// distinct numerals decide the literal outright.
pub fn evaluate_literal(env: &mut Env, lit: LiteralId) -> Result<LitEval, Overflow> {
    let args: Vec<TermId> = env.store.lit_args(lit).to_vec();
    let new_args: Vec<TermId> = args
        .iter()
        .map(|&a| evaluate_term(env, a))
        .collect::<Result<_, _>>()?;

    if env.store.lit_is_equality(lit) {
        let polarity = env.store.lit_polarity(lit);
        if new_args[0] == new_args[1] {
            return Ok(if polarity { LitEval::True } else { LitEval::False });
        }
        if let (Some(a), Some(b)) = (
            as_int_constant(env, new_args[0]),
            as_int_constant(env, new_args[1]),
        ) {
            debug_assert_ne!(a, b);
            return Ok(if polarity { LitEval::False } else { LitEval::True });
        }
    }
    if new_args == args {
        return Ok(LitEval::Unchanged);
    }
    let header = env.store.lit_header(lit);
    let changed = env
        .store
        .literal(&env.sig, header.predicate(), header.polarity(), new_args);
    Ok(LitEval::Changed(changed))
}
