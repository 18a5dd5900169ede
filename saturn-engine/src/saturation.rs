//! The given-clause saturation loop.
//!
//! Three containers: newly derived clauses sit in *unprocessed* until
//! immediate simplification lets them into *passive*; selection pops a
//! given clause, simplifies it forward, activates it (literal selection +
//! registration in every index), simplifies the *active* set backward with
//! it, and asks the generating engines for conclusions, which cycle back
//! into unprocessed.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, info};

use saturn_ir::{
    ClauseId, Color, Comparison, Inference, InputType, LiteralId, Rule, Store,
};

use saturn_index::fingerprint::TermFingerprintIndex;
use saturn_index::subst_tree::RetrievalMode;
use saturn_index::term_index::{
    DemodulationLhsIndex, LiteralSubstTreeIndex, TermSubstTreeIndex, UnificationIndex,
};

use crate::demodulation::{backward_demodulate, forward_demodulate, ForwardDemodulation};
use crate::env::Env;
use crate::options::{
    ReducibilityCheck, SaturationAlgorithm, UnificationIndexKind, UnificationWithAbstraction,
};
use crate::passive::PassiveContainer;
use crate::redundancy::ConditionalRedundancyHandler;
use crate::resolution::{binary_resolution, equality_factoring, equality_resolution};
use crate::selection::select;
use crate::simplify::{immediate_simplify, Immediate};
use crate::superposition::{
    backward_superposition, forward_superposition, rewritable_subterms, superposition_lhs_sides,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TerminationReason {
    Refutation,
    Satisfiable,
    ResourceOut,
    Inapplicable,
    Unknown,
}

#[derive(Clone, Debug)]
pub struct ProofStep {
    pub clause: ClauseId,
    pub rule: Rule,
    pub parents: Vec<ClauseId>,
    pub literals: Vec<LiteralId>,
}

/// The refutation: a DAG of clauses in topological order, the empty clause
/// last.
#[derive(Clone, Debug)]
pub struct Proof {
    pub steps: Vec<ProofStep>,
}

pub struct SolveResult {
    pub termination: TerminationReason,
    pub proof: Option<Proof>,
}

/// Runs the saturation loop over `input` until refutation, saturation or
/// resource exhaustion. `cancel` is polled between given-clause
/// iterations.
pub fn solve(
    env: &mut Env,
    input: Vec<(Vec<LiteralId>, InputType)>,
    cancel: &mut dyn FnMut() -> bool,
) -> SolveResult {
    if env.options.saturation_algorithm == SaturationAlgorithm::InstGen
        || env.options.unification_with_abstraction != UnificationWithAbstraction::Off
        || env.options.reducibility_check != ReducibilityCheck::Off
    {
        // These gate machinery outside this core.
        return SolveResult {
            termination: TerminationReason::Inapplicable,
            proof: None,
        };
    }

    let subterm_index = match env.options.unification_index {
        UnificationIndexKind::SubstitutionTree => UnificationIndex::Tree(TermSubstTreeIndex::new()),
        UnificationIndexKind::Fingerprint => {
            UnificationIndex::Fingerprint(TermFingerprintIndex::new())
        }
    };
    let mut prover = Prover {
        passive: PassiveContainer::new(
            env.options.age_weight_ratio,
            env.options.predicate_split.clone(),
        ),
        unprocessed: VecDeque::new(),
        lhs_index: TermSubstTreeIndex::new(),
        subterm_index,
        demod_subterm_index: TermSubstTreeIndex::new(),
        demod_lhs_index: DemodulationLhsIndex::new(),
        resolution_index: LiteralSubstTreeIndex::new(),
        unit_index: LiteralSubstTreeIndex::new(),
        redundancy: ConditionalRedundancyHandler::new(env.options.conditional_redundancy_check),
        env,
        start: Instant::now(),
    };

    for (literals, kind) in input {
        let id = prover.env.clauses.create(
            literals,
            0,
            Color::Transparent,
            Inference::input(kind),
        );
        prover.env.stats.input_clauses += 1;
        prover.unprocessed.push_back(id);
    }
    prover.saturate(cancel)
}

enum ForwardSimplification {
    Kept,
    Subsumed,
    Rewritten(ClauseId),
}

struct Prover<'e> {
    env: &'e mut Env,
    passive: PassiveContainer,
    unprocessed: VecDeque<ClauseId>,
    /// Left-hand sides of selected positive equalities of active clauses.
    lhs_index: TermSubstTreeIndex,
    /// Rewritable subterms of selected literals of active clauses
    /// (backward superposition targets).
    subterm_index: UnificationIndex,
    /// All non-variable subterms of active clauses (backward demodulation
    /// targets).
    demod_subterm_index: TermSubstTreeIndex,
    /// Oriented unit equations of active clauses.
    demod_lhs_index: DemodulationLhsIndex,
    /// Selected non-equational literals of active clauses.
    resolution_index: LiteralSubstTreeIndex,
    /// Literals of active unit clauses, for unit subsumption.
    unit_index: LiteralSubstTreeIndex,
    redundancy: ConditionalRedundancyHandler,
    start: Instant,
}

impl<'e> Prover<'e> {
    fn saturate(&mut self, cancel: &mut dyn FnMut() -> bool) -> SolveResult {
        loop {
            if let Some(result) = self.drain_unprocessed() {
                return result;
            }
            if self.passive.is_empty() {
                return self.saturated();
            }
            if cancel() || self.out_of_resources() {
                return SolveResult {
                    termination: TerminationReason::ResourceOut,
                    proof: None,
                };
            }

            let given = self
                .passive
                .pop_selected(self.env)
                .expect("nonempty passive container");
            self.env.clauses.transition(given, Store::Selected);
            self.env.stats.activations += 1;
            debug!(?given, "given clause");

            if self.env.options.saturation_algorithm == SaturationAlgorithm::Lrs
                && self.env.stats.activations % self.env.options.lrs_period.max(1) == 0
            {
                self.update_limits();
            }

            match self.forward_simplify(given) {
                ForwardSimplification::Subsumed => {
                    self.env.clauses.transition(given, Store::None);
                    continue;
                }
                ForwardSimplification::Rewritten(replacement) => {
                    self.env.clauses.transition(given, Store::None);
                    self.unprocessed.push_back(replacement);
                    continue;
                }
                ForwardSimplification::Kept => {}
            }

            self.activate(given);
            self.backward_simplify(given);
            self.generate(given);
        }
    }

    /// Immediate simplification of the unprocessed queue; survivors enter
    /// passive. Returns early with a refutation when the empty clause
    /// appears.
    fn drain_unprocessed(&mut self) -> Option<SolveResult> {
        while let Some(c) = self.unprocessed.pop_front() {
            match immediate_simplify(self.env, c) {
                Immediate::Tautology => {
                    self.env.clauses.transition(c, Store::None);
                }
                Immediate::Replaced(replacement) => {
                    self.env.clauses.transition(c, Store::None);
                    self.unprocessed.push_back(replacement);
                }
                Immediate::Keep => {
                    if self.env.clauses[c].is_empty() {
                        let proof = extract_proof(self.env, c);
                        return Some(SolveResult {
                            termination: TerminationReason::Refutation,
                            proof: Some(proof),
                        });
                    }
                    // Otter-style algorithms simplify forward on entry;
                    // Discount defers everything to selection time.
                    if self.env.options.saturation_algorithm != SaturationAlgorithm::Discount {
                        match self.forward_simplify(c) {
                            ForwardSimplification::Subsumed => {
                                self.env.clauses.transition(c, Store::None);
                                continue;
                            }
                            ForwardSimplification::Rewritten(replacement) => {
                                self.env.clauses.transition(c, Store::None);
                                self.unprocessed.push_back(replacement);
                                continue;
                            }
                            ForwardSimplification::Kept => {}
                        }
                    }
                    self.passive.add(self.env, c);
                    self.env.clauses.transition(c, Store::Passive);
                }
            }
        }
        None
    }

    fn saturated(&self) -> SolveResult {
        // Evictions and limit aborts lose completeness: an empty passive
        // set then says nothing about satisfiability.
        let complete = self.env.stats.lrs_evicted == 0
            && self.env.stats.inferences_aborted_by_limits == 0;
        info!(complete, "saturated");
        SolveResult {
            termination: if complete {
                TerminationReason::Satisfiable
            } else {
                TerminationReason::Unknown
            },
            proof: None,
        }
    }

    fn out_of_resources(&self) -> bool {
        if let Some(limit) = self.env.options.activation_limit {
            if self.env.stats.activations >= limit {
                return true;
            }
        }
        if let Some(limit_ds) = self.env.options.time_limit_deciseconds {
            let elapsed_ds = self.start.elapsed().as_millis() as u64 / 100;
            if elapsed_ds >= limit_ds {
                return true;
            }
        }
        false
    }

    /// Estimates how many more clauses this run can still select and
    /// tightens the passive limits accordingly.
    fn update_limits(&mut self) {
        let budget = if let Some(limit) = self.env.options.activation_limit {
            limit.saturating_sub(self.env.stats.activations)
        } else if let Some(limit_ds) = self.env.options.time_limit_deciseconds {
            let elapsed_ds = (self.start.elapsed().as_millis() as u64 / 100).max(1);
            let remaining_ds = limit_ds.saturating_sub(elapsed_ds);
            self.env.stats.activations * remaining_ds / elapsed_ds
        } else {
            return;
        };
        let evicted = self.passive.set_limits_from_simulation(self.env, budget);
        self.env.stats.lrs_evicted += evicted.len() as u64;
        for id in evicted {
            self.env.clauses.transition(id, Store::None);
        }
    }

    /// Forward simplification: unit subsumption, then demodulation.
    fn forward_simplify(&mut self, clause: ClauseId) -> ForwardSimplification {
        let literals: Vec<LiteralId> = self.env.clauses[clause].literals().to_vec();
        for &lit in &literals {
            let mut it =
                self.unit_index
                    .retrieve(&self.env.store, lit, false, RetrievalMode::Generalizations);
            while let Some(leaf) = it.next(&self.env.store) {
                if leaf.clause != clause {
                    self.env.stats.forward_subsumed += 1;
                    return ForwardSimplification::Subsumed;
                }
            }
        }
        match forward_demodulate(self.env, &self.demod_lhs_index, clause) {
            ForwardDemodulation::None => ForwardSimplification::Kept,
            ForwardDemodulation::Deleted { .. } => ForwardSimplification::Subsumed,
            ForwardDemodulation::Rewritten { replacement, .. } => {
                ForwardSimplification::Rewritten(replacement)
            }
        }
    }

    /// Fixes the selection and registers the clause in every index its
    /// literals key into.
    fn activate(&mut self, given: ClauseId) {
        let literals: Vec<LiteralId> = self.env.clauses[given].literals().to_vec();
        let (reordered, count) = select(self.env, &literals);
        self.env.clauses[given].set_selection(reordered, count);
        self.env.clauses.transition(given, Store::Active);
        self.index(given, true);
    }

    fn remove_active(&mut self, clause: ClauseId) {
        self.index(clause, false);
        self.redundancy.drop_clause(clause);
        self.env.clauses.transition(clause, Store::None);
    }

    /// Registers (or deregisters) an active clause in all indices. The
    /// key sets are recomputed from the clause, so removal mirrors
    /// insertion exactly.
    fn index(&mut self, clause: ClauseId, insert: bool) {
        let selected: Vec<LiteralId> = self.env.clauses[clause].selected_literals().to_vec();
        let all: Vec<LiteralId> = self.env.clauses[clause].literals().to_vec();

        for &lit in &selected {
            if self.env.store.lit_is_equality(lit) && self.env.store.lit_polarity(lit) {
                for (lhs, rhs) in superposition_lhs_sides(self.env, lit) {
                    if insert {
                        self.lhs_index.insert(
                            &mut self.env.store,
                            &self.env.sig,
                            lhs,
                            lit,
                            clause,
                            Some(rhs),
                        );
                    } else {
                        self.lhs_index.remove(
                            &mut self.env.store,
                            &self.env.sig,
                            lhs,
                            lit,
                            clause,
                            Some(rhs),
                        );
                    }
                }
            } else if !self.env.store.lit_is_equality(lit) {
                if insert {
                    self.resolution_index
                        .insert(&mut self.env.store, &self.env.sig, lit, clause);
                } else {
                    self.resolution_index
                        .remove(&mut self.env.store, &self.env.sig, lit, clause);
                }
            }
            for sub in rewritable_subterms(self.env, lit) {
                if insert {
                    self.subterm_index
                        .insert(&mut self.env.store, &self.env.sig, sub, lit, clause);
                } else {
                    self.subterm_index
                        .remove(&mut self.env.store, &self.env.sig, sub, lit, clause);
                }
            }
        }

        for &lit in &all {
            let subs: Vec<_> = self.env.store.lit_non_var_subterms(lit).collect();
            for sub in subs {
                if insert {
                    self.demod_subterm_index.insert(
                        &mut self.env.store,
                        &self.env.sig,
                        sub,
                        lit,
                        clause,
                        None,
                    );
                } else {
                    self.demod_subterm_index.remove(
                        &mut self.env.store,
                        &self.env.sig,
                        sub,
                        lit,
                        clause,
                        None,
                    );
                }
            }
        }

        if let [lit] = all[..] {
            if insert {
                self.unit_index
                    .insert(&mut self.env.store, &self.env.sig, lit, clause);
            } else {
                self.unit_index
                    .remove(&mut self.env.store, &self.env.sig, lit, clause);
            }
            if let Some(eq) = self.env.clauses[clause].as_unit_equality(&self.env.store) {
                for (lhs, rhs) in demodulator_sides(self.env, eq) {
                    if insert {
                        self.demod_lhs_index.insert(
                            &mut self.env.store,
                            &self.env.sig,
                            lhs,
                            rhs,
                            eq,
                            clause,
                        );
                    } else {
                        self.demod_lhs_index.remove(
                            &mut self.env.store,
                            &self.env.sig,
                            lhs,
                            rhs,
                            eq,
                            clause,
                        );
                    }
                }
            }
        }
    }

    /// Backward demodulation with the freshly activated clause: victims
    /// leave every index, their replacements cycle back to unprocessed.
    fn backward_simplify(&mut self, given: ClauseId) {
        let rewrites = backward_demodulate(self.env, &self.demod_subterm_index, given);
        for (victim, replacement) in rewrites {
            debug_assert_eq!(self.env.clauses[victim].store(), Store::Active);
            self.remove_active(victim);
            self.unprocessed.push_back(replacement);
        }
    }

    fn generate(&mut self, given: ClauseId) {
        let limits = self.passive.limits();
        let mut conclusions = vec![];
        conclusions.extend(forward_superposition(
            self.env,
            &self.lhs_index,
            &mut self.redundancy,
            limits,
            given,
        ));
        conclusions.extend(backward_superposition(
            self.env,
            &self.subterm_index,
            &mut self.redundancy,
            limits,
            given,
        ));
        conclusions.extend(binary_resolution(
            self.env,
            &self.resolution_index,
            &mut self.redundancy,
            limits,
            given,
        ));
        conclusions.extend(equality_factoring(self.env, limits, given));
        conclusions.extend(equality_resolution(self.env, limits, given));
        self.env.stats.generated += conclusions.len() as u64;
        self.unprocessed.extend(conclusions);
    }
}

/// Demodulator orientations worth indexing: the strictly greater side, or
/// both sides of an unorientable equation (the match-time ordering check
/// decides per instance).
fn demodulator_sides(env: &Env, eq: LiteralId) -> Vec<(saturn_ir::TermId, saturn_ir::TermId)> {
    let args = env.store.lit_args(eq);
    let (l, r) = (args[0], args[1]);
    let mut out = vec![];
    match env.ordering.equality_argument_order(&env.store, &env.sig, eq) {
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

/// Walks the inference records backward from the empty clause and lays the
/// used clauses out in topological order.
fn extract_proof(env: &Env, empty: ClauseId) -> Proof {
    let mut steps = vec![];
    let mut seen = rustc_hash::FxHashSet::default();
    let mut stack = vec![(empty, false)];
    while let Some((clause, expanded)) = stack.pop() {
        if expanded {
            steps.push(ProofStep {
                clause,
                rule: env.clauses[clause].inference().rule,
                parents: env.clauses[clause].inference().parents.clone(),
                literals: env.clauses[clause].literals().to_vec(),
            });
            continue;
        }
        if !seen.insert(clause) {
            continue;
        }
        stack.push((clause, true));
        for &parent in &env.clauses[clause].inference().parents {
            stack.push((parent, false));
        }
    }
    Proof { steps }
}
