//! Per-rule counters, returned with every solve result.

#[derive(Clone, Debug, Default)]
pub struct Statistics {
    pub input_clauses: u64,
    pub activations: u64,
    pub generated: u64,
    pub superpositions: u64,
    pub resolutions: u64,
    pub equality_factorings: u64,
    pub equality_resolutions: u64,
    pub forward_demodulations: u64,
    pub forward_demodulations_to_tautology: u64,
    pub backward_demodulations: u64,
    pub evaluations: u64,
    pub duplicate_literals_removed: u64,
    pub trivial_inequalities_removed: u64,
    pub tautologies_deleted: u64,
    pub forward_subsumed: u64,
    pub inferences_skipped_due_to_colors: u64,
    pub inferences_skipped_as_redundant: u64,
    pub inferences_aborted_by_limits: u64,
    pub lrs_evicted: u64,
    pub not_normalizable: u64,
}
