//! The options record consumed by [`solve`](crate::saturation::solve).
//!
//! Everything is a plain enum with a sensible default; a caller builds the
//! record once and hands it to the solver. Options that gate machinery
//! outside this core (`unification_with_abstraction`, `reducibility_check`,
//! the `InstGen` algorithm) are enumerated for interface fidelity; selecting
//! them makes the solver report `Inapplicable` rather than silently
//! ignoring the request.

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SaturationAlgorithm {
    Otter,
    Discount,
    Lrs,
    InstGen,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LiteralSelector {
    /// Every literal is selected.
    Total,
    /// Only maximal literals under the ordering.
    MaximalOnly,
    /// A single negative literal when one exists, maximal literals
    /// otherwise. Complete for the superposition calculus.
    CompleteSelection,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DemodulationMode {
    Off,
    All,
    /// Only demodulators whose orientation is fixed without looking at
    /// the matching substitution.
    Preordered,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnificationIndexKind {
    SubstitutionTree,
    Fingerprint,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DemodulationRedundancyCheck {
    Off,
    /// The encompassment variant: a rewrite at the top of a positive
    /// unit equality is fine whenever the matcher is a proper instance.
    Encompass,
    On,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnificationWithAbstraction {
    Off,
    Interpreted,
    OneSideInterpreted,
    Constant,
    All,
    Ground,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReducibilityCheck {
    Off,
    LeftmostInnermost,
    Smaller,
    SmallerGround,
}

/// Which clause feature routes into the layered passive queues.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SplitFeature {
    PositiveLiteralCount,
    TheoryLiteralCount,
}

#[derive(Clone, Debug)]
pub struct PredicateSplit {
    pub feature: SplitFeature,
    /// A clause goes to the first queue whose cutoff its feature value
    /// does not exceed; the last cutoff should be `f32::INFINITY`.
    pub cutoffs: Vec<f32>,
    /// Relative pop ratios between the queues.
    pub ratios: Vec<u32>,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub saturation_algorithm: SaturationAlgorithm,
    /// `a : w`: alternate between `a` pops by age and `w` pops by weight.
    pub age_weight_ratio: (u32, u32),
    pub time_limit_deciseconds: Option<u64>,
    /// Hard cap on given-clause iterations; `None` means unbounded.
    pub activation_limit: Option<u64>,
    pub literal_selector: LiteralSelector,
    pub forward_demodulation: DemodulationMode,
    pub backward_demodulation: DemodulationMode,
    pub unification_index: UnificationIndexKind,
    pub demodulation_redundancy_check: DemodulationRedundancyCheck,
    pub conditional_redundancy_check: bool,
    pub unification_with_abstraction: UnificationWithAbstraction,
    pub reducibility_check: ReducibilityCheck,
    pub predicate_split: Option<PredicateSplit>,
    /// Run the LRS limit simulation every this many activations.
    pub lrs_period: u64,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            saturation_algorithm: SaturationAlgorithm::Lrs,
            age_weight_ratio: (1, 1),
            time_limit_deciseconds: None,
            activation_limit: None,
            literal_selector: LiteralSelector::CompleteSelection,
            forward_demodulation: DemodulationMode::All,
            backward_demodulation: DemodulationMode::All,
            unification_index: UnificationIndexKind::SubstitutionTree,
            demodulation_redundancy_check: DemodulationRedundancyCheck::Encompass,
            conditional_redundancy_check: true,
            unification_with_abstraction: UnificationWithAbstraction::Off,
            reducibility_check: ReducibilityCheck::Off,
            predicate_split: None,
            lrs_period: 64,
        }
    }
}
