//! Passive clause containers: age/weight priority queues with an `a : w`
//! alternation, optional predicate-split layering, and the
//! limited-resource-strategy machinery that discards clauses the run will
//! never get to.

use std::collections::BTreeSet;

use tracing::debug;

use saturn_ir::{ClauseId, TermData, TermId};

use crate::env::Env;
use crate::options::{PredicateSplit, SplitFeature};

/// Current LRS limits. A clause "fulfils" the limits if it can still be
/// reached through either queue.
#[derive(Copy, Clone, Debug, Default)]
pub struct Limits {
    pub age: Option<u32>,
    pub weight: Option<u32>,
}

impl Limits {
    /// Whether a clause with this age and weight can still be selected.
    pub fn admits(&self, age: u32, weight: u32) -> bool {
        let age_ok = self.age.map_or(true, |limit| age <= limit);
        let weight_ok = self.weight.map_or(true, |limit| weight <= limit);
        age_ok || weight_ok
    }

    pub fn any(&self) -> bool {
        self.age.is_some() || self.weight.is_some()
    }
}

/// One age/weight queue pair. Ordered sets keyed by `(key, id)` give
/// deterministic pops with clause-id tie-breaks and exact removal.
struct AwQueue {
    by_age: BTreeSet<(u32, ClauseId)>,
    by_weight: BTreeSet<(u32, ClauseId)>,
    ratio: (u32, u32),
    age_budget: u32,
    weight_budget: u32,
}

impl AwQueue {
    fn new(ratio: (u32, u32)) -> AwQueue {
        // A 0:0 ratio would never pop anything; treat it as 1:1.
        let ratio = if ratio == (0, 0) { (1, 1) } else { ratio };
        AwQueue {
            by_age: BTreeSet::new(),
            by_weight: BTreeSet::new(),
            ratio,
            age_budget: ratio.0,
            weight_budget: ratio.1,
        }
    }

    fn add(&mut self, age: u32, weight: u32, id: ClauseId) {
        self.by_age.insert((age, id));
        self.by_weight.insert((weight, id));
    }

    fn remove(&mut self, age: u32, weight: u32, id: ClauseId) -> bool {
        let a = self.by_age.remove(&(age, id));
        let w = self.by_weight.remove(&(weight, id));
        debug_assert_eq!(a, w);
        a
    }

    fn is_empty(&self) -> bool {
        self.by_age.is_empty()
    }

    fn len(&self) -> usize {
        self.by_age.len()
    }

    /// Pops the next clause according to the age/weight alternation.
    fn pop(&mut self, env: &Env) -> Option<ClauseId> {
        let by_age = if self.age_budget > 0 {
            self.age_budget -= 1;
            true
        } else if self.weight_budget > 0 {
            self.weight_budget -= 1;
            false
        } else {
            self.age_budget = self.ratio.0;
            self.weight_budget = self.ratio.1;
            return self.pop(env);
        };
        let id = if by_age {
            self.by_age.iter().next().map(|&(_, id)| id)
        } else {
            self.by_weight.iter().next().map(|&(_, id)| id)
        }?;
        let age = env.clauses[id].age();
        let weight = env.clauses[id].weight(&env.store);
        self.remove(age, weight, id);
        Some(id)
    }

    /// The pop order of the queue without consuming it: used by the LRS
    /// simulation.
    fn simulate(&self, budget: &mut u64, max_age: &mut u32, max_weight: &mut u32) {
        let mut ages = self.by_age.iter();
        let mut weights = self.by_weight.iter();
        let mut age_budget = self.age_budget;
        let mut weight_budget = self.weight_budget;
        // Simulation ignores interleaved removals, which only makes the
        // discovered limits conservative.
        while *budget > 0 {
            let by_age = if age_budget > 0 {
                age_budget -= 1;
                true
            } else if weight_budget > 0 {
                weight_budget -= 1;
                false
            } else {
                age_budget = self.ratio.0;
                weight_budget = self.ratio.1;
                continue;
            };
            let popped = if by_age {
                ages.next().map(|&(age, _)| {
                    *max_age = (*max_age).max(age);
                })
            } else {
                weights.next().map(|&(weight, _)| {
                    *max_weight = (*max_weight).max(weight);
                })
            };
            if popped.is_none() {
                return;
            }
            *budget -= 1;
        }
    }
}

/// The passive container: either a single age/weight queue or
/// predicate-split layers routed by a clause feature.
pub struct PassiveContainer {
    queues: Vec<AwQueue>,
    split: Option<PredicateSplit>,
    /// Round-robin balances between layers.
    layer_balances: Vec<u32>,
    limits: Limits,
    len: usize,
}

impl PassiveContainer {
    pub fn new(ratio: (u32, u32), split: Option<PredicateSplit>) -> PassiveContainer {
        let queues = match &split {
            None => vec![AwQueue::new(ratio)],
            Some(s) => {
                debug_assert_eq!(s.cutoffs.len(), s.ratios.len());
                s.cutoffs.iter().map(|_| AwQueue::new(ratio)).collect()
            }
        };
        let layer_balances = match &split {
            None => vec![],
            Some(s) => s.ratios.clone(),
        };
        PassiveContainer {
            queues,
            split,
            layer_balances,
            limits: Limits::default(),
            len: 0,
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn len(&self) -> usize {
        self.len
    }

    fn queue_of(&self, env: &Env, id: ClauseId) -> usize {
        let Some(split) = &self.split else { return 0 };
        let feature = evaluate_feature(env, id, split.feature);
        split
            .cutoffs
            .iter()
            .position(|&cutoff| feature <= cutoff)
            .unwrap_or(split.cutoffs.len() - 1)
    }

    pub fn add(&mut self, env: &Env, id: ClauseId) {
        let q = self.queue_of(env, id);
        let age = env.clauses[id].age();
        let weight = env.clauses[id].weight(&env.store);
        self.queues[q].add(age, weight, id);
        self.len += 1;
    }

    pub fn remove(&mut self, env: &Env, id: ClauseId) -> bool {
        let q = self.queue_of(env, id);
        let age = env.clauses[id].age();
        let weight = env.clauses[id].weight(&env.store);
        let removed = self.queues[q].remove(age, weight, id);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Pops the next given clause.
    pub fn pop_selected(&mut self, env: &Env) -> Option<ClauseId> {
        if self.len == 0 {
            return None;
        }
        let picked = match &self.split {
            None => self.queues[0].pop(env),
            Some(split) => {
                // Weighted round-robin over the non-empty layers.
                let mut picked = None;
                for _ in 0..self.queues.len() {
                    let q = self
                        .layer_balances
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| !self.queues[*i].is_empty())
                        .max_by_key(|(i, &b)| (b, std::cmp::Reverse(*i)))
                        .map(|(i, _)| i);
                    let Some(q) = q else { break };
                    if let Some(id) = self.queues[q].pop(env) {
                        self.layer_balances[q] = self.layer_balances[q].saturating_sub(1);
                        if self.layer_balances.iter().all(|&b| b == 0) {
                            self.layer_balances
                                .copy_from_slice(&split.ratios);
                        }
                        picked = Some(id);
                        break;
                    }
                }
                picked
            }
        };
        if picked.is_some() {
            self.len -= 1;
        }
        picked
    }

    /// Simulates selection for `budget` pops, tightens the age/weight
    /// limits to what the simulation could still reach, and returns the
    /// clauses past the horizon, which the driver discards.
    pub fn set_limits_from_simulation(&mut self, env: &Env, budget: u64) -> Vec<ClauseId> {
        if budget == 0 || self.len as u64 <= budget {
            return vec![];
        }
        let mut max_age = 0;
        let mut max_weight = 0;
        for queue in &self.queues {
            let mut share = budget / self.queues.len() as u64;
            if share == 0 {
                share = 1;
            }
            queue.simulate(&mut share, &mut max_age, &mut max_weight);
        }
        let tightened = Limits {
            age: Some(max_age),
            weight: Some(max_weight),
        };
        debug!(?tightened, "limits from simulation");
        self.limits = tightened;

        let mut evicted = vec![];
        for queue in &mut self.queues {
            let doomed: Vec<(u32, ClauseId)> = queue
                .by_age
                .iter()
                .copied()
                .filter(|&(age, id)| {
                    let weight = env.clauses[id].weight(&env.store);
                    !tightened.admits(age, weight)
                })
                .collect();
            for (age, id) in doomed {
                let weight = env.clauses[id].weight(&env.store);
                queue.remove(age, weight, id);
                evicted.push(id);
            }
        }
        self.len -= evicted.len();
        evicted
    }
}

fn term_has_interpreted(env: &Env, t: TermId) -> bool {
    match env.store.data(t) {
        TermData::Var(_) | TermData::SpecialVar(_) => false,
        TermData::App { functor, args } => {
            env.sig.function(*functor).interpreted.is_some()
                || args.iter().any(|&a| term_has_interpreted(env, a))
        }
    }
}

fn evaluate_feature(env: &Env, id: ClauseId, feature: SplitFeature) -> f32 {
    let clause = &env.clauses[id];
    match feature {
        SplitFeature::PositiveLiteralCount => clause.positive_literal_count(&env.store) as f32,
        SplitFeature::TheoryLiteralCount => {
            // Clauses that failed theory normalization stay out of the
            // theory-aware queues.
            if clause.is_not_normalizable() {
                return f32::INFINITY;
            }
            clause
                .literals()
                .iter()
                .filter(|&&l| {
                    env.store
                        .lit_args(l)
                        .iter()
                        .any(|&t| term_has_interpreted(env, t))
                })
                .count() as f32
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::options::Options;
    use saturn_ir::{Color, Inference, InputType, Signature, Sort};

    fn env_with_units(weights: &[usize]) -> (Env, Vec<ClauseId>) {
        let mut env = Env::new(Signature::new(), Options::default());
        let p = env.sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let f = env
            .sig
            .add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = env.sig.add_constant("a", Sort::INDIVIDUAL);
        let mut ids = vec![];
        for (age, &depth) in weights.iter().enumerate() {
            let mut t = env.store.constant(&env.sig, a);
            for _ in 0..depth {
                t = env.store.app(&env.sig, f, vec![t]);
            }
            let lit = env.store.literal(&env.sig, p, true, vec![t]);
            let id = env.clauses.create(
                vec![lit],
                age as u32,
                Color::Transparent,
                Inference::input(InputType::Axiom),
            );
            ids.push(id);
        }
        (env, ids)
    }

    #[test]
    fn alternates_between_age_and_weight() {
        // Ages 0,1,2 with weights decreasing: age order is ids[0..], the
        // weight order is reversed.
        let (env, ids) = env_with_units(&[4, 2, 0]);
        let mut passive = PassiveContainer::new((1, 1), None);
        for &id in &ids {
            passive.add(&env, id);
        }
        let first = passive.pop_selected(&env).unwrap();
        let second = passive.pop_selected(&env).unwrap();
        assert_eq!(first, ids[0]); // oldest
        assert_eq!(second, ids[2]); // lightest
    }

    #[test]
    fn pure_age_ratio_pops_in_age_order() {
        let (env, ids) = env_with_units(&[5, 3, 1]);
        let mut passive = PassiveContainer::new((1, 0), None);
        for &id in &ids {
            passive.add(&env, id);
        }
        assert_eq!(passive.pop_selected(&env), Some(ids[0]));
        assert_eq!(passive.pop_selected(&env), Some(ids[1]));
        assert_eq!(passive.pop_selected(&env), Some(ids[2]));
        assert_eq!(passive.pop_selected(&env), None);
    }

    #[test]
    fn removal_is_exact() {
        let (env, ids) = env_with_units(&[1, 2]);
        let mut passive = PassiveContainer::new((1, 1), None);
        for &id in &ids {
            passive.add(&env, id);
        }
        assert!(passive.remove(&env, ids[0]));
        assert!(!passive.remove(&env, ids[0]));
        assert_eq!(passive.pop_selected(&env), Some(ids[1]));
        assert!(passive.is_empty());
    }

    #[test]
    fn simulation_evicts_past_the_horizon() {
        let (env, ids) = env_with_units(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut passive = PassiveContainer::new((1, 1), None);
        for &id in &ids {
            passive.add(&env, id);
        }
        let evicted = passive.set_limits_from_simulation(&env, 2);
        assert!(passive.limits().any());
        assert!(!evicted.is_empty());
        assert_eq!(passive.len() + evicted.len(), ids.len());
        // Evicted clauses are exactly those admitted by neither limit.
        for id in &evicted {
            let age = env.clauses[*id].age();
            let weight = env.clauses[*id].weight(&env.store);
            assert!(!passive.limits().admits(age, weight));
        }
    }

    #[test]
    fn predicate_split_routes_by_feature() {
        let (mut env, _) = env_with_units(&[]);
        let q = env.sig.add_predicate("q", vec![]);
        let lq = env.store.literal(&env.sig, q, true, vec![]);
        let nq = env.store.literal(&env.sig, q, false, vec![]);
        // One clause with no positive literals, one with two.
        let c0 = env.clauses.create(
            vec![nq],
            0,
            Color::Transparent,
            Inference::input(InputType::Axiom),
        );
        let c2 = env.clauses.create(
            vec![lq, lq],
            0,
            Color::Transparent,
            Inference::input(InputType::Axiom),
        );
        let split = PredicateSplit {
            feature: SplitFeature::PositiveLiteralCount,
            cutoffs: vec![0.5, f32::INFINITY],
            ratios: vec![1, 1],
        };
        let mut passive = PassiveContainer::new((1, 1), Some(split));
        passive.add(&env, c0);
        passive.add(&env, c2);
        assert_eq!(passive.len(), 2);
        let mut popped = vec![
            passive.pop_selected(&env).unwrap(),
            passive.pop_selected(&env).unwrap(),
        ];
        popped.sort();
        assert_eq!(popped, vec![c0, c2]);
        assert!(passive.pop_selected(&env).is_none());
    }
}
