//! End-to-end saturation scenarios: refutations in group theory and
//! propositional logic, demodulation chains, interpreted arithmetic, and
//! satisfiable saturation.

use saturn_engine::{
    solve, Env, Options, SaturationAlgorithm, TerminationReason, UnificationIndexKind,
};
use saturn_ir::{InputType, LiteralId, Signature, Sort, TermId};

fn run(env: &mut Env, input: Vec<(Vec<LiteralId>, InputType)>) -> saturn_engine::SolveResult {
    let mut cancel = || false;
    solve(env, input, &mut cancel)
}

struct Group {
    env: Env,
    mul: saturn_ir::Functor,
    inv: saturn_ir::Functor,
    e: TermId,
}

impl Group {
    fn new(options: Options) -> Group {
        let mut sig = Signature::new();
        let e = sig.add_constant("e", Sort::INDIVIDUAL);
        let inv = sig.add_function("i", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let mul = sig.add_function("mul", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let mut env = Env::new(sig, options);
        let e = env.store.constant(&env.sig, e);
        Group { env, mul, inv, e }
    }

    fn mul(&mut self, a: TermId, b: TermId) -> TermId {
        self.env.store.app(&self.env.sig, self.mul, vec![a, b])
    }

    fn inv(&mut self, a: TermId) -> TermId {
        self.env.store.app(&self.env.sig, self.inv, vec![a])
    }

    fn eq(&mut self, polarity: bool, l: TermId, r: TermId) -> LiteralId {
        self.env.store.equality(&self.env.sig, polarity, l, r)
    }

    /// `e·x = x`, `i(x)·x = e`, `(x·y)·z = x·(y·z)`.
    fn axioms(&mut self) -> Vec<(Vec<LiteralId>, InputType)> {
        let x = self.env.store.var(0);
        let y = self.env.store.var(1);
        let z = self.env.store.var(2);

        let ex = self.mul(self.e, x);
        let left_identity = self.eq(true, ex, x);

        let ix = self.inv(x);
        let ixx = self.mul(ix, x);
        let left_inverse = self.eq(true, ixx, self.e);

        let xy = self.mul(x, y);
        let xy_z = self.mul(xy, z);
        let yz = self.mul(y, z);
        let x_yz = self.mul(x, yz);
        let associativity = self.eq(true, xy_z, x_yz);

        vec![
            (vec![left_identity], InputType::Axiom),
            (vec![left_inverse], InputType::Axiom),
            (vec![associativity], InputType::Axiom),
        ]
    }
}

#[test]
fn group_inverse_uniqueness() {
    // x·y = e ⊢ i(x) = y, negated with Skolem constants a, b.
    let mut g = Group::new(Options {
        activation_limit: Some(1000),
        ..Options::default()
    });
    let mut input = g.axioms();
    let a = g.env.sig.add_constant("a", Sort::INDIVIDUAL);
    let b = g.env.sig.add_constant("b", Sort::INDIVIDUAL);
    let ca = g.env.store.constant(&g.env.sig, a);
    let cb = g.env.store.constant(&g.env.sig, b);
    let ab = g.mul(ca, cb);
    let hypothesis = g.eq(true, ab, g.e);
    let ia = g.inv(ca);
    let goal = g.eq(false, ia, cb);
    input.push((vec![hypothesis], InputType::NegatedConjecture));
    input.push((vec![goal], InputType::NegatedConjecture));

    let result = run(&mut g.env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
    let proof = result.proof.expect("refutation carries a proof");
    assert!(proof.steps.last().unwrap().literals.is_empty());
    // The proof is a DAG rooted in the empty clause: every parent appears
    // earlier in the topological order.
    for (i, step) in proof.steps.iter().enumerate() {
        for parent in &step.parents {
            assert!(proof.steps[..i].iter().any(|s| s.clause == *parent));
        }
    }
}

#[test]
fn group_inverse_uniqueness_with_fingerprint_index() {
    let mut g = Group::new(Options {
        activation_limit: Some(1000),
        unification_index: UnificationIndexKind::Fingerprint,
        ..Options::default()
    });
    let mut input = g.axioms();
    let a = g.env.sig.add_constant("a", Sort::INDIVIDUAL);
    let b = g.env.sig.add_constant("b", Sort::INDIVIDUAL);
    let ca = g.env.store.constant(&g.env.sig, a);
    let cb = g.env.store.constant(&g.env.sig, b);
    let ab = g.mul(ca, cb);
    let hypothesis = g.eq(true, ab, g.e);
    let ia = g.inv(ca);
    let goal = g.eq(false, ia, cb);
    input.push((vec![hypothesis], InputType::NegatedConjecture));
    input.push((vec![goal], InputType::NegatedConjecture));

    let result = run(&mut g.env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
}

#[test]
fn boolean_group_is_commutative() {
    // Adding x·x = e forces commutativity.
    let mut g = Group::new(Options {
        activation_limit: Some(20000),
        ..Options::default()
    });
    let mut input = g.axioms();
    let x = g.env.store.var(0);
    let xx = g.mul(x, x);
    let involution = g.eq(true, xx, g.e);
    input.push((vec![involution], InputType::Axiom));

    let a = g.env.sig.add_constant("a", Sort::INDIVIDUAL);
    let b = g.env.sig.add_constant("b", Sort::INDIVIDUAL);
    let ca = g.env.store.constant(&g.env.sig, a);
    let cb = g.env.store.constant(&g.env.sig, b);
    let ab = g.mul(ca, cb);
    let ba = g.mul(cb, ca);
    let goal = g.eq(false, ab, ba);
    input.push((vec![goal], InputType::NegatedConjecture));

    let result = run(&mut g.env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
}

#[test]
fn equality_chain_refutes_by_demodulation() {
    let mut sig = Signature::new();
    let consts: Vec<_> = ["a", "b", "c", "d", "e5"]
        .iter()
        .map(|n| sig.add_constant(n, Sort::INDIVIDUAL))
        .collect();
    let mut env = Env::new(
        sig,
        Options {
            activation_limit: Some(100),
            ..Options::default()
        },
    );
    let terms: Vec<TermId> = consts
        .iter()
        .map(|&c| env.store.constant(&env.sig, c))
        .collect();
    let mut input = vec![];
    for w in terms.windows(2) {
        let eq = env.store.equality(&env.sig, true, w[0], w[1]);
        input.push((vec![eq], InputType::Axiom));
    }
    let goal = env.store.equality(&env.sig, false, terms[0], terms[4]);
    input.push((vec![goal], InputType::NegatedConjecture));

    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
    // The goal literal is rewritten down the chain; the equalities among
    // themselves may demodulate a little, too.
    assert!(env.stats.forward_demodulations >= 1);
    assert_eq!(env.stats.resolutions, 0);
}

#[test]
fn propositional_resolution_refutation() {
    let mut sig = Signature::new();
    let p = sig.add_predicate("p", vec![]);
    let q = sig.add_predicate("q", vec![]);
    let r = sig.add_predicate("r", vec![]);
    let mut env = Env::new(
        sig,
        Options {
            activation_limit: Some(100),
            ..Options::default()
        },
    );
    let lp = env.store.literal(&env.sig, p, true, vec![]);
    let np = env.store.literal(&env.sig, p, false, vec![]);
    let lq = env.store.literal(&env.sig, q, true, vec![]);
    let nq = env.store.literal(&env.sig, q, false, vec![]);
    let lr = env.store.literal(&env.sig, r, true, vec![]);
    let nr = env.store.literal(&env.sig, r, false, vec![]);
    let input = vec![
        (vec![lp, lq], InputType::Axiom),
        (vec![np, lr], InputType::Axiom),
        (vec![nq, lr], InputType::Axiom),
        (vec![nr], InputType::NegatedConjecture),
    ];
    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
    assert_eq!(env.stats.resolutions, 4);
    assert_eq!(env.stats.superpositions, 0);
}

#[test]
fn ground_arithmetic_refutes_by_evaluation() {
    let mut env = Env::new(
        Signature::new(),
        Options {
            activation_limit: Some(100),
            ..Options::default()
        },
    );
    let one = env.sig.integer_constant(1);
    let two = env.sig.integer_constant(2);
    let zero = env.sig.integer_constant(0);
    let sum = env.sig.sum();
    let c1 = env.store.constant(&env.sig, one);
    let c2 = env.store.constant(&env.sig, two);
    let c0 = env.store.constant(&env.sig, zero);
    let x = env.store.var(0);
    let x_plus_0 = env.store.app(&env.sig, sum, vec![x, c0]);
    let one_plus_one = env.store.app(&env.sig, sum, vec![c1, c1]);

    let ax1 = env.store.equality(&env.sig, true, x_plus_0, x);
    let ax2 = env.store.equality(&env.sig, true, one_plus_one, c2);
    let goal = env.store.equality(&env.sig, false, one_plus_one, c2);
    let input = vec![
        (vec![ax1], InputType::Axiom),
        (vec![ax2], InputType::Axiom),
        (vec![goal], InputType::NegatedConjecture),
    ];
    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
}

#[test]
fn generating_closure_does_not_duplicate_instances() {
    // p(a), ∀x. p(x) → p(f(x)): satisfiable, saturation never ends.
    let mut sig = Signature::new();
    let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
    let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
    let a = sig.add_constant("a", Sort::INDIVIDUAL);
    let mut env = Env::new(
        sig,
        Options {
            activation_limit: Some(25),
            ..Options::default()
        },
    );
    let ca = env.store.constant(&env.sig, a);
    let x = env.store.var(0);
    let fx = env.store.app(&env.sig, f, vec![x]);
    let pa = env.store.literal(&env.sig, p, true, vec![ca]);
    let px = env.store.literal(&env.sig, p, false, vec![x]);
    let pfx = env.store.literal(&env.sig, p, true, vec![fx]);
    let input = vec![
        (vec![pa], InputType::Axiom),
        (vec![px, pfx], InputType::Axiom),
    ];
    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::ResourceOut);
    // One fresh instance per activation; re-derived ground instances
    // would push `generated` past the activation count.
    assert!(env.stats.generated <= env.stats.activations);
}

#[test]
fn empty_clause_input_refutes_immediately() {
    let sig = Signature::new();
    let mut env = Env::new(sig, Options::default());
    let result = run(&mut env, vec![(vec![], InputType::Axiom)]);
    assert_eq!(result.termination, TerminationReason::Refutation);
    assert_eq!(env.stats.activations, 0);
}

#[test]
fn single_tautology_saturates_as_satisfiable() {
    let mut sig = Signature::new();
    let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
    let mut env = Env::new(sig, Options::default());
    let x = env.store.var(0);
    let pos = env.store.literal(&env.sig, p, true, vec![x]);
    let neg = env.store.literal(&env.sig, p, false, vec![x]);
    let result = run(&mut env, vec![(vec![pos, neg], InputType::Axiom)]);
    assert_eq!(result.termination, TerminationReason::Satisfiable);
    assert_eq!(env.stats.tautologies_deleted, 1);
}

#[test]
fn inferenceless_unit_reaches_active_and_saturates() {
    let mut sig = Signature::new();
    let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
    let a = sig.add_constant("a", Sort::INDIVIDUAL);
    let mut env = Env::new(sig, Options::default());
    let ca = env.store.constant(&env.sig, a);
    let pa = env.store.literal(&env.sig, p, true, vec![ca]);
    let result = run(&mut env, vec![(vec![pa], InputType::Axiom)]);
    assert_eq!(result.termination, TerminationReason::Satisfiable);
    assert_eq!(env.stats.activations, 1);
}

#[test]
fn discount_also_refutes_the_chain() {
    let mut sig = Signature::new();
    let a = sig.add_constant("a", Sort::INDIVIDUAL);
    let b = sig.add_constant("b", Sort::INDIVIDUAL);
    let mut env = Env::new(
        sig,
        Options {
            saturation_algorithm: SaturationAlgorithm::Discount,
            activation_limit: Some(100),
            ..Options::default()
        },
    );
    let ca = env.store.constant(&env.sig, a);
    let cb = env.store.constant(&env.sig, b);
    let ab = env.store.equality(&env.sig, true, ca, cb);
    let goal = env.store.equality(&env.sig, false, ca, cb);
    let input = vec![
        (vec![ab], InputType::Axiom),
        (vec![goal], InputType::NegatedConjecture),
    ];
    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
}

#[test]
fn factoring_and_equality_resolution_feed_the_refutation() {
    // f(x) ≈ a ∨ f(x) ≈ b is factored when activated; g(x) ≉ g(c) ∨ p(x)
    // is discharged by equality resolution into p(c), which then refutes
    // ¬p(c).
    let mut sig = Signature::new();
    let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
    let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
    let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
    let a = sig.add_constant("a", Sort::INDIVIDUAL);
    let b = sig.add_constant("b", Sort::INDIVIDUAL);
    let c = sig.add_constant("c", Sort::INDIVIDUAL);
    let mut env = Env::new(
        sig,
        Options {
            activation_limit: Some(200),
            ..Options::default()
        },
    );
    let ca = env.store.constant(&env.sig, a);
    let cb = env.store.constant(&env.sig, b);
    let cc = env.store.constant(&env.sig, c);
    let x = env.store.var(0);
    let fx = env.store.app(&env.sig, f, vec![x]);
    let gx = env.store.app(&env.sig, g, vec![x]);
    let gc = env.store.app(&env.sig, g, vec![cc]);

    let l1 = env.store.equality(&env.sig, true, fx, ca);
    let l2 = env.store.equality(&env.sig, true, fx, cb);
    let l3 = env.store.equality(&env.sig, false, gx, gc);
    let px = env.store.literal(&env.sig, p, true, vec![x]);
    let npc = env.store.literal(&env.sig, p, false, vec![cc]);

    let input = vec![
        (vec![l1, l2], InputType::Axiom),
        (vec![l3, px], InputType::Axiom),
        (vec![npc], InputType::NegatedConjecture),
    ];
    let result = run(&mut env, input);
    assert_eq!(result.termination, TerminationReason::Refutation);
    assert!(env.stats.equality_factorings > 0);
    assert!(env.stats.equality_resolutions > 0);
}

#[test]
fn instgen_is_inapplicable() {
    let sig = Signature::new();
    let mut env = Env::new(
        sig,
        Options {
            saturation_algorithm: SaturationAlgorithm::InstGen,
            ..Options::default()
        },
    );
    let result = run(&mut env, vec![]);
    assert_eq!(result.termination, TerminationReason::Inapplicable);
}
