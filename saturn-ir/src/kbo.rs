//! The Knuth–Bendix simplification ordering on terms and literals, and the
//! precompiled comparators used by the generating inferences.
//!
//! Ground comparison orders by total weight first and by precedence second;
//! the non-ground lifting adds the usual variable-occurrence conditions, so
//! `Greater` is stable under substitution. Comparison of two terms that a
//! superposition attempt will re-check under many substitutions is compiled
//! once into a small decision tree over (a) the sign of the weight-difference
//! polynomial and (b) residual term comparisons, and memoized for the rest
//! of the run.

use rustc_hash::FxHashMap;

use crate::interner::{LiteralId, TermData, TermId, TermStore};
use crate::signature::{Predicate, Signature};
use crate::subst::{Bank, RobSubstitution, TermSpec};

/// The outcome of an ordering comparison. The ordering is partial:
/// `Incomparable` is a real answer, not a failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Comparison {
    Greater,
    Less,
    Equal,
    Incomparable,
}

impl Comparison {
    pub fn reverse(self) -> Comparison {
        match self {
            Comparison::Greater => Comparison::Less,
            Comparison::Less => Comparison::Greater,
            other => other,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct NodeId(u32);

/// One node of a compiled comparator. The tree answers the single question
/// "is `sσ ≻ tσ`?"; branches that would have to tell `Less` from
/// `Incomparable` do not, both land in the not-greater answer.
enum Node {
    Result(bool),
    /// Sign test on the weight-difference polynomial
    /// `constant + Σ coeff · (w(xσ) − 1)`.
    Weight {
        constant: i64,
        coeffs: Vec<(u32, i64)>,
        gt: NodeId,
        eq: NodeId,
        ng: NodeId,
    },
    /// Residual full comparison, for shapes the tree cannot decide
    /// statically.
    Compare { s: TermId, t: TermId },
    /// Lexicographic argument comparison under an already-established
    /// weight tie; `pos_ok` is the syntactic variable condition of the
    /// enclosing pair.
    Lex {
        pairs: Vec<(TermId, TermId)>,
        pos_ok: bool,
    },
}

/// The ordering. Owns the append-only comparator cache for the run.
#[derive(Default)]
pub struct Kbo {
    nodes: Vec<Node>,
    roots: FxHashMap<(TermId, TermId), NodeId>,
}

fn var_counts(store: &TermStore, t: TermId, counts: &mut FxHashMap<u32, i64>, delta: i64) {
    match store.data(t) {
        TermData::Var(v) | TermData::SpecialVar(v) => {
            *counts.entry(*v).or_insert(0) += delta;
        }
        TermData::App { args, .. } => {
            for &a in args {
                var_counts(store, a, counts, delta);
            }
        }
    }
}

impl Kbo {
    pub fn new() -> Kbo {
        Kbo::default()
    }

    /// Compares two shared terms.
    pub fn compare(&self, store: &TermStore, sig: &Signature, s: TermId, t: TermId) -> Comparison {
        if s == t {
            return Comparison::Equal;
        }
        let mut balance = FxHashMap::default();
        var_counts(store, s, &mut balance, 1);
        var_counts(store, t, &mut balance, -1);
        let pos_ok = balance.values().all(|&c| c >= 0);
        let neg_ok = balance.values().all(|&c| c <= 0);
        let ws = store.weight(s) as i64;
        let wt = store.weight(t) as i64;

        if ws > wt {
            return if pos_ok {
                Comparison::Greater
            } else {
                Comparison::Incomparable
            };
        }
        if ws < wt {
            return if neg_ok {
                Comparison::Less
            } else {
                Comparison::Incomparable
            };
        }

        match (store.data(s), store.data(t)) {
            (TermData::Var(_) | TermData::SpecialVar(_), _) => {
                // Equal weights: s can only be below t if it occurs in it.
                if store.contains_subterm(t, s) {
                    Comparison::Less
                } else {
                    Comparison::Incomparable
                }
            }
            (_, TermData::Var(_) | TermData::SpecialVar(_)) => {
                if store.contains_subterm(s, t) {
                    Comparison::Greater
                } else {
                    Comparison::Incomparable
                }
            }
            (TermData::App { functor: f, args: s_args }, TermData::App { functor: g, args: t_args }) => {
                if f != g {
                    return if sig.function_precedence(*f) > sig.function_precedence(*g) {
                        if pos_ok {
                            Comparison::Greater
                        } else {
                            Comparison::Incomparable
                        }
                    } else if neg_ok {
                        Comparison::Less
                    } else {
                        Comparison::Incomparable
                    };
                }
                for (&sa, &ta) in s_args.iter().zip(t_args.iter()) {
                    match self.compare(store, sig, sa, ta) {
                        Comparison::Equal => continue,
                        Comparison::Greater => {
                            return if pos_ok {
                                Comparison::Greater
                            } else {
                                Comparison::Incomparable
                            };
                        }
                        Comparison::Less => {
                            return if neg_ok {
                                Comparison::Less
                            } else {
                                Comparison::Incomparable
                            };
                        }
                        Comparison::Incomparable => return Comparison::Incomparable,
                    }
                }
                Comparison::Equal
            }
        }
    }

    /// Compares two literals: atoms first (equality atoms by the multiset
    /// extension over their sides, other atoms by weight, predicate
    /// precedence and argument comparison), negative above positive on
    /// equal atoms.
    pub fn compare_literals(
        &self,
        store: &TermStore,
        sig: &Signature,
        l1: LiteralId,
        l2: LiteralId,
    ) -> Comparison {
        if l1 == l2 {
            return Comparison::Equal;
        }
        let atom = self.compare_atoms(store, sig, l1, l2);
        if atom != Comparison::Equal {
            return atom;
        }
        match (store.lit_polarity(l1), store.lit_polarity(l2)) {
            (true, true) | (false, false) => Comparison::Equal,
            (false, true) => Comparison::Greater,
            (true, false) => Comparison::Less,
        }
    }

    fn compare_atoms(
        &self,
        store: &TermStore,
        sig: &Signature,
        l1: LiteralId,
        l2: LiteralId,
    ) -> Comparison {
        let p1 = store.lit_predicate(l1);
        let p2 = store.lit_predicate(l2);
        if p1 == Predicate::EQUALITY && p2 == Predicate::EQUALITY {
            let a = store.lit_args(l1);
            let b = store.lit_args(l2);
            return self.compare_multiset2(store, sig, (a[0], a[1]), (b[0], b[1]));
        }

        let mut balance = FxHashMap::default();
        for &a in store.lit_args(l1) {
            var_counts(store, a, &mut balance, 1);
        }
        for &a in store.lit_args(l2) {
            var_counts(store, a, &mut balance, -1);
        }
        let pos_ok = balance.values().all(|&c| c >= 0);
        let neg_ok = balance.values().all(|&c| c <= 0);
        let w1 = store.lit_weight(l1) as i64;
        let w2 = store.lit_weight(l2) as i64;

        let qualify = |raw: Comparison| match raw {
            Comparison::Greater if pos_ok => Comparison::Greater,
            Comparison::Less if neg_ok => Comparison::Less,
            Comparison::Equal => Comparison::Equal,
            _ => Comparison::Incomparable,
        };

        if w1 != w2 {
            return qualify(if w1 > w2 {
                Comparison::Greater
            } else {
                Comparison::Less
            });
        }
        if p1 != p2 {
            // Equality is predicate 0, so it is below every other atom of
            // equal weight.
            return qualify(if sig.predicate_precedence(p1) > sig.predicate_precedence(p2) {
                Comparison::Greater
            } else {
                Comparison::Less
            });
        }
        for (&a, &b) in store.lit_args(l1).iter().zip(store.lit_args(l2)) {
            match self.compare(store, sig, a, b) {
                Comparison::Equal => continue,
                Comparison::Incomparable => return Comparison::Incomparable,
                other => return qualify(other),
            }
        }
        Comparison::Equal
    }

    fn compare_multiset2(
        &self,
        store: &TermStore,
        sig: &Signature,
        (a, b): (TermId, TermId),
        (c, d): (TermId, TermId),
    ) -> Comparison {
        // Cancel equal elements first, then dominate what remains.
        if a == c {
            return self.compare(store, sig, b, d);
        }
        if a == d {
            return self.compare(store, sig, b, c);
        }
        if b == c {
            return self.compare(store, sig, a, d);
        }
        if b == d {
            return self.compare(store, sig, a, c);
        }
        let ac = self.compare(store, sig, a, c);
        let ad = self.compare(store, sig, a, d);
        let bc = self.compare(store, sig, b, c);
        let bd = self.compare(store, sig, b, d);
        use Comparison::*;
        let dominates = |xy: Comparison, zy: Comparison| xy == Greater || zy == Greater;
        if dominates(ac, bc) && dominates(ad, bd) {
            return Greater;
        }
        let dominated = |yx: Comparison, yz: Comparison| yx == Less || yz == Less;
        if dominated(ac, ad) && dominated(bc, bd) {
            return Less;
        }
        Incomparable
    }

    /// The mutual order of the two sides of an equality literal.
    pub fn equality_argument_order(
        &self,
        store: &TermStore,
        sig: &Signature,
        l: LiteralId,
    ) -> Comparison {
        debug_assert!(store.lit_is_equality(l));
        let args = store.lit_args(l);
        self.compare(store, sig, args[0], args[1])
    }

    /// Fast check for `sσ ≻ tσ` through the compiled comparator for
    /// `(s, t)`, building and memoizing it on first use.
    pub fn is_greater_under(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        subst: &mut RobSubstitution,
        bank: Bank,
        s: TermId,
        t: TermId,
    ) -> bool {
        let root = match self.roots.get(&(s, t)) {
            Some(&root) => root,
            None => {
                let root = self.compile(store, sig, s, t);
                self.roots.insert((s, t), root);
                root
            }
        };
        self.eval(store, sig, subst, bank, root)
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn compile(&mut self, store: &TermStore, sig: &Signature, s: TermId, t: TermId) -> NodeId {
        if s == t {
            return self.push(Node::Result(false));
        }
        if store.is_var(s) || store.is_var(t) {
            return self.push(Node::Compare { s, t });
        }

        let mut balance = FxHashMap::default();
        var_counts(store, s, &mut balance, 1);
        var_counts(store, t, &mut balance, -1);
        let pos_ok = balance.values().all(|&c| c >= 0);
        let constant = store.weight(s) as i64 - store.weight(t) as i64;
        let coeffs: Vec<(u32, i64)> = balance
            .iter()
            .filter(|&(_, &c)| c != 0)
            .map(|(&v, &c)| (v, c))
            .collect();

        let (f, s_args) = store.as_app(s).unwrap();
        let (g, t_args) = store.as_app(t).unwrap();
        let on_eq = if f != g {
            let raw = sig.function_precedence(f) > sig.function_precedence(g);
            if raw && pos_ok {
                self.push(Node::Result(true))
            } else if raw {
                self.push(Node::Compare { s, t })
            } else {
                self.push(Node::Result(false))
            }
        } else if pos_ok {
            self.push(Node::Lex {
                pairs: s_args.iter().copied().zip(t_args.iter().copied()).collect(),
                pos_ok,
            })
        } else {
            // The lexicographic shortcut needs the variable condition; a
            // substitution can still ground the offending variables, so
            // defer to a full comparison.
            self.push(Node::Compare { s, t })
        };

        if coeffs.is_empty() {
            // The weight difference is constant under every substitution,
            // and so is the variable condition (all balances are zero).
            return match constant {
                c if c > 0 => self.push(Node::Result(true)),
                c if c < 0 => self.push(Node::Result(false)),
                _ => on_eq,
            };
        }

        let gt = if pos_ok {
            self.push(Node::Result(true))
        } else {
            self.push(Node::Compare { s, t })
        };
        let ng = self.push(Node::Result(false));
        self.push(Node::Weight {
            constant,
            coeffs,
            gt,
            eq: on_eq,
            ng,
        })
    }

    fn eval(
        &mut self,
        store: &mut TermStore,
        sig: &Signature,
        subst: &mut RobSubstitution,
        bank: Bank,
        mut node: NodeId,
    ) -> bool {
        loop {
            match &self.nodes[node.0 as usize] {
                Node::Result(answer) => return *answer,
                Node::Weight {
                    constant,
                    coeffs,
                    gt,
                    eq,
                    ng,
                } => {
                    let mut value = *constant;
                    let (gt, eq, ng) = (*gt, *eq, *ng);
                    for &(var, coeff) in coeffs {
                        let image = store
                            .existing_var(var)
                            .expect("comparator variables are interned");
                        let w = weight_under(subst, store, sig, TermSpec::new(image, bank));
                        value += coeff * (w - 1);
                    }
                    node = match value {
                        v if v > 0 => gt,
                        v if v < 0 => ng,
                        _ => eq,
                    };
                }
                Node::Compare { s, t } => {
                    let (s, t) = (*s, *t);
                    let s_applied = subst.apply(store, sig, TermSpec::new(s, bank));
                    let t_applied = subst.apply(store, sig, TermSpec::new(t, bank));
                    return self.compare(store, sig, s_applied, t_applied) == Comparison::Greater;
                }
                Node::Lex { pairs, pos_ok } => {
                    let (pairs, pos_ok) = (pairs.clone(), *pos_ok);
                    for (sa, ta) in pairs {
                        let s_applied = subst.apply(store, sig, TermSpec::new(sa, bank));
                        let t_applied = subst.apply(store, sig, TermSpec::new(ta, bank));
                        match self.compare(store, sig, s_applied, t_applied) {
                            Comparison::Equal => continue,
                            Comparison::Greater => return pos_ok,
                            _ => return false,
                        }
                    }
                    return false;
                }
            }
        }
    }
}

/// Weight of `tσ` computed by dereferencing traversal, without interning
/// the applied term. Unbound variables weigh 1.
fn weight_under(subst: &RobSubstitution, store: &TermStore, sig: &Signature, t: TermSpec) -> i64 {
    let d = subst.deref_bound(store, t);
    match store.data(d.term) {
        TermData::Var(_) | TermData::SpecialVar(_) => 1,
        TermData::App { functor, args } => {
            if store.is_ground(d.term) {
                return store.weight(d.term) as i64;
            }
            let mut acc = sig.function_weight(*functor) as i64;
            for &a in args {
                acc += weight_under(subst, store, sig, TermSpec::new(a, d.bank));
            }
            acc
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signature::Sort;

    fn setup() -> (Signature, TermStore, Kbo) {
        (Signature::new(), TermStore::new(), Kbo::new())
    }

    #[test]
    fn heavier_ground_term_is_greater() {
        let (mut sig, mut store, kbo) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let fa = store.app(&sig, f, vec![ca]);
        assert_eq!(kbo.compare(&store, &sig, fa, ca), Comparison::Greater);
        assert_eq!(kbo.compare(&store, &sig, ca, fa), Comparison::Less);
    }

    #[test]
    fn subterm_property() {
        let (mut sig, mut store, kbo) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let x = store.var(0);
        let fx = store.app(&sig, f, vec![x]);
        assert_eq!(kbo.compare(&store, &sig, fx, x), Comparison::Greater);
        assert_eq!(kbo.compare(&store, &sig, x, fx), Comparison::Less);
    }

    #[test]
    fn distinct_variables_are_incomparable() {
        let (sig, mut store, kbo) = setup();
        let x = store.var(0);
        let y = store.var(1);
        assert_eq!(kbo.compare(&store, &sig, x, y), Comparison::Incomparable);
    }

    #[test]
    fn variable_condition_blocks_greater() {
        let (mut sig, mut store, kbo) = setup();
        // f(x, a) vs f(y, y): weight equal, but neither variable condition
        // holds.
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let y = store.var(1);
        let s = store.app(&sig, f, vec![x, ca]);
        let t = store.app(&sig, f, vec![y, y]);
        assert_eq!(kbo.compare(&store, &sig, s, t), Comparison::Incomparable);
    }

    #[test]
    fn greater_is_stable_under_substitution() {
        let (mut sig, mut store, kbo) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let x = store.var(0);
        let gx = store.app(&sig, g, vec![x]);
        let fgx = store.app(&sig, f, vec![gx]);
        let gx2 = store.app(&sig, g, vec![gx]);
        assert_eq!(kbo.compare(&store, &sig, fgx, gx), Comparison::Greater);
        // Substitute x := g(x) on both sides.
        let fggx = store.app(&sig, f, vec![gx2]);
        assert!(matches!(
            kbo.compare(&store, &sig, fggx, gx2),
            Comparison::Greater | Comparison::Equal
        ));
    }

    #[test]
    fn precedence_breaks_weight_ties() {
        let (mut sig, mut store, kbo) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let b = sig.add_constant("b", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let cb = store.constant(&sig, b);
        // b was declared later, so it has the higher precedence.
        assert_eq!(kbo.compare(&store, &sig, cb, ca), Comparison::Greater);
    }

    #[test]
    fn negative_literal_above_its_positive_twin() {
        let (mut sig, mut store, kbo) = setup();
        let p = sig.add_predicate("p", vec![Sort::INDIVIDUAL]);
        let x = store.var(0);
        let pos = store.literal(&sig, p, true, vec![x]);
        let neg = store.literal(&sig, p, false, vec![x]);
        assert_eq!(
            kbo.compare_literals(&store, &sig, neg, pos),
            Comparison::Greater
        );
    }

    #[test]
    fn equality_literals_compare_as_multisets() {
        let (mut sig, mut store, kbo) = setup();
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let fa = store.app(&sig, f, vec![ca]);
        let ffa = store.app(&sig, f, vec![fa]);
        let l1 = store.equality(&sig, true, ffa, ca);
        let l2 = store.equality(&sig, true, fa, ca);
        assert_eq!(
            kbo.compare_literals(&store, &sig, l1, l2),
            Comparison::Greater
        );
    }

    #[test]
    fn comparator_agrees_with_direct_comparison() {
        let (mut sig, mut store, mut kbo) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let x = store.var(0);
        let fx = store.app(&sig, f, vec![x]);
        let ca = store.constant(&sig, a);
        let mut subst = RobSubstitution::new();
        // With x := a, f(x)σ ≻ xσ must hold.
        assert!(subst.unify_ids(&store, x, Bank::QUERY, ca, Bank::RESULT));
        assert!(kbo.is_greater_under(&mut store, &sig, &mut subst, Bank::QUERY, fx, x));
        assert!(!kbo.is_greater_under(&mut store, &sig, &mut subst, Bank::QUERY, x, fx));
    }

    #[test]
    fn comparator_weight_polynomial_tracks_bindings() {
        let (mut sig, mut store, mut kbo) = setup();
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL; 2], Sort::INDIVIDUAL);
        let g = sig.add_function("g", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        let a = sig.add_constant("a", Sort::INDIVIDUAL);
        let ca = store.constant(&sig, a);
        let x = store.var(0);
        let y = store.var(1);
        // s = f(x, x), t = f(y, a): greater exactly when w(xσ) outweighs.
        let s = store.app(&sig, f, vec![x, x]);
        let t = store.app(&sig, f, vec![y, ca]);
        let ga = store.app(&sig, g, vec![ca]);
        let gga = store.app(&sig, g, vec![ga]);
        let mut subst = RobSubstitution::new();
        assert!(subst.unify_ids(&store, x, Bank::QUERY, gga, Bank::RESULT));
        assert!(subst.unify_ids(&store, y, Bank::QUERY, ca, Bank::RESULT));
        assert!(kbo.is_greater_under(&mut store, &sig, &mut subst, Bank::QUERY, s, t));
    }
}
