//! The code-tree index: a sequential matcher optimized for one-sided
//! matching of a query term against many stored patterns at once.
//!
//! Patterns are compiled by preorder traversal into a linear bytecode of
//! `CheckFun` / `AssignVar` / `CheckVar` ops terminated by `Success`;
//! alternatives between patterns are encoded by failure links, so the
//! whole pattern set is one shared program. Matching executes the program
//! against a flat term, keeping a stack of unexplored failure branches;
//! the matcher is re-entrant and resumes cheaply after every success.

use tracing::debug;

use saturn_ir::flat::{FlatEntry, FlatTerm};
use saturn_ir::{Functor, TermData, TermId, TermStore};

/// A jump target inside the program.
type Addr = u32;

#[derive(Clone, Debug)]
enum Op<D> {
    /// The current entry must be an application of `functor`; steps into
    /// its arguments.
    CheckFun { functor: Functor, fail: Option<Addr> },
    /// Binds pattern variable `slot` to the current subterm and skips it.
    AssignVar { slot: u32, fail: Option<Addr> },
    /// The current subterm must repeat the binding of `slot`; skips it.
    CheckVar { slot: u32, fail: Option<Addr> },
    /// A stored pattern ends here. An empty data vector is a tombstone
    /// left by removal.
    Success { pattern: TermId, data: Vec<D> },
}

impl<D> Op<D> {
    fn fail(&self) -> Option<Addr> {
        match self {
            Op::CheckFun { fail, .. } | Op::AssignVar { fail, .. } | Op::CheckVar { fail, .. } => {
                *fail
            }
            Op::Success { .. } => None,
        }
    }

    fn set_fail(&mut self, addr: Addr) {
        match self {
            Op::CheckFun { fail, .. } | Op::AssignVar { fail, .. } | Op::CheckVar { fail, .. } => {
                debug_assert!(fail.is_none());
                *fail = Some(addr);
            }
            Op::Success { .. } => unreachable!("success ops carry no failure link"),
        }
    }

    /// Same test as `other` (failure links aside)?
    fn same_test(&self, other: &Op<D>) -> bool {
        match (self, other) {
            (Op::CheckFun { functor: a, .. }, Op::CheckFun { functor: b, .. }) => a == b,
            (Op::AssignVar { slot: a, .. }, Op::AssignVar { slot: b, .. }) => a == b,
            (Op::CheckVar { slot: a, .. }, Op::CheckVar { slot: b, .. }) => a == b,
            _ => false,
        }
    }
}

/// Fraction of dead successes (relative to live ones) that triggers a
/// rebuild of the program from the surviving patterns.
const COMPACT_NUM: usize = 1;
const COMPACT_DEN: usize = 4;

pub struct CodeTree<D> {
    code: Vec<Op<D>>,
    live: usize,
    dead: usize,
}

impl<D: Copy + Eq + std::fmt::Debug> Default for CodeTree<D> {
    fn default() -> Self {
        CodeTree::new()
    }
}

impl<D: Copy + Eq + std::fmt::Debug> CodeTree<D> {
    pub fn new() -> CodeTree<D> {
        CodeTree {
            code: vec![],
            live: 0,
            dead: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn len(&self) -> usize {
        self.live
    }

    /// The op sequence of a pattern: preorder, first variable occurrences
    /// assigned, repetitions checked. Patterns are normalized, so slots
    /// coincide with variable indices.
    fn compile(store: &TermStore, pattern: TermId) -> Vec<Op<D>> {
        let mut ops = vec![];
        let mut seen = vec![];
        compile_into(store, pattern, &mut seen, &mut ops);
        ops
    }

    /// Inserts a (normalized) pattern. The new op sequence is threaded
    /// through the existing program as far as it agrees; the first
    /// disagreement appends the remainder at the end, reachable through a
    /// failure link.
    pub fn insert(&mut self, store: &TermStore, pattern: TermId, data: D) {
        debug!(?pattern, ?data, "code-tree insert");
        let ops = Self::compile(store, pattern);
        if self.code.is_empty() {
            self.code = ops;
            self.code.push(Op::Success {
                pattern,
                data: vec![data],
            });
            self.live = 1;
            return;
        }

        let mut pc: Addr = 0;
        for (i, op) in ops.iter().enumerate() {
            loop {
                let existing = &self.code[pc as usize];
                if existing.same_test(op) {
                    pc += 1;
                    break;
                }
                match existing.fail() {
                    Some(f) => pc = f,
                    None => {
                        // Branch here: append the remainder and link it.
                        let branch = self.code.len() as Addr;
                        self.code.extend(ops[i..].iter().cloned());
                        self.code.push(Op::Success {
                            pattern,
                            data: vec![data],
                        });
                        self.code[pc as usize].set_fail(branch);
                        self.live += 1;
                        return;
                    }
                }
            }
        }
        // The whole sequence matched ops already in the program; the next
        // op is the shared Success of an α-equal pattern.
        match &mut self.code[pc as usize] {
            Op::Success { data: entries, .. } => {
                if entries.is_empty() {
                    self.dead -= 1;
                    self.live += 1;
                }
                if !entries.contains(&data) {
                    entries.push(data);
                }
            }
            other => unreachable!("pattern ended inside the program: {other:?}"),
        }
    }

    /// Removes one data entry of a pattern; the `Success` op becomes a
    /// tombstone when its last entry goes, and the program is rebuilt once
    /// tombstones outweigh a quarter of the live patterns.
    pub fn remove(&mut self, store: &TermStore, pattern: TermId, data: D) -> bool {
        let ops = Self::compile(store, pattern);
        let Some(success) = self.find_success(&ops) else {
            return false;
        };
        let Op::Success { data: entries, .. } = &mut self.code[success as usize] else {
            unreachable!()
        };
        let before = entries.len();
        entries.retain(|e| *e != data);
        if entries.len() == before {
            return false;
        }
        if entries.is_empty() {
            self.live -= 1;
            self.dead += 1;
            if self.dead * COMPACT_DEN > self.live.max(1) * COMPACT_NUM {
                self.compact(store);
            }
        }
        true
    }

    fn find_success(&self, ops: &[Op<D>]) -> Option<Addr> {
        if self.code.is_empty() {
            return None;
        }
        let mut pc: Addr = 0;
        for op in ops {
            loop {
                let existing = &self.code[pc as usize];
                if existing.same_test(op) {
                    pc += 1;
                    break;
                }
                pc = existing.fail()?;
            }
        }
        matches!(self.code[pc as usize], Op::Success { .. }).then_some(pc)
    }

    /// Rebuilds the program from the live successes.
    fn compact(&mut self, store: &TermStore) {
        debug!(live = self.live, dead = self.dead, "code-tree compaction");
        let old = std::mem::take(&mut self.code);
        self.live = 0;
        self.dead = 0;
        for op in old {
            if let Op::Success { pattern, data } = op {
                for d in data {
                    self.insert(store, pattern, d);
                }
            }
        }
    }

    /// Starts a match of the program against `flat`.
    pub fn matcher(&self, flat: FlatTerm) -> CodeTreeMatcher<'_, D> {
        CodeTreeMatcher {
            tree: self,
            flat,
            pc: 0,
            tp: 0,
            bindings: vec![],
            bound_log: vec![],
            choices: vec![],
            state: if self.code.is_empty() {
                MatcherState::Finished
            } else {
                MatcherState::Running
            },
        }
    }
}

fn compile_into<D>(store: &TermStore, t: TermId, seen: &mut Vec<u32>, ops: &mut Vec<Op<D>>) {
    match store.data(t) {
        TermData::Var(v) | TermData::SpecialVar(v) => {
            if seen.contains(v) {
                ops.push(Op::CheckVar {
                    slot: *v,
                    fail: None,
                });
            } else {
                seen.push(*v);
                ops.push(Op::AssignVar {
                    slot: *v,
                    fail: None,
                });
            }
        }
        TermData::App { functor, args } => {
            ops.push(Op::CheckFun {
                functor: *functor,
                fail: None,
            });
            for &a in args {
                compile_into(store, a, seen, ops);
            }
        }
    }
}

enum MatcherState {
    Running,
    /// A success was yielded; backtrack before continuing.
    Yielded,
    Finished,
}

struct MatcherChoice {
    pc: Addr,
    tp: u32,
    bound: u32,
}

/// The resumable matcher: position pointer into the flat query, binding
/// array, and a stack of unexplored failure branches.
pub struct CodeTreeMatcher<'a, D> {
    tree: &'a CodeTree<D>,
    flat: FlatTerm,
    pc: Addr,
    tp: u32,
    bindings: Vec<Option<TermId>>,
    bound_log: Vec<u32>,
    choices: Vec<MatcherChoice>,
    state: MatcherState,
}

impl<'a, D: Copy + Eq + std::fmt::Debug> CodeTreeMatcher<'a, D> {
    /// Runs to the next `Success` with live data; `None` when the
    /// alternatives are exhausted.
    pub fn next(&mut self) -> Option<&'a [D]> {
        match self.state {
            MatcherState::Finished => return None,
            MatcherState::Yielded => {
                if !self.backtrack() {
                    return None;
                }
                self.state = MatcherState::Running;
            }
            MatcherState::Running => {}
        }
        loop {
            let op = &self.tree.code[self.pc as usize];
            // Record the unexplored alternative of this op, if any.
            if let Some(fail) = op.fail() {
                self.choices.push(MatcherChoice {
                    pc: fail,
                    tp: self.tp,
                    bound: self.bound_log.len() as u32,
                });
            }
            let ok = match op {
                Op::CheckFun { functor, .. } => match self.flat.entry(self.tp as usize) {
                    FlatEntry::Fun { functor: f, .. } if f == *functor => {
                        self.pc += 1;
                        self.tp += 1;
                        true
                    }
                    _ => false,
                },
                Op::AssignVar { slot, .. } => {
                    let slot = *slot as usize;
                    if self.bindings.len() <= slot {
                        self.bindings.resize(slot + 1, None);
                    }
                    self.bindings[slot] = Some(self.flat.entry(self.tp as usize).term());
                    self.bound_log.push(slot as u32);
                    self.tp = self.flat.end_of(self.tp as usize) as u32;
                    self.pc += 1;
                    true
                }
                Op::CheckVar { slot, .. } => {
                    let bound = self.bindings[*slot as usize].expect("assigned before checked");
                    if self.flat.entry(self.tp as usize).term() == bound {
                        self.tp = self.flat.end_of(self.tp as usize) as u32;
                        self.pc += 1;
                        true
                    } else {
                        false
                    }
                }
                Op::Success { data, .. } => {
                    debug_assert_eq!(self.tp as usize, self.flat.len());
                    if data.is_empty() {
                        // Tombstone; treat as failure.
                        false
                    } else {
                        self.state = MatcherState::Yielded;
                        return Some(data);
                    }
                }
            };
            if !ok && !self.backtrack() {
                return None;
            }
        }
    }

    /// The query subterm bound to a pattern variable of the last success.
    pub fn binding(&self, slot: u32) -> Option<TermId> {
        self.bindings.get(slot as usize).copied().flatten()
    }

    fn backtrack(&mut self) -> bool {
        match self.choices.pop() {
            Some(choice) => {
                self.pc = choice.pc;
                self.tp = choice.tp;
                while self.bound_log.len() > choice.bound as usize {
                    let slot = self.bound_log.pop().unwrap();
                    self.bindings[slot as usize] = None;
                }
                true
            }
            None => {
                self.state = MatcherState::Finished;
                false
            }
        }
    }
}
