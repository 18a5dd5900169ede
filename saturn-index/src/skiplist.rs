//! An ordered skip list, the middle child-container layout of substitution
//! tree nodes. Levels are drawn from a fixed-seed generator so that list
//! shape, and with it retrieval order, is identical across runs.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

const MAX_LEVEL: usize = 12;
const SEED: u64 = 0x5a7u64;

struct SkipNode<K, V> {
    key: K,
    value: V,
    forward: Vec<Option<usize>>,
}

pub struct SkipList<K, V> {
    /// Slot arena; removed slots go on the free list and hold `None`.
    nodes: Vec<Option<SkipNode<K, V>>>,
    head: Vec<Option<usize>>,
    free: Vec<usize>,
    len: usize,
    rng: SmallRng,
}

impl<K: Ord + Copy, V> Default for SkipList<K, V> {
    fn default() -> Self {
        SkipList::new()
    }
}

impl<K: Ord + Copy, V> SkipList<K, V> {
    pub fn new() -> SkipList<K, V> {
        SkipList {
            nodes: vec![],
            head: vec![None; MAX_LEVEL],
            free: vec![],
            len: 0,
            rng: SmallRng::seed_from_u64(SEED),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, i: usize) -> &SkipNode<K, V> {
        self.nodes[i].as_ref().expect("live skip-list slot")
    }

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen_ratio(1, 4) {
            level += 1;
        }
        level
    }

    /// The update vector: for each level, the index of the last node whose
    /// key is smaller than `key` (`None` for the head).
    fn predecessors(&self, key: &K) -> Vec<Option<usize>> {
        let mut update = vec![None; MAX_LEVEL];
        let mut current: Option<usize> = None;
        for level in (0..MAX_LEVEL).rev() {
            loop {
                let next = self.next_at(current, level);
                match next {
                    Some(n) if self.node(n).key < *key => current = Some(n),
                    _ => break,
                }
            }
            update[level] = current;
        }
        update
    }

    fn next_at(&self, from: Option<usize>, level: usize) -> Option<usize> {
        match from {
            None => self.head[level],
            Some(i) => self.node(i).forward.get(level).copied().flatten(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let update = self.predecessors(key);
        let candidate = self.next_at(update[0], 0)?;
        let node = self.node(candidate);
        if node.key == *key {
            Some(&node.value)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let update = self.predecessors(key);
        let candidate = self.next_at(update[0], 0)?;
        let node = self.nodes[candidate].as_mut().expect("live skip-list slot");
        if node.key == *key {
            Some(&mut node.value)
        } else {
            None
        }
    }

    /// Inserts `value` under `key`, returning the displaced value if the
    /// key was present.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let update = self.predecessors(&key);
        if let Some(candidate) = self.next_at(update[0], 0) {
            let node = self.nodes[candidate].as_mut().expect("live skip-list slot");
            if node.key == key {
                return Some(std::mem::replace(&mut node.value, value));
            }
        }
        let level = self.random_level();
        let node = SkipNode {
            key,
            value,
            forward: vec![None; level],
        };
        let index = match self.free.pop() {
            Some(i) => {
                self.nodes[i] = Some(node);
                i
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        for l in 0..level {
            let next = self.next_at(update[l], l);
            self.nodes[index].as_mut().unwrap().forward[l] = next;
            match update[l] {
                None => self.head[l] = Some(index),
                Some(p) => self.nodes[p].as_mut().unwrap().forward[l] = Some(index),
            }
        }
        self.len += 1;
        None
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let update = self.predecessors(key);
        let candidate = self.next_at(update[0], 0)?;
        if self.node(candidate).key != *key {
            return None;
        }
        for l in 0..self.node(candidate).forward.len() {
            let next = self.node(candidate).forward[l];
            match update[l] {
                None => {
                    if self.head[l] == Some(candidate) {
                        self.head[l] = next;
                    }
                }
                Some(p) => {
                    let p_node = self.nodes[p].as_mut().unwrap();
                    if p_node.forward[l] == Some(candidate) {
                        p_node.forward[l] = next;
                    }
                }
            }
        }
        self.len -= 1;
        self.free.push(candidate);
        self.nodes[candidate].take().map(|n| n.value)
    }

    /// In-order iteration over `(key, value)`.
    pub fn iter(&self) -> SkipIter<'_, K, V> {
        SkipIter {
            list: self,
            current: self.head[0],
        }
    }
}

pub struct SkipIter<'a, K, V> {
    list: &'a SkipList<K, V>,
    current: Option<usize>,
}

impl<'a, K: Ord + Copy, V> Iterator for SkipIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let i = self.current?;
        let node = self.list.node(i);
        self.current = node.forward[0];
        Some((&node.key, &node.value))
    }
}
