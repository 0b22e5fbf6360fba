// unify.rs — Union-find with value binding
//
// Shared by the payload/unit solver (keys are node-scoped variables) and the
// cardinality solver (keys are ports). Each equivalence class may hold one
// concrete value on its representative.
//
// Preconditions: none.
// Postconditions: `union` never merges two classes holding different values;
//   on conflict both classes are left exactly as they were.
// Failure modes: conflicting values → `Conflict`.
// Side effects: none.

use std::collections::BTreeMap;

/// Two classes (or a class and an assignment) disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict<V> {
    pub existing: V,
    pub incoming: V,
}

/// Union-find over keys `K`, with path compression and union by rank.
#[derive(Debug, Clone)]
pub struct UnionFind<K, V> {
    index: BTreeMap<K, usize>,
    parent: Vec<usize>,
    rank: Vec<u8>,
    /// Value bound to a representative, if any.
    value: Vec<Option<V>>,
}

impl<K: Ord + Clone, V: Clone + PartialEq> Default for UnionFind<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Ord + Clone, V: Clone + PartialEq> UnionFind<K, V> {
    pub fn new() -> Self {
        Self {
            index: BTreeMap::new(),
            parent: Vec::new(),
            rank: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Slot for `key`, allocating an unbound one on first use.
    fn slot(&mut self, key: &K) -> usize {
        if let Some(&i) = self.index.get(key) {
            return i;
        }
        let i = self.parent.len();
        self.parent.push(i);
        self.rank.push(0);
        self.value.push(None);
        self.index.insert(key.clone(), i);
        i
    }

    /// Register `key` without binding or merging it.
    pub fn insert(&mut self, key: &K) {
        self.slot(key);
    }

    fn find_slot(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut cur = x;
        while cur != root {
            let next = self.parent[cur];
            self.parent[cur] = root;
            cur = next;
        }
        root
    }

    /// Representative slot of `key`'s class.
    pub fn root(&mut self, key: &K) -> usize {
        let s = self.slot(key);
        self.find_slot(s)
    }

    /// Merge the classes of `a` and `b`.
    pub fn union(&mut self, a: &K, b: &K) -> Result<(), Conflict<V>> {
        let ra = self.root(a);
        let rb = self.root(b);
        if ra == rb {
            return Ok(());
        }

        let merged = match (&self.value[ra], &self.value[rb]) {
            (Some(va), Some(vb)) if va != vb => {
                return Err(Conflict {
                    existing: va.clone(),
                    incoming: vb.clone(),
                });
            }
            (Some(v), _) | (None, Some(v)) => Some(v.clone()),
            (None, None) => None,
        };

        let (child, parent) = if self.rank[ra] < self.rank[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[child] = parent;
        self.value[child] = None;
        self.value[parent] = merged;
        if self.rank[ra] == self.rank[rb] {
            self.rank[parent] += 1;
        }
        Ok(())
    }

    /// Bind `value` to `key`'s class.
    pub fn assign(&mut self, key: &K, value: V) -> Result<(), Conflict<V>> {
        let r = self.root(key);
        match &self.value[r] {
            Some(existing) if *existing != value => Err(Conflict {
                existing: existing.clone(),
                incoming: value,
            }),
            Some(_) => Ok(()),
            None => {
                self.value[r] = Some(value);
                Ok(())
            }
        }
    }

    /// Value of `key`'s class, if bound. Unknown keys are unbound.
    pub fn value(&mut self, key: &K) -> Option<V> {
        let &s = self.index.get(key)?;
        let r = self.find_slot(s);
        self.value[r].clone()
    }

    /// Classes as (representative key, members), each member list sorted.
    /// The representative named is the smallest member.
    pub fn classes(&mut self) -> BTreeMap<K, Vec<K>> {
        let keys: Vec<K> = self.index.keys().cloned().collect();
        let mut by_root: BTreeMap<usize, Vec<K>> = BTreeMap::new();
        for k in keys {
            let r = self.root(&k);
            by_root.entry(r).or_default().push(k);
        }
        by_root
            .into_values()
            .filter_map(|members| Some((members.first()?.clone(), members)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_propagates_value() {
        let mut uf: UnionFind<&str, u32> = UnionFind::new();
        uf.assign(&"a", 7).unwrap();
        uf.union(&"a", &"b").unwrap();
        uf.union(&"c", &"b").unwrap();
        assert_eq!(uf.value(&"c"), Some(7));
        assert_eq!(uf.root(&"a"), uf.root(&"c"));
    }

    #[test]
    fn conflicting_union_leaves_classes_apart() {
        let mut uf: UnionFind<&str, u32> = UnionFind::new();
        uf.assign(&"a", 1).unwrap();
        uf.assign(&"b", 2).unwrap();
        let err = uf.union(&"a", &"b").unwrap_err();
        assert_eq!(err, Conflict { existing: 1, incoming: 2 });
        assert_ne!(uf.root(&"a"), uf.root(&"b"));
        assert_eq!(uf.value(&"a"), Some(1));
        assert_eq!(uf.value(&"b"), Some(2));
    }

    #[test]
    fn assign_conflict_keeps_first_value() {
        let mut uf: UnionFind<&str, u32> = UnionFind::new();
        uf.assign(&"a", 1).unwrap();
        assert!(uf.assign(&"a", 1).is_ok());
        assert!(uf.assign(&"a", 3).is_err());
        assert_eq!(uf.value(&"a"), Some(1));
    }

    #[test]
    fn unknown_key_has_no_value() {
        let mut uf: UnionFind<&str, u32> = UnionFind::new();
        assert_eq!(uf.value(&"zz"), None);
        assert!(uf.classes().is_empty());
    }

    #[test]
    fn classes_are_sorted_and_complete() {
        let mut uf: UnionFind<&str, u32> = UnionFind::new();
        for k in ["d", "c", "b", "a"] {
            uf.insert(&k);
        }
        uf.union(&"d", &"b").unwrap();
        let classes = uf.classes();
        assert_eq!(classes.len(), 3);
        assert_eq!(classes[&"b"], vec!["b", "d"]);
        assert_eq!(classes[&"a"], vec!["a"]);
    }
}
