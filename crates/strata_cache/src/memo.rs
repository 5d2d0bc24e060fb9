//! Content-hash memo table.
//!
//! Each entry remembers the fingerprint of the inputs a value was computed
//! from. On the next build, keys whose fingerprint is unchanged reuse the
//! stored value and everything else is recomputed, optionally on the rayon
//! thread pool. Keys that no longer appear are forgotten.

use std::collections::BTreeMap;
use std::sync::Arc;

use rayon::prelude::*;
use strata_common::ContentHash;

/// Result of comparing current input fingerprints against a memo table.
///
/// Categorizes every key into new (never seen), modified (fingerprint
/// changed), removed (stored but no longer requested), and unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    /// Keys that are not in the table.
    pub new: Vec<K>,
    /// Keys whose input fingerprint differs from the stored one.
    pub modified: Vec<K>,
    /// Keys in the table that are no longer requested.
    pub removed: Vec<K>,
    /// Keys whose input fingerprint matches.
    pub unchanged: Vec<K>,
}

impl<K> ChangeSet<K> {
    /// Returns `true` if nothing needs recomputing or forgetting.
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Number of keys that must be recomputed (new + modified).
    pub fn dirty_count(&self) -> usize {
        self.new.len() + self.modified.len()
    }
}

struct MemoEntry<V> {
    input: ContentHash,
    value: Arc<V>,
}

impl<V> Clone for MemoEntry<V> {
    fn clone(&self) -> Self {
        Self {
            input: self.input,
            value: Arc::clone(&self.value),
        }
    }
}

/// A memo table from keys to values computed from fingerprinted inputs.
///
/// Cloning is cheap: values are shared.
pub struct Memo<K, V> {
    entries: BTreeMap<K, MemoEntry<V>>,
}

impl<K: Clone, V> Clone for Memo<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K: Ord, V> Default for Memo<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K, V> Memo<K, V>
where
    K: Ord + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Creates an empty memo table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the stored value for a key.
    pub fn get(&self, key: &K) -> Option<&Arc<V>> {
        self.entries.get(key).map(|e| &e.value)
    }

    /// Compares requested input fingerprints with the stored ones.
    pub fn detect_changes(&self, inputs: &BTreeMap<K, ContentHash>) -> ChangeSet<K> {
        let mut changes = ChangeSet {
            new: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            unchanged: Vec::new(),
        };
        for (key, hash) in inputs {
            match self.entries.get(key) {
                Some(entry) if entry.input == *hash => changes.unchanged.push(key.clone()),
                Some(_) => changes.modified.push(key.clone()),
                None => changes.new.push(key.clone()),
            }
        }
        changes.removed = self
            .entries
            .keys()
            .filter(|k| !inputs.contains_key(*k))
            .cloned()
            .collect();
        changes
    }

    /// Returns a value for every requested key, recomputing only the keys
    /// whose fingerprint changed, and forgets keys that were not requested.
    ///
    /// `compute` is only called on a miss, so any side effect it performs
    /// (such as a network introspection) happens once per changed input. The
    /// result map is keyed, so it does not depend on completion order when
    /// `parallel` is set.
    pub fn compute_all<I, F>(
        &mut self,
        inputs: BTreeMap<K, (ContentHash, I)>,
        parallel: bool,
        compute: F,
    ) -> (BTreeMap<K, Arc<V>>, ChangeSet<K>)
    where
        I: Send,
        F: Fn(&K, I) -> V + Sync,
    {
        let fingerprints: BTreeMap<K, ContentHash> =
            inputs.iter().map(|(k, (h, _))| (k.clone(), *h)).collect();
        let changes = self.detect_changes(&fingerprints);

        let mut next: BTreeMap<K, MemoEntry<V>> = BTreeMap::new();
        let mut misses = Vec::with_capacity(changes.dirty_count());
        for (key, (hash, input)) in inputs {
            match self.entries.get(&key) {
                Some(entry) if entry.input == hash => {
                    next.insert(key, entry.clone());
                }
                _ => misses.push((key, hash, input)),
            }
        }

        let computed: Vec<(K, ContentHash, V)> = if parallel {
            misses
                .into_par_iter()
                .map(|(key, hash, input)| {
                    let value = compute(&key, input);
                    (key, hash, value)
                })
                .collect()
        } else {
            misses
                .into_iter()
                .map(|(key, hash, input)| {
                    let value = compute(&key, input);
                    (key, hash, value)
                })
                .collect()
        };
        for (key, hash, value) in computed {
            next.insert(
                key,
                MemoEntry {
                    input: hash,
                    value: Arc::new(value),
                },
            );
        }

        tracing::trace!(
            hits = changes.unchanged.len(),
            misses = changes.dirty_count(),
            forgotten = changes.removed.len(),
            "memo table updated"
        );

        let values = next
            .iter()
            .map(|(k, e)| (k.clone(), Arc::clone(&e.value)))
            .collect();
        self.entries = next;
        (values, changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, (ContentHash, String)> {
        pairs
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    (ContentHash::of(*v).unwrap(), v.to_string()),
                )
            })
            .collect()
    }

    #[test]
    fn unchanged_inputs_are_not_recomputed() {
        let calls = AtomicUsize::new(0);
        let compute = |_: &String, input: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            input.len()
        };
        let mut memo = Memo::new();
        memo.compute_all(inputs(&[("a", "x"), ("b", "yy")]), false, compute);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let (values, changes) =
            memo.compute_all(inputs(&[("a", "x"), ("b", "yy")]), false, compute);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(changes.is_empty());
        assert_eq!(*values["b"], 2);
    }

    #[test]
    fn modified_and_removed_keys() {
        let mut memo = Memo::new();
        memo.compute_all(inputs(&[("a", "x"), ("b", "y")]), false, |_, i: String| i);
        let (values, changes) =
            memo.compute_all(inputs(&[("a", "changed"), ("c", "z")]), false, |_, i: String| i);
        assert_eq!(changes.modified, vec!["a".to_string()]);
        assert_eq!(changes.new, vec!["c".to_string()]);
        assert_eq!(changes.removed, vec!["b".to_string()]);
        assert_eq!(values.len(), 2);
        assert_eq!(memo.len(), 2);
        assert!(memo.get(&"b".to_string()).is_none());
    }

    #[test]
    fn parallel_matches_sequential() {
        let pairs: Vec<(String, String)> =
            (0..64).map(|i| (format!("k{i:02}"), format!("v{i}"))).collect();
        let borrowed: Vec<(&str, &str)> =
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();

        let mut seq = Memo::new();
        let render = |k: &String, v: String| format!("{k}={v}");
        let (a, _) = seq.compute_all(inputs(&borrowed), false, render);
        let mut par = Memo::new();
        let (b, _) = par.compute_all(inputs(&borrowed), true, render);
        let a: Vec<_> = a.values().map(|v| v.as_str().to_string()).collect();
        let b: Vec<_> = b.values().map(|v| v.as_str().to_string()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn clone_shares_values() {
        let mut memo = Memo::new();
        memo.compute_all(inputs(&[("a", "x")]), false, |_, i: String| i);
        let copy = memo.clone();
        assert!(Arc::ptr_eq(
            memo.get(&"a".to_string()).unwrap(),
            copy.get(&"a".to_string()).unwrap()
        ));
    }
}
