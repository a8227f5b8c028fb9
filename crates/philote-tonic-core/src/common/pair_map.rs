//! An insertion-ordered map keyed by `(of, wrt)` name pairs.
//!
//! Used for Jacobian blocks, where iteration order is the wire order of the
//! partials streamed back to a client.

use core::ops::{Index, IndexMut};
use std::collections::HashMap;

/// Map from an ordered pair of names to a value, iterated in insertion order.
#[derive(Clone, Debug, PartialEq)]
pub struct PairMap<V> {
    entries: Vec<((String, String), V)>,
    /// `of` -> `wrt` -> position in `entries`.
    index: HashMap<String, HashMap<String, usize>>,
}

impl<V> PairMap<V> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, of: &str, wrt: &str) -> Option<usize> {
        self.index.get(of)?.get(wrt).copied()
    }

    pub fn contains(&self, of: &str, wrt: &str) -> bool {
        self.position(of, wrt).is_some()
    }

    pub fn get(&self, of: &str, wrt: &str) -> Option<&V> {
        self.position(of, wrt).map(|i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, of: &str, wrt: &str) -> Option<&mut V> {
        self.position(of, wrt).map(|i| &mut self.entries[i].1)
    }

    /// Inserts or replaces the value for `(of, wrt)`. Replacing keeps the
    /// original position. Returns the previous value, if any.
    pub fn set(&mut self, of: &str, wrt: &str, value: V) -> Option<V> {
        if let Some(i) = self.position(of, wrt) {
            return Some(core::mem::replace(&mut self.entries[i].1, value));
        }
        let position = self.entries.len();
        self.index
            .entry(of.to_string())
            .or_default()
            .insert(wrt.to_string(), position);
        self.entries.push(((of.to_string(), wrt.to_string()), value));
        None
    }

    /// Iterates `(of, wrt, value)` in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &V)> {
        self.entries
            .iter()
            .map(|((of, wrt), v)| (of.as_str(), wrt.as_str(), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &str, &mut V)> {
        self.entries
            .iter_mut()
            .map(|((of, wrt), v)| (of.as_str(), wrt.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().map(|(of, wrt, _)| (of, wrt))
    }
}

impl<V> Default for PairMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> IntoIterator for PairMap<V> {
    type Item = ((String, String), V);
    type IntoIter = std::vec::IntoIter<((String, String), V)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V> FromIterator<((String, String), V)> for PairMap<V> {
    fn from_iter<I: IntoIterator<Item = ((String, String), V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for ((of, wrt), v) in iter {
            map.set(&of, &wrt, v);
        }
        map
    }
}

/// # Panics
///
/// Panics if the pair is not present.
impl<V> Index<(&str, &str)> for PairMap<V> {
    type Output = V;

    fn index(&self, (of, wrt): (&str, &str)) -> &V {
        match self.get(of, wrt) {
            Some(v) => v,
            None => panic!("no entry for ({of}, {wrt})"),
        }
    }
}

impl<V> IndexMut<(&str, &str)> for PairMap<V> {
    fn index_mut(&mut self, (of, wrt): (&str, &str)) -> &mut V {
        match self.get_mut(of, wrt) {
            Some(v) => v,
            None => panic!("no entry for ({of}, {wrt})"),
        }
    }
}
