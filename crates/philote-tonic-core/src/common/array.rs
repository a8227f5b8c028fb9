//! Dense, row-major `f64` arrays and the name-keyed maps that carry them
//! through an evaluation.

use crate::{Error, PairMap, Result};
use core::ops::{Index, IndexMut};
use std::collections::HashMap;

/// A dense array of doubles stored flat in row-major order.
#[derive(Clone, Debug, PartialEq)]
pub struct Array {
    shape: Vec<usize>,
    data: Vec<f64>,
}

impl Array {
    /// Zero-filled array of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    /// Single-element array of shape `[1]`.
    pub fn scalar(value: f64) -> Self {
        Self {
            shape: vec![1],
            data: vec![value],
        }
    }

    /// One-dimensional array holding `data`.
    pub fn vector(data: Vec<f64>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Wraps `data` with the given shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the element count does not match.
    pub fn from_shape_vec(name: &str, shape: &[usize], data: Vec<f64>) -> Result<Self> {
        if shape.iter().product::<usize>() != data.len() {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                actual: vec![data.len()],
            });
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// First element; the value of a scalar.
    pub fn value(&self) -> f64 {
        self.data.first().copied().unwrap_or_default()
    }

    /// Copies `values` into this array, keeping the shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShapeMismatch`] if the lengths differ.
    pub fn assign(&mut self, name: &str, values: &[f64]) -> Result<()> {
        if values.len() != self.data.len() {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: self.shape.clone(),
                actual: vec![values.len()],
            });
        }
        self.data.copy_from_slice(values);
        Ok(())
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }
}

impl Index<usize> for Array {
    type Output = f64;

    fn index(&self, i: usize) -> &f64 {
        &self.data[i]
    }
}

impl IndexMut<usize> for Array {
    fn index_mut(&mut self, i: usize) -> &mut f64 {
        &mut self.data[i]
    }
}

/// Jacobian blocks keyed by `(of, wrt)`.
pub type Jacobian = PairMap<Array>;

/// Insertion-ordered map from variable name to [`Array`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArrayMap {
    entries: Vec<(String, Array)>,
    index: HashMap<String, usize>,
}

impl ArrayMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Array> {
        self.index.get(name).map(|&i| &self.entries[i].1)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Array> {
        self.index.get(name).map(|&i| &mut self.entries[i].1)
    }

    /// Inserts or replaces `name`. Replacing keeps the original position.
    pub fn insert(&mut self, name: impl Into<String>, array: Array) -> Option<Array> {
        let name = name.into();
        if let Some(&i) = self.index.get(&name) {
            return Some(core::mem::replace(&mut self.entries[i].1, array));
        }
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push((name, array));
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array)> {
        self.entries.iter().map(|(n, a)| (n.as_str(), a))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Scalar value of `name`, for disciplines reading single-element inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownVariable`] if `name` is absent.
    pub fn scalar(&self, name: &str) -> Result<f64> {
        self.get(name)
            .map(Array::value)
            .ok_or_else(|| Error::UnknownVariable {
                name: name.to_string(),
                role: crate::meta::Role::Input,
            })
    }
}

impl IntoIterator for ArrayMap {
    type Item = (String, Array);
    type IntoIter = std::vec::IntoIter<(String, Array)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<S: Into<String>> FromIterator<(S, Array)> for ArrayMap {
    fn from_iter<I: IntoIterator<Item = (S, Array)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, array) in iter {
            map.insert(name, array);
        }
        map
    }
}

/// # Panics
///
/// Panics if `name` is not present.
impl Index<&str> for ArrayMap {
    type Output = Array;

    fn index(&self, name: &str) -> &Array {
        match self.get(name) {
            Some(a) => a,
            None => panic!("no array named `{name}`"),
        }
    }
}

impl IndexMut<&str> for ArrayMap {
    fn index_mut(&mut self, name: &str) -> &mut Array {
        match self.get_mut(name) {
            Some(a) => a,
            None => panic!("no array named `{name}`"),
        }
    }
}
