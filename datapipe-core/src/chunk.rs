//! Materialized, ordered batches of items

use std::fmt;
use std::ops::Index;
use std::slice;

use serde::{Deserialize, Serialize};

/// An ordered batch of items produced by batching-style stages.
///
/// A chunk owns a single sequence and exposes two read views over it:
/// [`Chunk::iter`] for ordinary consumers and [`Chunk::raw_iter`] for
/// consumers that bypass item-level dataframe tracing. Its length is fixed
/// once built; [`Chunk::concat`] produces a new chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk<T> {
    items: Vec<T>,
}

impl<T> Chunk<T> {
    /// Create a chunk from an ordered sequence
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    /// Number of items in the chunk
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the chunk is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Get an item by position
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Iterate the items in insertion order
    pub fn iter(&self) -> ChunkIter<'_, T> {
        ChunkIter {
            inner: self.items.iter(),
        }
    }

    /// Iterate the backing sequence directly, bypassing the traced view
    pub fn raw_iter(&self) -> slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Borrow the backing sequence
    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    /// Take ownership of the backing sequence
    pub fn into_inner(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone> Chunk<T> {
    /// Build a new chunk holding the items of `self` followed by those of `other`
    #[must_use]
    pub fn concat(&self, other: &Chunk<T>) -> Chunk<T> {
        let mut items = Vec::with_capacity(self.len() + other.len());
        items.extend_from_slice(&self.items);
        items.extend_from_slice(&other.items);
        Chunk { items }
    }
}

impl<T: fmt::Display> Chunk<T> {
    /// Render the chunk as `indent` followed by a bracketed item list
    pub fn as_str(&self, indent: &str) -> String {
        let body = self
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{indent}[{body}]")
    }
}

impl<T: fmt::Display> fmt::Display for Chunk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str(""))
    }
}

impl<T> Default for Chunk<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> From<Vec<T>> for Chunk<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

impl<T> FromIterator<T> for Chunk<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> Index<usize> for Chunk<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a Chunk<T> {
    type Item = &'a T;
    type IntoIter = ChunkIter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T> IntoIterator for Chunk<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Ordered view over a chunk's items
#[derive(Debug, Clone)]
pub struct ChunkIter<'a, T> {
    inner: slice::Iter<'a, T>,
}

impl<'a, T> Iterator for ChunkIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for ChunkIter<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_chunk_views_share_order() {
        let chunk = Chunk::new(vec![1, 2, 3]);

        assert_eq!(chunk.len(), 3);
        assert_eq!(chunk.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(chunk.raw_iter().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert_eq!(chunk[1], 2);
        assert_eq!(chunk.get(3), None);
    }

    #[test]
    fn test_chunk_concat_builds_new_chunk() {
        let left = Chunk::new(vec![1, 2]);
        let right = Chunk::new(vec![3]);

        let joined = left.concat(&right);

        assert_eq!(joined, Chunk::new(vec![1, 2, 3]));
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn test_chunk_as_str() {
        let chunk = Chunk::new(vec![1, 2, 3]);
        assert_eq!(chunk.as_str("  "), "  [1, 2, 3]");
        assert_eq!(Chunk::<i32>::default().to_string(), "[]");
    }

    proptest! {
        #[test]
        fn prop_iteration_preserves_insertion_order(items in proptest::collection::vec(any::<i64>(), 0..64)) {
            let chunk: Chunk<i64> = items.iter().copied().collect();
            prop_assert_eq!(chunk.len(), items.len());
            prop_assert_eq!(chunk.iter().copied().collect::<Vec<_>>(), items.clone());
            prop_assert_eq!(chunk.raw_iter().copied().collect::<Vec<_>>(), items);
        }
    }
}
