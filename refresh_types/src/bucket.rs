//! The set of storage buckets that need their partitions refreshed.

use std::collections::BTreeSet;

/// Unique bucket identifiers gathered from a batch of storage event notifications.
///
/// Ordering is deterministic so that refreshes are issued in a stable order, but no caller
/// should rely on it. An empty set means there is nothing to refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketSet(BTreeSet<String>);

impl BucketSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bucket, returning `false` if it was already present
    pub fn insert(&mut self, bucket: impl Into<String>) -> bool {
        self.0.insert(bucket.into())
    }

    pub fn contains(&self, bucket: &str) -> bool {
        self.0.contains(bucket)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for BucketSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for BucketSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into))
    }
}

impl<'a> IntoIterator for &'a BucketSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::fmt::Display for BucketSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, bucket) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{bucket}")?;
        }
        write!(f, "}}")
    }
}
