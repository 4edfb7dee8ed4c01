//! Per-bucket refresh strategies.

use std::collections::HashMap;

/// How the partitions of a bucket's table are brought up to date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshStrategy {
    /// Reconcile the table's partition list with what exists in storage
    RepairTable { table: String },

    /// Add individual partitions for newly written objects
    ///
    /// Configurable but not supported by the query engine client yet.
    AddPartition { table: String },
}

impl RefreshStrategy {
    pub fn table(&self) -> &str {
        match self {
            Self::RepairTable { table } | Self::AddPartition { table } => table,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RepairTable { .. } => "repair_hive_table",
            Self::AddPartition { .. } => "add_hive_partition",
        }
    }
}

/// Mapping from bucket identifier to the strategy used to refresh it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StrategyMap(HashMap<String, RefreshStrategy>);

impl StrategyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a strategy for `bucket`, returning the one it replaced, if any
    pub fn insert(
        &mut self,
        bucket: impl Into<String>,
        strategy: RefreshStrategy,
    ) -> Option<RefreshStrategy> {
        self.0.insert(bucket.into(), strategy)
    }

    /// Look up the strategy for `bucket`; `None` means the bucket is not configured
    pub fn strategy_for(&self, bucket: &str) -> Option<&RefreshStrategy> {
        self.0.get(bucket)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, RefreshStrategy)> for StrategyMap {
    fn from_iter<I: IntoIterator<Item = (S, RefreshStrategy)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
