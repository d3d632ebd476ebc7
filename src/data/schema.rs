use std::collections::HashMap;

use crate::error::{ForecastError, Result};

/// Name of the target channel every batch must carry.
pub const TARGET: &str = "y";
/// Name of the availability mask channel every batch must carry.
pub const AVAILABLE_MASK: &str = "available_mask";

/// Ordered channel names with a name-to-index map resolved once at
/// construction. The order matches the channel axis of the tensor the
/// schema describes.
#[derive(Debug, Clone)]
pub struct Schema {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl Schema {
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { names, index }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| ForecastError::MissingChannel(name.to_string()))
    }

    /// Resolve a list of channel names into their positions, in list order.
    pub fn indexer(&self, names: &[String]) -> Result<Vec<usize>> {
        names.iter().map(|name| self.index_of(name)).collect()
    }

    /// Positions of every channel except `available_mask`. These are the
    /// channels the temporal scaler normalizes.
    pub fn data_indices(&self) -> Vec<usize> {
        self.names
            .iter()
            .enumerate()
            .filter(|(_, name)| name.as_str() != AVAILABLE_MASK)
            .map(|(i, _)| i)
            .collect()
    }
}
