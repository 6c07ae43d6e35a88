//! Ordered channel-name index
//!
//! Resolves channels by name instead of position. The name → position table is
//! built once at construction and shared (behind `Arc`) by every batch and
//! window derived from a dataset.

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Ordered, unique list of channel names with O(1) lookup in both directions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ChannelIndex {
    names: Vec<String>,
    positions: HashMap<String, usize>,
}

impl ChannelIndex {
    /// Build an index, rejecting duplicated names
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let mut positions = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if positions.insert(name.clone(), i).is_some() {
                return Err(ForecastError::SchemaError(format!(
                    "duplicated channel name '{}'",
                    name
                )));
            }
        }
        Ok(Self { names, positions })
    }

    /// Number of channels
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the index holds no channels
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Channel names in positional order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Name at a position
    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    /// Whether a channel exists
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Position of a channel, if present
    pub fn position(&self, name: &str) -> Option<usize> {
        self.positions.get(name).copied()
    }

    /// Position of a channel, failing with a schema error when absent
    pub fn get_loc(&self, name: &str) -> Result<usize> {
        self.position(name).ok_or_else(|| {
            ForecastError::SchemaError(format!("channel '{}' not found in {}", name, self))
        })
    }

    /// Positions of several channels, in the order requested
    pub fn get_indexer<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<usize>> {
        names.iter().map(|n| self.get_loc(n.as_ref())).collect()
    }

    /// Names from `names` that are not part of this index
    pub fn missing<'a, S: AsRef<str>>(&self, names: &'a [S]) -> Vec<&'a str> {
        names
            .iter()
            .map(|n| n.as_ref())
            .filter(|n| !self.contains(n))
            .collect()
    }

    /// Iterate over channel names
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for ChannelIndex {
    type Error = ForecastError;

    fn try_from(names: Vec<String>) -> Result<Self> {
        Self::new(names)
    }
}

impl From<ChannelIndex> for Vec<String> {
    fn from(index: ChannelIndex) -> Self {
        index.names
    }
}

impl PartialEq for ChannelIndex {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for ChannelIndex {}

impl fmt::Display for ChannelIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.names.join(", "))
    }
}
