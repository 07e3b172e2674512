//! Drop table definitions.
//!
//! A table is two parallel sequences: what can drop, and the cumulative
//! probability threshold (base 1000) at which each entry ends. Rolls that land
//! past the last threshold hit the implicit "no drop" bucket.

use serde::{Deserialize, Serialize};

/// Fixed-point base of drop probabilities
pub const DROP_SCALE: u32 = 1000;

/// One slot of a drop table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropEntry {
    /// Terminal item id
    Item(u32),
    /// Chained drop table id
    Table(u32),
}

/// Weighted drop table node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropTable {
    pub id: u32,
    pub entries: Vec<DropEntry>,
    /// Cumulative thresholds, one per entry, non-decreasing
    pub probabilities: Vec<u32>,
    /// On a root table: keep rolling on "no drop", sub-tables included, until
    /// this many items came out of the burst
    #[serde(default)]
    pub min_guaranteed: u32,
}

impl DropTable {
    /// Check the table shape; returns the reason it is unusable
    pub fn validate(&self) -> Result<(), String> {
        if self.probabilities.is_empty() {
            return Err("empty probability sequence".into());
        }
        if self.entries.len() != self.probabilities.len() {
            return Err(format!(
                "{} entries but {} probabilities",
                self.entries.len(),
                self.probabilities.len()
            ));
        }
        if self.probabilities.windows(2).any(|w| w[1] < w[0]) {
            return Err("probabilities are not cumulative".into());
        }
        Ok(())
    }
    
    /// Total drop mass (the last cumulative threshold)
    pub fn total(&self) -> u32 {
        self.probabilities.last().copied().unwrap_or(0)
    }
}
