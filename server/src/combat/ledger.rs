//! Per-monster damage accounting used to elect the kill claimer.

use std::sync::Mutex;

use crate::task::lock;

/// Attacker id -> accumulated damage, in order of first hit
#[derive(Debug, Default)]
pub struct DamageLedger {
    entries: Mutex<Vec<(u64, u64)>>,
}

impl DamageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `attacker`. Zero-damage hits (misses) are not recorded.
    pub fn add(&self, attacker: u64, amount: u32) {
        if amount == 0 {
            return;
        }
        let mut entries = lock(&self.entries);
        match entries.iter_mut().find(|(id, _)| *id == attacker) {
            Some((_, total)) => *total += u64::from(amount),
            None => entries.push((attacker, u64::from(amount))),
        }
    }

    /// Attacker with the highest total. Ties go to whoever was inserted first,
    /// i.e. whoever landed the earliest hit; only a strictly greater total
    /// overtakes.
    pub fn top_contributor(&self) -> Option<u64> {
        let entries = lock(&self.entries);
        let mut best: Option<(u64, u64)> = None;
        for &(id, total) in entries.iter() {
            match best {
                Some((_, best_total)) if total <= best_total => {}
                _ => best = Some((id, total)),
            }
        }
        best.map(|(id, _)| id)
    }

    pub fn total_for(&self, attacker: u64) -> u64 {
        lock(&self.entries)
            .iter()
            .find(|(id, _)| *id == attacker)
            .map(|(_, total)| *total)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        lock(&self.entries).clear();
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}
