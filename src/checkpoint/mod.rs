//! C3 — Checkpoint: the last-known-value snapshot that backs `current` and
//! every buffer roll-forward reconstruction (spec.md §4.3).

use crate::model::{DataItemId, IdRemap};
use crate::observation::{ConditionLevel, Observation, ObservationValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A checkpoint's entry for a single data item id: either a plain
/// last-value slot, or an ordered condition chain (spec.md §4.3).
#[derive(Debug, Clone)]
pub enum CheckpointEntry {
    /// The latest observation for a non-condition data item.
    Single(Arc<Observation>),
    /// The active condition chain, in report order. A chain resting at
    /// `NORMAL` with no active fault is represented as a single-element
    /// chain holding that `NORMAL` observation.
    ConditionChain(Vec<Arc<Observation>>),
}

impl CheckpointEntry {
    /// The most recently reported observation in this entry (the sole
    /// value, or the chain's last element).
    pub fn latest(&self) -> &Arc<Observation> {
        match self {
            CheckpointEntry::Single(obs) => obs,
            CheckpointEntry::ConditionChain(chain) => {
                chain.last().expect("condition chain is never empty")
            }
        }
    }

    /// All observations this entry currently holds, report order.
    pub fn all(&self) -> Vec<&Arc<Observation>> {
        match self {
            CheckpointEntry::Single(obs) => vec![obs],
            CheckpointEntry::ConditionChain(chain) => chain.iter().collect(),
        }
    }
}

/// A snapshot of the latest observation (or condition chain) for every
/// data item seen so far, merged per spec.md §4.3's insert rules.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    entries: HashMap<DataItemId, CheckpointEntry>,
}

impl Checkpoint {
    /// An empty checkpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges `obs` into the checkpoint, applying the condition-chain and
    /// data-set merge rules of spec.md §4.3.
    pub fn insert(&mut self, obs: Arc<Observation>) {
        if obs.is_condition() {
            self.insert_condition(obs);
            return;
        }

        if let ObservationValue::DataSet(_) | ObservationValue::Table(_) = &obs.value {
            if let Some(merged) = self.merge_data_set(&obs) {
                self.entries
                    .insert(obs.data_item_id.clone(), CheckpointEntry::Single(merged));
                return;
            }
        }

        self.entries
            .insert(obs.data_item_id.clone(), CheckpointEntry::Single(obs));
    }

    fn insert_condition(&mut self, obs: Arc<Observation>) {
        let level = obs.condition_level().expect("condition observation");
        let native_code = obs.native_code().map(str::to_string);
        let data_item_id = obs.data_item_id.clone();

        if matches!(level, ConditionLevel::Unavailable) {
            self.entries
                .insert(data_item_id, CheckpointEntry::ConditionChain(vec![obs]));
            return;
        }

        if matches!(level, ConditionLevel::Normal) && native_code.is_none() {
            self.entries
                .insert(data_item_id, CheckpointEntry::ConditionChain(vec![obs]));
            return;
        }

        let mut chain = match self.entries.remove(&data_item_id) {
            Some(CheckpointEntry::ConditionChain(chain)) => chain,
            Some(CheckpointEntry::Single(existing)) => vec![existing],
            None => Vec::new(),
        };

        if matches!(level, ConditionLevel::Normal) {
            if let Some(code) = &native_code {
                chain.retain(|entry| entry.native_code() != Some(code.as_str()));
            }
            if chain.is_empty() {
                chain.push(obs);
            }
        } else {
            if let Some(code) = &native_code {
                if let Some(existing) = chain
                    .iter_mut()
                    .find(|entry| entry.native_code() == Some(code.as_str()))
                {
                    *existing = obs;
                } else {
                    chain.push(obs);
                }
            } else {
                chain.push(obs);
            }
        }

        self.entries
            .insert(data_item_id, CheckpointEntry::ConditionChain(chain));
    }

    /// Computes the merged data-set/table value for `obs` against whatever
    /// is already in the checkpoint, returning `None` when the result is a
    /// no-op that must never reach the buffer (spec.md §4.3).
    fn merge_data_set(&self, obs: &Observation) -> Option<Arc<Observation>> {
        let existing = self.entries.get(&obs.data_item_id).map(CheckpointEntry::latest);

        match &obs.value {
            ObservationValue::DataSet(update) => {
                let mut merged = match existing.map(|e| &e.value) {
                    Some(ObservationValue::DataSet(current)) if obs.reset_triggered.is_none() => {
                        current.clone()
                    }
                    _ => Default::default(),
                };
                let mut changed = obs.reset_triggered.is_some();
                for (key, value) in update {
                    if value.is_empty() {
                        changed |= merged.remove(key).is_some();
                    } else {
                        changed |= merged.get(key) != Some(value);
                        merged.insert(key.clone(), value.clone());
                    }
                }
                if !changed {
                    return None;
                }
                let mut next = (*obs).clone();
                next.value = ObservationValue::DataSet(merged);
                Some(Arc::new(next))
            }
            ObservationValue::Table(update) => {
                let mut merged = match existing.map(|e| &e.value) {
                    Some(ObservationValue::Table(current)) if obs.reset_triggered.is_none() => {
                        current.clone()
                    }
                    _ => Default::default(),
                };
                let mut changed = obs.reset_triggered.is_some();
                for (key, row) in update {
                    if row.is_empty() {
                        changed |= merged.remove(key).is_some();
                    } else {
                        changed |= merged.get(key) != Some(row);
                        merged.insert(key.clone(), row.clone());
                    }
                }
                if !changed {
                    return None;
                }
                let mut next = (*obs).clone();
                next.value = ObservationValue::Table(merged);
                Some(Arc::new(next))
            }
            _ => None,
        }
    }

    /// The current entry for a data item id, if any observation has been
    /// recorded for it.
    pub fn get(&self, id: &str) -> Option<&CheckpointEntry> {
        self.entries.get(id)
    }

    /// Clones entries whose data item id is present in `filter`, or every
    /// entry when `filter` is `None`.
    pub fn copy(&self, filter: Option<&HashSet<DataItemId>>) -> Checkpoint {
        let entries = self
            .entries
            .iter()
            .filter(|(id, _)| filter.map(|f| f.contains(*id)).unwrap_or(true))
            .map(|(id, entry)| (id.clone(), entry.clone()))
            .collect();
        Checkpoint { entries }
    }

    /// Rebinds every entry's key to its new id after a model reload,
    /// dropping entries for data items that did not survive (spec.md §4.3
    /// `updateDataItems`, §9 Open Question).
    pub fn update_data_items(&mut self, remap: &IdRemap) {
        let old = std::mem::take(&mut self.entries);
        for (old_id, entry) in old {
            if let Some(new_id) = remap.get(&old_id) {
                self.entries.insert(new_id.clone(), entry);
            }
        }
    }

    /// Whether applying `obs` on top of this checkpoint's current contents
    /// would be a no-op, per the data-set merge rule in spec.md §4.3. Used
    /// by the buffer to drop no-op data-set updates before they are
    /// appended.
    pub fn data_set_difference(&self, obs: &Observation) -> Option<Arc<Observation>> {
        match &obs.value {
            ObservationValue::DataSet(_) | ObservationValue::Table(_) => self.merge_data_set(obs),
            _ => Some(Arc::new(obs.clone())),
        }
    }

    /// Number of data items with at least one entry.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no data item has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates every (data item id, entry) pair.
    pub fn iter(&self) -> impl Iterator<Item = (&DataItemId, &CheckpointEntry)> {
        self.entries.iter()
    }
}
