//! C6 — Asset Store: a bounded, per-type LRU collection of adapter-managed
//! documents (cutting tools, program fragments, …) addressed by id
//! (spec.md §4.6).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// A single stored asset (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Asset {
    /// Unique id, as reported by `@ASSET@`/`@UPDATE_ASSET@`.
    pub id: String,
    /// The adapter-reported asset type, e.g. `CuttingTool`.
    pub asset_type: String,
    /// The device uuid that owns this asset, if known.
    pub device_uuid: Option<String>,
    /// When this asset was last inserted or updated.
    pub timestamp: DateTime<Utc>,
    /// The raw asset body (opaque to the core — no XML/JSON parsing here).
    pub body: String,
    /// Set once `remove`/`removeAll` tombstones this asset. Retained (not
    /// deleted) until evicted by the type's LRU bound.
    pub removed: bool,
}

/// A command produced by T3/T4 and executed by T11 `DeliverAsset`
/// (spec.md §4.5 T3, T11).
#[derive(Debug, Clone, PartialEq)]
pub enum AssetCommand {
    /// `@ASSET@`/`@UPDATE_ASSET@`: insert or replace.
    Put {
        /// Asset id.
        id: String,
        /// Asset type.
        asset_type: String,
        /// Owning device uuid, if known.
        device_uuid: Option<String>,
        /// Observation timestamp.
        timestamp: DateTime<Utc>,
        /// Raw body.
        body: String,
    },
    /// `@REMOVE_ASSET@`.
    Remove {
        /// Asset id.
        id: String,
        /// Removal timestamp.
        timestamp: DateTime<Utc>,
    },
    /// `@REMOVE_ALL_ASSETS@`.
    RemoveAll {
        /// Owning device uuid filter, if given.
        device_uuid: Option<String>,
        /// Asset type filter, if given.
        asset_type: Option<String>,
        /// Removal timestamp.
        timestamp: DateTime<Utc>,
    },
}

/// The effect a successful [`AssetStore`] mutation has on the model, used
/// by T11 to emit the synthetic `ASSET_CHANGED`/`ASSET_REMOVED`
/// observations back through T10 (spec.md §4.5 T11).
#[derive(Debug, Clone, PartialEq)]
pub enum AssetEvent {
    /// An asset was inserted or replaced.
    Changed {
        /// Asset id.
        id: String,
        /// Asset type.
        asset_type: String,
    },
    /// An asset was tombstoned.
    Removed {
        /// Asset id.
        id: String,
        /// Asset type.
        asset_type: String,
    },
}

#[derive(Debug, Default)]
struct AssetStoreState {
    assets: HashMap<String, Asset>,
    /// Insertion/update order per type, oldest first — the LRU eviction
    /// queue (spec.md §4.6 "per-type LRU eviction").
    order_by_type: HashMap<String, VecDeque<String>>,
}

/// Bounded, tombstone-based asset collection with its own independent lock
/// (spec.md §5 "The asset store holds its own lock").
pub struct AssetStore {
    state: RwLock<AssetStoreState>,
    max_assets: usize,
}

impl AssetStore {
    /// Builds an empty store bounded to `max_assets` retained assets per
    /// type (spec.md §6 `MaxAssets`).
    pub fn new(max_assets: usize) -> Self {
        Self {
            state: RwLock::new(AssetStoreState::default()),
            max_assets,
        }
    }

    /// Inserts or replaces an asset, evicting the oldest surviving asset of
    /// the same type if the bound is exceeded, and returns an
    /// [`AssetEvent::Changed`] for the caller to route to `DeliverAsset`
    /// (spec.md §4.6 `put`).
    pub fn put(
        &self,
        id: impl Into<String>,
        asset_type: impl Into<String>,
        device_uuid: Option<String>,
        timestamp: DateTime<Utc>,
        body: impl Into<String>,
    ) -> AssetEvent {
        let id = id.into();
        let asset_type = asset_type.into();
        let mut state = self.state.write();

        if state.assets.contains_key(&id) {
            // Updating in place: drop the old position so it moves to the
            // back of its type's LRU queue (most-recently-touched survives).
            if let Some(queue) = state.order_by_type.get_mut(&asset_type) {
                queue.retain(|existing| existing != &id);
            }
        }

        state
            .order_by_type
            .entry(asset_type.clone())
            .or_default()
            .push_back(id.clone());

        state.assets.insert(
            id.clone(),
            Asset {
                id: id.clone(),
                asset_type: asset_type.clone(),
                device_uuid,
                timestamp,
                body: body.into(),
                removed: false,
            },
        );

        self.evict_over_bound(&mut state, &asset_type);

        AssetEvent::Changed { id, asset_type }
    }

    fn evict_over_bound(&self, state: &mut AssetStoreState, asset_type: &str) {
        loop {
            let queue_len = state
                .order_by_type
                .get(asset_type)
                .map(VecDeque::len)
                .unwrap_or(0);
            if queue_len <= self.max_assets {
                break;
            }
            let Some(queue) = state.order_by_type.get_mut(asset_type) else {
                break;
            };
            let Some(oldest) = queue.pop_front() else {
                break;
            };
            state.assets.remove(&oldest);
        }
    }

    /// Looks up an asset by id, including tombstoned ones.
    pub fn get(&self, id: &str) -> Option<Asset> {
        self.state.read().assets.get(id).cloned()
    }

    /// Lists assets newest-first, optionally filtered by device uuid and/or
    /// type, excluding tombstones unless `include_removed` is set
    /// (spec.md §4.6 `getAll`).
    pub fn get_all(
        &self,
        device_uuid: Option<&str>,
        asset_type: Option<&str>,
        include_removed: bool,
    ) -> Vec<Asset> {
        let state = self.state.read();
        let mut matches: Vec<&Asset> = state
            .assets
            .values()
            .filter(|asset| include_removed || !asset.removed)
            .filter(|asset| {
                device_uuid
                    .map(|uuid| asset.device_uuid.as_deref() == Some(uuid))
                    .unwrap_or(true)
            })
            .filter(|asset| asset_type.map(|t| asset.asset_type == t).unwrap_or(true))
            .collect();
        matches.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matches.into_iter().cloned().collect()
    }

    /// Marks an asset removed without deleting it, returning `true` if it
    /// existed (spec.md §4.6 `remove`).
    pub fn remove(&self, id: &str, timestamp: DateTime<Utc>) -> Option<AssetEvent> {
        let mut state = self.state.write();
        let asset = state.assets.get_mut(id)?;
        asset.removed = true;
        asset.timestamp = timestamp;
        Some(AssetEvent::Removed {
            id: id.to_string(),
            asset_type: asset.asset_type.clone(),
        })
    }

    /// Tombstones every asset matching the given filters, returning one
    /// [`AssetEvent::Removed`] per affected asset (spec.md §4.6
    /// `removeAll`).
    pub fn remove_all(
        &self,
        device_uuid: Option<&str>,
        asset_type: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Vec<AssetEvent> {
        let mut state = self.state.write();
        let ids: Vec<String> = state
            .assets
            .values()
            .filter(|asset| !asset.removed)
            .filter(|asset| {
                device_uuid
                    .map(|uuid| asset.device_uuid.as_deref() == Some(uuid))
                    .unwrap_or(true)
            })
            .filter(|asset| asset_type.map(|t| asset.asset_type == t).unwrap_or(true))
            .map(|asset| asset.id.clone())
            .collect();

        let mut events = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(asset) = state.assets.get_mut(&id) {
                asset.removed = true;
                asset.timestamp = timestamp;
                events.push(AssetEvent::Removed {
                    id,
                    asset_type: asset.asset_type.clone(),
                });
            }
        }
        events
    }

    /// Counts assets, optionally filtered by type, excluding tombstones
    /// unless `include_removed` (spec.md §4.6 `count`).
    pub fn count(&self, asset_type: Option<&str>, include_removed: bool) -> usize {
        self.state
            .read()
            .assets
            .values()
            .filter(|asset| include_removed || !asset.removed)
            .filter(|asset| asset_type.map(|t| asset.asset_type == t).unwrap_or(true))
            .count()
    }

    /// Executes an [`AssetCommand`] against the store, returning the
    /// resulting event(s) for `DeliverAsset` to route (spec.md §4.5 T11).
    pub fn apply(&self, command: AssetCommand) -> Vec<AssetEvent> {
        match command {
            AssetCommand::Put {
                id,
                asset_type,
                device_uuid,
                timestamp,
                body,
            } => vec![self.put(id, asset_type, device_uuid, timestamp, body)],
            AssetCommand::Remove { id, timestamp } => {
                self.remove(&id, timestamp).into_iter().collect()
            }
            AssetCommand::RemoveAll {
                device_uuid,
                asset_type,
                timestamp,
            } => self.remove_all(device_uuid.as_deref(), asset_type.as_deref(), timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = AssetStore::new(4);
        store.put("a1", "CuttingTool", None, ts("2021-01-01T00:00:00Z"), "<body/>");
        let asset = store.get("a1").unwrap();
        assert_eq!(asset.body, "<body/>");
        assert!(!asset.removed);
    }

    #[test]
    fn eviction_drops_oldest_of_the_same_type_first() {
        let store = AssetStore::new(2);
        store.put("a1", "CuttingTool", None, ts("2021-01-01T00:00:00Z"), "1");
        store.put("a2", "CuttingTool", None, ts("2021-01-01T00:00:01Z"), "2");
        store.put("a3", "CuttingTool", None, ts("2021-01-01T00:00:02Z"), "3");
        assert!(store.get("a1").is_none());
        assert!(store.get("a2").is_some());
        assert!(store.get("a3").is_some());
        assert_eq!(store.count(Some("CuttingTool"), false), 2);
    }

    #[test]
    fn remove_tombstones_without_deleting() {
        let store = AssetStore::new(4);
        store.put("a1", "CuttingTool", None, ts("2021-01-01T00:00:00Z"), "1");
        store.remove("a1", ts("2021-01-01T00:01:00Z"));
        assert!(store.get("a1").unwrap().removed);
        assert_eq!(store.count(Some("CuttingTool"), false), 0);
        assert_eq!(store.count(Some("CuttingTool"), true), 1);
    }

    #[test]
    fn get_all_orders_newest_first() {
        let store = AssetStore::new(8);
        store.put("a1", "CuttingTool", None, ts("2021-01-01T00:00:00Z"), "1");
        store.put("a2", "CuttingTool", None, ts("2021-01-02T00:00:00Z"), "2");
        let all = store.get_all(None, None, false);
        assert_eq!(all[0].id, "a2");
        assert_eq!(all[1].id, "a1");
    }

    #[test]
    fn remove_all_filters_by_type() {
        let store = AssetStore::new(8);
        store.put("a1", "CuttingTool", None, ts("2021-01-01T00:00:00Z"), "1");
        store.put("a2", "Program", None, ts("2021-01-01T00:00:00Z"), "2");
        let events = store.remove_all(None, Some("CuttingTool"), ts("2021-01-01T00:01:00Z"));
        assert_eq!(events.len(), 1);
        assert!(store.get("a1").unwrap().removed);
        assert!(!store.get("a2").unwrap().removed);
    }
}
