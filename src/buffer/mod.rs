//! C4 — Circular Buffer: the fixed-size ring of observations and the
//! rolling checkpoint snapshots that back `checkpoint_at` (spec.md §4.4).

use crate::checkpoint::Checkpoint;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::model::DataItemId;
use crate::observation::{Observation, ObservationValue};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

struct BufferState {
    ring: Vec<Option<Arc<Observation>>>,
    capacity: u64,
    sequence: u64,
    first_sequence: u64,
    latest: Checkpoint,
    first: Checkpoint,
    checkpoint_freq: u64,
    checkpoint_count: u64,
    checkpoints: VecDeque<(u64, Checkpoint)>,
    generation: u64,
}

/// The fixed-capacity ring of recent observations, with `latest`/`first`
/// checkpoints and periodic interior snapshots for `checkpoint_at`
/// (spec.md §4.4).
pub struct CircularBuffer {
    inner: Mutex<BufferState>,
    changed: Condvar,
}

impl CircularBuffer {
    /// Builds an empty buffer sized per `config` (spec.md §6
    /// `BufferSize`/`CheckpointFrequency`).
    pub fn new(config: &Config) -> Self {
        let capacity = config.buffer_capacity();
        let checkpoint_freq = config.checkpoint_frequency.max(1);
        let checkpoint_count = capacity / checkpoint_freq;
        Self {
            inner: Mutex::new(BufferState {
                ring: vec![None; capacity as usize],
                capacity,
                sequence: 1,
                first_sequence: 1,
                latest: Checkpoint::new(),
                first: Checkpoint::new(),
                checkpoint_freq,
                checkpoint_count,
                checkpoints: VecDeque::new(),
                generation: 0,
            }),
            changed: Condvar::new(),
        }
    }

    /// The buffer's fixed capacity.
    pub fn capacity(&self) -> u64 {
        self.inner.lock().capacity
    }

    /// The next sequence number that will be assigned.
    pub fn sequence(&self) -> u64 {
        self.inner.lock().sequence
    }

    /// The oldest sequence number still retained in the ring.
    pub fn first_sequence(&self) -> u64 {
        self.inner.lock().first_sequence
    }

    /// A clone of the running `latest` checkpoint (current values).
    pub fn latest(&self) -> Checkpoint {
        self.inner.lock().latest.copy(None)
    }

    /// The latest observation recorded for a single data item, without
    /// cloning the whole checkpoint (used by T7 `DuplicateFilter`).
    pub fn latest_for(&self, id: &str) -> Option<Arc<Observation>> {
        self.inner.lock().latest.get(id).map(|e| e.latest().clone())
    }

    /// Appends `obs` to the buffer, returning its assigned sequence, or `0`
    /// if the observation was rejected (orphan, or a no-op data-set update)
    /// (spec.md §4.4).
    pub fn append(&self, obs: Observation) -> u64 {
        if obs.orphan {
            return 0;
        }

        let mut state = self.inner.lock();

        let stored = if matches!(obs.value, ObservationValue::DataSet(_) | ObservationValue::Table(_))
            && !obs.is_unavailable()
        {
            match state.latest.data_set_difference(&obs) {
                Some(merged) => merged,
                None => return 0,
            }
        } else {
            Arc::new(obs)
        };

        let seq = state.sequence;
        let mut owned = (*stored).clone();
        owned.sequence = Some(seq);
        let stored = Arc::new(owned);

        let idx = (seq % state.capacity) as usize;
        let evicted = state.ring[idx].take();
        state.ring[idx] = Some(stored.clone());
        state.latest.insert(stored.clone());

        if seq == 1 {
            state.first.insert(stored.clone());
        } else if let Some(old) = evicted {
            state.first.insert(old.clone());
            state.first_sequence += 1;
        }

        if state.checkpoint_count > 0 && seq % state.checkpoint_freq == 0 {
            let snapshot = state.latest.copy(None);
            state.checkpoints.push_back((seq, snapshot));
            while state.checkpoints.len() as u64 > state.checkpoint_count {
                state.checkpoints.pop_front();
            }
        }

        state.sequence += 1;
        state.generation += 1;
        self.changed.notify_all();

        seq
    }

    /// Looks up the observation at a specific sequence number, if it is
    /// still retained (spec.md §4.4 `at`).
    pub fn at(&self, seq: u64) -> Option<Arc<Observation>> {
        let state = self.inner.lock();
        if seq < state.first_sequence || seq >= state.sequence {
            return None;
        }
        let off = seq - state.first_sequence;
        if off >= state.capacity {
            return None;
        }
        state.ring[(seq % state.capacity) as usize].clone()
    }

    /// Walks the buffer for a bounded window of observations (spec.md
    /// §4.4 `range`).
    ///
    /// `count >= 0` walks forward from `from` (default `firstSequence`);
    /// `count < 0` walks backward from `from` (default `nextSequence - 1`),
    /// returning up to `|count|` entries. Returns `(observations,
    /// nextSequence, endOfBuffer)`.
    pub fn range(
        &self,
        from: Option<u64>,
        to: Option<u64>,
        count: i64,
        filter: Option<&HashSet<DataItemId>>,
    ) -> Result<(Vec<Arc<Observation>>, u64, bool)> {
        let state = self.inner.lock();
        let capacity = state.capacity;
        let first_sequence = state.first_sequence;
        let next_sequence = state.sequence;

        let magnitude = count.unsigned_abs();
        if magnitude == 0 || magnitude >= capacity {
            return Err(AgentError::out_of_range(format!(
                "count magnitude {magnitude} outside [1, {capacity})"
            )));
        }

        if count >= 0 {
            let start = from.unwrap_or(first_sequence);
            if start < first_sequence || start >= next_sequence {
                return Err(AgentError::out_of_range(format!(
                    "sequence {start} outside [{first_sequence}, {next_sequence})"
                )));
            }

            if let Some(to_seq) = to {
                // `to` inverts the walk: sample up to and including `to`,
                // i.e. the window of up to `magnitude` entries ending at
                // `to` and not reaching below `from` (spec.md §4.4).
                if to_seq < first_sequence || to_seq >= next_sequence {
                    return Err(AgentError::out_of_range(format!(
                        "sequence {to_seq} outside [{first_sequence}, {next_sequence})"
                    )));
                }
                let mut collected = Vec::new();
                let mut cursor = to_seq;
                loop {
                    if let Some(obs) = state.ring[(cursor % capacity) as usize].as_ref() {
                        if !obs.orphan && matches_filter(obs, filter) {
                            collected.push(obs.clone());
                        }
                    }
                    if cursor <= start || (collected.len() as u64) >= magnitude {
                        break;
                    }
                    cursor -= 1;
                }
                collected.reverse();
                let next = to_seq + 1;
                let end_of_buffer = next >= next_sequence;
                return Ok((collected, next, end_of_buffer));
            }

            let mut results = Vec::new();
            let mut cursor = start;
            while cursor < next_sequence && (results.len() as u64) < magnitude {
                if let Some(obs) = state.ring[(cursor % capacity) as usize].as_ref() {
                    if !obs.orphan && matches_filter(obs, filter) {
                        results.push(obs.clone());
                    }
                }
                cursor += 1;
            }
            let end_of_buffer = cursor >= next_sequence;
            Ok((results, cursor, end_of_buffer))
        } else {
            let start = from.unwrap_or(next_sequence.saturating_sub(1));
            if start < first_sequence || start >= next_sequence {
                return Err(AgentError::out_of_range(format!(
                    "sequence {start} outside [{first_sequence}, {next_sequence})"
                )));
            }
            let floor = to.unwrap_or(first_sequence).max(first_sequence);

            let mut collected = Vec::new();
            let mut cursor = start;
            loop {
                if let Some(obs) = state.ring[(cursor % capacity) as usize].as_ref() {
                    if !obs.orphan && matches_filter(obs, filter) {
                        collected.push(obs.clone());
                    }
                }
                if cursor <= floor || (collected.len() as u64) >= magnitude {
                    break;
                }
                cursor -= 1;
            }
            collected.reverse();
            let end_of_buffer = cursor <= first_sequence;
            Ok((collected, cursor, end_of_buffer))
        }
    }

    /// Reconstructs the checkpoint state as of `seq` by finding the
    /// nearest retained snapshot at or before `seq` and replaying the ring
    /// forward (spec.md §4.4 `checkpointAt`).
    pub fn checkpoint_at(&self, seq: u64, filter: Option<&HashSet<DataItemId>>) -> Checkpoint {
        let state = self.inner.lock();
        let freq = state.checkpoint_freq;
        let fi = state.first_sequence / freq;
        let at_bucket = seq / freq;
        let dt = at_bucket as i64 - fi as i64 - 1;

        let (mut checkpoint, replay_start) = if dt < 0 {
            (state.first.copy(filter), state.first_sequence)
        } else {
            match state.checkpoints.get(dt as usize) {
                Some((cp_seq, cp)) => (cp.copy(filter), *cp_seq),
                None => (state.first.copy(filter), state.first_sequence),
            }
        };

        let mut cursor = replay_start.max(state.first_sequence);
        while cursor <= seq && cursor < state.sequence {
            if let Some(obs) = state.ring[(cursor % state.capacity) as usize].as_ref() {
                checkpoint.insert(obs.clone());
            }
            cursor += 1;
        }
        checkpoint
    }

    /// Forces the next sequence number, for tests and restart recovery
    /// (spec.md §4.4 `setSequence`).
    pub fn set_sequence(&self, new_seq: u64) {
        let mut state = self.inner.lock();
        let ring_size = state.sequence - state.first_sequence;
        state.sequence = new_seq;
        if new_seq > state.capacity {
            state.first_sequence = new_seq - ring_size;
        }
    }

    /// Rebinds every stored observation's data item id after a model
    /// reload, leaving unmapped ones as orphans in place (the buffer
    /// itself does not drop them — spec.md §3 invariant 3).
    pub fn update_data_items(&self, remap: &crate::model::IdRemap) {
        let mut state = self.inner.lock();
        for slot in state.ring.iter_mut() {
            if let Some(obs) = slot {
                if let Some(new_id) = remap.get(&obs.data_item_id) {
                    let mut updated = (**obs).clone();
                    updated.data_item_id = new_id.clone();
                    *obs = Arc::new(updated);
                } else {
                    let mut orphaned = (**obs).clone();
                    orphaned.orphan = true;
                    *obs = Arc::new(orphaned);
                }
            }
        }
        state.latest.update_data_items(remap);
        state.first.update_data_items(remap);
        for (_, cp) in state.checkpoints.iter_mut() {
            cp.update_data_items(remap);
        }
    }

    /// A handle sinks can block on to learn when new observations have
    /// been appended, without holding the buffer's lock while they format
    /// output (spec.md §5).
    pub fn subscribe(&self) -> BufferWatch<'_> {
        let state = self.inner.lock();
        BufferWatch {
            buffer: self,
            last_seen: state.generation,
        }
    }
}

fn matches_filter(obs: &Observation, filter: Option<&HashSet<DataItemId>>) -> bool {
    filter.map(|f| f.contains(&obs.data_item_id)).unwrap_or(true)
}

/// A condvar-backed watch on buffer activity (spec.md §5 "buffer signals
/// observers after unlocking").
pub struct BufferWatch<'a> {
    buffer: &'a CircularBuffer,
    last_seen: u64,
}

impl<'a> BufferWatch<'a> {
    /// Blocks until a new observation is appended or `timeout` elapses,
    /// returning `true` if new data arrived.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let mut state = self.buffer.inner.lock();
        if state.generation != self.last_seen {
            self.last_seen = state.generation;
            return true;
        }
        let result = self.buffer.changed.wait_for(&mut state, timeout);
        let arrived = state.generation != self.last_seen;
        self.last_seen = state.generation;
        arrived && !result.timed_out()
    }
}
