//! Agent-wide tunables (spec.md §6).

/// Tunables recognized by the core, all with the defaults MTConnect agents
/// conventionally ship.
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffer capacity exponent; the buffer holds `2^buffer_exponent`
    /// observations. Default 17 (131 072 observations).
    pub buffer_exponent: u32,
    /// Interior checkpoint cadence: every `checkpoint_frequency`-th sequence
    /// gets a rolling snapshot.
    pub checkpoint_frequency: u64,
    /// Per-type and global cap on retained (non-evicted) assets.
    pub max_assets: usize,
    /// Preserve a device's UUID across a model reload even if the new model
    /// specifies a different one.
    pub preserve_uuid: bool,
    /// Treat every incoming line's leading timestamp as absent, substituting
    /// the system clock instead.
    pub ignore_timestamps: bool,
    /// Apply each data item's cached unit conversion on ingest.
    pub conversion_required: bool,
    /// Uppercase free-text EVENT values (MESSAGE/ALARM exempt).
    pub upcase_data_item_value: bool,
    /// Run the duplicate-suppression transform.
    pub filter_duplicates: bool,
    /// Emit `AVAILABLE`/`UNAVAILABLE` automatically on source connect/disconnect.
    pub auto_available: bool,
    /// Seconds of silence from a source before it is considered stale.
    pub legacy_timeout_secs: u64,
    /// Milliseconds between reconnect attempts for a dropped source.
    pub reconnect_interval_ms: u64,
    /// SHDR protocol version spoken by adapters (1 or 2).
    pub shdr_version: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_exponent: 17,
            checkpoint_frequency: 1000,
            max_assets: 1024,
            preserve_uuid: false,
            ignore_timestamps: false,
            conversion_required: true,
            upcase_data_item_value: false,
            filter_duplicates: true,
            auto_available: true,
            legacy_timeout_secs: 600,
            reconnect_interval_ms: 10_000,
            shdr_version: 2,
        }
    }
}

impl Config {
    /// A small buffer suited to unit tests: capacity 8, checkpoint every 4.
    pub fn for_testing() -> Self {
        Self {
            buffer_exponent: 3,
            checkpoint_frequency: 4,
            max_assets: 16,
            ..Self::default()
        }
    }

    /// The buffer's fixed capacity in observations.
    pub fn buffer_capacity(&self) -> u64 {
        1u64 << self.buffer_exponent
    }
}
