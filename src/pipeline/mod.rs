//! C5 — Pipeline: the ordered, mutable chain of transforms that turns raw
//! adapter text into buffered observations and asset mutations (spec.md
//! §4.5).

pub mod deliver_asset;
pub mod deliver_observation;
pub mod duplicate_filter;
pub mod multiline_asset;
pub mod protocol_command;
pub mod rate_filter;
pub mod shdr_mapper;
pub mod timestamp;
pub mod tokenizer;
pub mod unit_converter;
pub mod upcase;

pub use deliver_asset::DeliverAsset;
pub use deliver_observation::DeliverObservation;
pub use duplicate_filter::DuplicateFilter;
pub use multiline_asset::AssetMultiLineAssembler;
pub use protocol_command::ProtocolCommandHandler;
pub use rate_filter::RateFilter;
pub use shdr_mapper::ShdrTokenMapper;
pub use timestamp::TimestampExtractor;
pub use tokenizer::Tokenizer;
pub use unit_converter::UnitConverter;
pub use upcase::UpcaseValue;

use crate::asset::{AssetCommand, AssetStore};
use crate::buffer::CircularBuffer;
use crate::model::{DataItemId, DeviceModel};
use crate::observation::Observation;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// One unit of work flowing through the pipeline (spec.md §4.5, §9).
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEntity {
    /// A raw line of adapter text, not yet tokenized.
    RawText(String),
    /// A protocol command line (`* name: value`), split into its parts.
    ProtocolCommand {
        /// The command name.
        name: String,
        /// The command's raw value.
        value: String,
    },
    /// T1's output: a line split on `|` with quote/brace escaping honored.
    Tokens(Vec<String>),
    /// T2's output: tokens with their leading timestamp consumed.
    Timestamped {
        /// The remaining key/value tokens.
        tokens: Vec<String>,
        /// The extracted capture time.
        timestamp: DateTime<Utc>,
        /// An optional adapter-reported duration.
        duration: Option<f64>,
    },
    /// A fully validated observation ready for (or already past)
    /// filtering, conversion, and delivery.
    Observation(Observation),
    /// A parsed asset mutation ready for `DeliverAsset`.
    AssetCommand(AssetCommand),
    /// Several entities produced from a single input line (an SHDR line may
    /// report more than one key/value pair). Each is run through the
    /// remaining stages independently, as if it had arrived on its own
    /// (spec.md §4.5 T3 "produces one Observation per data item").
    Batch(Vec<PipelineEntity>),
}

/// A single pipeline stage (spec.md §4.5).
pub trait Transform: Send {
    /// A stable name used for chain-editing operations and logging.
    fn name(&self) -> &str;

    /// Whether this transform's guard matches `entity`. Unmatched entities
    /// pass through to the next transform unchanged.
    fn accepts(&self, entity: &PipelineEntity) -> bool;

    /// Runs the transform, returning a replacement entity to continue
    /// propagation with, or `None` to end it (spec.md §4.5 "returns the
    /// empty result, ending propagation").
    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity>;
}

/// Per-source tunables the pipeline consults while processing that
/// source's lines (spec.md §4.5 "Source→pipeline binding").
#[derive(Debug, Clone)]
pub struct SourceOptions {
    /// Treat every incoming line's leading timestamp as absent.
    pub ignore_timestamps: bool,
    /// Interpret T2's leading numeric token as a relative offset rather
    /// than an absolute timestamp.
    pub relative_time: bool,
    /// Apply each data item's cached unit conversion on ingest.
    pub conversion_required: bool,
    /// Uppercase free-text EVENT values.
    pub upcase_data_item_value: bool,
    /// Run the duplicate-suppression transform.
    pub filter_duplicates: bool,
    /// Emit `AVAILABLE`/`UNAVAILABLE` automatically on connect/disconnect.
    pub auto_available: bool,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            ignore_timestamps: false,
            relative_time: false,
            conversion_required: true,
            upcase_data_item_value: false,
            filter_duplicates: true,
            auto_available: true,
        }
    }
}

/// The mutable state of a single adapter source as the pipeline sees it
/// (spec.md §4.5 "Source→pipeline binding").
#[derive(Debug, Clone, Default)]
pub struct SourceState {
    /// A stable identity for this source.
    pub identity: String,
    /// The device this source is currently bound to, set by `* device:`.
    pub current_device: Option<String>,
    /// Per-source tunables.
    pub options: SourceOptions,
    /// Process-relative base time, for `RelativeTime` mode (spec.md §4.5
    /// T2).
    pub base_time: Option<DateTime<Utc>>,
    /// Process-relative base offset in seconds, paired with `base_time`.
    pub base_offset: Option<f64>,
    /// The sentinel currently open for a multi-line asset, if any.
    pub open_multiline: Option<String>,
    /// Buffered lines for the currently open multi-line asset.
    pub multiline_buffer: Vec<String>,
    /// The asset id declared by the line that opened the current multi-line
    /// assembly.
    pub multiline_asset_id: Option<String>,
    /// The asset type declared by the line that opened the current
    /// multi-line assembly.
    pub multiline_asset_type: Option<String>,
    /// The timestamp of the line that opened the current multi-line
    /// assembly, used for the synthesized `AssetCommand` once it closes.
    pub multiline_timestamp: Option<DateTime<Utc>>,
}

/// The per-data-item state T6 `RateFilter` carries between invocations
/// (spec.md §4.5 T6, §C.4).
#[derive(Debug, Clone, Default)]
pub struct RateFilterState {
    /// The last value T6 accepted (not merely the last value seen).
    pub last_accepted_value: Option<f64>,
    /// The timestamp of the last accepted value, for `PERIOD` filtering.
    pub last_accepted_time: Option<DateTime<Utc>>,
}

/// Shared, strand-owned state a transform needs while processing one
/// entity (spec.md §4.5 "`PipelineContext`").
pub struct PipelineContext<'a> {
    /// The current, immutable device model snapshot.
    pub model: &'a DeviceModel,
    /// The circular buffer observations are ultimately delivered to.
    pub buffer: &'a CircularBuffer,
    /// The asset store asset commands are ultimately delivered to.
    pub assets: &'a AssetStore,
    /// Per-data-item rate filter state, written only under the strand but
    /// keyed so lookups never need the buffer's lock (spec.md §5).
    pub rate_filters: &'a DashMap<DataItemId, RateFilterState>,
    /// Keys already warned-about-once per source, to satisfy T3's
    /// "logged once per key per source" contract.
    pub warned_keys: &'a DashMap<(String, String), ()>,
    /// Per-data-item conversion overrides installed by `* calibration:`
    /// (T5), consulted by `UnitConverter` (T9) ahead of the data item's
    /// load-time-derived conversion. A `DashMap` entry is visible to the
    /// very next ingested line and no sooner, since lines are processed
    /// one at a time on the strand (spec.md §9 Open Question).
    pub calibrations: &'a DashMap<DataItemId, crate::model::UnitConversion>,
    /// The source currently feeding the pipeline.
    pub source: &'a mut SourceState,
}

impl<'a> PipelineContext<'a> {
    /// Warns (returns `true` the first time) about an unresolved key for
    /// the current source, deduplicating subsequent occurrences.
    pub fn warn_once(&self, key: &str) -> bool {
        let dedup_key = (self.source.identity.clone(), key.to_string());
        self.warned_keys.insert(dedup_key, ()).is_none()
    }
}

/// The ordered, mutable chain of transforms (spec.md §4.5).
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn Transform>>,
}

impl Pipeline {
    /// An empty chain.
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Builds the canonical T1–T11 chain described in spec.md §4.5.
    ///
    /// `ProtocolCommandHandler` (T5) and `AssetMultiLineAssembler` (T4) both
    /// guard on raw text and must run ahead of `Tokenizer` (T1), which would
    /// otherwise treat their lines as ordinary SHDR data.
    pub fn canonical() -> Self {
        let mut pipeline = Self::new();
        pipeline.push(Box::new(ProtocolCommandHandler::new()));
        pipeline.push(Box::new(AssetMultiLineAssembler::new()));
        pipeline.push(Box::new(Tokenizer::new()));
        pipeline.push(Box::new(TimestampExtractor::new()));
        pipeline.push(Box::new(ShdrTokenMapper::new()));
        pipeline.push(Box::new(RateFilter::new()));
        pipeline.push(Box::new(DuplicateFilter::new()));
        pipeline.push(Box::new(UpcaseValue::new()));
        pipeline.push(Box::new(UnitConverter::new()));
        pipeline.push(Box::new(DeliverObservation::new()));
        pipeline.push(Box::new(DeliverAsset::new()));
        pipeline
    }

    /// Appends a transform to the end of the chain.
    pub fn push(&mut self, transform: Box<dyn Transform>) {
        self.stages.push(transform);
    }

    /// Runs `entity` through the full chain, stopping as soon as a
    /// transform returns `None` (spec.md §4.5 "Dispatch").
    pub fn run(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) {
        self.run_from(entity, 0, ctx);
    }

    /// Runs `entity` through the stages starting at `start`. A stage that
    /// returns a [`PipelineEntity::Batch`] causes each member to continue
    /// independently through the remaining stages, so one SHDR line
    /// carrying several key/value pairs fans out without re-running the
    /// stages already applied to the line as a whole.
    fn run_from(&mut self, entity: PipelineEntity, start: usize, ctx: &mut PipelineContext<'_>) {
        let mut current = Some(entity);
        let mut idx = start;
        while idx < self.stages.len() {
            let Some(entity) = current.take() else {
                return;
            };
            if self.stages[idx].accepts(&entity) {
                match self.stages[idx].apply(entity, ctx) {
                    Some(PipelineEntity::Batch(items)) => {
                        for item in items {
                            self.run_from(item, idx + 1, ctx);
                        }
                        return;
                    }
                    Some(next) => current = Some(next),
                    None => return,
                }
            } else {
                current = Some(entity);
            }
            idx += 1;
        }
    }

    /// The index of the named transform, if present.
    fn position(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|t| t.name() == name)
    }

    /// Inserts `transform` immediately before the named stage.
    pub fn insert_before(&mut self, name: &str, transform: Box<dyn Transform>) {
        let idx = self.position(name).unwrap_or(self.stages.len());
        self.stages.insert(idx, transform);
    }

    /// Inserts `transform` immediately after the named stage.
    pub fn insert_after(&mut self, name: &str, transform: Box<dyn Transform>) {
        let idx = self.position(name).map(|i| i + 1).unwrap_or(self.stages.len());
        self.stages.insert(idx, transform);
    }

    /// Inserts `transform` as the very first stage after the named anchor
    /// among any stages sharing that position (alias for `insert_after`
    /// when stages are uniquely named, per spec.md §4.5).
    pub fn first_after(&mut self, name: &str, transform: Box<dyn Transform>) {
        self.insert_after(name, transform);
    }

    /// Inserts `transform` as the last stage following every stage with
    /// the given name (pipeline stages are uniquely named in this core,
    /// so this is equivalent to `insert_after`).
    pub fn last_after(&mut self, name: &str, transform: Box<dyn Transform>) {
        self.insert_after(name, transform);
    }

    /// Replaces the named stage in place.
    pub fn replace(&mut self, name: &str, transform: Box<dyn Transform>) {
        if let Some(idx) = self.position(name) {
            self.stages[idx] = transform;
        }
    }

    /// Removes the named stage, if present.
    pub fn remove(&mut self, name: &str) {
        self.stages.retain(|t| t.name() != name);
    }

    /// The names of every stage currently in the chain, in order.
    pub fn find(&self, name: &str) -> Vec<&str> {
        self.stages
            .iter()
            .map(Transform::name)
            .filter(|n| *n == name)
            .collect()
    }
}
