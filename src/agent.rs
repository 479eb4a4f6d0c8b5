//! C8 — Agent Core: the top-level orchestrator binding the model, buffer,
//! asset store, and pipeline together (spec.md §4.8).
//!
//! The agent serialises every mutation of the model and pipeline chain
//! through a single strand (spec.md §5 "single-writer discipline"); the
//! buffer and asset store keep their own finer-grained locks, so ingest does
//! not contend with concurrent queries for longer than each stage's
//! critical section.

use crate::asset::AssetStore;
use crate::buffer::CircularBuffer;
use crate::config::Config;
use crate::error::{AgentError, Result};
use crate::io::SinkContract;
use crate::model::{DataItemId, Device, DeviceModel, UnitConversion};
use crate::observation::{Observation, ObservationInput};
use crate::pipeline::{
    Pipeline, PipelineContext, PipelineEntity, RateFilterState, SourceOptions, SourceState,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// The MTConnect agent core: owns the model, buffer, asset store, and
/// pipeline, and routes adapter text and model reloads through them under a
/// single-writer strand (spec.md §4.8, §5).
pub struct Agent {
    config: Config,
    /// Copy-on-reload: readers take a cheap `Arc` clone under the lock and
    /// never hold it while processing (spec.md §4.1, §5 "the model is
    /// copy-on-reload").
    model: RwLock<Arc<DeviceModel>>,
    buffer: Arc<CircularBuffer>,
    assets: Arc<AssetStore>,
    pipeline: Mutex<Pipeline>,
    sources: DashMap<String, SourceState>,
    rate_filters: DashMap<DataItemId, RateFilterState>,
    warned_keys: DashMap<(String, String), ()>,
    calibrations: DashMap<DataItemId, UnitConversion>,
    sinks: Mutex<Vec<Box<dyn SinkContract + Send>>>,
    /// Guards model/pipeline mutation; the buffer and asset store are not
    /// behind this lock (spec.md §5).
    strand: Mutex<()>,
}

impl Agent {
    /// Builds an agent over an already-loaded device model.
    pub fn new(config: Config, model: DeviceModel) -> Self {
        let buffer = Arc::new(CircularBuffer::new(&config));
        let assets = Arc::new(AssetStore::new(config.max_assets));
        Self {
            model: RwLock::new(Arc::new(model)),
            buffer,
            assets,
            pipeline: Mutex::new(Pipeline::canonical()),
            sources: DashMap::new(),
            rate_filters: DashMap::new(),
            warned_keys: DashMap::new(),
            calibrations: DashMap::new(),
            sinks: Mutex::new(Vec::new()),
            strand: Mutex::new(()),
            config,
        }
    }

    /// The current device model snapshot. Cheap: a clone of the shared
    /// `Arc`, not the tree itself.
    pub fn model(&self) -> Arc<DeviceModel> {
        self.model.read().clone()
    }

    /// The circular buffer, for sinks to query directly (spec.md §4.7
    /// `SinkContract::circular_buffer`).
    pub fn circular_buffer(&self) -> &CircularBuffer {
        &self.buffer
    }

    /// The asset store, for sinks to query directly (spec.md §4.7
    /// `SinkContract::asset_store`).
    pub fn asset_store(&self) -> &AssetStore {
        &self.assets
    }

    /// Registers a sink. Per spec.md §4.8, sinks are instantiated before
    /// sources so they are ready to receive the initial data-item
    /// observations primed by [`Agent::start`].
    pub fn add_sink(&self, sink: Box<dyn SinkContract + Send>) {
        self.sinks.lock().push(sink);
    }

    /// Registers an adapter source's identity and per-source options, so
    /// later calls to [`Agent::ingest`]/[`Agent::connected`] have state to
    /// thread through the pipeline.
    pub fn add_source(&self, identity: impl Into<String>, options: SourceOptions) {
        let identity = identity.into();
        self.sources.insert(
            identity.clone(),
            SourceState {
                identity,
                options,
                ..Default::default()
            },
        );
    }

    /// Primes the buffer with `UNAVAILABLE` for every non-constant data
    /// item using the current timestamp, then notifies sinks of the
    /// starting model (spec.md §4.8 `start`).
    ///
    /// Sources are not started here — they are external collaborators
    /// (spec.md §1) driven by a transport that calls [`Agent::ingest`] and
    /// [`Agent::connected`]/[`Agent::disconnected`] once connected.
    pub fn start(&self) {
        let model = self.model();
        let now = Utc::now();
        model.each_data_item(|item| {
            if item.is_constant() {
                return;
            }
            let input = ObservationInput {
                unavailable: true,
                ..Default::default()
            };
            if let Ok(obs) = Observation::new(item, input, now) {
                self.buffer.append(obs);
            }
        });

        let mut sinks = self.sinks.lock();
        for sink in sinks.iter_mut() {
            sink.publish_device_model(model.devices());
        }
    }

    /// Runs one line of raw adapter text through the canonical pipeline for
    /// the named source, under the strand (spec.md §4.5, §4.8).
    ///
    /// Observations delivered by `DeliverObservation` (T10) are appended to
    /// the buffer by the time this returns; sinks learn of them via
    /// [`crate::buffer::BufferWatch`], not a callback from this call, so the
    /// strand is never held while a sink runs (spec.md §4.7, §5).
    pub fn ingest(&self, source_identity: &str, text: &str) {
        let _guard = self.strand.lock();
        let model = self.model();
        let mut source_entry = self
            .sources
            .entry(source_identity.to_string())
            .or_insert_with(|| SourceState {
                identity: source_identity.to_string(),
                ..Default::default()
            });

        let mut pipeline = self.pipeline.lock();
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &self.buffer,
            assets: &self.assets,
            rate_filters: &self.rate_filters,
            warned_keys: &self.warned_keys,
            calibrations: &self.calibrations,
            source: &mut source_entry,
        };
        pipeline.run(PipelineEntity::RawText(text.to_string()), &mut ctx);
    }

    /// Routes a `* name: value` protocol command line through the pipeline
    /// on behalf of `source_identity` (spec.md §4.5 T5, §4.8 "routes
    /// source-reported commands ... into the model").
    pub fn route_protocol_command(&self, source_identity: &str, cmd: &str) {
        self.ingest(source_identity, cmd);
    }

    /// Emits `AVAILABLE` for every auto-availability data item owned by
    /// `device_identities` (uuid or name) once a source connects (spec.md
    /// §4.5 "Source→pipeline binding").
    pub fn connected(&self, source_identity: &str, device_identities: &[String]) {
        let _guard = self.strand.lock();
        let auto_available = self
            .sources
            .get(source_identity)
            .map(|s| s.options.auto_available)
            .unwrap_or(true);
        if !auto_available {
            return;
        }
        self.report_availability(device_identities, true);
    }

    /// Emits `UNAVAILABLE` for every live data item owned by
    /// `device_identities` and clears their condition chains once a source
    /// disconnects (spec.md §4.5 "Source→pipeline binding").
    pub fn disconnected(&self, _source_identity: &str, device_identities: &[String]) {
        let _guard = self.strand.lock();
        self.report_availability(device_identities, false);
    }

    fn report_availability(&self, device_identities: &[String], available: bool) {
        let model = self.model();
        let now = Utc::now();
        for key in device_identities {
            let Some(device) = model.lookup_device(key) else {
                continue;
            };
            device.each_data_item(|item| {
                if item.data_type != "AVAILABILITY" {
                    return;
                }
                let input = if available {
                    ObservationInput {
                        text: Some("AVAILABLE".to_string()),
                        ..Default::default()
                    }
                } else {
                    ObservationInput {
                        unavailable: true,
                        ..Default::default()
                    }
                };
                if let Ok(obs) = Observation::new(item, input, now) {
                    self.buffer.append(obs);
                }
            });
        }
    }

    /// Atomically reloads the device model, remapping buffer/checkpoint
    /// data item references via the old→new id map, emitting a synthetic
    /// `UNAVAILABLE`→current-value cycle is *not* performed (observations
    /// survive unchanged); invalid new models leave the old model in place
    /// (spec.md §4.1 `reload`, §7 "at reload time, surfaced as warning").
    pub fn reload_devices(&self, new_devices: Vec<Device>) -> Result<()> {
        let _guard = self.strand.lock();
        let current = self.model.read().clone();

        let (new_model, remap) = current.reload(new_devices).map_err(|e| {
            tracing::warn!(error = %e, "model reload rejected, retaining prior model");
            e
        })?;

        self.buffer.update_data_items(&remap);
        self.rate_filters.clear();
        self.calibrations.clear();

        let new_model = Arc::new(new_model);
        *self.model.write() = new_model.clone();

        let mut sinks = self.sinks.lock();
        for sink in sinks.iter_mut() {
            sink.publish_device_model(new_model.devices());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Component, Constraints, DataItemCategory, Filter, Representation};

    fn availability_item(id: &str) -> crate::model::DataItem {
        crate::model::DataItem {
            id: id.into(),
            name: Some("avail".into()),
            data_type: "AVAILABILITY".into(),
            sub_type: None,
            category: DataItemCategory::Event,
            representation: Representation::Value,
            units: None,
            native_units: None,
            native_scale: None,
            filter: Filter::default(),
            reset_trigger: None,
            source: None,
            initial_value: None,
            constraints: None::<Constraints>,
            allow_dups: false,
            conversion: None,
            is_vector: false,
            topic_path: String::new(),
            topic_name: String::new(),
            dispatch_key: String::new(),
        }
    }

    fn model_with_device() -> DeviceModel {
        let mut device = Device::new("dev1");
        device.uuid = Some("uuid-1".into());
        device.name = Some("Mill1".into());
        let mut controller = Component::new("c1", "Controller");
        controller.data_items.push(availability_item("avail1"));
        device.children.push(controller);
        DeviceModel::load(vec![device]).unwrap()
    }

    #[test]
    fn start_primes_unavailable_for_every_data_item() {
        let agent = Agent::new(Config::for_testing(), model_with_device());
        agent.start();
        let latest = agent.circular_buffer().latest_for("avail1").unwrap();
        assert!(latest.is_unavailable());
    }

    #[test]
    fn connected_emits_available_for_the_devices_identity() {
        let agent = Agent::new(Config::for_testing(), model_with_device());
        agent.start();
        agent.connected("src1", &["uuid-1".to_string()]);
        let latest = agent.circular_buffer().latest_for("avail1").unwrap();
        assert_eq!(
            latest.value,
            crate::observation::ObservationValue::Text("AVAILABLE".into())
        );
    }

    #[test]
    fn disconnected_emits_unavailable() {
        let agent = Agent::new(Config::for_testing(), model_with_device());
        agent.start();
        agent.connected("src1", &["uuid-1".to_string()]);
        agent.disconnected("src1", &["uuid-1".to_string()]);
        let latest = agent.circular_buffer().latest_for("avail1").unwrap();
        assert!(latest.is_unavailable());
    }

    #[test]
    fn ingest_routes_shdr_text_through_the_pipeline() {
        let mut device = Device::new("dev1");
        device.uuid = Some("uuid-1".into());
        let mut controller = Component::new("c1", "Controller");
        let mut item = availability_item("line1");
        item.name = Some("line".into());
        item.data_type = "LINE".into();
        controller.data_items.push(item);
        device.children.push(controller);
        let model = DeviceModel::load(vec![device]).unwrap();

        let agent = Agent::new(Config::for_testing(), model);
        agent.start();
        agent.ingest("src1", "2021-02-01T12:00:00Z|line|RUNNING");
        let latest = agent.circular_buffer().latest_for("line1").unwrap();
        assert_eq!(
            latest.value,
            crate::observation::ObservationValue::Text("RUNNING".into())
        );
    }

    #[test]
    fn reload_devices_remaps_surviving_ids_and_rejects_invalid_models_atomically() {
        let agent = Agent::new(Config::for_testing(), model_with_device());
        agent.start();

        let mut bad_device = Device::new("dev1");
        let mut bad_item = availability_item("avail1");
        bad_item.data_type = "ALARM".into();
        bad_item.category = DataItemCategory::Sample;
        bad_device.data_items.push(bad_item);
        let err = agent.reload_devices(vec![bad_device]).unwrap_err();
        assert!(matches!(err, AgentError::ModelLoad(_)));
        // Old model retained: the availability item is still there under its
        // original id.
        assert!(agent.model().lookup_data_item_by_id("avail1").is_some());

        let mut new_device = Device::new("dev1");
        new_device.uuid = Some("uuid-1".into());
        new_device.name = Some("Mill1".into());
        let mut controller = Component::new("c1", "Controller");
        controller.data_items.push(availability_item("avail1-v2"));
        new_device.children.push(controller);
        agent.reload_devices(vec![new_device]).unwrap();
        assert!(agent.model().lookup_data_item_by_id("avail1-v2").is_some());
    }
}
