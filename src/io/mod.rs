//! C7 — Sources/Sinks Contracts: the interfaces an external transport
//! (SHDR socket, HTTP/MQTT sink, …) must implement to plug into the core
//! (spec.md §4.7). No transport is implemented here — these are trait
//! boundaries only, per spec.md §1 Non-goals.

use crate::asset::Asset;
use crate::model::{DataItem, DataItemId, Device};
use crate::observation::Observation;
use std::collections::HashSet;

/// An opaque marker for the output format a sink renders to (XML, JSON,
/// …). The printers themselves are out of scope (spec.md §1 Non-goals);
/// this exists only so a `SinkContract::get_printer` call site has
/// something to dispatch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrinterKind {
    /// MTConnect's native XML rendering.
    Xml,
    /// JSON rendering.
    Json,
}

/// Connect/disconnect/data callbacks a pipeline-hosting adapter source
/// must answer to (spec.md §4.7 `SourceContract`).
pub trait SourceContract {
    /// A stable identity for this source (used for per-source dedup of
    /// "unknown key" warnings, spec.md §4.5 T3).
    fn identity(&self) -> &str;

    /// The device this source is currently bound to, if `* device:` has
    /// been seen.
    fn current_device(&self) -> Option<&str>;

    /// Invoked when the underlying transport establishes a connection to
    /// one or more device identities.
    fn connected(&mut self, identities: &[String]);

    /// Invoked when the underlying transport loses its connection.
    fn disconnected(&mut self, identities: &[String]);

    /// Invoked with a raw adapter line beginning `* ` (spec.md §4.5 T5).
    fn protocol_command(&mut self, text: &str);

    /// Invoked with a raw adapter data line for pipeline ingest.
    fn process_data(&mut self, text: &str);
}

/// What a sink (REST/MQTT/socket transport) may pull from or be pushed by
/// the core (spec.md §4.7 `SinkContract`).
pub trait SinkContract {
    /// Resolves the renderer for a given output kind.
    fn get_printer(&self, kind: PrinterKind) -> PrinterKind {
        kind
    }

    /// Looks up a device by name.
    fn get_device_by_name(&self, name: &str) -> Option<Device>;

    /// Looks up a device by uuid.
    fn get_device_by_uuid(&self, uuid: &str) -> Option<Device>;

    /// The agent's default device, when a query omits one.
    fn default_device(&self) -> Option<Device>;

    /// Looks up a data item anywhere in the model by its agent-wide id.
    fn get_data_item_by_id(&self, id: &str) -> Option<DataItem>;

    /// Resolves an xpath-style path expression against a device into the
    /// set of matching data item ids.
    fn get_data_items_for_path(&self, device: &Device, xpath: &str) -> HashSet<DataItemId>;

    /// Pushes a freshly appended observation to the sink.
    fn publish_observation(&mut self, observation: &Observation);

    /// Pushes an asset mutation to the sink.
    fn publish_asset(&mut self, asset: &Asset);

    /// Pushes a model reload notification to the sink.
    fn publish_device_model(&mut self, devices: &[Device]);
}
