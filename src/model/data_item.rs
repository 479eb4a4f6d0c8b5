//! Data item attributes and derivations (spec.md §3, §4.1).

use crate::model::units::UnitConversion;
use std::collections::HashMap;

/// Which of the three observation families a data item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataItemCategory {
    /// A periodically-varying numeric or vector reading.
    Sample,
    /// A discrete state change.
    Event,
    /// A fault/warning condition with an active/normal chain.
    Condition,
}

/// How a data item's value is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    /// A single scalar (or 3-vector, if `units` marks `3D`).
    Value,
    /// A fixed-size vector of doubles sampled at a rate.
    TimeSeries,
    /// A scalar value that is never duplicate-filtered.
    Discrete,
    /// A `key -> scalar` map.
    DataSet,
    /// A `key -> (key -> scalar)` nested map.
    Table,
}

/// A rate-limiting filter attached to a data item (T6 `RateFilter`).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Filter {
    /// Minimum absolute change required between successive emitted values.
    pub minimum_delta: Option<f64>,
    /// Minimum wall-clock time between successive emissions, in seconds.
    pub period: Option<f64>,
}

impl Filter {
    /// True when this data item has no rate-limiting configured.
    pub fn is_empty(&self) -> bool {
        self.minimum_delta.is_none() && self.period.is_none()
    }
}

/// A constraint that pins a data item to a single, unchanging value.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraints {
    /// The data item can never take on any value but this one.
    Fixed(String),
}

/// Identifies a single data item within the model. Stable for the lifetime
/// of a [`crate::model::DeviceModel`]; reassigned across a reload if the new
/// model's parser chooses to (spec.md §4.1 `reload`).
pub type DataItemId = String;

/// The smallest observable variable of a device (spec.md §3).
#[derive(Debug, Clone)]
pub struct DataItem {
    /// Unique agent-wide identifier.
    pub id: DataItemId,
    /// Unique-per-device name.
    pub name: Option<String>,
    /// The MTConnect type, e.g. `POSITION`, `ALARM`, `ASSET_CHANGED`.
    pub data_type: String,
    /// An optional refinement of `data_type`.
    pub sub_type: Option<String>,
    /// SAMPLE / EVENT / CONDITION.
    pub category: DataItemCategory,
    /// VALUE / TIME_SERIES / DISCRETE / DATA_SET / TABLE.
    pub representation: Representation,
    /// The unit this data item reports in, e.g. `MILLIMETER`.
    pub units: Option<String>,
    /// The unit the adapter's raw values arrive in.
    pub native_units: Option<String>,
    /// An additional native-side scale factor, applied after any unit
    /// conversion derived from `units`/`native_units`.
    pub native_scale: Option<f64>,
    /// Rate-limiting configuration.
    pub filter: Filter,
    /// A symbolic tag that, when present on the next observation, signals
    /// the prior data-set/table contents were cleared.
    pub reset_trigger: Option<String>,
    /// A preferred SHDR key distinct from `id`/`name`.
    pub source: Option<String>,
    /// A literal value to report before any observation has arrived.
    pub initial_value: Option<String>,
    /// When present, pins this data item to a single unchanging value.
    pub constraints: Option<Constraints>,
    /// When set, duplicate observations are never filtered (T7), even
    /// outside of DISCRETE representation.
    pub allow_dups: bool,

    /// Cached unit conversion, derived at load time (or overwritten by a
    /// `* calibration:` protocol command at runtime).
    pub conversion: Option<UnitConversion>,
    /// True when `units` marks this item as a 3-space vector.
    pub is_vector: bool,
    /// Full topic path, e.g. `device/controller/path/Sample[Xact]`.
    pub topic_path: String,
    /// Topic-local name, e.g. `Xact`.
    pub topic_name: String,
    /// Dispatch key used for observation-type routing, e.g. `SAMPLE:POSITION`.
    pub dispatch_key: String,
}

impl DataItem {
    /// A constant data item never changes value once reported.
    pub fn is_constant(&self) -> bool {
        self.constraints.is_some()
    }

    /// Discrete representation items are never duplicate- or rate-filtered
    /// by value (spec.md §4.3, §4.5 T7).
    pub fn is_discrete(&self) -> bool {
        matches!(self.representation, Representation::Discrete)
    }

    /// Whether T7 `DuplicateFilter` should ever suppress a repeat value for
    /// this item.
    pub fn duplicate_filtering_applies(&self) -> bool {
        !self.is_discrete() && !self.allow_dups
    }

    /// Whether this item is free text exempt from `UpcaseValue` (T8):
    /// `MESSAGE` and `ALARM` data types.
    pub fn is_free_text(&self) -> bool {
        self.data_type == "MESSAGE" || self.data_type == "ALARM"
    }

    /// Validates the category a type implies, per spec.md §4.1: `ALARM`,
    /// `ASSET_CHANGED`, and `ASSET_REMOVED` must be category EVENT; a
    /// DATA_SET/TABLE representation must remain so regardless of type.
    pub fn validate_category(&self) -> Result<(), String> {
        let must_be_event = matches!(
            self.data_type.as_str(),
            "ALARM" | "ASSET_CHANGED" | "ASSET_REMOVED" | "MESSAGE"
        );
        if must_be_event && self.category != DataItemCategory::Event {
            return Err(format!(
                "data item '{}' of type {} must be category EVENT",
                self.id, self.data_type
            ));
        }
        Ok(())
    }
}

/// Computes the full topic path for a data item from the chain of ancestor
/// component names (device first, owning component last) plus category and
/// observation name, per spec.md §3:
/// `device/…ancestors…/category/ObservationName[name]`.
pub fn topic_path(
    ancestors: &[&str],
    category: DataItemCategory,
    observation_name: &str,
    name: Option<&str>,
) -> String {
    let category_segment = match category {
        DataItemCategory::Sample => "Sample",
        DataItemCategory::Event => "Event",
        DataItemCategory::Condition => "Condition",
    };
    let mut path = ancestors.join("/");
    if !path.is_empty() {
        path.push('/');
    }
    path.push_str(category_segment);
    path.push('/');
    path.push_str(observation_name);
    if let Some(n) = name {
        path.push('[');
        path.push_str(n);
        path.push(']');
    }
    path
}

/// Converts an MTConnect type tag (`POSITION`, `PATH_FEEDRATE_OVERRIDE`)
/// into the CamelCase observation name used in topic paths
/// (`Position`, `PathFeedrateOverride`).
pub fn observation_name_from_type(data_type: &str) -> String {
    data_type
        .split('_')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect()
}

/// Computes the dispatch key used for observation-type routing (spec.md
/// §3): `category:observationName`, with a `:3D` suffix for vector items.
pub fn dispatch_key(category: DataItemCategory, data_type: &str, is_vector: bool) -> String {
    let category_segment = match category {
        DataItemCategory::Sample => "SAMPLE",
        DataItemCategory::Event => "EVENT",
        DataItemCategory::Condition => "CONDITION",
    };
    let mut key = format!("{category_segment}:{data_type}");
    if is_vector {
        key.push_str(":3D");
    }
    key
}

/// A multi-index over a single device's data items, resolved in the order
/// `Source`, `name`, `id` (spec.md §4.1 `lookupDataItem`).
#[derive(Debug, Clone, Default)]
pub struct DataItemIndex {
    by_source: HashMap<String, DataItemId>,
    by_name: HashMap<String, DataItemId>,
    by_id: HashMap<String, DataItemId>,
}

impl DataItemIndex {
    /// Registers a data item's keys in the index.
    pub fn insert(&mut self, item: &DataItem) {
        if let Some(source) = &item.source {
            self.by_source.insert(source.clone(), item.id.clone());
        }
        if let Some(name) = &item.name {
            self.by_name.insert(name.clone(), item.id.clone());
        }
        self.by_id.insert(item.id.clone(), item.id.clone());
    }

    /// Resolves a key to a data item id, trying `Source`, then `name`, then
    /// `id`, in that order.
    pub fn resolve(&self, key: &str) -> Option<&DataItemId> {
        self.by_source
            .get(key)
            .or_else(|| self.by_name.get(key))
            .or_else(|| self.by_id.get(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_name_camel_cases_type_tags() {
        assert_eq!(observation_name_from_type("POSITION"), "Position");
        assert_eq!(
            observation_name_from_type("PATH_FEEDRATE_OVERRIDE"),
            "PathFeedrateOverride"
        );
    }

    #[test]
    fn topic_path_includes_name_bracket() {
        let path = topic_path(
            &["Device1", "Controller", "Path1"],
            DataItemCategory::Sample,
            "Position",
            Some("Xact"),
        );
        assert_eq!(path, "Device1/Controller/Path1/Sample/Position[Xact]");
    }

    #[test]
    fn dispatch_key_marks_vectors() {
        assert_eq!(
            dispatch_key(DataItemCategory::Sample, "POSITION", true),
            "SAMPLE:POSITION:3D"
        );
        assert_eq!(
            dispatch_key(DataItemCategory::Event, "AVAILABILITY", false),
            "EVENT:AVAILABILITY"
        );
    }

    #[test]
    fn index_resolves_source_before_name_before_id() {
        let mut index = DataItemIndex::default();
        let item = DataItem {
            id: "di1".into(),
            name: Some("Xact".into()),
            data_type: "POSITION".into(),
            sub_type: None,
            category: DataItemCategory::Sample,
            representation: Representation::Value,
            units: None,
            native_units: None,
            native_scale: None,
            filter: Filter::default(),
            reset_trigger: None,
            source: Some("x_pos".into()),
            initial_value: None,
            constraints: None,
            allow_dups: false,
            conversion: None,
            is_vector: false,
            topic_path: String::new(),
            topic_name: String::new(),
            dispatch_key: String::new(),
        };
        index.insert(&item);
        assert_eq!(index.resolve("x_pos"), Some(&"di1".to_string()));
        assert_eq!(index.resolve("Xact"), Some(&"di1".to_string()));
        assert_eq!(index.resolve("di1"), Some(&"di1".to_string()));
        assert_eq!(index.resolve("nope"), None);
    }
}
