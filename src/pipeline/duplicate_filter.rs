//! T7 — DuplicateFilter: drops a repeat value for a data item that does
//! not opt out via `allow-dups` (spec.md §4.5 T7, §4.3).

use super::{PipelineContext, PipelineEntity, Transform};
use crate::observation::ObservationValue;

/// T7: drops observations whose value equals the latest checkpoint value
/// for their data item.
#[derive(Debug, Default)]
pub struct DuplicateFilter;

impl DuplicateFilter {
    /// Builds the duplicate-suppression stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for DuplicateFilter {
    fn name(&self) -> &str {
        "DuplicateFilter"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Observation(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Observation(obs) = entity else {
            return Some(entity);
        };

        if !ctx.source.options.filter_duplicates {
            return Some(PipelineEntity::Observation(obs));
        }

        let Some(item) = ctx.model.lookup_data_item_by_id(&obs.data_item_id) else {
            return Some(PipelineEntity::Observation(obs));
        };
        if !item.duplicate_filtering_applies() {
            return Some(PipelineEntity::Observation(obs));
        }

        // Conditions merge into a chain (spec.md §4.3); data sets/tables are
        // never dropped here — the buffer's `data_set_difference` check
        // applies the value-diff semantics of §4.3 on append instead, so a
        // partial update that changes nothing is still dropped exactly once.
        if obs.is_condition()
            || matches!(obs.value, ObservationValue::DataSet(_) | ObservationValue::Table(_))
        {
            return Some(PipelineEntity::Observation(obs));
        }

        if let Some(latest) = ctx.buffer.latest_for(&obs.data_item_id) {
            if latest.value == obs.value {
                return None;
            }
        }

        Some(PipelineEntity::Observation(obs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetStore;
    use crate::buffer::CircularBuffer;
    use crate::config::Config;
    use crate::model::{Component, Constraints, DataItemCategory, Device, DeviceModel, Filter, Representation};
    use crate::observation::{Observation, ObservationInput};
    use crate::pipeline::{RateFilterState, SourceState};
    use chrono::{DateTime, Utc};
    use dashmap::DashMap;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn model_with_event_item(allow_dups: bool) -> DeviceModel {
        let mut device = Device::new("dev1");
        let mut controller = Component::new("c1", "Controller");
        let item = crate::model::DataItem {
            id: "di1".into(),
            name: Some("line".into()),
            data_type: "LINE".into(),
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
            allow_dups,
            conversion: None,
            is_vector: false,
            topic_path: String::new(),
            topic_name: String::new(),
            dispatch_key: String::new(),
        };
        controller.data_items.push(item);
        device.children.push(controller);
        DeviceModel::load(vec![device]).unwrap()
    }

    #[allow(clippy::type_complexity)]
    fn fixtures(
        model: DeviceModel,
    ) -> (
        DeviceModel,
        CircularBuffer,
        AssetStore,
        DashMap<String, RateFilterState>,
        DashMap<(String, String), ()>,
        DashMap<String, crate::model::UnitConversion>,
    ) {
        let buffer = CircularBuffer::new(&Config::for_testing());
        let assets = AssetStore::new(Config::for_testing().max_assets);
        (model, buffer, assets, DashMap::new(), DashMap::new(), DashMap::new())
    }

    #[test]
    fn drops_a_repeated_value() {
        let model = model_with_event_item(false);
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = fixtures(model);
        let mut source = SourceState::default();
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &buffer,
            assets: &assets,
            rate_filters: &rate_filters,
            warned_keys: &warned_keys,
            calibrations: &calibrations,
            source: &mut source,
        };
        let mut stage = DuplicateFilter::new();

        let item = model.lookup_data_item_by_id("di1").unwrap();
        let first = Observation::new(
            item,
            ObservationInput {
                text: Some("204".into()),
                ..Default::default()
            },
            ts("2021-02-01T12:00:00Z"),
        )
        .unwrap();
        buffer.append(first.clone());
        assert!(stage
            .apply(PipelineEntity::Observation(first), &mut ctx)
            .is_some());

        let repeat = Observation::new(
            item,
            ObservationInput {
                text: Some("204".into()),
                ..Default::default()
            },
            ts("2021-02-01T12:00:00Z"),
        )
        .unwrap();
        assert!(stage.apply(PipelineEntity::Observation(repeat), &mut ctx).is_none());

        let changed = Observation::new(
            item,
            ObservationInput {
                text: Some("205".into()),
                ..Default::default()
            },
            ts("2021-02-01T12:00:00Z"),
        )
        .unwrap();
        assert!(stage.apply(PipelineEntity::Observation(changed), &mut ctx).is_some());
    }

    #[test]
    fn allow_dups_never_suppresses() {
        let model = model_with_event_item(true);
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = fixtures(model);
        let mut source = SourceState::default();
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &buffer,
            assets: &assets,
            rate_filters: &rate_filters,
            warned_keys: &warned_keys,
            calibrations: &calibrations,
            source: &mut source,
        };
        let mut stage = DuplicateFilter::new();
        let item = model.lookup_data_item_by_id("di1").unwrap();

        let first = Observation::new(
            item,
            ObservationInput {
                text: Some("204".into()),
                ..Default::default()
            },
            ts("2021-02-01T12:00:00Z"),
        )
        .unwrap();
        buffer.append(first.clone());

        let repeat = Observation::new(
            item,
            ObservationInput {
                text: Some("204".into()),
                ..Default::default()
            },
            ts("2021-02-01T12:00:00Z"),
        )
        .unwrap();
        assert!(stage.apply(PipelineEntity::Observation(repeat), &mut ctx).is_some());
    }
}
