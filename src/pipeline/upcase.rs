//! T8 — UpcaseValue: uppercases free-text EVENT values when the source
//! requests it (spec.md §4.5 T8).

use super::{PipelineContext, PipelineEntity, Transform};
use crate::model::DataItemCategory;
use crate::observation::ObservationValue;

/// T8: uppercases a textual EVENT value unless the data item is exempt.
#[derive(Debug, Default)]
pub struct UpcaseValue;

impl UpcaseValue {
    /// Builds the upcase stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for UpcaseValue {
    fn name(&self) -> &str {
        "UpcaseValue"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Observation(obs) if matches!(obs.value, ObservationValue::Text(_)))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Observation(mut obs) = entity else {
            return Some(entity);
        };

        if !ctx.source.options.upcase_data_item_value {
            return Some(PipelineEntity::Observation(obs));
        }

        let Some(item) = ctx.model.lookup_data_item_by_id(&obs.data_item_id) else {
            return Some(PipelineEntity::Observation(obs));
        };
        if item.category != DataItemCategory::Event || item.is_free_text() {
            return Some(PipelineEntity::Observation(obs));
        }

        if let ObservationValue::Text(text) = &mut obs.value {
            *text = text.to_uppercase();
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
    use crate::model::{Component, Constraints, Device, DeviceModel, Filter, Representation};
    use crate::observation::{Observation, ObservationInput};
    use crate::pipeline::{RateFilterState, SourceState};
    use dashmap::DashMap;

    fn model_with_items() -> DeviceModel {
        let mut device = Device::new("dev1");
        let mut controller = Component::new("c1", "Controller");
        let event = crate::model::DataItem {
            id: "di1".into(),
            name: Some("mode".into()),
            data_type: "MODE".into(),
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
        };
        let mut message = event.clone();
        message.id = "di2".into();
        message.data_type = "MESSAGE".into();
        controller.data_items.push(event);
        controller.data_items.push(message);
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
    fn uppercases_plain_event_text() {
        let model = model_with_items();
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = fixtures(model);
        let mut source = SourceState::default();
        source.options.upcase_data_item_value = true;
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &buffer,
            assets: &assets,
            rate_filters: &rate_filters,
            warned_keys: &warned_keys,
            calibrations: &calibrations,
            source: &mut source,
        };
        let mut stage = UpcaseValue::new();
        let item = model.lookup_data_item_by_id("di1").unwrap();
        let obs = Observation::new(
            item,
            ObservationInput {
                text: Some("auto".into()),
                ..Default::default()
            },
            chrono::Utc::now(),
        )
        .unwrap();
        let result = stage.apply(PipelineEntity::Observation(obs), &mut ctx).unwrap();
        match result {
            PipelineEntity::Observation(obs) => {
                assert_eq!(obs.value, ObservationValue::Text("AUTO".into()));
            }
            _ => panic!("expected observation"),
        }
    }

    #[test]
    fn message_data_type_is_exempt() {
        let model = model_with_items();
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = fixtures(model);
        let mut source = SourceState::default();
        source.options.upcase_data_item_value = true;
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &buffer,
            assets: &assets,
            rate_filters: &rate_filters,
            warned_keys: &warned_keys,
            calibrations: &calibrations,
            source: &mut source,
        };
        let mut stage = UpcaseValue::new();
        let item = model.lookup_data_item_by_id("di2").unwrap();
        let obs = Observation::new(
            item,
            ObservationInput {
                text: Some("Tool change requested".into()),
                ..Default::default()
            },
            chrono::Utc::now(),
        )
        .unwrap();
        let result = stage.apply(PipelineEntity::Observation(obs), &mut ctx).unwrap();
        match result {
            PipelineEntity::Observation(obs) => {
                assert_eq!(obs.value, ObservationValue::Text("Tool change requested".into()));
            }
            _ => panic!("expected observation"),
        }
    }
}
