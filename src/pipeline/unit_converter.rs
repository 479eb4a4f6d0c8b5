//! T9 — UnitConverter: applies a data item's unit conversion to SAMPLE
//! values (spec.md §4.5 T9, §4.4).

use super::{PipelineContext, PipelineEntity, Transform};
use crate::model::DataItemCategory;
use crate::observation::ObservationValue;

/// T9: rescales scalar/vector SAMPLE values by the data item's conversion.
#[derive(Debug, Default)]
pub struct UnitConverter;

impl UnitConverter {
    /// Builds the unit conversion stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for UnitConverter {
    fn name(&self) -> &str {
        "UnitConverter"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(
            entity,
            PipelineEntity::Observation(obs)
                if matches!(obs.value, ObservationValue::Scalar(_) | ObservationValue::Vector3(_))
        )
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Observation(mut obs) = entity else {
            return Some(entity);
        };

        if !ctx.source.options.conversion_required {
            return Some(PipelineEntity::Observation(obs));
        }

        let Some(item) = ctx.model.lookup_data_item_by_id(&obs.data_item_id) else {
            return Some(PipelineEntity::Observation(obs));
        };
        if item.category != DataItemCategory::Sample {
            return Some(PipelineEntity::Observation(obs));
        }

        // A `* calibration:` override (T5) always wins over the conversion
        // derived at load time from `units`/`nativeUnits`/`nativeScale`.
        let conversion = ctx
            .calibrations
            .get(&obs.data_item_id)
            .map(|c| *c)
            .or(item.conversion);
        let Some(conversion) = conversion else {
            return Some(PipelineEntity::Observation(obs));
        };

        match &mut obs.value {
            ObservationValue::Scalar(v) => *v = conversion.convert(*v),
            ObservationValue::Vector3(v) => conversion.convert_vector(v),
            _ => {}
        }

        Some(PipelineEntity::Observation(obs))
    }
}
