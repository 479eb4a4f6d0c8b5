//! T6 — RateFilter: suppresses sample observations that fail a data item's
//! `MINIMUM_DELTA`/`PERIOD` filter (spec.md §4.5 T6, §C.4).

use super::{PipelineContext, PipelineEntity, RateFilterState, Transform};
use crate::observation::ObservationValue;

/// T6: drops scalar observations that do not clear the configured filter.
#[derive(Debug, Default)]
pub struct RateFilter;

impl RateFilter {
    /// Builds the rate filter stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for RateFilter {
    fn name(&self) -> &str {
        "RateFilter"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Observation(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Observation(obs) = entity else {
            return Some(entity);
        };

        let Some(item) = ctx.model.lookup_data_item_by_id(&obs.data_item_id) else {
            return Some(PipelineEntity::Observation(obs));
        };
        if item.filter.is_empty() {
            return Some(PipelineEntity::Observation(obs));
        }

        if obs.is_unavailable() {
            ctx.rate_filters.remove(&obs.data_item_id);
            return Some(PipelineEntity::Observation(obs));
        }

        let scalar = match &obs.value {
            ObservationValue::Scalar(v) => Some(*v),
            _ => None,
        };
        let Some(value) = scalar else {
            return Some(PipelineEntity::Observation(obs));
        };

        let mut state = ctx.rate_filters.entry(obs.data_item_id.clone()).or_default();

        if let Some(minimum_delta) = item.filter.minimum_delta {
            if let Some(last) = state.last_accepted_value {
                if (value - last).abs() < minimum_delta {
                    return None;
                }
            }
        }

        if let Some(period) = item.filter.period {
            if let Some(last_time) = state.last_accepted_time {
                let elapsed = (obs.timestamp - last_time).num_milliseconds() as f64 / 1000.0;
                if elapsed < period {
                    return None;
                }
            }
        }

        state.last_accepted_value = Some(value);
        state.last_accepted_time = Some(obs.timestamp);
        drop(state);

        Some(PipelineEntity::Observation(obs))
    }
}
