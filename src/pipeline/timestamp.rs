//! T2 — TimestampExtractor: consumes the leading token as a capture time
//! (spec.md §4.5 T2).

use super::{PipelineContext, PipelineEntity, Transform};
use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// T2: turns `Tokens` into `Timestamped{tokens, timestamp, duration}`.
#[derive(Debug, Default)]
pub struct TimestampExtractor;

impl TimestampExtractor {
    /// Builds the timestamp-extraction stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for TimestampExtractor {
    fn name(&self) -> &str {
        "TimestampExtractor"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Tokens(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Tokens(mut tokens) = entity else {
            return Some(entity);
        };
        if tokens.is_empty() {
            return None;
        }

        let head = tokens.remove(0);
        let (timestamp, duration) = resolve_timestamp(&head, ctx.source);

        Some(PipelineEntity::Timestamped {
            tokens,
            timestamp,
            duration,
        })
    }
}

fn resolve_timestamp(token: &str, source: &mut super::SourceState) -> (DateTime<Utc>, Option<f64>) {
    if source.options.ignore_timestamps || token.is_empty() {
        return (Utc::now(), None);
    }

    if let Some(forced) = token.strip_prefix('!') {
        return (parse_absolute(forced).unwrap_or_else(Utc::now), None);
    }

    if source.options.relative_time {
        if let Ok(offset_ms) = token.parse::<f64>() {
            let base_time = *source.base_time.get_or_insert_with(Utc::now);
            let base_offset = *source.base_offset.get_or_insert(offset_ms);
            let delta_ms = offset_ms - base_offset;
            let ts = base_time + ChronoDuration::microseconds((delta_ms * 1000.0) as i64);
            return (ts, Some(offset_ms));
        }
    }

    (parse_absolute(token).unwrap_or_else(Utc::now), None)
}

/// Parses an absolute SHDR timestamp (`YYYY-MM-DDTHH:MM:SS[.fff][Z]`),
/// accepting both RFC3339 and the bare-UTC form adapters commonly send
/// without an explicit offset. Exposed for `AssetMultiLineAssembler`, which
/// needs to recover the opening line's timestamp without re-running the
/// whole extraction stage.
pub fn parse_absolute(token: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Some(dt.with_timezone(&Utc));
    }
    // Accept `YYYY-MM-DDTHH:MM:SS[.fff]` without an explicit offset, which
    // the RFC3339 parser above rejects, by assuming UTC.
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(token, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetStore;
    use crate::buffer::CircularBuffer;
    use crate::config::Config;
    use crate::model::DeviceModel;
    use crate::pipeline::SourceState;
    use dashmap::DashMap;

    #[allow(clippy::type_complexity)]
    fn context_fixtures() -> (
        DeviceModel,
        CircularBuffer,
        AssetStore,
        DashMap<String, super::super::RateFilterState>,
        DashMap<(String, String), ()>,
        DashMap<String, crate::model::UnitConversion>,
    ) {
        let model = DeviceModel::load(Vec::new()).unwrap();
        let buffer = CircularBuffer::new(&Config::for_testing());
        let assets = AssetStore::new(Config::for_testing().max_assets);
        (model, buffer, assets, DashMap::new(), DashMap::new(), DashMap::new())
    }

    #[test]
    fn parses_rfc3339_with_fractional_seconds() {
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = context_fixtures();
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
        let mut stage = TimestampExtractor::new();
        let entity = PipelineEntity::Tokens(vec!["2021-02-01T12:00:00.123Z".into(), "Xact".into(), "1".into()]);
        let result = stage.apply(entity, &mut ctx).unwrap();
        match result {
            PipelineEntity::Timestamped { tokens, timestamp, .. } => {
                assert_eq!(tokens, vec!["Xact", "1"]);
                assert_eq!(timestamp.to_rfc3339(), "2021-02-01T12:00:00.123+00:00");
            }
            _ => panic!("expected Timestamped"),
        }
    }

    #[test]
    fn ignore_timestamps_substitutes_system_clock() {
        let (model, buffer, assets, rate_filters, warned_keys, calibrations) = context_fixtures();
        let mut source = SourceState::default();
        source.options.ignore_timestamps = true;
        let mut ctx = PipelineContext {
            model: &model,
            buffer: &buffer,
            assets: &assets,
            rate_filters: &rate_filters,
            warned_keys: &warned_keys,
            calibrations: &calibrations,
            source: &mut source,
        };
        let mut stage = TimestampExtractor::new();
        let entity = PipelineEntity::Tokens(vec!["garbage-not-a-timestamp".into(), "Xact".into()]);
        let result = stage.apply(entity, &mut ctx).unwrap();
        assert!(matches!(result, PipelineEntity::Timestamped { .. }));
    }
}
