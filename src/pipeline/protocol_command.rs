//! T5 — ProtocolCommandHandler: interprets adapter control lines beginning
//! `* ` (spec.md §4.5 T5, §6).
//!
//! Runs ahead of `Tokenizer` in the canonical chain so it can intercept a
//! protocol line while it is still raw text, before tokenization would
//! otherwise treat it as an ordinary SHDR data line.

use super::{PipelineContext, PipelineEntity, Transform};
use crate::model::UnitConversion;

/// T5: updates adapter/model metadata from `* name: value` lines.
#[derive(Debug, Default)]
pub struct ProtocolCommandHandler;

impl ProtocolCommandHandler {
    /// Builds the protocol command stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for ProtocolCommandHandler {
    fn name(&self) -> &str {
        "ProtocolCommandHandler"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::RawText(text) if text.trim_start().starts_with('*'))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::RawText(text) = entity else {
            return Some(entity);
        };
        let body = text.trim_end_matches(['\r', '\n']).trim_start().trim_start_matches('*').trim();
        let Some((name, value)) = body.split_once(':') else {
            return None;
        };
        let name = name.trim();
        let value = value.trim();

        match name {
            "uuid" => ctx.source.current_device = Some(value.to_string()),
            "device" => ctx.source.current_device = Some(value.to_string()),
            "manufacturer" | "serialNumber" | "station" | "adapterVersion" | "mtconnectVersion" => {
                tracing::debug!(source = %ctx.source.identity, %name, %value, "adapter metadata");
            }
            "calibration" => apply_calibration(value, ctx),
            "conversionRequired" => ctx.source.options.conversion_required = parse_yes_no(value),
            "relativeTime" => ctx.source.options.relative_time = parse_yes_no(value),
            "realTime" => ctx.source.options.ignore_timestamps = !parse_yes_no(value),
            _ => tracing::warn!(source = %ctx.source.identity, %name, "unrecognized protocol command"),
        }

        None
    }
}

/// `* calibration:<name>|<factor>|<offset>[|...]` — updates the named data
/// item's cached conversion atomically, taking effect strictly after the
/// current ingest line completes and before the next one is dequeued
/// (spec.md §9 Open Question), which this transform satisfies by running
/// synchronously within the single ingest call.
fn apply_calibration(value: &str, ctx: &mut PipelineContext<'_>) {
    let mut parts = value.split('|');
    let Some(name) = parts.next() else { return };
    let factor: f64 = match parts.next().and_then(|s| s.parse().ok()) {
        Some(f) => f,
        None => return,
    };
    let offset: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);

    let Some(device) = ctx
        .source
        .current_device
        .as_deref()
        .and_then(|key| ctx.model.lookup_device(key))
    else {
        return;
    };
    let Some(item) = ctx.model.lookup_data_item(device, name) else {
        tracing::warn!(%name, "calibration for unknown data item");
        return;
    };
    ctx.calibrations.insert(item.id.clone(), UnitConversion::new(factor, offset));
    tracing::info!(%name, factor, offset, "calibration override");
}

fn parse_yes_no(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}
