//! T11 — DeliverAsset: executes an asset mutation and reports it back to
//! the model as a synthetic observation (spec.md §4.5 T11, §4.6).

use super::{PipelineContext, PipelineEntity, Transform};
use crate::asset::AssetEvent;
use crate::model::{DataItem, Device};
use crate::observation::{Observation, ObservationInput};

/// T11: applies an `AssetCommand` to the asset store, then emits
/// `ASSET_CHANGED`/`ASSET_REMOVED` observations on the agent's own device.
#[derive(Debug, Default)]
pub struct DeliverAsset;

impl DeliverAsset {
    /// Builds the asset delivery stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for DeliverAsset {
    fn name(&self) -> &str {
        "DeliverAsset"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::AssetCommand(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::AssetCommand(command) = entity else {
            return Some(entity);
        };

        let timestamp = command_timestamp(&command);
        let events = ctx.assets.apply(command);
        if events.is_empty() {
            return None;
        }

        let Some(agent_device) = find_agent_device(ctx.model) else {
            tracing::warn!("no Agent device registered to report asset events on");
            return None;
        };
        let changed_item = find_data_item(agent_device, "ASSET_CHANGED");
        let removed_item = find_data_item(agent_device, "ASSET_REMOVED");

        let mut last_removed_was_total = false;
        for event in &events {
            match event {
                AssetEvent::Changed { id, .. } => {
                    emit(changed_item, id, timestamp, ctx);
                }
                AssetEvent::Removed { id, .. } => {
                    emit(removed_item, id, timestamp, ctx);
                    last_removed_was_total = ctx.assets.count(None, false) == 0;
                }
            }
        }

        if last_removed_was_total {
            if let Some(item) = changed_item {
                if let Ok(obs) = Observation::new(
                    item,
                    ObservationInput {
                        unavailable: true,
                        ..Default::default()
                    },
                    timestamp,
                ) {
                    ctx.buffer.append(obs);
                }
            }
        }

        None
    }
}

fn command_timestamp(command: &crate::asset::AssetCommand) -> chrono::DateTime<chrono::Utc> {
    match command {
        crate::asset::AssetCommand::Put { timestamp, .. }
        | crate::asset::AssetCommand::Remove { timestamp, .. }
        | crate::asset::AssetCommand::RemoveAll { timestamp, .. } => *timestamp,
    }
}

fn find_agent_device(model: &crate::model::DeviceModel) -> Option<&Device> {
    model.devices().iter().find(|d| d.is_agent_device())
}

fn find_data_item<'a>(device: &'a Device, data_type: &str) -> Option<&'a DataItem> {
    let mut found = None;
    device.each_data_item(|item| {
        if found.is_none() && item.data_type == data_type {
            found = Some(item);
        }
    });
    found
}

fn emit(item: Option<&DataItem>, id: &str, timestamp: chrono::DateTime<chrono::Utc>, ctx: &mut PipelineContext<'_>) {
    let Some(item) = item else {
        tracing::warn!(data_type = "ASSET_CHANGED/ASSET_REMOVED", "no agent data item to report on");
        return;
    };
    if let Ok(obs) = Observation::new(
        item,
        ObservationInput {
            text: Some(id.to_string()),
            ..Default::default()
        },
        timestamp,
    ) {
        ctx.buffer.append(obs);
    }
}
