//! T4 — AssetMultiLineAssembler: buffers the body lines of a multi-line
//! `@ASSET@` block until the opening sentinel reappears (spec.md §4.5 T4,
//! §6).
//!
//! Runs directly on raw text, ahead of the main `Tokenizer`, because a
//! buffered asset body is opaque — it may contain unescaped `|` characters
//! that would otherwise be mangled by SHDR tokenization.

use super::timestamp::parse_absolute;
use super::tokenizer::tokenize;
use super::{PipelineContext, PipelineEntity, Transform};
use crate::asset::AssetCommand;

const SENTINEL_PREFIX: &str = "--multiline--";

/// T4: assembles `--multiline--SENTINEL` blocks into a single `AssetCommand`.
#[derive(Debug, Default)]
pub struct AssetMultiLineAssembler;

impl AssetMultiLineAssembler {
    /// Builds the multi-line asset assembly stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for AssetMultiLineAssembler {
    fn name(&self) -> &str {
        "AssetMultiLineAssembler"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::RawText(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::RawText(line) = entity else {
            return Some(entity);
        };
        let trimmed = line.trim_end_matches(['\r', '\n']);

        if let Some(sentinel) = ctx.source.open_multiline.clone() {
            if trimmed == sentinel {
                let id = ctx.source.multiline_asset_id.take().unwrap_or_default();
                let asset_type = ctx.source.multiline_asset_type.take().unwrap_or_default();
                let timestamp = ctx
                    .source
                    .multiline_timestamp
                    .take()
                    .unwrap_or_else(chrono::Utc::now);
                let body = ctx.source.multiline_buffer.join("\n");
                ctx.source.open_multiline = None;
                ctx.source.multiline_buffer.clear();
                return Some(PipelineEntity::AssetCommand(AssetCommand::Put {
                    id,
                    asset_type,
                    device_uuid: ctx.source.current_device.clone(),
                    timestamp,
                    body,
                }));
            }
            ctx.source.multiline_buffer.push(line);
            return None;
        }

        let tokens = tokenize(trimmed);
        if tokens.len() >= 5
            && (tokens[1] == "@ASSET@" || tokens[1] == "@UPDATE_ASSET@")
            && tokens[4].starts_with(SENTINEL_PREFIX)
        {
            let sentinel = tokens[4][SENTINEL_PREFIX.len()..].to_string();
            ctx.source.open_multiline = Some(sentinel);
            ctx.source.multiline_asset_id = Some(tokens[2].clone());
            ctx.source.multiline_asset_type = Some(tokens[3].clone());
            ctx.source.multiline_timestamp = parse_absolute(&tokens[0]).or_else(|| Some(chrono::Utc::now()));
            ctx.source.multiline_buffer.clear();
            return None;
        }

        if ctx.source.open_multiline.is_some() {
            // Interleaved normal observation during assembly: reject per
            // spec.md §4.5 T4.
            return None;
        }

        Some(PipelineEntity::RawText(line))
    }
}
