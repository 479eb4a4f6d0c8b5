//! T3 — ShdrTokenMapper: resolves each remaining key against the current
//! device and builds a validated `Observation` per data item, or an
//! `AssetCommand` for the `@...@` asset keys (spec.md §4.5 T3, §6).
//!
//! A single SHDR line may report several key/value pairs back to back
//! (`ts|Xact|1|Yact|2`); each produces its own entity and they continue
//! through the remaining stages independently via `PipelineEntity::Batch`.

use super::{PipelineContext, PipelineEntity, Transform};
use crate::asset::AssetCommand;
use crate::model::{DataItem, DataItemCategory, Representation};
use crate::observation::{ConditionDetail, ConditionLevel, Observation, ObservationInput};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// T3: maps timestamped tokens onto data items, producing one entity per
/// key/value pair.
#[derive(Debug, Default)]
pub struct ShdrTokenMapper;

impl ShdrTokenMapper {
    /// Builds the token-mapping stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for ShdrTokenMapper {
    fn name(&self) -> &str {
        "ShdrTokenMapper"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Timestamped { .. })
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Timestamped { tokens, timestamp, .. } = entity else {
            return Some(entity);
        };
        if tokens.is_empty() {
            return None;
        }

        if let Some(command) = asset_command(&tokens, ctx.source.current_device.clone(), timestamp) {
            return Some(PipelineEntity::AssetCommand(command));
        }

        let Some(device) = ctx
            .source
            .current_device
            .as_deref()
            .and_then(|key| ctx.model.lookup_device(key))
            .or_else(|| ctx.model.devices().first())
        else {
            return None;
        };

        let mut produced = Vec::new();
        let mut idx = 0;
        while idx < tokens.len() {
            let key = &tokens[idx];
            idx += 1;

            let Some(item) = ctx.model.lookup_data_item(device, key) else {
                if ctx.warn_once(key) {
                    tracing::warn!(%key, source = %ctx.source.identity, "unrecognized data item key");
                }
                break;
            };

            let Some((input, consumed)) = build_input(item, &tokens[idx..]) else {
                tracing::warn!(data_item = %item.id, "truncated observation, dropping rest of line");
                break;
            };
            idx += consumed;

            match Observation::new(item, input, timestamp) {
                Ok(obs) => produced.push(PipelineEntity::Observation(obs)),
                Err(err) => tracing::warn!(data_item = %item.id, %err, "rejected observation"),
            }
        }

        match produced.len() {
            0 => None,
            1 => produced.pop(),
            _ => Some(PipelineEntity::Batch(produced)),
        }
    }
}

/// Detects the four asset protocol keys, consuming the whole remainder of
/// the line (spec.md §4.5 T3, §6).
fn asset_command(tokens: &[String], device_uuid: Option<String>, timestamp: DateTime<Utc>) -> Option<AssetCommand> {
    match tokens[0].as_str() {
        "@ASSET@" | "@UPDATE_ASSET@" if tokens.len() >= 3 => Some(AssetCommand::Put {
            id: tokens[1].clone(),
            asset_type: tokens[2].clone(),
            device_uuid,
            timestamp,
            body: tokens[3..].join("|"),
        }),
        "@REMOVE_ASSET@" if tokens.len() >= 2 => Some(AssetCommand::Remove {
            id: tokens[1].clone(),
            timestamp,
        }),
        "@REMOVE_ALL_ASSETS@" => Some(AssetCommand::RemoveAll {
            device_uuid,
            asset_type: tokens.get(1).cloned(),
            timestamp,
        }),
        _ => None,
    }
}

/// Builds the `ObservationInput` for one data item from the tokens
/// following its key, returning how many tokens were consumed (spec.md
/// §4.5 T3, §6, §C.6).
fn build_input(item: &DataItem, rest: &[String]) -> Option<(ObservationInput, usize)> {
    if item.category == DataItemCategory::Condition {
        return build_condition(rest);
    }

    if rest.first().map(String::as_str) == Some("UNAVAILABLE") {
        return Some((
            ObservationInput {
                unavailable: true,
                ..Default::default()
            },
            1,
        ));
    }

    if item.data_type == "ALARM" {
        return build_alarm(rest);
    }
    if item.sub_type.as_deref() == Some("MESSAGE") {
        return build_message(rest);
    }

    match item.representation {
        Representation::TimeSeries => build_time_series(rest),
        Representation::DataSet => build_data_set(rest),
        Representation::Table => build_table(rest),
        Representation::Value | Representation::Discrete => {
            if item.is_vector {
                build_vector3(rest)
            } else {
                build_scalar_or_text(item, rest)
            }
        }
    }
}

fn build_condition(rest: &[String]) -> Option<(ObservationInput, usize)> {
    let level_token = rest.first()?;
    if level_token == "UNAVAILABLE" {
        let detail = ConditionDetail {
            level: ConditionLevel::Unavailable,
            code: None,
            native_code: None,
            native_severity: None,
            qualifier: None,
            message: None,
        };
        return Some((
            ObservationInput {
                condition: Some(detail),
                ..Default::default()
            },
            1,
        ));
    }

    let level = parse_condition_level(level_token)?;
    let native_code = non_empty(rest.get(1));
    let native_severity = non_empty(rest.get(2));
    let qualifier = non_empty(rest.get(3));
    let message = non_empty(rest.get(4));
    let detail = ConditionDetail {
        level,
        code: None,
        native_code,
        native_severity,
        qualifier,
        message,
    };
    Some((
        ObservationInput {
            condition: Some(detail),
            ..Default::default()
        },
        rest.len().min(5),
    ))
}

fn parse_condition_level(token: &str) -> Option<ConditionLevel> {
    match token {
        "NORMAL" => Some(ConditionLevel::Normal),
        "WARNING" => Some(ConditionLevel::Warning),
        "FAULT" => Some(ConditionLevel::Fault),
        "UNAVAILABLE" => Some(ConditionLevel::Unavailable),
        _ => None,
    }
}

/// `code|nativeSeverity|state|description` (spec.md §6 ALARM fields).
fn build_alarm(rest: &[String]) -> Option<(ObservationInput, usize)> {
    if rest.len() < 4 {
        return None;
    }
    let text = format!("{}|{}|{}|{}", rest[0], rest[1], rest[2], rest[3]);
    Some((
        ObservationInput {
            text: Some(text),
            ..Default::default()
        },
        4,
    ))
}

/// `nativeCode|text` (spec.md §6 MESSAGE fields).
fn build_message(rest: &[String]) -> Option<(ObservationInput, usize)> {
    if rest.len() < 2 {
        return None;
    }
    Some((
        ObservationInput {
            native_code: non_empty(rest.first()),
            text: Some(rest[1].clone()),
            ..Default::default()
        },
        2,
    ))
}

/// `sampleCount|sampleRate|values` where `values` arrives as one token
/// (tokenized from a `{...}` brace group) with space- or pipe-separated
/// samples.
fn build_time_series(rest: &[String]) -> Option<(ObservationInput, usize)> {
    if rest.len() < 3 {
        return None;
    }
    let sample_count = rest[0].parse::<u32>().ok();
    let sample_rate = rest[1].parse::<f64>().ok();
    let values: Vec<f64> = rest[2]
        .split(|c: char| c == '|' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<f64>().ok())
        .collect();
    Some((
        ObservationInput {
            time_series: Some(values),
            sample_rate,
            sample_count,
            ..Default::default()
        },
        3,
    ))
}

/// `[RESET ]key=value key2=value2 ...`, one token unless preceded by a
/// literal `RESET` marker token (spec.md §6, §C.6).
fn build_data_set(rest: &[String]) -> Option<(ObservationInput, usize)> {
    let (reset, value_token, consumed) = data_set_token(rest)?;
    let entries = parse_data_set_entries(value_token);
    Some((
        ObservationInput {
            data_set: Some(entries),
            reset_triggered: reset,
            ..Default::default()
        },
        consumed,
    ))
}

/// `[RESET ]rowKey={col=val ...} rowKey2={...} ...`.
fn build_table(rest: &[String]) -> Option<(ObservationInput, usize)> {
    let (reset, value_token, consumed) = data_set_token(rest)?;
    let table = parse_table_entries(value_token);
    Some((
        ObservationInput {
            table: Some(table),
            reset_triggered: reset,
            ..Default::default()
        },
        consumed,
    ))
}

fn data_set_token(rest: &[String]) -> Option<(Option<String>, &str, usize)> {
    let first = rest.first()?;
    if first == "RESET" {
        let value = rest.get(1).map(String::as_str).unwrap_or("");
        Some((Some("RESET".to_string()), value, 2.min(rest.len())))
    } else {
        Some((None, first.as_str(), 1))
    }
}

/// Splits on whitespace into `key=value` pairs; `key=` (empty value) is a
/// deletion marker, preserved as an empty string for the checkpoint merge
/// to interpret (spec.md §6, §C.6).
fn parse_data_set_entries(text: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for pair in text.split_whitespace() {
        if let Some((key, value)) = pair.split_once('=') {
            entries.insert(key.to_string(), value.to_string());
        }
    }
    entries
}

/// Splits `rowKey={...} rowKey2={...}` at brace depth 0, then parses each
/// row's interior as data-set entries.
fn parse_table_entries(text: &str) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut table = BTreeMap::new();
    let bytes = text.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        while i < bytes.len() && (bytes[i] as char).is_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let key_start = i;
        while i < bytes.len() && bytes[i] != b'=' {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let key = text[key_start..i].to_string();
        i += 1; // skip '='

        if i < bytes.len() && bytes[i] == b'{' {
            let inner_start = i + 1;
            let mut depth = 1usize;
            let mut j = inner_start;
            while j < bytes.len() && depth > 0 {
                match bytes[j] {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    _ => {}
                }
                if depth == 0 {
                    break;
                }
                j += 1;
            }
            let inner_end = j.min(bytes.len());
            table.insert(key, parse_data_set_entries(&text[inner_start..inner_end]));
            i = inner_end + 1;
        } else {
            while i < bytes.len() && !(bytes[i] as char).is_whitespace() {
                i += 1;
            }
            table.insert(key, BTreeMap::new());
        }
    }

    table
}

fn build_vector3(rest: &[String]) -> Option<(ObservationInput, usize)> {
    if rest.len() < 3 {
        return None;
    }
    let x = rest[0].parse::<f64>().ok()?;
    let y = rest[1].parse::<f64>().ok()?;
    let z = rest[2].parse::<f64>().ok()?;
    Some((
        ObservationInput {
            vector3: Some([x, y, z]),
            ..Default::default()
        },
        3,
    ))
}

fn build_scalar_or_text(item: &DataItem, rest: &[String]) -> Option<(ObservationInput, usize)> {
    let value = rest.first()?;
    if let Ok(scalar) = value.parse::<f64>() {
        return Some((
            ObservationInput {
                scalar: Some(scalar),
                ..Default::default()
            },
            1,
        ));
    }
    if item.category == DataItemCategory::Event {
        return Some((
            ObservationInput {
                text: Some(value.clone()),
                ..Default::default()
            },
            1,
        ));
    }
    None
}

fn non_empty(token: Option<&String>) -> Option<String> {
    token.map(String::as_str).filter(|s| !s.is_empty()).map(String::from)
}
