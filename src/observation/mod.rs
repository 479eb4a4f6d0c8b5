//! C2 — Observation: a timestamped, typed reading bound to a data item
//! (spec.md §3, §4.2).

use crate::error::{AgentError, Result};
use crate::model::{DataItem, DataItemCategory, Representation};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Condition severity, shared across an entire chain for a data item
/// (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionLevel {
    /// No fault is currently active.
    Normal,
    /// A non-fatal condition that does not stop production.
    Warning,
    /// An active fault.
    Fault,
    /// No known value.
    Unavailable,
}

/// A single scalar entry in a data-set or table observation.
pub type DataSetValue = String;

/// The condition-specific fields of a CONDITION observation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionDetail {
    /// NORMAL / WARNING / FAULT / UNAVAILABLE.
    pub level: ConditionLevel,
    /// The MTConnect-side code, if any.
    pub code: Option<String>,
    /// The adapter-side code, if any — the key condition chains merge on.
    pub native_code: Option<String>,
    /// The adapter-side severity, if any.
    pub native_severity: Option<String>,
    /// A qualifier such as `HIGH`/`LOW`.
    pub qualifier: Option<String>,
    /// A free-text description.
    pub message: Option<String>,
}

/// The shaped value of an observation, determined by its data item's
/// category × representation (spec.md §3, §4.2, §9).
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    /// SAMPLE.VALUE scalar, or EVENT.VALUE typed scalar rendered as text.
    Scalar(f64),
    /// SAMPLE.VALUE 3D-class vector.
    Vector3([f64; 3]),
    /// SAMPLE.TIME_SERIES vector, with optional sample rate/count.
    TimeSeries {
        /// The sampled values.
        values: Vec<f64>,
        /// The adapter-reported sample rate, if any.
        sample_rate: Option<f64>,
        /// The adapter-reported sample count, if any.
        sample_count: Option<u32>,
    },
    /// EVENT.VALUE or discrete text value.
    Text(String),
    /// SAMPLE/EVENT .DATA_SET: `key -> scalar`.
    DataSet(BTreeMap<String, DataSetValue>),
    /// SAMPLE/EVENT .TABLE: `key -> (key -> scalar)`.
    Table(BTreeMap<String, BTreeMap<String, DataSetValue>>),
    /// CONDITION value.
    Condition(ConditionDetail),
    /// Legal for every category: no known value.
    Unavailable,
}

/// The unvalidated property bag passed to [`Observation::new`], shaped like
/// what a pipeline transform assembles from SHDR tokens before the
/// category/representation contract is checked.
#[derive(Debug, Clone, Default)]
pub struct ObservationInput {
    /// A single scalar, for SAMPLE.VALUE / EVENT.VALUE.
    pub scalar: Option<f64>,
    /// A three-element vector, for 3D SAMPLE.VALUE items.
    pub vector3: Option<[f64; 3]>,
    /// Free text, for EVENT.VALUE / MESSAGE / ALARM-as-text.
    pub text: Option<String>,
    /// Raw time-series samples.
    pub time_series: Option<Vec<f64>>,
    /// Time-series sample rate, if reported.
    pub sample_rate: Option<f64>,
    /// Time-series sample count, if reported.
    pub sample_count: Option<u32>,
    /// Data-set / table entries, already parsed from the SHDR grammar.
    pub data_set: Option<BTreeMap<String, DataSetValue>>,
    /// Table entries, already parsed.
    pub table: Option<BTreeMap<String, BTreeMap<String, DataSetValue>>>,
    /// Condition fields, for CONDITION category.
    pub condition: Option<ConditionDetail>,
    /// Explicit UNAVAILABLE marker, legal for any category.
    pub unavailable: bool,
    /// Set when an SHDR `RESET|...` token cleared prior data-set contents.
    pub reset_triggered: Option<String>,
    /// The adapter-side `nativeCode` for an EVENT.MESSAGE.
    pub native_code: Option<String>,
}

/// A single timestamped reading of a data item (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// The data item this observation belongs to.
    pub data_item_id: String,
    /// Assigned by the circular buffer on append; `None` before ingest.
    pub sequence: Option<u64>,
    /// Microsecond-precision capture time.
    pub timestamp: DateTime<Utc>,
    /// The shaped value.
    pub value: ObservationValue,
    /// True if the data item reference was severed by a model reload after
    /// this observation was appended (spec.md §3 invariant 3, §9).
    pub orphan: bool,
    /// Set when this observation's ingest line carried an SHDR `RESET|...`
    /// token that cleared a data-set/table's prior contents.
    pub reset_triggered: Option<String>,
}

impl Observation {
    /// Validates `input` against `data_item`'s category × representation
    /// contract and builds an [`Observation`] (spec.md §4.2).
    pub fn new(data_item: &DataItem, input: ObservationInput, timestamp: DateTime<Utc>) -> Result<Self> {
        if input.unavailable {
            return Ok(Self {
                data_item_id: data_item.id.clone(),
                sequence: None,
                timestamp,
                value: ObservationValue::Unavailable,
                orphan: false,
                reset_triggered: None,
            });
        }

        let value = match (data_item.category, data_item.representation) {
            (DataItemCategory::Condition, _) => {
                let detail = input.condition.ok_or_else(|| invalid(data_item, "condition observation missing level"))?;
                ObservationValue::Condition(detail)
            }
            (_, Representation::DataSet) => {
                let set = input.data_set.ok_or_else(|| invalid(data_item, "data set observation missing entries"))?;
                ObservationValue::DataSet(set)
            }
            (_, Representation::Table) => {
                let table = input.table.ok_or_else(|| invalid(data_item, "table observation missing entries"))?;
                ObservationValue::Table(table)
            }
            (DataItemCategory::Sample, Representation::TimeSeries) => {
                let values = input
                    .time_series
                    .ok_or_else(|| invalid(data_item, "time series observation missing samples"))?;
                ObservationValue::TimeSeries {
                    values,
                    sample_rate: input.sample_rate,
                    sample_count: input.sample_count,
                }
            }
            (DataItemCategory::Sample, _) => {
                if data_item.is_vector {
                    let v = input
                        .vector3
                        .ok_or_else(|| invalid(data_item, "3D sample observation missing vector value"))?;
                    ObservationValue::Vector3(v)
                } else {
                    let v = input
                        .scalar
                        .ok_or_else(|| invalid(data_item, "sample observation missing scalar value"))?;
                    ObservationValue::Scalar(v)
                }
            }
            (DataItemCategory::Event, _) => {
                if let Some(text) = input.text {
                    ObservationValue::Text(text)
                } else if let Some(scalar) = input.scalar {
                    ObservationValue::Scalar(scalar)
                } else {
                    return Err(invalid(data_item, "event observation missing value"));
                }
            }
        };

        Ok(Self {
            data_item_id: data_item.id.clone(),
            sequence: None,
            timestamp,
            value,
            orphan: false,
            reset_triggered: input.reset_triggered,
        })
    }

    /// Wraps this observation for shared ownership in the buffer and
    /// checkpoints (spec.md §3 "Lifecycles").
    pub fn shared(self) -> Arc<Observation> {
        Arc::new(self)
    }

    /// True if the value is the `UNAVAILABLE` sentinel.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.value, ObservationValue::Unavailable)
    }

    /// True if this is a CONDITION observation.
    pub fn is_condition(&self) -> bool {
        matches!(self.value, ObservationValue::Condition(_))
    }

    /// The condition's `nativeCode`, if this is a CONDITION observation.
    pub fn native_code(&self) -> Option<&str> {
        match &self.value {
            ObservationValue::Condition(detail) => detail.native_code.as_deref(),
            _ => None,
        }
    }

    /// The condition's level, if this is a CONDITION observation.
    pub fn condition_level(&self) -> Option<ConditionLevel> {
        match &self.value {
            ObservationValue::Condition(detail) => Some(detail.level),
            _ => None,
        }
    }
}

fn invalid(data_item: &DataItem, reason: &str) -> AgentError {
    AgentError::InvalidObservation {
        data_item: data_item.id.clone(),
        reason: reason.to_string(),
    }
}
