//! T10 — DeliverObservation: the terminal stage for observations, handing
//! them to the circular buffer (spec.md §4.5 T10, §4.2).
//!
//! Sinks learn about the new value through [`crate::buffer::BufferWatch`],
//! not through a callback from this stage — the core must not hold the
//! buffer's lock while invoking a sink (spec.md §4.7, §5), and `append`
//! already signals its condition variable after releasing the lock.

use super::{PipelineContext, PipelineEntity, Transform};

/// T10: appends an observation to the buffer, ending its propagation.
#[derive(Debug, Default)]
pub struct DeliverObservation;

impl DeliverObservation {
    /// Builds the delivery stage.
    pub fn new() -> Self {
        Self
    }
}

impl Transform for DeliverObservation {
    fn name(&self) -> &str {
        "DeliverObservation"
    }

    fn accepts(&self, entity: &PipelineEntity) -> bool {
        matches!(entity, PipelineEntity::Observation(_))
    }

    fn apply(&mut self, entity: PipelineEntity, ctx: &mut PipelineContext<'_>) -> Option<PipelineEntity> {
        let PipelineEntity::Observation(obs) = entity else {
            return Some(entity);
        };
        let seq = ctx.buffer.append(obs);
        tracing::trace!(sequence = seq, "observation delivered");
        None
    }
}
