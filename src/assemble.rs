//! Matching detection results to samples
//!
//! Predictions come back keyed by metric type, while a round produces several
//! samples of the same type (the CPU breakdown). Every sample becomes exactly
//! one outbound message; the per-type prediction, when present, is attached
//! to all samples of that type. Subtype labels are never inferred here - each
//! CPU sample already carries its tag from the sampler.

use std::collections::HashMap;

use crate::{MetricSample, MetricType, OutboundMessage};

/// Build one wire-ready message per sample, in sample order.
pub fn build_messages(
    samples: &[MetricSample],
    predictions: &HashMap<MetricType, i32>,
) -> Vec<OutboundMessage> {
    samples
        .iter()
        .map(|sample| OutboundMessage {
            pid: sample.pid,
            metric_type: sample.metric_type,
            value: sample.value,
            sub_type: sample.subtype,
            prediction: predictions.get(&sample.metric_type).copied(),
        })
        .collect()
}
