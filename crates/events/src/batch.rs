//! Batch composition: merging per-stream reads into one processing order.

use streamfold_core::StreamId;

use crate::RecordedEvent;

/// Events read from one stream in a single round.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamBatch {
    pub stream: StreamId,
    pub events: Vec<RecordedEvent>,
    /// The read returned as many events as were asked for, so the stream may
    /// have more right behind this batch.
    pub capped: bool,
}

impl StreamBatch {
    pub fn new(stream: StreamId, events: Vec<RecordedEvent>, requested: usize) -> Self {
        let capped = events.len() >= requested;
        Self {
            stream,
            events,
            capped,
        }
    }
}

/// Merge per-stream batches into one order, keeping at most `limit` events.
///
/// - When every event carries a global position, events are ordered by it.
///   Events past the last global position of any capped stream are held back
///   for the next round, since that stream may still hold earlier events.
/// - Otherwise the batches are interleaved round-robin in the given (lexical)
///   stream order so one busy stream cannot starve the others.
///
/// Either way the result holds a prefix of every stream's batch, so offsets
/// can be advanced per stream without gaps.
pub fn compose(batches: Vec<StreamBatch>, limit: usize) -> Vec<RecordedEvent> {
    let globally_ordered = batches
        .iter()
        .flat_map(|b| b.events.iter())
        .all(|e| e.global_position().is_some());

    let mut merged = if globally_ordered {
        by_global_position(batches)
    } else {
        round_robin(batches)
    };
    merged.truncate(limit);
    merged
}

fn by_global_position(batches: Vec<StreamBatch>) -> Vec<RecordedEvent> {
    let watermark = batches
        .iter()
        .filter(|b| b.capped)
        .filter_map(|b| b.events.last().and_then(|e| e.global_position()))
        .min();

    let mut merged: Vec<RecordedEvent> = batches
        .into_iter()
        .flat_map(|b| b.events)
        .filter(|e| match (watermark, e.global_position()) {
            (Some(w), Some(g)) => g <= w,
            _ => true,
        })
        .collect();

    merged.sort_by(|a, b| {
        a.global_position()
            .cmp(&b.global_position())
            .then_with(|| a.stream().cmp(b.stream()))
            .then_with(|| a.offset().cmp(&b.offset()))
    });
    merged
}

fn round_robin(batches: Vec<StreamBatch>) -> Vec<RecordedEvent> {
    let total = batches.iter().map(|b| b.events.len()).sum();
    let mut merged = Vec::with_capacity(total);
    let mut iters: Vec<_> = batches.into_iter().map(|b| b.events.into_iter()).collect();

    while merged.len() < total {
        for it in iters.iter_mut() {
            if let Some(e) = it.next() {
                merged.push(e);
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn ev(stream: &str, offset: u64, global: Option<u64>) -> RecordedEvent {
        RecordedEvent::new(
            Uuid::now_v7(),
            StreamId::new(stream),
            offset,
            global,
            "test.event",
            Utc::now(),
            json!({}),
        )
    }

    fn ids(events: &[RecordedEvent]) -> Vec<(String, u64)> {
        events.iter().map(|e| (e.stream().to_string(), e.offset())).collect()
    }

    #[test]
    fn round_robin_interleaves_streams() {
        let a = StreamBatch::new(StreamId::new("a-1"), vec![ev("a-1", 0, None), ev("a-1", 1, None), ev("a-1", 2, None)], 3);
        let b = StreamBatch::new(StreamId::new("b-1"), vec![ev("b-1", 0, None)], 3);

        let merged = compose(vec![a, b], 10);
        assert_eq!(
            ids(&merged),
            vec![("a-1".into(), 0), ("b-1".into(), 0), ("a-1".into(), 1), ("a-1".into(), 2)]
        );
    }

    #[test]
    fn global_positions_define_order() {
        let a = StreamBatch::new(StreamId::new("a-1"), vec![ev("a-1", 0, Some(3)), ev("a-1", 1, Some(4))], 10);
        let b = StreamBatch::new(StreamId::new("b-1"), vec![ev("b-1", 0, Some(1)), ev("b-1", 1, Some(5))], 10);

        let merged = compose(vec![a, b], 10);
        assert_eq!(
            ids(&merged),
            vec![("b-1".into(), 0), ("a-1".into(), 0), ("a-1".into(), 1), ("b-1".into(), 1)]
        );
    }

    #[test]
    fn capped_stream_holds_back_later_events() {
        // b-1 hit its cap at global 2; it may have global 3 waiting, so a-1@5 must wait.
        let a = StreamBatch::new(StreamId::new("a-1"), vec![ev("a-1", 0, Some(1)), ev("a-1", 1, Some(5))], 2);
        let b = StreamBatch::new(StreamId::new("b-1"), vec![ev("b-1", 0, Some(2))], 1);

        let merged = compose(vec![a, b], 10);
        assert_eq!(ids(&merged), vec![("a-1".into(), 0), ("b-1".into(), 0)]);
    }

    #[test]
    fn limit_keeps_per_stream_prefixes() {
        let a = StreamBatch::new(StreamId::new("a-1"), vec![ev("a-1", 0, None), ev("a-1", 1, None)], 2);
        let b = StreamBatch::new(StreamId::new("b-1"), vec![ev("b-1", 0, None), ev("b-1", 1, None)], 2);

        let merged = compose(vec![a, b], 3);
        assert_eq!(
            ids(&merged),
            vec![("a-1".into(), 0), ("b-1".into(), 0), ("a-1".into(), 1)]
        );
    }

    #[test]
    fn mixed_positions_fall_back_to_round_robin() {
        let a = StreamBatch::new(StreamId::new("a-1"), vec![ev("a-1", 0, Some(9))], 5);
        let b = StreamBatch::new(StreamId::new("b-1"), vec![ev("b-1", 0, None)], 5);

        let merged = compose(vec![a, b], 10);
        assert_eq!(ids(&merged), vec![("a-1".into(), 0), ("b-1".into(), 0)]);
    }
}
