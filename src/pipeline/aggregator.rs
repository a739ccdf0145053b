//! Result aggregation
//!
//! Completed recognitions arrive in whatever order the engine finishes them.
//! The aggregator keeps the text of the highest sequence seen so far and
//! forwards every change to the sink thread over a channel.

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use crate::vision::{merge_top_candidates, TextRegion};

/// Text value handed to the sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedText {
    /// Sequence of the frame this text was recognized from
    pub sequence: u64,
    /// Merged text, one line per region
    pub text: String,
}

/// What happened to a delivered result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The result became the current text
    Applied,
    /// A result with an equal or higher sequence was already applied
    Stale,
}

/// Point-in-time view of the aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorSnapshot {
    pub last_applied: Option<u64>,
    pub text: String,
}

#[derive(Debug, Default)]
struct AggregatorState {
    last_applied: Option<u64>,
    text: String,
}

/// Merges out-of-order recognition results into one current text
pub struct ResultAggregator {
    state: Mutex<AggregatorState>,
    separator: String,
    publisher: Sender<PublishedText>,
}

impl ResultAggregator {
    /// Create an aggregator publishing into `publisher`
    pub fn new(separator: impl Into<String>, publisher: Sender<PublishedText>) -> Self {
        Self {
            state: Mutex::new(AggregatorState::default()),
            separator: separator.into(),
            publisher,
        }
    }

    /// Create an aggregator together with the receiving end for the sink
    pub fn with_channel(separator: impl Into<String>) -> (Self, Receiver<PublishedText>) {
        let (tx, rx) = unbounded();
        (Self::new(separator, tx), rx)
    }

    /// Deliver the result of one recognition job.
    ///
    /// The freshness check, the state update and the hand-off to the sink
    /// channel all happen under one lock, so concurrent completions can never
    /// publish out of order.
    pub fn on_result(&self, sequence: u64, regions: &[TextRegion]) -> ApplyOutcome {
        let mut state = self.state.lock();

        if state.last_applied.is_some_and(|last| sequence <= last) {
            trace!(
                "Discarding stale result {} (last applied {:?})",
                sequence,
                state.last_applied
            );
            return ApplyOutcome::Stale;
        }

        let text = merge_top_candidates(regions, &self.separator);
        state.last_applied = Some(sequence);

        if text != state.text {
            state.text = text.clone();
            if self.publisher.send(PublishedText { sequence, text }).is_err() {
                debug!("Text sink is gone, result {} not published", sequence);
            }
        }

        ApplyOutcome::Applied
    }

    /// Current sequence and text
    pub fn current(&self) -> AggregatorSnapshot {
        let state = self.state.lock();
        AggregatorSnapshot {
            last_applied: state.last_applied,
            text: state.text.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn regions(lines: &[&str]) -> Vec<TextRegion> {
        lines.iter().map(|l| TextRegion::single(*l)).collect()
    }

    fn permutations(items: &[u64]) -> Vec<Vec<u64>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head);
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_first_result_is_applied() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");

        assert_eq!(aggregator.on_result(1, &regions(&["Hello"])), ApplyOutcome::Applied);
        assert_eq!(
            rx.try_recv().unwrap(),
            PublishedText { sequence: 1, text: "Hello".to_string() }
        );
        assert_eq!(aggregator.current().last_applied, Some(1));
    }

    #[test]
    fn test_out_of_order_completion_keeps_newest() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");

        assert_eq!(aggregator.on_result(6, &regions(&["B"])), ApplyOutcome::Applied);
        assert_eq!(aggregator.on_result(5, &regions(&["A"])), ApplyOutcome::Stale);

        let snapshot = aggregator.current();
        assert_eq!(snapshot.text, "B");
        assert_eq!(snapshot.last_applied, Some(6));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_empty_result_clears_text() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");
        aggregator.on_result(10, &regions(&["Foo"]));

        assert_eq!(aggregator.on_result(11, &[]), ApplyOutcome::Applied);
        assert_eq!(
            aggregator.current(),
            AggregatorSnapshot { last_applied: Some(11), text: String::new() }
        );

        let published: Vec<_> = rx.try_iter().collect();
        assert_eq!(published.last().unwrap().text, "");
    }

    #[test]
    fn test_duplicate_delivery_is_noop() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");

        assert_eq!(aggregator.on_result(3, &regions(&["same"])), ApplyOutcome::Applied);
        assert_eq!(aggregator.on_result(3, &regions(&["same"])), ApplyOutcome::Stale);
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_unchanged_text_advances_sequence_without_publishing() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");
        aggregator.on_result(1, &regions(&["steady"]));
        aggregator.on_result(2, &regions(&["steady"]));

        assert_eq!(aggregator.current().last_applied, Some(2));
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_multiple_regions_joined_with_separator() {
        let (aggregator, _rx) = ResultAggregator::with_channel(" | ");
        aggregator.on_result(1, &regions(&["line one", "line two"]));
        assert_eq!(aggregator.current().text, "line one | line two");
    }

    #[test]
    fn test_freshness_holds_for_every_delivery_order() {
        let sequences = [2, 5, 7, 9];

        for order in permutations(&sequences) {
            let (aggregator, rx) = ResultAggregator::with_channel("\n");
            for seq in &order {
                aggregator.on_result(*seq, &[TextRegion::single(format!("frame {}", seq))]);
            }

            assert_eq!(aggregator.current().text, "frame 9", "order {:?}", order);

            // Published sequences never go backwards
            let published: Vec<u64> = rx.try_iter().map(|p| p.sequence).collect();
            assert!(published.windows(2).all(|w| w[0] < w[1]), "order {:?}", order);
        }
    }

    #[test]
    fn test_concurrent_completions_settle_on_highest_sequence() {
        let (aggregator, rx) = ResultAggregator::with_channel("\n");
        let aggregator = Arc::new(aggregator);

        let handles: Vec<_> = (0..4u64)
            .map(|worker| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    // Each worker delivers an interleaved slice in reverse
                    for seq in (1..=250u64).rev().filter(|s| s % 4 == worker) {
                        aggregator.on_result(seq, &[TextRegion::single(seq.to_string())]);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.current();
        assert_eq!(snapshot.last_applied, Some(250));
        assert_eq!(snapshot.text, "250");

        let published: Vec<u64> = rx.try_iter().map(|p| p.sequence).collect();
        assert!(published.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(*published.last().unwrap(), 250);
    }
}
