//! Append-only stream of confirmed symbols.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultEvent {
    pub sequence: u64,
    pub symbol: String,
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

type ResultCallback = Box<dyn FnMut(&str, f32) + Send>;

/// Insertion-ordered history of [`ResultEvent`]s plus its live listeners.
///
/// `append` is the only mutator. Events are never reordered, deduplicated or
/// removed.
#[derive(Default)]
pub struct ResultStream {
    events: Vec<ResultEvent>,
    subscribers: Vec<Sender<ResultEvent>>,
    callbacks: Vec<ResultCallback>,
}

impl ResultStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, symbol: impl Into<String>, confidence: f32) -> &ResultEvent {
        let event = ResultEvent {
            sequence: self.events.len() as u64 + 1,
            symbol: symbol.into(),
            confidence,
            timestamp: Utc::now(),
        };
        info!(
            sequence = event.sequence,
            "Recognised {:?} ({:.0}%)",
            event.symbol,
            event.confidence * 100.0
        );
        metrics::counter!("signcam_results_total").increment(1);

        for callback in &mut self.callbacks {
            callback(&event.symbol, event.confidence);
        }
        self.subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());

        self.events.push(event);
        &self.events[self.events.len() - 1]
    }

    pub fn history(&self) -> &[ResultEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Receive every event appended from now on.
    pub fn subscribe(&mut self) -> Receiver<ResultEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Register an `on_result(symbol, confidence)` consumer.
    pub fn on_result<F>(&mut self, callback: F)
    where
        F: FnMut(&str, f32) + Send + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn into_history(self) -> Vec<ResultEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn events_keep_insertion_order() {
        let mut stream = ResultStream::new();
        stream.append("B", 0.7);
        stream.append("A", 0.9);
        stream.append("B", 0.6);
        let symbols: Vec<_> = stream.history().iter().map(|e| e.symbol.as_str()).collect();
        assert_eq!(symbols, ["B", "A", "B"]);
        let sequences: Vec<_> = stream.history().iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, [1, 2, 3]);
    }

    #[test]
    fn subscribers_see_only_later_appends() {
        let mut stream = ResultStream::new();
        stream.append("early", 0.5);
        let rx = stream.subscribe();
        stream.append("late", 0.8);
        let received: Vec<_> = rx.try_iter().map(|e| e.symbol).collect();
        assert_eq!(received, ["late"]);
    }

    #[test]
    fn callback_fires_once_per_append() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut stream = ResultStream::new();
        stream.on_result(move |symbol, confidence| {
            sink.lock().unwrap().push((symbol.to_string(), confidence));
        });
        stream.append("yes", 0.75);
        stream.append("no", 0.5);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("yes".to_string(), 0.75), ("no".to_string(), 0.5)]
        );
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut stream = ResultStream::new();
        let rx = stream.subscribe();
        drop(rx);
        stream.append("x", 1.0);
        assert_eq!(stream.subscribers.len(), 0);
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn events_serialise_for_consumers() {
        let mut stream = ResultStream::new();
        let event = stream.append("A", 0.5).clone();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["symbol"], "A");
        assert_eq!(json["sequence"], 1);
    }
}
