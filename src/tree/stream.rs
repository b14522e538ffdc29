//! Per-node payload change streams.

use serde_json::Value;
use std::sync::mpsc::{self, Receiver, Sender};

/// Multicast stream of a node's payload that replays the latest value.
///
/// Every subscriber gets its own channel. Subscribing pushes the current
/// payload right away, later emissions follow in order. Emission is
/// synchronous with the mutation that caused it; subscribers whose receiver
/// has been dropped are pruned on the next emit.
#[derive(Debug, Default)]
pub struct PayloadStream {
    subscribers: Vec<Sender<Option<Value>>>,
}

impl PayloadStream {
    pub fn new() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, current: &Option<Value>) -> Receiver<Option<Value>> {
        let (sender, receiver) = mpsc::channel();
        // The receiver is still in scope, so this send cannot fail.
        let _ = sender.send(current.clone());
        self.subscribers.push(sender);
        receiver
    }

    /// Publishes `current` and returns how many subscribers received it.
    pub fn emit(&mut self, current: &Option<Value>) -> usize {
        self.subscribers
            .retain(|subscriber| subscriber.send(current.clone()).is_ok());
        self.subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_late_subscriber_sees_latest_value_first() {
        let mut stream = PayloadStream::new();
        let first = stream.subscribe(&Some(json!("a")));
        stream.emit(&Some(json!("b")));

        let late = stream.subscribe(&Some(json!("b")));
        stream.emit(&None);

        assert_eq!(first.try_iter().collect::<Vec<_>>(), vec![
            Some(json!("a")),
            Some(json!("b")),
            None
        ]);
        assert_eq!(late.try_iter().collect::<Vec<_>>(), vec![Some(json!("b")), None]);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut stream = PayloadStream::new();
        let kept = stream.subscribe(&None);
        drop(stream.subscribe(&None));
        assert_eq!(stream.subscriber_count(), 2);

        assert_eq!(stream.emit(&Some(json!(1))), 1);
        assert_eq!(stream.subscriber_count(), 1);
        assert_eq!(kept.try_iter().count(), 2);
    }
}
