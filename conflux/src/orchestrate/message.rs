//! Messages carried on orchestrator output queues.

use tokio::sync::mpsc;

/// A message on an orchestrator queue.
///
/// Control markers are variants rather than magic payload values, so they
/// can never be confused with a real result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageMessage<T> {
    /// A result produced by one task.
    Item(T),
    /// End of input for a queue-consuming stage.
    EndOfStream,
    /// A fan-out finished; one is pushed per draining stage.
    StageFinished,
}

impl<T> StageMessage<T> {
    /// Returns true for `EndOfStream` and `StageFinished`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageMessage::Item(_))
    }

    /// Returns the payload, if any.
    #[must_use]
    pub fn into_item(self) -> Option<T> {
        match self {
            StageMessage::Item(item) => Some(item),
            StageMessage::EndOfStream | StageMessage::StageFinished => None,
        }
    }

    /// Returns a reference to the payload, if any.
    #[must_use]
    pub fn as_item(&self) -> Option<&T> {
        match self {
            StageMessage::Item(item) => Some(item),
            StageMessage::EndOfStream | StageMessage::StageFinished => None,
        }
    }
}

/// Sending half of an orchestrator queue.
pub type StageSender<T> = mpsc::UnboundedSender<StageMessage<T>>;

/// Receiving half of an orchestrator queue.
pub type StageReceiver<T> = mpsc::UnboundedReceiver<StageMessage<T>>;

/// Creates a new unbounded orchestrator queue.
#[must_use]
pub fn stage_channel<T>() -> (StageSender<T>, StageReceiver<T>) {
    mpsc::unbounded_channel()
}

/// Receives items until the first terminal marker (or a closed queue).
///
/// Remaining markers stay in the queue for other consumers.
pub async fn collect_items<T>(rx: &mut StageReceiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Some(message) = rx.recv().await {
        match message {
            StageMessage::Item(item) => items.push(item),
            StageMessage::EndOfStream | StageMessage::StageFinished => break,
        }
    }
    items
}

/// Receives every message, markers included, until the queue closes.
pub async fn drain_all<T>(mut rx: StageReceiver<T>) -> Vec<StageMessage<T>> {
    let mut messages = Vec::new();
    while let Some(message) = rx.recv().await {
        messages.push(message);
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_accessors() {
        let item = StageMessage::Item(3);
        assert!(!item.is_terminal());
        assert_eq!(item.as_item(), Some(&3));
        assert_eq!(item.into_item(), Some(3));

        assert!(StageMessage::<i32>::EndOfStream.is_terminal());
        assert!(StageMessage::<i32>::StageFinished.is_terminal());
        assert_eq!(StageMessage::<i32>::StageFinished.into_item(), None);
    }

    #[tokio::test]
    async fn test_collect_items_stops_at_first_marker() {
        let (tx, mut rx) = stage_channel();
        tx.send(StageMessage::Item(1)).unwrap();
        tx.send(StageMessage::Item(2)).unwrap();
        tx.send(StageMessage::StageFinished).unwrap();
        tx.send(StageMessage::StageFinished).unwrap();
        drop(tx);

        assert_eq!(collect_items(&mut rx).await, vec![1, 2]);
        assert_eq!(rx.recv().await, Some(StageMessage::StageFinished));
        assert_eq!(rx.recv().await, None);
    }
}
