use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

/// Fan-out queue for notifications that affect subscribers.
///
/// Subscribers attach at any time and receive every message pushed after
/// they subscribed. Subscribers that hung up are dropped on the next push.
pub struct MessageQueue<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> MessageQueue<T> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber and returns its receiving end.
    pub fn subscribe(&self) -> Receiver<T> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.lock().unwrap().push(sender);
        receiver
    }

    /// Delivers a message to every live subscriber.
    pub fn push(&self, message: T) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|sender| sender.send(message.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl<T: Clone> Default for MessageQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn subscribers_receive_messages_in_order() {
        let queue = MessageQueue::new();
        let receiver = queue.subscribe();

        queue.push(1);
        queue.push(2);

        assert_eq!(receiver.try_recv(), Ok(1));
        assert_eq!(receiver.try_recv(), Ok(2));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn late_subscribers_miss_earlier_messages() {
        let queue = MessageQueue::new();
        queue.push("early");

        let receiver = queue.subscribe();
        queue.push("late");

        assert_eq!(receiver.try_recv(), Ok("late"));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let queue = MessageQueue::new();
        let receiver = queue.subscribe();
        let _keep = queue.subscribe();
        drop(receiver);

        queue.push(0);

        assert_eq!(queue.subscriber_count(), 1);
    }
}
