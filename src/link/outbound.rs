use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;

use crate::link::message::Message;
use crate::util::sync::lock;


/// FIFO of messages waiting for the sender. This is the single point of mutual exclusion
///  between collaborators submitting messages, the timeout sweep re-injecting them, the
///  dispatcher emitting acks, and the sender draining them.
///
/// Every push wakes the sender. [Notify] stores a permit if the sender is not currently
///  waiting, so a wakeup between draining and waiting is not lost.
#[derive(Default)]
pub struct OutboundQueue {
    queue: Mutex<VecDeque<Message>>,
    notify: Notify,
}

impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        Default::default()
    }

    pub fn push(&self, msg: Message) {
        lock(&self.queue).push_back(msg);
        self.notify.notify_one();
    }

    pub fn extend(&self, msgs: impl IntoIterator<Item = Message>) {
        let mut queue = lock(&self.queue);
        let len_before = queue.len();
        queue.extend(msgs);
        let added = queue.len() > len_before;
        drop(queue);

        if added {
            self.notify.notify_one();
        }
    }

    /// removes and returns all queued messages in queue order
    pub fn drain(&self) -> Vec<Message> {
        lock(&self.queue).drain(..).collect()
    }

    /// discards all queued messages, returning how many there were
    pub fn clear(&self) -> usize {
        let mut queue = lock(&self.queue);
        let len = queue.len();
        queue.clear();
        len
    }

    pub fn len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Waits until something was pushed since the last wakeup, or until `max_wait` elapsed,
    ///  whichever comes first.
    pub async fn wait_for_messages(&self, max_wait: Duration) {
        let _ = time::timeout(max_wait, self.notify.notified()).await;
    }
}


#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;
    use tokio::runtime::Builder;

    use crate::link::message::MessageId;

    use super::*;

    fn cmd(id: u64) -> Message {
        Message::Command { id: MessageId(id), payload: json!(id) }
    }

    #[test]
    fn test_fifo() {
        let queue = OutboundQueue::new();
        queue.push(cmd(1));
        queue.extend(vec![cmd(2), Message::ack(MessageId(7))]);
        queue.push(cmd(3));

        assert_eq!(queue.len(), 4);
        assert_eq!(queue.drain(), vec![cmd(1), cmd(2), Message::ack(MessageId(7)), cmd(3)]);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_clear() {
        let queue = OutboundQueue::new();
        queue.extend(vec![cmd(1), cmd(2)]);
        assert_eq!(queue.clear(), 2);
        assert_eq!(queue.clear(), 0);
    }

    #[test]
    fn test_push_before_wait_is_not_lost() {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async {
            let queue = OutboundQueue::new();
            queue.push(cmd(1));

            let start = time::Instant::now();
            queue.wait_for_messages(Duration::from_secs(1)).await;
            assert_eq!(start.elapsed(), Duration::ZERO);
        });
    }

    #[test]
    fn test_wait_is_bounded() {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async {
            let queue = OutboundQueue::new();

            let start = time::Instant::now();
            queue.wait_for_messages(Duration::from_secs(1)).await;
            assert_eq!(start.elapsed(), Duration::from_secs(1));
        });
    }

    #[test]
    fn test_push_wakes_waiter() {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async {
            let queue = Arc::new(OutboundQueue::new());

            let cloned = queue.clone();
            let waiter = tokio::spawn(async move {
                let start = time::Instant::now();
                cloned.wait_for_messages(Duration::from_secs(10)).await;
                start.elapsed()
            });

            time::sleep(Duration::from_millis(300)).await;
            queue.push(cmd(1));

            assert_eq!(waiter.await.unwrap(), Duration::from_millis(300));
        });
    }

    #[test]
    fn test_empty_extend_does_not_wake() {
        let rt = Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build().unwrap();
        rt.block_on(async {
            let queue = OutboundQueue::new();
            queue.extend(Vec::new());

            let start = time::Instant::now();
            queue.wait_for_messages(Duration::from_millis(500)).await;
            assert_eq!(start.elapsed(), Duration::from_millis(500));
        });
    }
}
