// In-process fan-out of points updates to open SSE connections.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsEvent {
    pub user_id: String,
    pub amount: i64,
    /// Ledger total for `user_id` after this grant.
    pub total: i64,
    pub note: Option<String>,
    pub created_at: String,
}

#[derive(Clone)]
pub struct PointsHub {
    sender: broadcast::Sender<PointsEvent>,
}

impl PointsHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    /// Each open stream holds one receiver; dropping it unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<PointsEvent> {
        self.sender.subscribe()
    }

    /// Returns how many listeners were notified. No listeners is not an error.
    pub fn publish(&self, event: PointsEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PointsHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str) -> PointsEvent {
        PointsEvent {
            user_id: user.to_string(),
            amount: 5,
            total: 5,
            note: None,
            created_at: "2024-01-01T00:00:00+00:00".to_string(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let hub = PointsHub::new();
        let mut rx = hub.subscribe();
        assert_eq!(hub.publish(event("a")), 1);
        assert_eq!(rx.recv().await.unwrap().user_id, "a");
    }

    #[test]
    fn publish_without_listeners_is_harmless() {
        let hub = PointsHub::new();
        assert_eq!(hub.publish(event("a")), 0);
    }

    #[test]
    fn dropping_receiver_unsubscribes() {
        let hub = PointsHub::new();
        let rx = hub.subscribe();
        assert_eq!(hub.listener_count(), 1);
        drop(rx);
        assert_eq!(hub.listener_count(), 0);
    }
}
