//! Process-local registry of live chat connections

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{RwLock, mpsc::UnboundedSender};
use tracing::{debug, warn};
use uuid::Uuid;

/// Sending half of a connection's outbound frame queue
pub type Outbound = UnboundedSender<String>;

struct ClientHandle {
    connection_id: Uuid,
    tx: Outbound,
}

/// chat id → user id → the user's live connection in that chat
#[derive(Clone, Default)]
pub struct ChatHub {
    rooms: Arc<RwLock<HashMap<Uuid, HashMap<Uuid, ClientHandle>>>>,
}

impl ChatHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, replacing any earlier one of the same user in
    /// the same chat. Returns the id that identifies this connection.
    pub async fn register(&self, chat_id: Uuid, user_id: Uuid, tx: Outbound) -> Uuid {
        let connection_id = Uuid::new_v4();
        let mut rooms = self.rooms.write().await;
        let previous = rooms.entry(chat_id).or_default().insert(
            user_id,
            ClientHandle {
                connection_id,
                tx,
            },
        );

        if let Some(previous) = previous {
            debug!(
                %chat_id,
                %user_id,
                replaced = %previous.connection_id,
                "Replaced chat connection"
            );
        }
        connection_id
    }

    /// Remove a connection. A stale connection whose slot was taken by a
    /// newer one of the same user leaves the newer one in place.
    pub async fn unregister(&self, chat_id: Uuid, user_id: Uuid, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&chat_id) else {
            return false;
        };

        let owned = room
            .get(&user_id)
            .is_some_and(|handle| handle.connection_id == connection_id);
        if owned {
            room.remove(&user_id);
            if room.is_empty() {
                rooms.remove(&chat_id);
            }
        }
        owned
    }

    /// Queue a frame for every participant connected to the chat except the
    /// sender. Returns how many connections accepted it.
    pub async fn broadcast(&self, chat_id: Uuid, sender_id: Uuid, frame: &str) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(&chat_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (user_id, handle) in room.iter().filter(|(user_id, _)| **user_id != sender_id) {
            if handle.tx.send(frame.to_string()).is_err() {
                warn!(%chat_id, %user_id, "Dropped frame for a closing connection");
            } else {
                delivered += 1;
            }
        }
        delivered
    }

    #[cfg(test)]
    pub async fn connections(&self, chat_id: Uuid) -> usize {
        self.rooms
            .read()
            .await
            .get(&chat_id)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    #[tokio::test]
    async fn broadcast_skips_sender() {
        let hub = ChatHub::new();
        let chat = Uuid::now_v7();
        let (mentor, student) = (Uuid::now_v7(), Uuid::now_v7());

        let (mentor_tx, mut mentor_rx) = unbounded_channel();
        let (student_tx, mut student_rx) = unbounded_channel();
        hub.register(chat, mentor, mentor_tx).await;
        hub.register(chat, student, student_tx).await;

        assert_eq!(hub.broadcast(chat, student, "hi").await, 1);
        assert_eq!(mentor_rx.recv().await.as_deref(), Some("hi"));
        assert!(student_rx.try_recv().is_err());

        // other chats are unaffected
        assert_eq!(hub.broadcast(Uuid::now_v7(), student, "hi").await, 0);
    }

    #[tokio::test]
    async fn stale_connection_cannot_unregister_newer_one() {
        let hub = ChatHub::new();
        let chat = Uuid::now_v7();
        let user = Uuid::now_v7();

        let (old_tx, _old_rx) = unbounded_channel();
        let old = hub.register(chat, user, old_tx).await;
        let (new_tx, mut new_rx) = unbounded_channel();
        let new = hub.register(chat, user, new_tx).await;
        assert_ne!(old, new);

        assert!(!hub.unregister(chat, user, old).await);
        assert_eq!(hub.connections(chat).await, 1);
        assert_eq!(hub.broadcast(chat, Uuid::now_v7(), "still here").await, 1);
        assert_eq!(new_rx.recv().await.as_deref(), Some("still here"));

        assert!(hub.unregister(chat, user, new).await);
        assert_eq!(hub.connections(chat).await, 0);
    }

    #[tokio::test]
    async fn closed_receiver_is_logged_not_removed() {
        let hub = ChatHub::new();
        let chat = Uuid::now_v7();
        let (tx, rx) = unbounded_channel();
        hub.register(chat, Uuid::now_v7(), tx).await;
        drop(rx);

        assert_eq!(hub.broadcast(chat, Uuid::now_v7(), "lost").await, 0);
        assert_eq!(hub.connections(chat).await, 1);
    }
}
