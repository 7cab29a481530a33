use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::models::ServerEvent;

pub fn game_room(game_id: &str) -> String {
    format!("game:{}", game_id)
}

pub fn user_room(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub fn game_id_of_room(room: &str) -> Option<&str> {
    room.strip_prefix("game:")
}

pub struct ConnectionHandle {
    pub user_id: String,
    pub tx: mpsc::UnboundedSender<ServerEvent>,
}

/// In-process connection and room registry. Emits never block: events are
/// queued on per-connection channels and failed sends to closed channels
/// are dropped.
#[derive(Default)]
pub struct SessionFabric {
    connections: DashMap<String, ConnectionHandle>,
    rooms: DashMap<String, HashSet<String>>,
}

impl SessionFabric {
    pub fn new() -> Self {
        SessionFabric::default()
    }

    /// Register a freshly authenticated connection and join its user room.
    pub fn register(
        &self,
        connection_id: &str,
        user_id: &str,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.connections.insert(
            connection_id.to_string(),
            ConnectionHandle {
                user_id: user_id.to_string(),
                tx,
            },
        );
        self.join(connection_id, &user_room(user_id));
    }

    /// Remove a connection from the registry and every room it occupied.
    /// Returns the game rooms it was in, for the disconnect grace check.
    pub fn unregister(&self, connection_id: &str) -> Vec<String> {
        let mut game_rooms = Vec::new();
        self.rooms.retain(|room, members| {
            if members.remove(connection_id) && game_id_of_room(room).is_some() {
                game_rooms.push(room.clone());
            }
            !members.is_empty()
        });
        self.connections.remove(connection_id);
        game_rooms
    }

    pub fn join(&self, connection_id: &str, room: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection_id.to_string());
    }

    pub fn leave(&self, connection_id: &str, room: &str) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(connection_id);
            if members.is_empty() {
                drop(members);
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
        }
    }

    pub fn emit_room(&self, room: &str, event: &ServerEvent) {
        let members: Vec<String> = match self.rooms.get(room) {
            Some(members) => members.iter().cloned().collect(),
            None => return,
        };
        for connection_id in members {
            self.emit_connection(&connection_id, event);
        }
    }

    pub fn emit_user(&self, user_id: &str, event: &ServerEvent) {
        self.emit_room(&user_room(user_id), event);
    }

    pub fn emit_connection(&self, connection_id: &str, event: &ServerEvent) {
        if let Some(handle) = self.connections.get(connection_id) {
            let _ = handle.tx.send(event.clone());
        }
    }

    pub fn broadcast_all(&self, event: &ServerEvent) {
        for entry in self.connections.iter() {
            let _ = entry.tx.send(event.clone());
        }
    }

    pub fn count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Does `user_id` have any live connection in `room`, across all of its
    /// tabs and devices?
    pub fn user_present_in_room(&self, room: &str, user_id: &str) -> bool {
        let members = match self.rooms.get(room) {
            Some(members) => members.clone(),
            None => return false,
        };
        members.iter().any(|connection_id| {
            self.connections
                .get(connection_id)
                .map(|handle| handle.user_id == user_id)
                .unwrap_or(false)
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(fabric: &SessionFabric, connection_id: &str, user_id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        fabric.register(connection_id, user_id, tx);
        rx
    }

    #[test]
    fn register_joins_the_user_room() {
        let fabric = SessionFabric::new();
        let mut rx = connect(&fabric, "c1", "alice");
        fabric.emit_user("alice", &ServerEvent::OnlineCount { count: 1 });
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::OnlineCount { count: 1 }
        ));
    }

    #[test]
    fn room_emits_reach_every_member_once() {
        let fabric = SessionFabric::new();
        let mut rx1 = connect(&fabric, "c1", "alice");
        let mut rx2 = connect(&fabric, "c2", "alice");
        let mut rx3 = connect(&fabric, "c3", "bob");
        fabric.join("c1", "game:g1");
        fabric.join("c2", "game:g1");
        fabric.join("c3", "game:g1");

        fabric.emit_room("game:g1", &ServerEvent::DrawRejected { game_id: "g1".into() });
        for rx in [&mut rx1, &mut rx2, &mut rx3] {
            assert!(matches!(rx.try_recv().unwrap(), ServerEvent::DrawRejected { .. }));
            assert!(rx.try_recv().is_err());
        }
    }

    #[test]
    fn presence_tracks_multi_tab_users() {
        let fabric = SessionFabric::new();
        let _rx1 = connect(&fabric, "c1", "alice");
        let _rx2 = connect(&fabric, "c2", "alice");
        fabric.join("c1", "game:g1");
        fabric.join("c2", "game:g1");

        assert!(fabric.user_present_in_room("game:g1", "alice"));
        let left = fabric.unregister("c1");
        assert_eq!(left, vec!["game:g1".to_string()]);
        // The second tab keeps the user present.
        assert!(fabric.user_present_in_room("game:g1", "alice"));
        fabric.unregister("c2");
        assert!(!fabric.user_present_in_room("game:g1", "alice"));
        assert_eq!(fabric.count("game:g1"), 0);
    }

    #[test]
    fn leave_drops_empty_rooms() {
        let fabric = SessionFabric::new();
        let _rx = connect(&fabric, "c1", "alice");
        fabric.join("c1", "game:g1");
        assert_eq!(fabric.count("game:g1"), 1);
        fabric.leave("c1", "game:g1");
        assert_eq!(fabric.count("game:g1"), 0);
        assert!(!fabric.user_present_in_room("game:g1", "alice"));
    }

    #[test]
    fn emits_to_closed_connections_are_dropped() {
        let fabric = SessionFabric::new();
        let rx = connect(&fabric, "c1", "alice");
        drop(rx);
        fabric.join("c1", "game:g1");
        // Must not panic or block.
        fabric.emit_room("game:g1", &ServerEvent::OnlineCount { count: 0 });
    }

    #[test]
    fn room_name_helpers() {
        assert_eq!(game_room("g1"), "game:g1");
        assert_eq!(user_room("u1"), "user:u1");
        assert_eq!(game_id_of_room("game:g1"), Some("g1"));
        assert_eq!(game_id_of_room("user:u1"), None);
    }
}
