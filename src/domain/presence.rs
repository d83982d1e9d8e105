use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies one physical realtime connection.
///
/// Minted fresh for every socket, so it also serves as the generation token of a
/// presence entry: only the connection that wrote an entry may clear it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub const fn as_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Lifecycle of a single connection. There are no transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Anonymous,
    Identified(Uuid),
    Disconnected,
}

impl ConnectionState {
    /// Binds the connection to a user. Returns `false` if the state does not allow it.
    /// Re-identifying as the same user is accepted.
    pub fn identify(&mut self, user_id: Uuid) -> bool {
        match *self {
            Self::Anonymous => {
                *self = Self::Identified(user_id);
                true
            }
            Self::Identified(current) => current == user_id,
            Self::Disconnected => false,
        }
    }

    /// Moves to the terminal state, returning the user that was bound, if any.
    pub fn disconnect(&mut self) -> Option<Uuid> {
        let user = self.user();
        *self = Self::Disconnected;
        user
    }

    #[must_use]
    pub const fn user(&self) -> Option<Uuid> {
        match self {
            Self::Identified(user) => Some(*user),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_is_one_way() {
        let user = Uuid::new_v4();
        let mut state = ConnectionState::default();
        assert_eq!(state.user(), None);

        assert!(state.identify(user));
        assert!(state.identify(user));
        assert!(!state.identify(Uuid::new_v4()));
        assert_eq!(state.user(), Some(user));

        assert_eq!(state.disconnect(), Some(user));
        assert_eq!(state, ConnectionState::Disconnected);
        assert!(!state.identify(user));
        assert_eq!(state.disconnect(), None);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }

    #[test]
    fn test_connection_id_parses_back() {
        let id = ConnectionId::new();
        assert_eq!(id.to_string().parse::<ConnectionId>().unwrap(), id);
    }
}
