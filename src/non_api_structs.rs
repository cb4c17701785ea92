use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{UserId, UserProfile};

/// Stored user document. Never sent over the wire as-is; see [`UserProfile`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserData {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub connections: BTreeSet<UserId>,
    /// Incoming pending requests only. Outgoing ones are found on the other user's document.
    #[serde(default)]
    pub connection_requests: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

impl UserData {
    pub fn new(name: impl Into<String>, email: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
            connections: BTreeSet::new(),
            connection_requests: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
    pub fn is_connected_to(&self, other: &UserId) -> bool {
        self.connections.contains(other)
    }
    pub fn has_request_from(&self, other: &UserId) -> bool {
        self.connection_requests.contains(other)
    }
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            name: self.name.clone(),
            connection_count: self.connections.len(),
        }
    }
}
