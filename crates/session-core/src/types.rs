use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::remote::VerificationHandle;

/// Credential bundle for one authenticated user/device pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    /// Homeserver base URL, for example `https://matrix.example.org`.
    pub base_url: String,
    /// Fully qualified user ID.
    pub user_id: String,
    /// Device ID issued by the homeserver at login.
    pub device_id: String,
    /// Bearer token used by the live connection.
    pub access_token: String,
}

impl Credentials {
    /// Whether every field required to establish a connection is present.
    pub fn is_complete(&self) -> bool {
        !self.base_url.is_empty()
            && !self.user_id.is_empty()
            && !self.device_id.is_empty()
            && !self.access_token.is_empty()
    }
}

/// Caller-facing view of an authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionInfo {
    /// Fully qualified user ID.
    pub user_id: String,
    /// Device ID for this session.
    pub device_id: String,
    /// Homeserver base URL.
    pub base_url: String,
    /// Bearer token for the session.
    pub access_token: String,
}

impl From<Credentials> for SessionInfo {
    fn from(credentials: Credentials) -> Self {
        Self {
            user_id: credentials.user_id,
            device_id: credentials.device_id,
            base_url: credentials.base_url,
            access_token: credentials.access_token,
        }
    }
}

/// One timeline event as delivered by the live connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomEvent {
    /// Event ID when available.
    pub event_id: Option<String>,
    /// Sender user ID.
    pub sender: String,
    /// Display-ready text body.
    pub body: String,
    /// Event timestamp in milliseconds since Unix epoch.
    pub timestamp_ms: u64,
}

/// Collaborator-provided view of one known room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Room ID.
    pub room_id: String,
    /// Computed display name, when the collaborator has one.
    pub name: Option<String>,
    /// Avatar content reference (not a resolved URL).
    pub avatar: Option<String>,
    /// Currently known chronological events, oldest first.
    pub events: Vec<RoomEvent>,
}

impl RoomSnapshot {
    /// The newest known event for this room.
    pub fn latest_event(&self) -> Option<&RoomEvent> {
        self.events.last()
    }
}

/// Lightweight per-room metadata maintained by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomSummary {
    /// Room ID (unique key).
    pub room_id: String,
    /// Display name, falling back to the room ID.
    pub display_name: String,
    /// Resolved avatar thumbnail URL, when available.
    pub avatar_url: Option<String>,
    /// Body of the newest known message.
    pub last_message: String,
    /// Timestamp of the newest known message in milliseconds.
    pub timestamp_ms: u64,
}

impl RoomSummary {
    /// Empty summary synthesized from a room identifier alone.
    pub fn placeholder(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        Self {
            display_name: room_id.clone(),
            room_id,
            avatar_url: None,
            last_message: String::new(),
            timestamp_ms: 0,
        }
    }
}

/// Thumbnail resize mode passed through to the collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ThumbnailMode {
    /// Crop to exactly the requested dimensions.
    Crop,
    /// Scale to fit within the requested dimensions.
    Scale,
}

/// Options for creating a new room through the collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomOptions {
    /// Room display name.
    pub name: String,
    /// Optional topic.
    pub topic: Option<String>,
    /// Whether to enable end-to-end encryption for the room.
    pub encrypted: bool,
}

impl CreateRoomOptions {
    /// Options for a private, encrypted room with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: None,
            encrypted: true,
        }
    }
}

/// One short-authentication-string emoji with its spoken description.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SasEmoji {
    /// The emoji glyph shown to the user.
    pub symbol: String,
    /// Language-neutral name, for example "Cat".
    pub description: String,
}

/// Captured short-authentication-string material for user comparison.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SasTranscript {
    /// Emoji representation of the shared secret.
    pub emojis: Vec<SasEmoji>,
    /// Decimal representation, when the collaborator provides one.
    pub decimals: Option<[u16; 3]>,
}

/// One event delivered by the live connection, prior to demultiplexing.
#[derive(Clone)]
pub enum ClientEvent {
    /// Room/timeline event family. `event` is absent for updates that only
    /// signal "this room changed" (membership, name, and similar).
    Room {
        /// Room the event belongs to.
        room_id: String,
        /// The timeline event itself, when there is one.
        event: Option<RoomEvent>,
        /// Delivered as part of backfilling older history.
        historical: bool,
    },
    /// Incoming device-verification request.
    Verification(Arc<dyn VerificationHandle>),
}

impl fmt::Debug for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Room {
                room_id,
                event,
                historical,
            } => f
                .debug_struct("Room")
                .field("room_id", room_id)
                .field("event", event)
                .field("historical", historical)
                .finish(),
            Self::Verification(request) => f
                .debug_tuple("Verification")
                .field(&request.flow_id())
                .finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_completeness_requires_every_field() {
        let complete = Credentials {
            base_url: "https://example.org".into(),
            user_id: "@alice:example.org".into(),
            device_id: "DEVICE1".into(),
            access_token: "tok".into(),
        };
        assert!(complete.is_complete());

        let missing_token = Credentials {
            access_token: String::new(),
            ..complete
        };
        assert!(!missing_token.is_complete());
    }

    #[test]
    fn placeholder_summary_falls_back_to_room_id() {
        let summary = RoomSummary::placeholder("!r:example.org");
        assert_eq!(summary.room_id, "!r:example.org");
        assert_eq!(summary.display_name, "!r:example.org");
        assert_eq!(summary.last_message, "");
        assert_eq!(summary.timestamp_ms, 0);
        assert_eq!(summary.avatar_url, None);
    }

    #[test]
    fn latest_event_is_the_newest_entry() {
        let snapshot = RoomSnapshot {
            room_id: "!r:example.org".into(),
            name: None,
            avatar: None,
            events: vec![
                RoomEvent {
                    event_id: Some("$1".into()),
                    sender: "@alice:example.org".into(),
                    body: "old".into(),
                    timestamp_ms: 1,
                },
                RoomEvent {
                    event_id: Some("$2".into()),
                    sender: "@alice:example.org".into(),
                    body: "new".into(),
                    timestamp_ms: 2,
                },
            ],
        };
        assert_eq!(snapshot.latest_event().map(|e| e.body.as_str()), Some("new"));
    }
}
