use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ConnectionError, CryptoInitError, RemoteError, VerificationError},
    subscription::Listeners,
    types::{ClientEvent, CreateRoomOptions, Credentials, RoomSnapshot, SasEmoji, ThumbnailMode},
};

/// Phase of a verification request as reported by the collaborator.
///
/// This is the closed boundary enumeration: adapters translate the
/// collaborator's raw phase codes into it immediately, so the state
/// machine never observes a representation change in the collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemotePhase {
    /// Request created locally but not yet sent.
    Unsent,
    /// Request delivered, awaiting acceptance.
    Requested,
    /// Both sides agreed to verify, no verifier yet.
    Ready,
    /// A verifier is running the exchange.
    Started,
    /// The request was cancelled.
    Cancelled,
    /// The exchange completed.
    Done,
}

impl RemotePhase {
    /// Translate a raw collaborator phase code (reference SDK numbering).
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Unsent),
            2 => Some(Self::Requested),
            3 => Some(Self::Ready),
            4 => Some(Self::Started),
            5 => Some(Self::Cancelled),
            6 => Some(Self::Done),
            _ => None,
        }
    }
}

/// One authenticated connection to the messaging server.
///
/// The connection delivers events serially through [`Connection::event_bus`];
/// no component polls it.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// One-shot password authentication against a realm.
    async fn login(
        &self,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<Credentials, RemoteError>;

    /// Initialize the cryptographic subsystem. Must complete before the
    /// event stream is started.
    async fn init_crypto(&self) -> Result<(), CryptoInitError>;

    /// Drop all locally cached cryptographic material. Destructive; only
    /// called on the stale-store recovery path.
    async fn clear_crypto_state(&self) -> Result<(), CryptoInitError>;

    /// Open the live event stream, requesting a bounded initial backlog.
    async fn establish_stream(
        &self,
        credentials: &Credentials,
        initial_backlog: u16,
    ) -> Result<(), ConnectionError>;

    /// Tear down the live connection.
    async fn stop(&self);

    /// Fan-out point for live [`ClientEvent`]s.
    fn event_bus(&self) -> &Listeners<ClientEvent>;

    /// Snapshot of one known room.
    fn room(&self, room_id: &str) -> Option<RoomSnapshot>;

    /// Snapshots of every known room.
    fn rooms(&self) -> Vec<RoomSnapshot>;

    /// Send an event into a room.
    async fn send_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), RemoteError>;

    /// Create a room and return its ID.
    async fn create_room(&self, options: CreateRoomOptions) -> Result<String, RemoteError>;

    /// Join a room by ID or alias.
    async fn join_room(&self, room_id_or_alias: &str) -> Result<(), RemoteError>;

    /// Resolve a content reference to a fetchable thumbnail URL.
    fn resolve_content_url(
        &self,
        content_ref: &str,
        width: u32,
        height: u32,
        mode: ThumbnailMode,
    ) -> Option<String>;
}

/// Capability object for one incoming verification request.
#[async_trait]
pub trait VerificationHandle: Send + Sync + 'static {
    /// Stable identity of this request, used to deduplicate delivery from
    /// multiple underlying sources.
    fn flow_id(&self) -> String;

    /// Device ID of the other party.
    fn other_device_id(&self) -> String;

    /// Current remote phase.
    fn phase(&self) -> RemotePhase;

    /// Accept the request.
    async fn accept(&self) -> Result<(), VerificationError>;

    /// Cancel the request with a reason.
    async fn cancel(&self, reason: &str) -> Result<(), VerificationError>;

    /// Phase-change notifications, already translated to [`RemotePhase`].
    fn changes(&self) -> &Listeners<RemotePhase>;

    /// The verifier, available once the exchange has started.
    fn verifier(&self) -> Option<Arc<dyn Verifier>>;
}

/// Capability object driving one cryptographic exchange.
#[async_trait]
pub trait Verifier: Send + Sync + 'static {
    /// Emits the short-authentication-string material for comparison.
    fn codes(&self) -> &Listeners<Arc<dyn SasCode>>;

    /// Emits when the exchange is cancelled underneath the verifier.
    fn cancellations(&self) -> &Listeners<VerificationError>;

    /// Drives the whole exchange to completion; the single overall
    /// success/failure signal for the attempt.
    async fn verify(&self) -> Result<(), VerificationError>;
}

/// Capability object for one presented comparison code.
#[async_trait]
pub trait SasCode: Send + Sync + 'static {
    /// Emoji representation of the shared secret.
    fn emojis(&self) -> Vec<SasEmoji>;

    /// Decimal representation, when available.
    fn decimals(&self) -> Option<[u16; 3]>;

    /// Confirm that the codes match on this side.
    async fn confirm(&self) -> Result<(), VerificationError>;

    /// Reject the comparison.
    async fn cancel(&self) -> Result<(), VerificationError>;
}
