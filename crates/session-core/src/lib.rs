//! Core contract for the session/synchronization layer.
//!
//! This crate defines the collaborator capability traits, the error
//! taxonomy, the listener-subscription primitive, and the three reactive
//! components fed by the live event stream: room aggregation, per-room
//! timeline views, and the device-verification state machine.

/// Stable error taxonomy and auth-failure classification.
pub mod error;
/// Collaborator capability traits and the remote phase boundary.
pub mod remote;
/// Incremental per-room summary aggregation.
pub mod rooms;
/// Listener registration with token-scoped detach.
pub mod subscription;
/// Per-room timeline subscription adapter.
pub mod timeline;
/// Protocol-facing data types.
pub mod types;
/// Interactive device-verification state machine.
pub mod verification;

/// Scriptable collaborator doubles for tests and demos.
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use error::{
    AuthError, ConnectionError, CryptoInitError, RemoteError, SessionError, VerificationError,
    classify_login_failure,
};
pub use remote::{Connection, RemotePhase, SasCode, VerificationHandle, Verifier};
pub use rooms::RoomAggregator;
pub use subscription::{Listeners, SubscriptionToken};
pub use timeline::{FocusState, TimelineView};
pub use types::{
    ClientEvent, CreateRoomOptions, Credentials, RoomEvent, RoomSnapshot, RoomSummary, SasEmoji,
    SasTranscript, SessionInfo, ThumbnailMode,
};
pub use verification::{AttemptSnapshot, VerificationCoordinator, VerificationPhase};
