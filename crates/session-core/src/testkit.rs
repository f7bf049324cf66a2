//! Scriptable in-process collaborator doubles.
//!
//! These implement the capability traits against plain in-memory state so
//! tests and the smoke binary can drive the full session stack without a
//! homeserver. Failure behavior is configured per call site; event delivery
//! goes through the same [`Listeners`] buses a real adapter would use.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU32, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::{
    error::{ConnectionError, CryptoInitError, RemoteError, VerificationError},
    remote::{Connection, RemotePhase, SasCode, VerificationHandle, Verifier},
    subscription::Listeners,
    types::{
        ClientEvent, CreateRoomOptions, Credentials, RoomEvent, RoomSnapshot, SasEmoji,
        ThumbnailMode,
    },
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory connection double with scriptable outcomes and a call log.
pub struct FakeConnection {
    events: Listeners<ClientEvent>,
    rooms: RwLock<HashMap<String, RoomSnapshot>>,
    login_outcome: Mutex<Result<Credentials, RemoteError>>,
    crypto_outcome: Mutex<Result<(), CryptoInitError>>,
    stream_outcome: Mutex<Result<(), ConnectionError>>,
    crypto_inits: AtomicU32,
    crypto_clears: AtomicU32,
    streams_established: Mutex<Vec<u16>>,
    stops: AtomicU32,
    sent_events: Mutex<Vec<(String, String, serde_json::Value)>>,
    joined: Mutex<Vec<String>>,
}

impl FakeConnection {
    /// Connection that accepts any login with demo credentials.
    pub fn new() -> Self {
        Self {
            events: Listeners::new(),
            rooms: RwLock::new(HashMap::new()),
            login_outcome: Mutex::new(Ok(Credentials {
                base_url: "https://example.org".into(),
                user_id: "@alice:example.org".into(),
                device_id: "DEVICE1".into(),
                access_token: "syt_demo_token".into(),
            })),
            crypto_outcome: Mutex::new(Ok(())),
            stream_outcome: Mutex::new(Ok(())),
            crypto_inits: AtomicU32::new(0),
            crypto_clears: AtomicU32::new(0),
            streams_established: Mutex::new(Vec::new()),
            stops: AtomicU32::new(0),
            sent_events: Mutex::new(Vec::new()),
            joined: Mutex::new(Vec::new()),
        }
    }

    /// Configure the next login outcome.
    pub fn set_login_outcome(&self, outcome: Result<Credentials, RemoteError>) {
        *lock(&self.login_outcome) = outcome;
    }

    /// Configure the crypto bootstrap outcome.
    pub fn set_crypto_outcome(&self, outcome: Result<(), CryptoInitError>) {
        *lock(&self.crypto_outcome) = outcome;
    }

    /// Configure the stream establishment outcome.
    pub fn set_stream_outcome(&self, outcome: Result<(), ConnectionError>) {
        *lock(&self.stream_outcome) = outcome;
    }

    /// Seed or replace a known room.
    pub fn set_room(&self, snapshot: RoomSnapshot) {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(snapshot.room_id.clone(), snapshot);
    }

    /// Append a live event to a known room and deliver it on the bus.
    pub fn push_room_event(&self, room_id: &str, event: RoomEvent, historical: bool) {
        if !historical {
            let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(room) = rooms.get_mut(room_id) {
                room.events.push(event.clone());
            }
        }
        self.events.emit(&ClientEvent::Room {
            room_id: room_id.to_owned(),
            event: Some(event),
            historical,
        });
    }

    /// Deliver a "room changed" signal with no timeline event.
    pub fn push_room_update(&self, room_id: &str) {
        self.events.emit(&ClientEvent::Room {
            room_id: room_id.to_owned(),
            event: None,
            historical: false,
        });
    }

    /// Deliver an incoming verification request on the bus.
    pub fn push_verification(&self, request: Arc<dyn VerificationHandle>) {
        self.events.emit(&ClientEvent::Verification(request));
    }

    /// Number of crypto bootstrap calls so far.
    pub fn crypto_inits(&self) -> u32 {
        self.crypto_inits.load(Ordering::SeqCst)
    }

    /// Number of destructive crypto clears so far.
    pub fn crypto_clears(&self) -> u32 {
        self.crypto_clears.load(Ordering::SeqCst)
    }

    /// Backlog depths of every established stream.
    pub fn streams_established(&self) -> Vec<u16> {
        lock(&self.streams_established).clone()
    }

    /// Number of stop calls so far.
    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    /// Events sent through `send_event`.
    pub fn sent_events(&self) -> Vec<(String, String, serde_json::Value)> {
        lock(&self.sent_events).clone()
    }

    /// Rooms joined through `join_room`.
    pub fn joined_rooms(&self) -> Vec<String> {
        lock(&self.joined).clone()
    }
}

impl Default for FakeConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn login(
        &self,
        base_url: &str,
        _username: &str,
        _password: &str,
    ) -> Result<Credentials, RemoteError> {
        lock(&self.login_outcome).clone().map(|mut credentials| {
            if credentials.base_url.is_empty() {
                credentials.base_url = base_url.to_owned();
            }
            credentials
        })
    }

    async fn init_crypto(&self) -> Result<(), CryptoInitError> {
        self.crypto_inits.fetch_add(1, Ordering::SeqCst);
        lock(&self.crypto_outcome).clone()
    }

    async fn clear_crypto_state(&self) -> Result<(), CryptoInitError> {
        self.crypto_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn establish_stream(
        &self,
        _credentials: &Credentials,
        initial_backlog: u16,
    ) -> Result<(), ConnectionError> {
        lock(&self.stream_outcome).clone()?;
        lock(&self.streams_established).push(initial_backlog);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn event_bus(&self) -> &Listeners<ClientEvent> {
        &self.events
    }

    fn room(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    fn rooms(&self) -> Vec<RoomSnapshot> {
        let mut rooms: Vec<RoomSnapshot> = self
            .rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }

    async fn send_event(
        &self,
        room_id: &str,
        event_type: &str,
        content: serde_json::Value,
    ) -> Result<(), RemoteError> {
        lock(&self.sent_events).push((room_id.to_owned(), event_type.to_owned(), content));
        Ok(())
    }

    async fn create_room(&self, options: CreateRoomOptions) -> Result<String, RemoteError> {
        let room_id = format!("!{}:example.org", options.name.to_lowercase());
        self.set_room(RoomSnapshot {
            room_id: room_id.clone(),
            name: Some(options.name),
            avatar: None,
            events: Vec::new(),
        });
        Ok(room_id)
    }

    async fn join_room(&self, room_id_or_alias: &str) -> Result<(), RemoteError> {
        lock(&self.joined).push(room_id_or_alias.to_owned());
        Ok(())
    }

    fn resolve_content_url(
        &self,
        content_ref: &str,
        width: u32,
        height: u32,
        mode: ThumbnailMode,
    ) -> Option<String> {
        if content_ref.is_empty() {
            return None;
        }
        let mode = match mode {
            ThumbnailMode::Crop => "crop",
            ThumbnailMode::Scale => "scale",
        };
        Some(format!(
            "https://cdn.example.org/thumb/{content_ref}?w={width}&h={height}&mode={mode}"
        ))
    }
}

/// Verification request double.
pub struct FakeVerification {
    flow_id: String,
    other_device_id: String,
    phase: Mutex<RemotePhase>,
    changes: Listeners<RemotePhase>,
    verifier: Mutex<Option<Arc<FakeVerifier>>>,
    accept_failure: Mutex<Option<VerificationError>>,
    accept_calls: AtomicU32,
    cancel_reasons: Mutex<Vec<String>>,
}

impl FakeVerification {
    /// Request in the Requested remote phase.
    pub fn new(flow_id: impl Into<String>, other_device_id: impl Into<String>) -> Self {
        Self {
            flow_id: flow_id.into(),
            other_device_id: other_device_id.into(),
            phase: Mutex::new(RemotePhase::Requested),
            changes: Listeners::new(),
            verifier: Mutex::new(None),
            accept_failure: Mutex::new(None),
            accept_calls: AtomicU32::new(0),
            cancel_reasons: Mutex::new(Vec::new()),
        }
    }

    /// Make the next accept call fail.
    pub fn fail_next_accept(&self, reason: &str) {
        *lock(&self.accept_failure) = Some(VerificationError::new(reason));
    }

    /// Attach the verifier the remote side started.
    pub fn set_verifier(&self, verifier: Arc<FakeVerifier>) {
        *lock(&self.verifier) = Some(verifier);
    }

    /// Update the remote phase and notify change listeners.
    pub fn set_remote_phase(&self, phase: RemotePhase) {
        *lock(&self.phase) = phase;
        self.changes.emit(&phase);
    }

    /// Number of accept calls so far.
    pub fn accept_calls(&self) -> u32 {
        self.accept_calls.load(Ordering::SeqCst)
    }

    /// Reasons passed to cancel, in order.
    pub fn cancel_reasons(&self) -> Vec<String> {
        lock(&self.cancel_reasons).clone()
    }
}

#[async_trait]
impl VerificationHandle for FakeVerification {
    fn flow_id(&self) -> String {
        self.flow_id.clone()
    }

    fn other_device_id(&self) -> String {
        self.other_device_id.clone()
    }

    fn phase(&self) -> RemotePhase {
        *lock(&self.phase)
    }

    async fn accept(&self) -> Result<(), VerificationError> {
        self.accept_calls.fetch_add(1, Ordering::SeqCst);
        match lock(&self.accept_failure).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn cancel(&self, reason: &str) -> Result<(), VerificationError> {
        lock(&self.cancel_reasons).push(reason.to_owned());
        *lock(&self.phase) = RemotePhase::Cancelled;
        Ok(())
    }

    fn changes(&self) -> &Listeners<RemotePhase> {
        &self.changes
    }

    fn verifier(&self) -> Option<Arc<dyn Verifier>> {
        lock(&self.verifier)
            .clone()
            .map(|verifier| verifier as Arc<dyn Verifier>)
    }
}

/// Verifier double with an externally resolved completion signal.
pub struct FakeVerifier {
    codes: Listeners<Arc<dyn SasCode>>,
    cancellations: Listeners<VerificationError>,
    completion_tx: Mutex<Option<oneshot::Sender<Result<(), VerificationError>>>>,
    completion_rx: Mutex<Option<oneshot::Receiver<Result<(), VerificationError>>>>,
}

impl FakeVerifier {
    /// Verifier whose completion is resolved via [`FakeVerifier::complete`].
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            codes: Listeners::new(),
            cancellations: Listeners::new(),
            completion_tx: Mutex::new(Some(tx)),
            completion_rx: Mutex::new(Some(rx)),
        }
    }

    /// Present a comparison code to listeners.
    pub fn emit_code(&self, code: Arc<FakeSas>) {
        self.codes.emit(&(code as Arc<dyn SasCode>));
    }

    /// Resolve the overall exchange.
    pub fn complete(&self, outcome: Result<(), VerificationError>) {
        if let Some(tx) = lock(&self.completion_tx).take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Default for FakeVerifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Verifier for FakeVerifier {
    fn codes(&self) -> &Listeners<Arc<dyn SasCode>> {
        &self.codes
    }

    fn cancellations(&self) -> &Listeners<VerificationError> {
        &self.cancellations
    }

    async fn verify(&self) -> Result<(), VerificationError> {
        let receiver = lock(&self.completion_rx).take();
        match receiver {
            Some(receiver) => receiver
                .await
                .unwrap_or_else(|_| Err(VerificationError::new("verifier dropped"))),
            None => Err(VerificationError::new("verify may only be driven once")),
        }
    }
}

/// Comparison code double.
pub struct FakeSas {
    emojis: Vec<SasEmoji>,
    decimals: Option<[u16; 3]>,
    confirm_failure: Mutex<Option<VerificationError>>,
    confirms: AtomicU32,
    cancels: AtomicU32,
}

impl FakeSas {
    /// Code presenting the given material.
    pub fn new(emojis: Vec<SasEmoji>, decimals: Option<[u16; 3]>) -> Self {
        Self {
            emojis,
            decimals,
            confirm_failure: Mutex::new(None),
            confirms: AtomicU32::new(0),
            cancels: AtomicU32::new(0),
        }
    }

    /// Make the next confirm call fail.
    pub fn fail_next_confirm(&self, reason: &str) {
        *lock(&self.confirm_failure) = Some(VerificationError::new(reason));
    }

    /// Number of confirm calls so far.
    pub fn confirms(&self) -> u32 {
        self.confirms.load(Ordering::SeqCst)
    }

    /// Number of cancel calls so far.
    pub fn cancels(&self) -> u32 {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SasCode for FakeSas {
    fn emojis(&self) -> Vec<SasEmoji> {
        self.emojis.clone()
    }

    fn decimals(&self) -> Option<[u16; 3]> {
        self.decimals
    }

    async fn confirm(&self) -> Result<(), VerificationError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        match lock(&self.confirm_failure).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn cancel(&self) -> Result<(), VerificationError> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
