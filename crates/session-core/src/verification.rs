use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::{
    error::VerificationError,
    remote::{SasCode, VerificationHandle, Verifier},
    subscription::SubscriptionToken,
    types::SasTranscript,
};

/// Display delay before a Verified outcome auto-reverts to Idle.
pub const VERIFIED_REVERT_DELAY: Duration = Duration::from_secs(3);
/// Display delay before a Cancelled outcome auto-reverts to Idle.
pub const CANCELLED_REVERT_DELAY: Duration = Duration::from_secs(2);

const LOCAL_CANCELLED_REASON: &str = "Verification cancelled by user.";
const LOCAL_CANCEL_WIRE_REASON: &str = "User declined";

/// Phase of the locally tracked verification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationPhase {
    /// No attempt in progress.
    Idle,
    /// An incoming request is awaiting acceptance.
    Requested,
    /// The exchange is running, no comparison code yet.
    Started,
    /// A comparison code is on display, awaiting user confirmation.
    ShowingCode,
    /// The exchange succeeded. Terminal; auto-reverts to Idle.
    Verified,
    /// The attempt was cancelled or failed. Terminal; auto-reverts to Idle.
    Cancelled,
}

impl VerificationPhase {
    /// Whether this phase ends the attempt.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Cancelled)
    }
}

/// Snapshot of the current attempt for presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptSnapshot {
    /// Current phase.
    pub phase: VerificationPhase,
    /// Device ID of the other party, when an attempt exists.
    pub other_device_id: Option<String>,
    /// Captured comparison material, once presented.
    pub transcript: Option<SasTranscript>,
    /// Human-readable reason for the last failure or cancellation.
    pub last_error: Option<String>,
}

/// State machine for one interactive device-verification attempt.
///
/// At most one attempt is active system-wide; a second incoming request is
/// dropped, never queued. The live event stream, the verifier's completion
/// future, and direct user actions can all race, so every transition is a
/// compare-and-transition guarded by the current phase and an attempt
/// generation counter; late results of in-flight calls are discarded once
/// the attempt has been cancelled or reset.
///
/// Must be created inside a tokio runtime; completion watchers and the
/// terminal-display timers are spawned on the ambient handle.
#[derive(Clone)]
pub struct VerificationCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    runtime: Handle,
    slot: Mutex<Slot>,
}

struct Slot {
    generation: u64,
    phase: VerificationPhase,
    request: Option<Arc<dyn VerificationHandle>>,
    code: Option<Arc<dyn SasCode>>,
    transcript: Option<SasTranscript>,
    last_error: Option<String>,
    change_sub: Option<SubscriptionToken>,
    verifier_subs: Vec<SubscriptionToken>,
    verifier_attached: bool,
}

impl Slot {
    fn blank(generation: u64) -> Self {
        Self {
            generation,
            phase: VerificationPhase::Idle,
            request: None,
            code: None,
            transcript: None,
            last_error: None,
            change_sub: None,
            verifier_subs: Vec::new(),
            verifier_attached: false,
        }
    }
}

fn transition(slot: &mut Slot, next: VerificationPhase) {
    debug!(from = ?slot.phase, to = ?next, "verification phase change");
    slot.phase = next;
}

impl VerificationCoordinator {
    /// New coordinator with no active attempt.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime: Handle::current(),
                slot: Mutex::new(Slot::blank(0)),
            }),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> VerificationPhase {
        self.inner.lock_slot().phase
    }

    /// Whether an attempt is in progress (any non-Idle phase).
    pub fn is_active(&self) -> bool {
        self.phase() != VerificationPhase::Idle
    }

    /// Presentation snapshot of the current attempt.
    pub fn snapshot(&self) -> AttemptSnapshot {
        let slot = self.inner.lock_slot();
        AttemptSnapshot {
            phase: slot.phase,
            other_device_id: slot.request.as_ref().map(|r| r.other_device_id()),
            transcript: slot.transcript.clone(),
            last_error: slot.last_error.clone(),
        }
    }

    /// Handle an incoming verification request.
    ///
    /// Dropped (returning `false`) while any attempt is already active;
    /// otherwise binds the one-shot change listener and moves to Requested.
    pub fn on_incoming_request(&self, request: Arc<dyn VerificationHandle>) -> bool {
        let mut slot = self.inner.lock_slot();
        if slot.phase != VerificationPhase::Idle {
            debug!(
                flow_id = %request.flow_id(),
                phase = ?slot.phase,
                "verification request dropped: an attempt is already active"
            );
            return false;
        }

        let generation = slot.generation;
        let weak = Arc::downgrade(&self.inner);
        let token = request.changes().subscribe(move |phase| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_remote_phase(&inner, generation, *phase);
            }
        });

        debug!(flow_id = %request.flow_id(), device = %request.other_device_id(), "verification requested");
        slot.request = Some(request);
        slot.change_sub = Some(token);
        transition(&mut slot, VerificationPhase::Requested);
        true
    }

    /// Accept the pending request. No-op outside Requested.
    ///
    /// Moves to Started optimistically on success, ahead of the
    /// remote-driven transition; the two paths converge. A failed accept
    /// cancels the attempt with the surfaced error.
    pub async fn accept(&self) {
        let (request, generation) = {
            let slot = self.inner.lock_slot();
            if slot.phase != VerificationPhase::Requested {
                debug!(phase = ?slot.phase, "accept ignored outside Requested");
                return;
            }
            let Some(request) = slot.request.as_ref().map(Arc::clone) else {
                return;
            };
            (request, slot.generation)
        };

        match request.accept().await {
            Ok(()) => {
                let verifier = {
                    let mut slot = self.inner.lock_slot();
                    if slot.generation != generation {
                        return;
                    }
                    if slot.phase == VerificationPhase::Requested {
                        transition(&mut slot, VerificationPhase::Started);
                    }
                    if slot.phase == VerificationPhase::Started && !slot.verifier_attached {
                        request.verifier()
                    } else {
                        None
                    }
                };
                if let Some(verifier) = verifier {
                    Inner::attach_verifier(&self.inner, generation, verifier);
                }
            }
            Err(err) => {
                warn!(%err, "failed to accept verification request");
                Inner::cancel_with_reason(&self.inner, generation, err.reason().to_owned());
            }
        }
    }

    /// Confirm that the displayed codes match. No-op outside ShowingCode.
    ///
    /// Fire-and-await-convergence: the eventual state change arrives
    /// through the verifier's completion signal, not from this call.
    pub async fn confirm_match(&self) {
        let (code, generation) = {
            let slot = self.inner.lock_slot();
            if slot.phase != VerificationPhase::ShowingCode {
                debug!(phase = ?slot.phase, "confirm ignored outside ShowingCode");
                return;
            }
            let Some(code) = slot.code.as_ref().map(Arc::clone) else {
                return;
            };
            (code, slot.generation)
        };

        if let Err(err) = code.confirm().await {
            let mut slot = self.inner.lock_slot();
            if slot.generation == generation && !slot.phase.is_terminal() {
                slot.last_error = Some(format!("Failed to confirm match: {err}"));
            }
        }
    }

    /// Cancel the attempt from any non-terminal state.
    ///
    /// Best-effort cancels the request and the comparison code
    /// independently, ignoring individual failures, then forces Cancelled.
    /// Calling this again once Cancelled is a no-op.
    pub fn cancel_attempt(&self) {
        let (request, code, generation) = {
            let mut slot = self.inner.lock_slot();
            if slot.phase == VerificationPhase::Idle || slot.phase.is_terminal() {
                debug!(phase = ?slot.phase, "cancel ignored");
                return;
            }
            let handles = (slot.request.clone(), slot.code.clone(), slot.generation);
            transition(&mut slot, VerificationPhase::Cancelled);
            slot.last_error = Some(LOCAL_CANCELLED_REASON.to_owned());
            slot.change_sub = None;
            slot.verifier_subs.clear();
            handles
        };

        if let Some(request) = request {
            self.inner.runtime.spawn(async move {
                if let Err(err) = request.cancel(LOCAL_CANCEL_WIRE_REASON).await {
                    debug!(%err, "request cancel failed");
                }
            });
        }
        if let Some(code) = code {
            self.inner.runtime.spawn(async move {
                if let Err(err) = code.cancel().await {
                    debug!(%err, "code cancel failed");
                }
            });
        }

        Inner::schedule_revert(&self.inner, generation, CANCELLED_REVERT_DELAY);
    }

    /// Detach everything, clear the attempt, and return to Idle.
    ///
    /// Runs automatically after the terminal display delay and is also
    /// callable directly.
    pub fn reset(&self) {
        let mut slot = self.inner.lock_slot();
        debug!(phase = ?slot.phase, "verification attempt reset");
        let next_generation = slot.generation + 1;
        *slot = Slot::blank(next_generation);
    }
}

impl Default for VerificationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// React to a translated phase change on the bound request.
    ///
    /// One-shot: exactly one of Started/Cancelled fires per attempt, and
    /// firing detaches the change listener. Other phases are ignored.
    fn on_remote_phase(inner: &Arc<Self>, generation: u64, phase: crate::remote::RemotePhase) {
        use crate::remote::RemotePhase;

        match phase {
            RemotePhase::Started => {
                let verifier = {
                    let mut slot = inner.lock_slot();
                    if slot.generation != generation {
                        return;
                    }
                    slot.change_sub = None;
                    if slot.phase == VerificationPhase::Requested {
                        transition(&mut slot, VerificationPhase::Started);
                    }
                    if slot.phase == VerificationPhase::Started && !slot.verifier_attached {
                        slot.request.as_ref().and_then(|r| r.verifier())
                    } else {
                        None
                    }
                };
                if let Some(verifier) = verifier {
                    Self::attach_verifier(inner, generation, verifier);
                }
            }
            RemotePhase::Cancelled => {
                Self::cancel_with_reason(
                    inner,
                    generation,
                    VerificationError::remote_cancelled().reason().to_owned(),
                );
            }
            _ => {}
        }
    }

    /// Subscribe to the verifier's signals and await its completion.
    fn attach_verifier(inner: &Arc<Self>, generation: u64, verifier: Arc<dyn Verifier>) {
        {
            let mut slot = inner.lock_slot();
            if slot.generation != generation || slot.verifier_attached {
                return;
            }
            slot.verifier_attached = true;
        }

        let code_sub = {
            let weak = Arc::downgrade(inner);
            verifier.codes().subscribe(move |code| {
                if let Some(inner) = weak.upgrade() {
                    Self::on_code(&inner, generation, Arc::clone(code));
                }
            })
        };
        let cancel_sub = {
            let weak = Arc::downgrade(inner);
            verifier.cancellations().subscribe(move |err| {
                if let Some(inner) = weak.upgrade() {
                    Self::cancel_with_reason(&inner, generation, err.reason().to_owned());
                }
            })
        };

        {
            let mut slot = inner.lock_slot();
            if slot.generation != generation {
                // The attempt moved on while subscribing; tokens drop and
                // detach on their own.
                return;
            }
            slot.verifier_subs.push(code_sub);
            slot.verifier_subs.push(cancel_sub);
        }

        let weak = Arc::downgrade(inner);
        inner.runtime.spawn(async move {
            let outcome = verifier.verify().await;
            let Some(inner) = weak.upgrade() else { return };
            match outcome {
                Ok(()) => Self::complete_verified(&inner, generation),
                Err(err) => {
                    Self::cancel_with_reason(&inner, generation, err.reason().to_owned());
                }
            }
        });
    }

    fn on_code(inner: &Arc<Self>, generation: u64, code: Arc<dyn SasCode>) {
        let mut slot = inner.lock_slot();
        if slot.generation != generation {
            return;
        }
        if slot.phase != VerificationPhase::Started {
            debug!(phase = ?slot.phase, "comparison code ignored");
            return;
        }
        slot.transcript = Some(SasTranscript {
            emojis: code.emojis(),
            decimals: code.decimals(),
        });
        slot.code = Some(code);
        transition(&mut slot, VerificationPhase::ShowingCode);
    }

    fn complete_verified(inner: &Arc<Self>, generation: u64) {
        {
            let mut slot = inner.lock_slot();
            if slot.generation != generation {
                return;
            }
            if !matches!(
                slot.phase,
                VerificationPhase::Started | VerificationPhase::ShowingCode
            ) {
                return;
            }
            transition(&mut slot, VerificationPhase::Verified);
            slot.change_sub = None;
            slot.verifier_subs.clear();
        }
        Self::schedule_revert(inner, generation, VERIFIED_REVERT_DELAY);
    }

    /// Cancel with a reason unless the attempt is already terminal.
    ///
    /// Cancelling an already-Cancelled attempt is a no-op (no double
    /// report), and a terminal phase never transitions backward.
    fn cancel_with_reason(inner: &Arc<Self>, generation: u64, reason: String) {
        {
            let mut slot = inner.lock_slot();
            if slot.generation != generation || slot.phase.is_terminal() {
                return;
            }
            transition(&mut slot, VerificationPhase::Cancelled);
            slot.last_error = Some(reason);
            slot.change_sub = None;
            slot.verifier_subs.clear();
        }
        Self::schedule_revert(inner, generation, CANCELLED_REVERT_DELAY);
    }

    fn schedule_revert(inner: &Arc<Self>, generation: u64, delay: Duration) {
        let weak = Arc::downgrade(inner);
        inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            let mut slot = inner.lock_slot();
            if slot.generation == generation && slot.phase.is_terminal() {
                debug!(phase = ?slot.phase, "terminal display delay elapsed");
                let next_generation = slot.generation + 1;
                *slot = Slot::blank(next_generation);
            }
        });
    }
}
