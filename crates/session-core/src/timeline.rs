use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, trace};

use crate::{
    remote::Connection,
    subscription::SubscriptionToken,
    types::{ClientEvent, RoomEvent},
};

/// Default cap on retained recent events per focused room.
pub const DEFAULT_RECENT_HISTORY_CAP: usize = 200;

/// Where the view's attention currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusState {
    /// No room focused yet.
    Idle,
    /// Focused on a known room.
    Focused {
        /// The focused room ID.
        room_id: String,
        /// Display name at focus time, falling back to the room ID.
        name: String,
    },
    /// The requested room is not known to the session.
    NotFound {
        /// The room ID that failed to resolve.
        room_id: String,
    },
}

struct ViewState {
    focus: FocusState,
    events: Vec<RoomEvent>,
}

struct ViewShared {
    max_items: usize,
    state: Mutex<ViewState>,
}

impl ViewShared {
    fn lock_state(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a live event if it belongs to the focused room and is not a
    /// history replay.
    fn apply_live(&self, room_id: &str, event: &RoomEvent, historical: bool) {
        if historical {
            return;
        }
        let mut state = self.lock_state();
        let focused = matches!(
            &state.focus,
            FocusState::Focused { room_id: focused, .. } if focused == room_id
        );
        if !focused {
            trace!(%room_id, "live event outside focus ignored");
            return;
        }
        state.events.push(event.clone());
        trim_to_max(&mut state.events, self.max_items);
    }
}

/// Replays one room's buffered history and appends its live events.
///
/// The buffer is scoped to the focused room only and rebuilt from scratch
/// whenever focus changes; unfocused rooms retain nothing. The live
/// listener follows the observe lifecycle: one attach per view, detached
/// by [`TimelineView::stop_observing`] or drop.
pub struct TimelineView<C: Connection + ?Sized> {
    conn: Arc<C>,
    shared: Arc<ViewShared>,
    live_sub: Mutex<Option<SubscriptionToken>>,
}

impl<C: Connection + ?Sized> TimelineView<C> {
    /// View with the default recent-history cap.
    pub fn new(conn: Arc<C>) -> Self {
        Self::with_cap(conn, DEFAULT_RECENT_HISTORY_CAP)
    }

    /// View retaining at most `max_items` events (`max_items >= 1`).
    pub fn with_cap(conn: Arc<C>, max_items: usize) -> Self {
        Self {
            conn,
            shared: Arc::new(ViewShared {
                max_items: max_items.max(1),
                state: Mutex::new(ViewState {
                    focus: FocusState::Idle,
                    events: Vec::new(),
                }),
            }),
            live_sub: Mutex::new(None),
        }
    }

    /// Move focus to a room, replacing the buffer with its current
    /// chronological snapshot (or marking the room not found).
    pub fn focus(&self, room_id: &str) {
        let snapshot = self.conn.room(room_id);
        let mut state = self.shared.lock_state();
        match snapshot {
            Some(snapshot) => {
                let mut events = snapshot.events;
                trim_to_max(&mut events, self.shared.max_items);
                state.focus = FocusState::Focused {
                    room_id: snapshot.room_id,
                    name: snapshot.name.unwrap_or_else(|| room_id.to_owned()),
                };
                state.events = events;
            }
            None => {
                debug!(%room_id, "focus on unknown room");
                state.focus = FocusState::NotFound {
                    room_id: room_id.to_owned(),
                };
                state.events = Vec::new();
            }
        }
    }

    /// Attach the live listener. A second call while observing is a no-op.
    pub fn start_observing(&self) {
        let mut sub = self.live_sub.lock().unwrap_or_else(PoisonError::into_inner);
        if sub.is_some() {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let token = self.conn.event_bus().subscribe(move |client_event| {
            let Some(shared) = weak.upgrade() else { return };
            if let ClientEvent::Room {
                room_id,
                event: Some(event),
                historical,
            } = client_event
            {
                shared.apply_live(room_id, event, *historical);
            }
        });
        *sub = Some(token);
    }

    /// Detach the live listener. Safe to call when not observing.
    pub fn stop_observing(&self) {
        self.live_sub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Whether the live listener is attached.
    pub fn is_observing(&self) -> bool {
        self.live_sub
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Buffered events for the focused room, oldest first.
    pub fn events(&self) -> Vec<RoomEvent> {
        self.shared.lock_state().events.clone()
    }

    /// Current focus.
    pub fn focus_state(&self) -> FocusState {
        self.shared.lock_state().focus.clone()
    }
}

fn trim_to_max(events: &mut Vec<RoomEvent>, max_items: usize) {
    if events.len() > max_items {
        let excess = events.len() - max_items;
        events.drain(0..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::FakeConnection;
    use crate::types::RoomSnapshot;

    fn event(body: &str, timestamp_ms: u64) -> RoomEvent {
        RoomEvent {
            event_id: None,
            sender: "@alice:example.org".into(),
            body: body.into(),
            timestamp_ms,
        }
    }

    fn seeded_connection() -> Arc<FakeConnection> {
        let conn = Arc::new(FakeConnection::new());
        conn.set_room(RoomSnapshot {
            room_id: "!a:example.org".into(),
            name: Some("Alpha".into()),
            avatar: None,
            events: vec![event("first", 1), event("second", 2)],
        });
        conn.set_room(RoomSnapshot {
            room_id: "!b:example.org".into(),
            name: None,
            avatar: None,
            events: Vec::new(),
        });
        conn
    }

    #[test]
    fn focus_replays_the_room_snapshot() {
        let conn = seeded_connection();
        let view = TimelineView::new(conn);

        view.focus("!a:example.org");
        assert_eq!(
            view.focus_state(),
            FocusState::Focused {
                room_id: "!a:example.org".into(),
                name: "Alpha".into(),
            }
        );
        let bodies: Vec<String> = view.events().into_iter().map(|e| e.body).collect();
        assert_eq!(bodies, vec!["first".to_owned(), "second".to_owned()]);
    }

    #[test]
    fn focus_on_unknown_room_yields_empty_sentinel_state() {
        let conn = seeded_connection();
        let view = TimelineView::new(conn);

        view.focus("!nope:example.org");
        assert_eq!(
            view.focus_state(),
            FocusState::NotFound {
                room_id: "!nope:example.org".into(),
            }
        );
        assert!(view.events().is_empty());
    }

    #[test]
    fn live_events_append_only_for_the_focused_room() {
        let conn = seeded_connection();
        let view = TimelineView::new(Arc::clone(&conn));
        view.start_observing();
        view.focus("!a:example.org");

        conn.push_room_event("!a:example.org", event("third", 3), false);
        conn.push_room_event("!b:example.org", event("elsewhere", 4), false);

        let bodies: Vec<String> = view.events().into_iter().map(|e| e.body).collect();
        assert_eq!(
            bodies,
            vec!["first".to_owned(), "second".to_owned(), "third".to_owned()]
        );
    }

    #[test]
    fn historical_replays_are_not_appended() {
        let conn = seeded_connection();
        let view = TimelineView::new(Arc::clone(&conn));
        view.start_observing();
        view.focus("!a:example.org");

        conn.push_room_event("!a:example.org", event("paginated", 0), true);
        assert_eq!(view.events().len(), 2);
    }

    #[test]
    fn events_for_a_previously_focused_room_are_ignored() {
        let conn = seeded_connection();
        let view = TimelineView::new(Arc::clone(&conn));
        view.start_observing();

        view.focus("!a:example.org");
        view.focus("!b:example.org");
        conn.push_room_event("!a:example.org", event("late", 9), false);

        assert!(view.events().is_empty(), "focus has moved away from !a");
    }

    #[test]
    fn observe_lifecycle_attaches_exactly_one_listener() {
        let conn = seeded_connection();
        let view = TimelineView::new(Arc::clone(&conn));

        view.start_observing();
        view.start_observing();
        assert_eq!(conn.event_bus().len(), 1);
        assert!(view.is_observing());

        view.stop_observing();
        assert!(conn.event_bus().is_empty());
        assert!(!view.is_observing());

        // Detached views no longer receive live events; only a later
        // focus snapshot picks them up.
        view.focus("!a:example.org");
        conn.push_room_event("!a:example.org", event("unseen", 5), false);
        assert_eq!(view.events().len(), 2);
        view.focus("!a:example.org");
        assert_eq!(view.events().len(), 3);
    }

    #[test]
    fn buffer_is_capped_oldest_first() {
        let conn = seeded_connection();
        let view = TimelineView::with_cap(Arc::clone(&conn), 2);
        view.start_observing();
        view.focus("!a:example.org");

        conn.push_room_event("!a:example.org", event("third", 3), false);
        let bodies: Vec<String> = view.events().into_iter().map(|e| e.body).collect();
        assert_eq!(bodies, vec!["second".to_owned(), "third".to_owned()]);
    }
}
