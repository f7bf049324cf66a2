use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::{SystemTime, UNIX_EPOCH},
};

use tracing::trace;

use crate::{
    remote::Connection,
    types::{RoomEvent, RoomSnapshot, RoomSummary, ThumbnailMode},
};

/// Fixed thumbnail edge length for summary avatars.
const AVATAR_THUMBNAIL_SIZE: u32 = 32;

/// Folds the live event stream into current per-room summaries.
///
/// Aggregation never fails the caller: missing data degrades to fallback
/// values, and a lookup miss synthesizes an empty summary from the
/// identifier. Summaries are overwritten whole; partial fields are never
/// merged.
pub struct RoomAggregator<C: Connection + ?Sized> {
    conn: Arc<C>,
    rooms: RwLock<HashMap<String, RoomSummary>>,
}

impl<C: Connection + ?Sized> RoomAggregator<C> {
    /// Aggregator with no known rooms.
    pub fn new(conn: Arc<C>) -> Self {
        Self {
            conn,
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Derive an initial summary for every room the session already knows,
    /// from each room's most recent known event.
    pub fn bootstrap(&self) {
        let snapshots = self.conn.rooms();
        let mut rooms = self.write_rooms();
        for snapshot in &snapshots {
            let summary = self.summarize(snapshot, snapshot.latest_event());
            rooms.insert(snapshot.room_id.clone(), summary);
        }
    }

    /// Incremental update from one forwarded room event.
    ///
    /// Without a room this is a no-op. The summary reflects the incoming
    /// event when present, else the room's latest known event.
    pub fn on_event(&self, event: Option<&RoomEvent>, room: Option<&RoomSnapshot>) {
        let Some(room) = room else {
            trace!("room event without a room ignored");
            return;
        };
        let summary = self.summarize(room, event.or_else(|| room.latest_event()));
        self.write_rooms().insert(room.room_id.clone(), summary);
    }

    /// Summary for one room; a miss synthesizes an empty summary from the
    /// identifier.
    pub fn select(&self, room_id: &str) -> RoomSummary {
        self.read_rooms()
            .get(room_id)
            .cloned()
            .unwrap_or_else(|| RoomSummary::placeholder(room_id))
    }

    /// Every known summary, in no particular order.
    pub fn list(&self) -> Vec<RoomSummary> {
        self.read_rooms().values().cloned().collect()
    }

    /// Summaries ordered by descending last-message timestamp. Ties are
    /// broken arbitrarily.
    pub fn sorted_by_recency(&self) -> Vec<RoomSummary> {
        let mut rooms = self.list();
        rooms.sort_unstable_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        rooms
    }

    /// Drop every summary. Used on full session teardown.
    pub fn clear(&self) {
        self.write_rooms().clear();
    }

    fn summarize(&self, room: &RoomSnapshot, newest: Option<&RoomEvent>) -> RoomSummary {
        let display_name = room
            .name
            .clone()
            .unwrap_or_else(|| room.room_id.clone());
        let avatar_url = room.avatar.as_deref().and_then(|content_ref| {
            self.conn.resolve_content_url(
                content_ref,
                AVATAR_THUMBNAIL_SIZE,
                AVATAR_THUMBNAIL_SIZE,
                ThumbnailMode::Crop,
            )
        });
        let (last_message, timestamp_ms) = match newest {
            Some(event) => (event.body.clone(), event.timestamp_ms),
            None => (String::new(), now_ms()),
        };

        RoomSummary {
            room_id: room.room_id.clone(),
            display_name,
            avatar_url,
            last_message,
            timestamp_ms,
        }
    }

    fn read_rooms(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RoomSummary>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, RoomSummary>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::testkit::FakeConnection;

    fn event(body: &str, timestamp_ms: u64) -> RoomEvent {
        RoomEvent {
            event_id: None,
            sender: "@alice:example.org".into(),
            body: body.into(),
            timestamp_ms,
        }
    }

    fn room(room_id: &str, name: Option<&str>) -> RoomSnapshot {
        RoomSnapshot {
            room_id: room_id.into(),
            name: name.map(ToOwned::to_owned),
            avatar: None,
            events: Vec::new(),
        }
    }

    fn aggregator() -> (Arc<FakeConnection>, RoomAggregator<FakeConnection>) {
        let conn = Arc::new(FakeConnection::new());
        let aggregator = RoomAggregator::new(Arc::clone(&conn));
        (conn, aggregator)
    }

    #[test]
    fn summary_tracks_the_most_recent_event_per_room() {
        let (_, aggregator) = aggregator();
        let a = room("!a:example.org", Some("Alpha"));
        let b = room("!b:example.org", Some("Beta"));

        aggregator.on_event(Some(&event("one", 10)), Some(&a));
        aggregator.on_event(Some(&event("unrelated", 11)), Some(&b));
        aggregator.on_event(Some(&event("two", 12)), Some(&a));

        let summary = aggregator.select("!a:example.org");
        assert_eq!(summary.last_message, "two");
        assert_eq!(summary.timestamp_ms, 12);
        assert_eq!(aggregator.select("!b:example.org").last_message, "unrelated");
    }

    #[test]
    fn missing_event_falls_back_to_latest_known_room_event() {
        let (_, aggregator) = aggregator();
        let mut snapshot = room("!a:example.org", Some("Alpha"));
        snapshot.events.push(event("backlog", 99));

        aggregator.on_event(None, Some(&snapshot));
        let summary = aggregator.select("!a:example.org");
        assert_eq!(summary.last_message, "backlog");
        assert_eq!(summary.timestamp_ms, 99);
    }

    #[test]
    fn display_name_falls_back_to_room_id() {
        let (_, aggregator) = aggregator();
        aggregator.on_event(Some(&event("hi", 1)), Some(&room("!anon:example.org", None)));
        assert_eq!(
            aggregator.select("!anon:example.org").display_name,
            "!anon:example.org"
        );
    }

    #[test]
    fn avatar_is_resolved_at_fixed_thumbnail_size() {
        let (_, aggregator) = aggregator();
        let mut snapshot = room("!a:example.org", Some("Alpha"));
        snapshot.avatar = Some("mxc://example.org/abc".into());

        aggregator.on_event(Some(&event("hi", 1)), Some(&snapshot));
        let url = aggregator
            .select("!a:example.org")
            .avatar_url
            .expect("avatar url");
        assert!(url.contains("w=32") && url.contains("h=32") && url.contains("mode=crop"));
    }

    #[test]
    fn event_without_room_is_ignored() {
        let (_, aggregator) = aggregator();
        aggregator.on_event(Some(&event("hi", 1)), None);
        assert!(aggregator.list().is_empty());
    }

    #[test]
    fn lookup_miss_synthesizes_placeholder() {
        let (_, aggregator) = aggregator();
        let summary = aggregator.select("!missing:example.org");
        assert_eq!(summary.display_name, "!missing:example.org");
        assert_eq!(summary.last_message, "");
    }

    #[test]
    fn bootstrap_derives_summaries_from_known_rooms() {
        let (conn, aggregator) = aggregator();
        let mut alpha = room("!a:example.org", Some("Alpha"));
        alpha.events.push(event("seeded", 42));
        conn.set_room(alpha);
        conn.set_room(room("!b:example.org", None));

        aggregator.bootstrap();
        assert_eq!(aggregator.select("!a:example.org").last_message, "seeded");
        // An empty room summarizes with an empty body and a wall-clock
        // timestamp.
        let empty = aggregator.select("!b:example.org");
        assert_eq!(empty.last_message, "");
        assert!(empty.timestamp_ms > 0);
    }

    #[test]
    fn clear_drops_every_summary() {
        let (_, aggregator) = aggregator();
        aggregator.on_event(Some(&event("hi", 1)), Some(&room("!a:example.org", None)));
        aggregator.clear();
        assert!(aggregator.list().is_empty());
    }

    proptest! {
        #[test]
        fn sorted_by_recency_is_an_ordered_permutation_of_list(
            updates in prop::collection::vec((0usize..6, 0u64..10_000), 0..64)
        ) {
            let (_, aggregator) = aggregator();
            for (room_index, timestamp_ms) in updates {
                let room_id = format!("!room-{room_index}:example.org");
                aggregator.on_event(
                    Some(&event("msg", timestamp_ms)),
                    Some(&room(&room_id, None)),
                );
            }

            let mut listed = aggregator.list();
            let sorted = aggregator.sorted_by_recency();

            prop_assert!(sorted.windows(2).all(|w| w[0].timestamp_ms >= w[1].timestamp_ms));

            let mut sorted_copy = sorted;
            listed.sort_unstable_by(|a, b| a.room_id.cmp(&b.room_id));
            sorted_copy.sort_unstable_by(|a, b| a.room_id.cmp(&b.room_id));
            prop_assert_eq!(listed, sorted_copy);
        }
    }
}
