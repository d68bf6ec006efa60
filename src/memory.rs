//! In-process booking service.
//!
//! Plays the part of the remote booking backend for tests and the
//! simulation binary: it validates and stores bookings, owns the
//! authoritative [`LockTable`], and publishes every change as a [`Delta`]
//! on the matching sync scopes.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{BookingApi, BookingFilter, BookingPatch, LockReply, NewBooking};
use crate::error::{BookingError, SyncError};
use crate::limits::*;
use crate::lock::{LockConfig, LockTable};
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::LOCKS_EXPIRED_TOTAL;
use crate::sync::{CLOSE_GOING_AWAY, Connection, Delta, Frame, Scope, Transport};

/// Source of "now" for the backend.
pub type Clock = Arc<dyn Fn() -> Ms + Send + Sync>;

pub struct InMemoryBackend {
    rooms: DashMap<RoomId, Room>,
    desks: DashMap<DeskId, Desk>,
    bookings: DashMap<DeskId, Vec<Booking>>,
    /// Booked flag last announced per desk.
    announced: DashMap<DeskId, bool>,
    next_id: AtomicU64,
    locks: LockTable,
    notify: Arc<NotifyHub>,
    clock: Clock,
    offline: AtomicBool,
}

impl InMemoryBackend {
    pub fn new(config: &LockConfig) -> Self {
        Self {
            rooms: DashMap::new(),
            desks: DashMap::new(),
            bookings: DashMap::new(),
            announced: DashMap::new(),
            next_id: AtomicU64::new(1),
            locks: LockTable::new(config.ttl().as_millis() as Ms, config.max_hold().as_millis() as Ms),
            notify: Arc::new(NotifyHub::new()),
            clock: Arc::new(crate::timemath::now_ms),
            offline: AtomicBool::new(false),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> Ms {
        (self.clock)()
    }

    pub fn notify(&self) -> &Arc<NotifyHub> {
        &self.notify
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// While offline every API call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    /// A [`BookingApi`] acting as `user`.
    pub fn session(self: &Arc<Self>, user: UserRef) -> Arc<dyn BookingApi> {
        Arc::new(MemorySession {
            backend: self.clone(),
            user,
        })
    }

    // ── Directory ────────────────────────────────────────────────

    pub fn add_room(&self, room: Room) -> Result<(), BookingError> {
        if room.name.len() > MAX_NAME_LEN {
            return Err(BookingError::Invalid("room name too long"));
        }
        self.rooms.insert(room.id, room);
        Ok(())
    }

    pub fn add_desk(&self, desk: Desk) -> Result<(), BookingError> {
        if desk.name.len() > MAX_NAME_LEN {
            return Err(BookingError::Invalid("desk name too long"));
        }
        if !self.rooms.contains_key(&desk.room_id) {
            return Err(BookingError::Invalid("desk references an unknown room"));
        }
        self.desks.insert(desk.id, desk);
        Ok(())
    }

    pub fn desk(&self, desk_id: DeskId) -> Option<Desk> {
        self.desks.get(&desk_id).map(|d| d.value().clone())
    }

    pub fn room(&self, room_id: RoomId) -> Option<Room> {
        self.rooms.get(&room_id).map(|r| r.value().clone())
    }

    pub fn desks_in_room(&self, room_id: RoomId) -> Vec<Desk> {
        let mut desks: Vec<Desk> = self
            .desks
            .iter()
            .filter(|d| d.room_id == room_id)
            .map(|d| d.value().clone())
            .collect();
        desks.sort_by_key(|d| d.id);
        desks
    }

    pub fn set_maintenance(&self, room_id: RoomId, enabled: bool, by: &UserRef) -> Result<(), BookingError> {
        let location_id = {
            let mut room = self
                .rooms
                .get_mut(&room_id)
                .ok_or(BookingError::Invalid("unknown room"))?;
            room.maintenance = enabled;
            room.location_id
        };
        info!(room_id, enabled, by = %by.name, "room maintenance changed");
        let delta = Delta::RoomMaintenance {
            room_id,
            enabled,
            by: Some(by.name.clone()),
        };
        self.notify.send(Scope::Room(room_id), &delta);
        self.notify.send(Scope::Location(location_id), &delta);
        self.publish_availability(room_id, self.now());
        Ok(())
    }

    // ── Derived desk state ───────────────────────────────────────

    /// Booking covering `now` on the desk, if any.
    pub fn current_booking(&self, desk_id: DeskId, now: Ms) -> Option<Booking> {
        self.bookings
            .get(&desk_id)?
            .iter()
            .find(|b| b.span().contains_instant(now))
            .cloned()
    }

    pub fn desk_status(&self, desk_id: DeskId, now: Ms) -> Delta {
        let current = self.current_booking(desk_id, now);
        Delta::DeskStatus {
            desk_id,
            is_booked: current.is_some(),
            booked_by: current.map(|b| b.username),
        }
    }

    pub fn available_desk_count(&self, room_id: RoomId, now: Ms) -> u32 {
        if self.rooms.get(&room_id).is_some_and(|r| r.maintenance) {
            return 0;
        }
        self.desks_in_room(room_id)
            .iter()
            .filter(|d| self.current_booking(d.id, now).is_none())
            .count() as u32
    }

    // ── Bookings ─────────────────────────────────────────────────

    fn check_online(&self) -> Result<(), BookingError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(BookingError::Transport("booking service unreachable".into()));
        }
        Ok(())
    }

    pub fn list(&self, user: &UserRef, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError> {
        let Some(window) = filter.span() else {
            return Ok(Vec::new());
        };
        if window.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(BookingError::Invalid("query window too wide"));
        }
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| filter.desk.is_none_or(|d| d == *e.key()))
            .flat_map(|e| e.value().clone())
            .filter(|b| b.span().overlaps(&window))
            .filter(|b| !filter.mine_only || b.user_id == user.id)
            .collect();
        out.sort_by_key(|b| (b.start, b.id));
        Ok(out)
    }

    /// Checks shared by create and update. Returns the desk and its room.
    fn admit(&self, user: &UserRef, desk_id: DeskId, span: Span, now: Ms) -> Result<(Desk, Room), BookingError> {
        validate_span(&span)?;
        let desk = self.desk(desk_id).ok_or(BookingError::DeskNotFound(desk_id))?;
        let room = self
            .room(desk.room_id)
            .ok_or(BookingError::Invalid("desk references an unknown room"))?;
        if room.maintenance {
            return Err(BookingError::Forbidden("room is under maintenance"));
        }
        if desk.assigned_to_other(user.id) {
            return Err(BookingError::Forbidden("desk is permanently assigned to another user"));
        }
        if let Some(holder) = self.locks.held_by_other(desk_id, user.id, now) {
            return Err(BookingError::Locked {
                desk_id,
                holder: holder.name,
            });
        }
        Ok((desk, room))
    }

    pub fn create(&self, user: &UserRef, request: &NewBooking, now: Ms) -> Result<Booking, BookingError> {
        self.check_online()?;
        let span = span_of(request.start, request.end)?;
        let (desk, room) = self.admit(user, request.desk_id, span, now)?;

        let booking = {
            let mut list = self.bookings.entry(desk.id).or_default();
            check_no_conflict(desk.id, &list, &span, None)?;
            let booking = Booking {
                id: self.next_id.fetch_add(1, Ordering::Relaxed),
                desk: DeskRef {
                    id: desk.id,
                    name: desk.name.clone(),
                    room_id: room.id,
                    room_name: Some(room.name.clone()),
                },
                user_id: user.id,
                username: user.name.clone(),
                start: span.start,
                end: span.end,
                room_name: Some(room.name.clone()),
                floor_name: None,
                location_name: None,
                location_id: Some(room.location_id),
            };
            list.push(booking.clone());
            booking
        };

        info!(booking_id = booking.id, desk_id = desk.id, user = %user.name, "booking created");
        self.publish_bookings(&desk, Delta::upsert(desk.id, vec![booking.clone()]), now);
        Ok(booking)
    }

    fn locate(&self, id: BookingId) -> Option<Booking> {
        self.bookings
            .iter()
            .find_map(|e| e.value().iter().find(|b| b.id == id).cloned())
    }

    pub fn update(&self, user: &UserRef, id: BookingId, patch: &BookingPatch, now: Ms) -> Result<Booking, BookingError> {
        self.check_online()?;
        let current = self.locate(id).ok_or(BookingError::NotFound(id))?;
        if current.user_id != user.id {
            return Err(BookingError::Forbidden("only the owner can change a booking"));
        }
        let span = span_of(patch.start.unwrap_or(current.start), patch.end.unwrap_or(current.end))?;
        let (desk, _) = self.admit(user, current.desk.id, span, now)?;

        let updated = {
            let mut list = self.bookings.entry(desk.id).or_default();
            check_no_conflict(desk.id, &list, &span, Some(id))?;
            let slot = list
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or(BookingError::NotFound(id))?;
            slot.start = span.start;
            slot.end = span.end;
            slot.clone()
        };

        info!(booking_id = id, desk_id = desk.id, "booking updated");
        self.publish_bookings(&desk, Delta::upsert(desk.id, vec![updated.clone()]), now);
        Ok(updated)
    }

    pub fn cancel(&self, user: &UserRef, id: BookingId, now: Ms) -> Result<(), BookingError> {
        self.check_online()?;
        let current = self.locate(id).ok_or(BookingError::NotFound(id))?;
        if current.user_id != user.id {
            return Err(BookingError::Forbidden("only the owner can cancel a booking"));
        }
        if let Some(mut list) = self.bookings.get_mut(&current.desk.id) {
            list.retain(|b| b.id != id);
        }
        info!(booking_id = id, desk_id = current.desk.id, "booking cancelled");
        if let Some(desk) = self.desk(current.desk.id) {
            self.publish_bookings(&desk, Delta::delete(desk.id, vec![id]), now);
        }
        Ok(())
    }

    // ── Locks ────────────────────────────────────────────────────

    pub fn lock(&self, user: &UserRef, desk_id: DeskId, now: Ms) -> Result<LockReply, BookingError> {
        self.check_online()?;
        let desk = self.desk(desk_id).ok_or(BookingError::DeskNotFound(desk_id))?;
        let reply = self.locks.acquire(desk_id, user, now);
        if reply == LockReply::Granted {
            self.publish_lock(&desk, Some(user.name.clone()));
        }
        Ok(reply)
    }

    pub fn refresh(&self, user: &UserRef, desk_id: DeskId, now: Ms) -> Result<bool, BookingError> {
        self.check_online()?;
        let ok = self.locks.refresh(desk_id, user.id, now);
        if !ok {
            debug!(desk_id, user = %user.name, "lock refresh refused");
        }
        Ok(ok)
    }

    pub fn unlock(&self, user: &UserRef, desk_id: DeskId, now: Ms) -> Result<(), BookingError> {
        self.check_online()?;
        self.unlock_inner(user, desk_id, now)
    }

    fn unlock_inner(&self, user: &UserRef, desk_id: DeskId, now: Ms) -> Result<(), BookingError> {
        let held = self.locks.read(desk_id, now);
        if !self.locks.release(desk_id, user.id, now) {
            let holder = held.map(|r| r.holder.name).unwrap_or_default();
            return Err(BookingError::Locked { desk_id, holder });
        }
        if held.is_some()
            && let Some(desk) = self.desk(desk_id)
        {
            self.publish_lock(&desk, None);
        }
        Ok(())
    }

    /// Drop expired locks and announce them. Returns how many were purged.
    pub fn reap_expired_locks(&self, now: Ms) -> usize {
        let expired = self.locks.purge_expired(now);
        for record in &expired {
            metrics::counter!(LOCKS_EXPIRED_TOTAL).increment(1);
            info!(desk_id = record.desk_id, holder = %record.holder.name, "desk lock expired");
            if let Some(desk) = self.desk(record.desk_id) {
                self.publish_lock(&desk, None);
            }
        }
        expired.len()
    }

    /// Announce desks whose booked state flipped because a booking started
    /// or ran out. Returns how many desks changed.
    pub fn sweep_booking_transitions(&self, now: Ms) -> usize {
        let desks: Vec<Desk> = self.desks.iter().map(|e| e.value().clone()).collect();
        let mut rooms: Vec<RoomId> = Vec::new();
        let mut changed = 0;
        for desk in &desks {
            let booked = self.current_booking(desk.id, now).is_some();
            let previous = self.announced.get(&desk.id).map(|v| *v).unwrap_or(false);
            if booked == previous {
                continue;
            }
            changed += 1;
            debug!(desk_id = desk.id, booked, "desk booking state changed");
            self.publish_status(desk, now);
            if !rooms.contains(&desk.room_id) {
                rooms.push(desk.room_id);
            }
        }
        for room_id in rooms {
            self.publish_availability(room_id, now);
        }
        changed
    }

    // ── Publishing ───────────────────────────────────────────────

    fn publish_bookings(&self, desk: &Desk, delta: Delta, now: Ms) {
        self.notify.send(Scope::Room(desk.room_id), &delta);
        self.publish_status(desk, now);
        self.publish_availability(desk.room_id, now);
    }

    fn publish_status(&self, desk: &Desk, now: Ms) {
        let status = self.desk_status(desk.id, now);
        if let Delta::DeskStatus { is_booked, .. } = &status {
            self.announced.insert(desk.id, *is_booked);
        }
        self.notify.send(Scope::Room(desk.room_id), &status);
    }

    fn publish_availability(&self, room_id: RoomId, now: Ms) {
        let Some(location_id) = self.rooms.get(&room_id).map(|r| r.location_id) else {
            return;
        };
        let delta = Delta::RoomAvailability {
            room_id,
            available_desk_count: self.available_desk_count(room_id, now),
        };
        self.notify.send(Scope::Location(location_id), &delta);
    }

    fn publish_lock(&self, desk: &Desk, holder: Option<String>) {
        let delta = Delta::DeskLock {
            desk_id: desk.id,
            locked: holder.is_some(),
            locked_by: holder,
        };
        self.notify.send(Scope::Room(desk.room_id), &delta);
    }
}

fn span_of(start: Ms, end: Ms) -> Result<Span, BookingError> {
    if end <= start {
        return Err(BookingError::Invalid("end must be after start"));
    }
    if end - start < MIN_BOOKING_MS {
        return Err(BookingError::Invalid("bookings must be at least 30 minutes"));
    }
    Ok(Span::new(start, end))
}

fn validate_span(span: &Span) -> Result<(), BookingError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(BookingError::Invalid("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(BookingError::Invalid("booking too long"));
    }
    Ok(())
}

fn check_no_conflict(desk_id: DeskId, existing: &[Booking], span: &Span, skip: Option<BookingId>) -> Result<(), BookingError> {
    match existing
        .iter()
        .filter(|b| Some(b.id) != skip)
        .find(|b| b.span().overlaps(span))
    {
        Some(other) => Err(BookingError::Conflict {
            desk_id,
            holder: Some(other.username.clone()),
        }),
        None => Ok(()),
    }
}

// ── BookingApi ───────────────────────────────────────────────────

struct MemorySession {
    backend: Arc<InMemoryBackend>,
    user: UserRef,
}

#[async_trait]
impl BookingApi for MemorySession {
    fn user(&self) -> &UserRef {
        &self.user
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> Result<Vec<Booking>, BookingError> {
        self.backend.check_online()?;
        self.backend.list(&self.user, filter)
    }

    async fn create_booking(&self, request: &NewBooking) -> Result<Booking, BookingError> {
        self.backend.create(&self.user, request, self.backend.now())
    }

    async fn update_booking(&self, id: BookingId, patch: &BookingPatch) -> Result<Booking, BookingError> {
        self.backend.update(&self.user, id, patch, self.backend.now())
    }

    async fn cancel_booking(&self, id: BookingId) -> Result<(), BookingError> {
        self.backend.cancel(&self.user, id, self.backend.now())
    }

    async fn acquire_lock(&self, desk: DeskId) -> Result<LockReply, BookingError> {
        self.backend.lock(&self.user, desk, self.backend.now())
    }

    async fn refresh_lock(&self, desk: DeskId) -> Result<bool, BookingError> {
        self.backend.refresh(&self.user, desk, self.backend.now())
    }

    async fn release_lock(&self, desk: DeskId) -> Result<(), BookingError> {
        self.backend.unlock(&self.user, desk, self.backend.now())
    }

    fn release_lock_beacon(&self, desk: DeskId) {
        if self.backend.offline.load(Ordering::Relaxed) {
            debug!(desk_id = desk, "beacon release lost");
            return;
        }
        if let Err(e) = self.backend.unlock_inner(&self.user, desk, self.backend.now()) {
            debug!(desk_id = desk, "beacon release ignored: {e}");
        }
    }
}

// ── Transport ────────────────────────────────────────────────────

#[async_trait]
impl Transport for InMemoryBackend {
    async fn connect(&self, scope: Scope) -> Result<Box<dyn Connection>, SyncError> {
        if self.offline.load(Ordering::Relaxed) {
            return Err(SyncError::Transport("booking service unreachable".into()));
        }
        Ok(Box::new(MemoryConnection {
            scope,
            rx: self.notify.subscribe(scope),
            replies: VecDeque::new(),
        }))
    }
}

struct MemoryConnection {
    scope: Scope,
    rx: broadcast::Receiver<Delta>,
    replies: VecDeque<String>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send_text(&mut self, text: String) -> Result<(), SyncError> {
        let msg: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| SyncError::Malformed(e.to_string()))?;
        if msg["type"] == "ping" {
            let pong = serde_json::to_string(&Delta::Pong).map_err(|e| SyncError::Malformed(e.to_string()))?;
            self.replies.push_back(pong);
        }
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<Frame, SyncError> {
        if let Some(reply) = self.replies.pop_front() {
            return Ok(Frame::Text(reply));
        }
        loop {
            match self.rx.recv().await {
                Ok(delta) => {
                    let text = serde_json::to_string(&delta).map_err(|e| SyncError::Malformed(e.to_string()))?;
                    return Ok(Frame::Text(text));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(scope = %self.scope, skipped = n, "subscriber lagged, deltas dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(Frame::Close(Some(CLOSE_GOING_AWAY))),
            }
        }
    }

    async fn close(&mut self, _code: u16) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI64;

    const H: Ms = HOUR_MS;
    const T0: Ms = 1_700_000_000_000;

    struct Fixture {
        backend: Arc<InMemoryBackend>,
        clock: Arc<AtomicI64>,
    }

    impl Fixture {
        fn advance(&self, ms: Ms) {
            self.clock.fetch_add(ms, Ordering::SeqCst);
        }
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(AtomicI64::new(T0));
        let c = clock.clone();
        let backend = InMemoryBackend::new(&LockConfig::default()).with_clock(Arc::new(move || c.load(Ordering::SeqCst)));
        backend.add_room(Room::new(1, 10, "North")).unwrap();
        backend.add_desk(Desk::new(7, 1, "D7")).unwrap();
        backend.add_desk(Desk::new(8, 1, "D8").with_assignee(UserRef::new(3, "carol"))).unwrap();
        Fixture {
            backend: Arc::new(backend),
            clock,
        }
    }

    fn alice() -> UserRef {
        UserRef::new(1, "alice")
    }

    fn bob() -> UserRef {
        UserRef::new(2, "bob")
    }

    fn req(desk_id: DeskId, start: Ms, end: Ms) -> NewBooking {
        NewBooking { desk_id, start, end }
    }

    #[test]
    fn create_validates() {
        let f = fixture();
        let b = &f.backend;
        assert_eq!(
            b.create(&alice(), &req(7, T0 + H, T0 + H), T0),
            Err(BookingError::Invalid("end must be after start"))
        );
        assert_eq!(
            b.create(&alice(), &req(7, T0 + H, T0 + H + 10 * MINUTE_MS), T0),
            Err(BookingError::Invalid("bookings must be at least 30 minutes"))
        );
        assert!(matches!(b.create(&alice(), &req(99, T0, T0 + H), T0), Err(BookingError::DeskNotFound(99))));
        assert!(matches!(b.create(&alice(), &req(8, T0, T0 + H), T0), Err(BookingError::Forbidden(_))));
        assert!(b.create(&UserRef::new(3, "carol"), &req(8, T0, T0 + H), T0).is_ok());
    }

    #[test]
    fn overlap_names_owner() {
        let f = fixture();
        let b = &f.backend;
        b.create(&alice(), &req(7, T0 + H, T0 + 3 * H), T0).unwrap();
        assert_eq!(
            b.create(&bob(), &req(7, T0 + 2 * H, T0 + 4 * H), T0),
            Err(BookingError::Conflict { desk_id: 7, holder: Some("alice".into()) })
        );
        // Touching ends do not overlap.
        assert!(b.create(&bob(), &req(7, T0 + 3 * H, T0 + 4 * H), T0).is_ok());
    }

    #[test]
    fn locked_desk_refuses_other_users() {
        let f = fixture();
        let b = &f.backend;
        assert_eq!(b.lock(&alice(), 7, T0).unwrap(), LockReply::Granted);
        assert_eq!(
            b.create(&bob(), &req(7, T0 + H, T0 + 2 * H), T0),
            Err(BookingError::Locked { desk_id: 7, holder: "alice".into() })
        );
        assert!(b.create(&alice(), &req(7, T0 + H, T0 + 2 * H), T0).is_ok());
        assert!(matches!(b.unlock(&bob(), 7, T0), Err(BookingError::Locked { .. })));
        b.unlock(&alice(), 7, T0).unwrap();
        assert!(b.locks().read(7, T0).is_none());
    }

    #[test]
    fn update_and_cancel_need_ownership() {
        let f = fixture();
        let b = &f.backend;
        let bk = b.create(&alice(), &req(7, T0 + H, T0 + 3 * H), T0).unwrap();
        let shorten = BookingPatch { start: None, end: Some(T0 + 2 * H) };
        assert!(matches!(b.update(&bob(), bk.id, &shorten, T0), Err(BookingError::Forbidden(_))));
        let updated = b.update(&alice(), bk.id, &shorten, T0).unwrap();
        assert_eq!(updated.span(), Span::new(T0 + H, T0 + 2 * H));

        assert!(matches!(b.cancel(&bob(), bk.id, T0), Err(BookingError::Forbidden(_))));
        b.cancel(&alice(), bk.id, T0).unwrap();
        assert_eq!(b.cancel(&alice(), bk.id, T0), Err(BookingError::NotFound(bk.id)));
    }

    #[test]
    fn list_filters() {
        let f = fixture();
        let b = &f.backend;
        b.create(&alice(), &req(7, T0 + H, T0 + 2 * H), T0).unwrap();
        b.create(&bob(), &req(7, T0 + 5 * H, T0 + 6 * H), T0).unwrap();
        let window = Span::new(T0, T0 + 24 * H);
        assert_eq!(b.list(&alice(), &BookingFilter::window(window)).unwrap().len(), 2);
        assert_eq!(b.list(&alice(), &BookingFilter::window(window).mine()).unwrap().len(), 1);
        assert_eq!(b.list(&alice(), &BookingFilter::desk(7, Span::new(T0, T0 + 3 * H))).unwrap().len(), 1);
        assert!(b.list(&alice(), &BookingFilter::desk(8, window)).unwrap().is_empty());
        let year = Span::new(T0, T0 + 500 * 24 * H);
        assert!(matches!(b.list(&alice(), &BookingFilter::window(year)), Err(BookingError::Invalid(_))));
    }

    #[tokio::test]
    async fn mutations_publish_deltas() {
        let f = fixture();
        let b = &f.backend;
        let mut room = b.notify().subscribe(Scope::Room(1));
        let mut location = b.notify().subscribe(Scope::Location(10));

        let bk = b.create(&alice(), &req(7, T0, T0 + H), T0).unwrap();
        assert_eq!(room.recv().await.unwrap(), Delta::upsert(7, vec![bk.clone()]));
        assert_eq!(
            room.recv().await.unwrap(),
            Delta::DeskStatus { desk_id: 7, is_booked: true, booked_by: Some("alice".into()) }
        );
        assert_eq!(
            location.recv().await.unwrap(),
            Delta::RoomAvailability { room_id: 1, available_desk_count: 1 }
        );

        b.lock(&bob(), 7, T0).unwrap();
        assert_eq!(
            room.recv().await.unwrap(),
            Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("bob".into()) }
        );
    }

    #[test]
    fn reaper_purges_and_announces() {
        let f = fixture();
        let b = &f.backend;
        let mut room = b.notify().subscribe(Scope::Room(1));
        b.lock(&alice(), 7, T0).unwrap();
        let _ = room.try_recv();

        f.advance(30_000);
        assert_eq!(b.reap_expired_locks(b.now()), 0);
        f.advance(30_000);
        assert_eq!(b.reap_expired_locks(b.now()), 1);
        assert_eq!(
            room.try_recv().unwrap(),
            Delta::DeskLock { desk_id: 7, locked: false, locked_by: None }
        );
    }

    #[test]
    fn sweep_announces_start_and_end() {
        let f = fixture();
        let b = &f.backend;
        b.create(&alice(), &req(7, T0 + H, T0 + 2 * H), T0).unwrap();
        let mut room = b.notify().subscribe(Scope::Room(1));
        let mut location = b.notify().subscribe(Scope::Location(10));

        assert_eq!(b.sweep_booking_transitions(T0 + 30 * MINUTE_MS), 0);
        assert!(room.try_recv().is_err());

        assert_eq!(b.sweep_booking_transitions(T0 + H), 1);
        assert_eq!(
            room.try_recv().unwrap(),
            Delta::DeskStatus { desk_id: 7, is_booked: true, booked_by: Some("alice".into()) }
        );
        assert_eq!(
            location.try_recv().unwrap(),
            Delta::RoomAvailability { room_id: 1, available_desk_count: 1 }
        );
        // Nothing new until the booking runs out.
        assert_eq!(b.sweep_booking_transitions(T0 + H + 1), 0);

        assert_eq!(b.sweep_booking_transitions(T0 + 2 * H), 1);
        assert_eq!(
            room.try_recv().unwrap(),
            Delta::DeskStatus { desk_id: 7, is_booked: false, booked_by: None }
        );
        assert_eq!(
            location.try_recv().unwrap(),
            Delta::RoomAvailability { room_id: 1, available_desk_count: 2 }
        );
    }

    #[test]
    fn sweep_skips_states_already_published() {
        let f = fixture();
        let b = &f.backend;
        let bk = b.create(&alice(), &req(7, T0, T0 + H), T0).unwrap();
        // Create already announced the desk as booked.
        assert_eq!(b.sweep_booking_transitions(T0 + 1), 0);
        b.cancel(&alice(), bk.id, T0 + 2).unwrap();
        assert_eq!(b.sweep_booking_transitions(T0 + 3), 0);
    }

    #[tokio::test]
    async fn transport_answers_ping() {
        let f = fixture();
        let mut conn = f.backend.connect(Scope::Room(1)).await.unwrap();
        conn.send_text(r#"{"type":"ping"}"#.into()).await.unwrap();
        assert_eq!(conn.next_frame().await.unwrap(), Frame::Text(r#"{"type":"pong"}"#.into()));

        f.backend.set_maintenance(1, true, &alice()).unwrap();
        let Frame::Text(text) = conn.next_frame().await.unwrap() else {
            panic!("expected text frame");
        };
        assert!(text.contains("room_maintenance"));
    }

    #[tokio::test]
    async fn offline_fails_calls() {
        let f = fixture();
        let api = f.backend.session(alice());
        f.backend.set_offline(true);
        assert!(matches!(api.acquire_lock(7).await, Err(BookingError::Transport(_))));
        assert!(f.backend.connect(Scope::Room(1)).await.is_err());
        f.backend.set_offline(false);
        assert_eq!(api.acquire_lock(7).await.unwrap(), LockReply::Granted);
    }
}
