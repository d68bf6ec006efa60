use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingAction {
    Upsert,
    Delete,
    Mixed,
}

/// A state change for one entity, as pushed over the sync channel.
///
/// Every variant carries the full new value for its key, never an
/// instruction, so applying one twice or late is harmless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    DeskStatus {
        desk_id: DeskId,
        is_booked: bool,
        #[serde(default)]
        booked_by: Option<String>,
    },
    UpdateBookings {
        desk_id: DeskId,
        action: BookingAction,
        #[serde(default)]
        bookings: Vec<Booking>,
        #[serde(default)]
        deleted_ids: Vec<BookingId>,
    },
    DeskLock {
        desk_id: DeskId,
        locked: bool,
        #[serde(default)]
        locked_by: Option<String>,
    },
    RoomMaintenance {
        room_id: RoomId,
        enabled: bool,
        #[serde(default)]
        by: Option<String>,
    },
    RoomAvailability {
        room_id: RoomId,
        available_desk_count: u32,
    },
    Pong,
}

impl Delta {
    pub fn upsert(desk_id: DeskId, bookings: Vec<Booking>) -> Self {
        Delta::UpdateBookings {
            desk_id,
            action: BookingAction::Upsert,
            bookings,
            deleted_ids: Vec::new(),
        }
    }

    pub fn delete(desk_id: DeskId, deleted_ids: Vec<BookingId>) -> Self {
        Delta::UpdateBookings {
            desk_id,
            action: BookingAction::Delete,
            bookings: Vec::new(),
            deleted_ids,
        }
    }

    pub fn desk_id(&self) -> Option<DeskId> {
        match self {
            Delta::DeskStatus { desk_id, .. }
            | Delta::UpdateBookings { desk_id, .. }
            | Delta::DeskLock { desk_id, .. } => Some(*desk_id),
            _ => None,
        }
    }
}

/// What a viewer knows about one desk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeskLive {
    pub room_id: Option<RoomId>,
    pub is_booked: bool,
    pub booked_by: Option<String>,
    pub locked: bool,
    pub locked_by: Option<String>,
    pub permanent_assignee: Option<UserRef>,
}

/// A viewer's read-through copy of desk, booking, lock and room state,
/// kept current by applying deltas.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    desks: HashMap<DeskId, DeskLive>,
    bookings: HashMap<BookingId, Booking>,
    maintenance: HashMap<RoomId, bool>,
    availability: HashMap<RoomId, u32>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_desk(&mut self, desk: &Desk) {
        let live = self.desks.entry(desk.id).or_default();
        live.room_id = Some(desk.room_id);
        live.permanent_assignee = desk.permanent_assignee.clone();
    }

    pub fn seed_room(&mut self, room: &Room) {
        self.maintenance.insert(room.id, room.maintenance);
    }

    pub fn seed_bookings(&mut self, bookings: impl IntoIterator<Item = Booking>) {
        for b in bookings {
            self.bookings.insert(b.id, b);
        }
    }

    /// Apply one delta. Returns whether anything visible may have changed.
    pub fn apply(&mut self, delta: &Delta) -> bool {
        match delta {
            Delta::DeskStatus { desk_id, is_booked, booked_by } => {
                let live = self.desks.entry(*desk_id).or_default();
                live.is_booked = *is_booked;
                live.booked_by = if *is_booked { booked_by.clone() } else { None };
                true
            }
            Delta::UpdateBookings { desk_id, bookings, deleted_ids, .. } => {
                for b in bookings {
                    if b.desk.id == *desk_id {
                        self.bookings.insert(b.id, b.clone());
                    }
                }
                for id in deleted_ids {
                    self.bookings.remove(id);
                }
                true
            }
            Delta::DeskLock { desk_id, locked, locked_by } => {
                let live = self.desks.entry(*desk_id).or_default();
                live.locked = *locked;
                live.locked_by = if *locked { locked_by.clone() } else { None };
                true
            }
            Delta::RoomMaintenance { room_id, enabled, .. } => {
                self.maintenance.insert(*room_id, *enabled);
                true
            }
            Delta::RoomAvailability { room_id, available_desk_count } => {
                self.availability.insert(*room_id, *available_desk_count);
                true
            }
            Delta::Pong => false,
        }
    }

    pub fn desk(&self, desk_id: DeskId) -> Option<&DeskLive> {
        self.desks.get(&desk_id)
    }

    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.get(&id)
    }

    /// Bookings on `desk_id` overlapping `window`, by start.
    pub fn bookings_for_desk(&self, desk_id: DeskId, window: Option<Span>) -> Vec<Booking> {
        let mut out: Vec<Booking> = self
            .bookings
            .values()
            .filter(|b| b.desk.id == desk_id)
            .filter(|b| window.is_none_or(|w| b.span().overlaps(&w)))
            .cloned()
            .collect();
        out.sort_by_key(|b| (b.start, b.id));
        out
    }

    pub fn under_maintenance(&self, room_id: RoomId) -> bool {
        self.maintenance.get(&room_id).copied().unwrap_or(false)
    }

    pub fn available_desks(&self, room_id: RoomId) -> Option<u32> {
        self.availability.get(&room_id).copied()
    }

    /// Whether `viewer` may start booking the desk right now.
    pub fn can_book(&self, desk_id: DeskId, viewer: &UserRef) -> bool {
        let Some(live) = self.desks.get(&desk_id) else {
            return true;
        };
        let is_other = |name: &Option<String>| name.as_deref().is_some_and(|n| n != viewer.name);
        if live.locked && (live.locked_by.is_none() || is_other(&live.locked_by)) {
            return false;
        }
        if live.is_booked && is_other(&live.booked_by) {
            return false;
        }
        if live.permanent_assignee.as_ref().is_some_and(|u| u.id != viewer.id) {
            return false;
        }
        !live.room_id.is_some_and(|r| self.under_maintenance(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn booking(id: BookingId, desk: DeskId, start: Ms, end: Ms) -> Booking {
        Booking {
            id,
            desk: DeskRef {
                id: desk,
                name: format!("Desk {desk}"),
                room_id: 1,
                room_name: None,
            },
            user_id: 1,
            username: "alice".into(),
            start,
            end,
            room_name: None,
            floor_name: None,
            location_name: None,
            location_id: None,
        }
    }

    #[test]
    fn wire_shapes() {
        let d: Delta = serde_json::from_str(r#"{"type":"desk_lock","desk_id":7,"locked":true,"locked_by":"alice"}"#).unwrap();
        assert_eq!(d, Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("alice".into()) });

        let d: Delta = serde_json::from_str(r#"{"type":"update_bookings","desk_id":7,"action":"delete","deleted_ids":[3]}"#).unwrap();
        assert_eq!(d, Delta::delete(7, vec![3]));

        let d: Delta = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(d, Delta::Pong);

        let json = serde_json::to_value(Delta::RoomAvailability { room_id: 2, available_desk_count: 4 }).unwrap();
        assert_eq!(json["type"], "room_availability");
    }

    #[test]
    fn applying_twice_is_harmless() {
        let mut s = LiveState::new();
        let up = Delta::upsert(7, vec![booking(1, 7, 0, 10), booking(2, 7, 20, 30)]);
        s.apply(&up);
        s.apply(&up);
        assert_eq!(s.bookings_for_desk(7, None).len(), 2);

        let del = Delta::delete(7, vec![1]);
        s.apply(&del);
        s.apply(&del);
        assert_eq!(s.bookings_for_desk(7, None).iter().map(|b| b.id).collect::<Vec<_>>(), vec![2]);

        // A late upsert for the same key replaces, not duplicates.
        s.apply(&Delta::upsert(7, vec![booking(2, 7, 25, 35)]));
        let left = s.bookings_for_desk(7, None);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].start, 25);
    }

    #[test]
    fn last_delta_per_key_wins() {
        let mut s = LiveState::new();
        s.apply(&Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("alice".into()) });
        s.apply(&Delta::DeskLock { desk_id: 8, locked: true, locked_by: Some("carol".into()) });
        s.apply(&Delta::DeskLock { desk_id: 7, locked: false, locked_by: None });
        assert!(!s.desk(7).unwrap().locked);
        assert!(s.desk(8).unwrap().locked);
    }

    #[test]
    fn window_filter() {
        let mut s = LiveState::new();
        s.seed_bookings([booking(1, 7, 0, 10), booking(2, 7, 20, 30), booking(3, 8, 0, 10)]);
        let hits = s.bookings_for_desk(7, Some(Span::new(5, 21)));
        assert_eq!(hits.len(), 2);
        assert!(s.bookings_for_desk(7, Some(Span::new(10, 20))).is_empty());
    }

    #[test]
    fn can_book_rules() {
        let bob = UserRef::new(2, "bob");
        let mut s = LiveState::new();
        s.seed_desk(&Desk::new(7, 1, "D7"));
        s.seed_room(&Room::new(1, 1, "North"));
        assert!(s.can_book(7, &bob));

        s.apply(&Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("alice".into()) });
        assert!(!s.can_book(7, &bob));
        s.apply(&Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("bob".into()) });
        assert!(s.can_book(7, &bob));
        s.apply(&Delta::DeskLock { desk_id: 7, locked: false, locked_by: None });

        s.apply(&Delta::DeskStatus { desk_id: 7, is_booked: true, booked_by: Some("alice".into()) });
        assert!(!s.can_book(7, &bob));
        s.apply(&Delta::DeskStatus { desk_id: 7, is_booked: false, booked_by: None });

        s.apply(&Delta::RoomMaintenance { room_id: 1, enabled: true, by: Some("admin".into()) });
        assert!(!s.can_book(7, &bob));
        s.apply(&Delta::RoomMaintenance { room_id: 1, enabled: false, by: None });
        assert!(s.can_book(7, &bob));

        s.seed_desk(&Desk::new(7, 1, "D7").with_assignee(UserRef::new(3, "carol")));
        assert!(!s.can_book(7, &bob));
    }
}
