use serde::{Deserialize, Serialize};

/// Unix milliseconds, the only instant type.
pub type Ms = i64;

pub type DeskId = u64;
pub type BookingId = u64;
pub type UserId = u64;
pub type RoomId = u64;
pub type LocationId = u64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// The part of `self` inside `window`, if any.
    pub fn intersect(&self, window: &Span) -> Option<Span> {
        let start = self.start.max(window.start);
        let end = self.end.min(window.end);
        (start < end).then(|| Span::new(start, end))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub name: String,
}

impl UserRef {
    pub fn new(id: UserId, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// The desk a booking points at, as embedded in booking payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeskRef {
    pub id: DeskId,
    pub name: String,
    #[serde(rename = "room")]
    pub room_id: RoomId,
    #[serde(default)]
    pub room_name: Option<String>,
}

/// A reservation of one desk by one user over `[start, end)`.
///
/// Room/floor/location names are read-only projections filled in by the
/// server; nothing in the scheduling logic depends on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub desk: DeskRef,
    #[serde(rename = "user")]
    pub user_id: UserId,
    pub username: String,
    #[serde(rename = "start_time", with = "crate::timemath::iso_ms")]
    pub start: Ms,
    #[serde(rename = "end_time", with = "crate::timemath::iso_ms")]
    pub end: Ms,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub floor_name: Option<String>,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub location_id: Option<LocationId>,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span { start: self.start, end: self.end }
    }

    pub fn is_valid(&self) -> bool {
        self.end > self.start
    }

    pub fn owner(&self) -> UserRef {
        UserRef::new(self.user_id, self.username.clone())
    }
}

/// Static desk record held by the booking service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Desk {
    pub id: DeskId,
    pub room_id: RoomId,
    pub name: String,
    /// A permanently assigned desk is bookable only by its assignee.
    #[serde(default)]
    pub permanent_assignee: Option<UserRef>,
}

impl Desk {
    pub fn new(id: DeskId, room_id: RoomId, name: impl Into<String>) -> Self {
        Self {
            id,
            room_id,
            name: name.into(),
            permanent_assignee: None,
        }
    }

    pub fn with_assignee(mut self, user: UserRef) -> Self {
        self.permanent_assignee = Some(user);
        self
    }

    /// True when the desk is reserved for somebody other than `viewer`.
    pub fn assigned_to_other(&self, viewer: UserId) -> bool {
        self.permanent_assignee
            .as_ref()
            .is_some_and(|u| u.id != viewer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub location_id: LocationId,
    pub name: String,
    #[serde(default)]
    pub maintenance: bool,
}

impl Room {
    pub fn new(id: RoomId, location_id: LocationId, name: impl Into<String>) -> Self {
        Self {
            id,
            location_id,
            name: name.into(),
            maintenance: false,
        }
    }
}
