use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;

use deskgrid::api::BookingApi;
use deskgrid::calendar::{CalendarView, ViewMode, expand_by_day};
use deskgrid::error::BookingError;
use deskgrid::lock::LockConfig;
use deskgrid::memory::InMemoryBackend;
use deskgrid::model::*;
use deskgrid::orchestrator::{BookingOrchestrator, BookingSession, OpenOutcome};
use deskgrid::selection::{ClickOutcome, GridHit, InteractionMode};
use deskgrid::sync::{Delta, LiveState, ReconnectPolicy, Scope, SyncEvent, SyncManager, Subscription};

// ── Test infrastructure ──────────────────────────────────────

fn ms(rfc3339: &str) -> Ms {
    DateTime::parse_from_rfc3339(rfc3339).unwrap().timestamp_millis()
}

fn alice() -> UserRef {
    UserRef::new(1, "alice")
}

fn bob() -> UserRef {
    UserRef::new(2, "bob")
}

struct World {
    backend: Arc<InMemoryBackend>,
    clock: Arc<AtomicI64>,
    tz: Tz,
    today: NaiveDate,
}

impl World {
    fn now(&self) -> Ms {
        self.clock.load(Ordering::SeqCst)
    }

    fn orchestrator(&self, user: UserRef, mode: InteractionMode) -> BookingOrchestrator {
        BookingOrchestrator::new(self.backend.session(user), LockConfig::default(), self.tz, mode)
    }

    fn week(&self) -> CalendarView {
        CalendarView::new(ViewMode::Week, self.today)
    }
}

/// One room with desk 7, viewed from New York on Monday 2030-03-04 09:00.
fn world() -> World {
    let tz: Tz = "America/New_York".parse().unwrap();
    let clock = Arc::new(AtomicI64::new(ms("2030-03-04T09:00:00-05:00")));
    let c = clock.clone();
    let backend = InMemoryBackend::new(&LockConfig::default()).with_clock(Arc::new(move || c.load(Ordering::SeqCst)));
    backend.add_room(Room::new(1, 1, "North")).unwrap();
    backend.add_desk(Desk::new(7, 1, "Window")).unwrap();
    World {
        backend: Arc::new(backend),
        clock,
        tz,
        today: NaiveDate::from_ymd_opt(2030, 3, 4).unwrap(),
    }
}

fn opened(outcome: OpenOutcome) -> BookingSession {
    match outcome {
        OpenOutcome::Opened(session) => session,
        OpenOutcome::Blocked { holder } => panic!("blocked by {holder}"),
    }
}

async fn next_delta(sub: &mut Subscription) -> Delta {
    tokio::time::timeout(Duration::from_secs(2), sub.next_delta())
        .await
        .expect("delta within timeout")
        .expect("subscription open")
}

/// Drain deltas until one matching `pred` arrives.
async fn wait_for(sub: &mut Subscription, pred: impl Fn(&Delta) -> bool) -> Delta {
    loop {
        let delta = next_delta(sub).await;
        if pred(&delta) {
            return delta;
        }
    }
}

// ── Flows ────────────────────────────────────────────────────

#[tokio::test]
async fn contention_then_booking_reaches_other_viewer() {
    let w = world();
    let sync = SyncManager::new(w.backend.clone(), ReconnectPolicy::default());
    let mut room = sync.open(Scope::Room(1));
    assert_eq!(room.recv().await, Some(SyncEvent::Opened));

    let a = w.orchestrator(alice(), InteractionMode::Drag);
    let b = w.orchestrator(bob(), InteractionMode::Drag);

    let mut alice_form = opened(a.open(7, w.week(), w.now()).await.unwrap());
    let lock = wait_for(&mut room, |d| matches!(d, Delta::DeskLock { .. })).await;
    assert_eq!(lock, Delta::DeskLock { desk_id: 7, locked: true, locked_by: Some("alice".into()) });

    // Bob's viewer state says the desk is taken before he even tries.
    let mut bob_view = LiveState::new();
    bob_view.seed_desk(&Desk::new(7, 1, "Window"));
    bob_view.apply(&lock);
    assert!(!bob_view.can_book(7, &bob()));

    match b.open(7, w.week(), w.now()).await.unwrap() {
        OpenOutcome::Blocked { holder } => assert_eq!(holder, "alice"),
        OpenOutcome::Opened(_) => panic!("bob got a form for a locked desk"),
    }

    let today = w.today;
    alice_form.pointer_down(GridHit::new(today, 10.0), w.now());
    alice_form.pointer_move(GridHit::new(today, 13.7), w.now());
    let sel = alice_form.pointer_up(None, w.now()).unwrap();
    assert_eq!(
        sel.to_span(w.tz),
        Span::new(ms("2030-03-04T10:00:00-05:00"), ms("2030-03-04T13:30:00-05:00"))
    );
    let booking = alice_form.confirm().await.unwrap();
    alice_form.close().await;

    let update = wait_for(&mut room, |d| matches!(d, Delta::UpdateBookings { .. })).await;
    assert_eq!(update, Delta::upsert(7, vec![booking.clone()]));
    bob_view.apply(&update);
    let unlock = wait_for(&mut room, |d| matches!(d, Delta::DeskLock { .. })).await;
    bob_view.apply(&unlock);
    assert!(bob_view.can_book(7, &bob()));
    assert_eq!(bob_view.bookings_for_desk(7, None), vec![booking.clone()]);

    // Bob now gets the desk and sees alice's booking on his grid.
    let mut bob_form = opened(b.open(7, w.week(), w.now()).await.unwrap());
    assert_eq!(bob_form.bookings(), &[booking.clone()]);
    assert_eq!(
        bob_form.pointer_down(GridHit::new(today, 11.0), w.now()),
        ClickOutcome::Absorbed { holder: "alice".into() }
    );
    bob_form.pointer_down(GridHit::new(today, 14.0), w.now());
    bob_form.pointer_up(Some(GridHit::new(today, 14.0)), w.now());
    let bob_booking = bob_form.confirm().await.unwrap();
    assert_eq!(bob_booking.end - bob_booking.start, 30 * 60_000);
    bob_form.close().await;

    sync.close_all();
}

#[tokio::test]
async fn overnight_booking_splits_in_viewer_zone() {
    let w = world();
    let api = w.backend.session(alice());
    let booking = api
        .create_booking(&deskgrid::api::NewBooking {
            desk_id: 7,
            start: ms("2030-03-05T22:00:00-05:00"),
            end: ms("2030-03-06T02:00:00-05:00"),
        })
        .await
        .unwrap();

    let buckets = expand_by_day(std::slice::from_ref(&booking), w.tz, Some(alice().id));
    assert_eq!(buckets.len(), 2);
    let days: Vec<NaiveDate> = buckets.keys().copied().collect();
    assert_eq!(
        days,
        vec![NaiveDate::from_ymd_opt(2030, 3, 5).unwrap(), NaiveDate::from_ymd_opt(2030, 3, 6).unwrap()]
    );
    let total: Ms = buckets.values().flatten().map(|s| s.clipped.duration_ms()).sum();
    assert_eq!(total, booking.end - booking.start);
    assert!(buckets.values().flatten().all(|s| s.is_own));
}

#[tokio::test]
async fn abandoned_lock_expires_for_next_user() {
    let w = world();
    let a = w.orchestrator(alice(), InteractionMode::Drag);
    let b = w.orchestrator(bob(), InteractionMode::Drag);

    let form = opened(a.open(7, w.week(), w.now()).await.unwrap());
    // Crash: the form never closes and no heartbeat reaches the server.
    std::mem::forget(form);

    w.clock.fetch_add(59_000, Ordering::SeqCst);
    assert!(matches!(b.open(7, w.week(), w.now()).await.unwrap(), OpenOutcome::Blocked { .. }));

    w.clock.fetch_add(2_000, Ordering::SeqCst);
    assert_eq!(w.backend.reap_expired_locks(w.now()), 1);
    let form = opened(b.open(7, w.week(), w.now()).await.unwrap());
    form.close().await;
}

#[tokio::test]
async fn cancel_propagates_delete() {
    let w = world();
    let sync = SyncManager::new(w.backend.clone(), ReconnectPolicy::default());
    let mut room = sync.open(Scope::Room(1));

    let a = w.orchestrator(alice(), InteractionMode::ClickClick);
    let mut form = opened(a.open(7, w.week(), w.now()).await.unwrap());
    let tomorrow = w.today.succ_opt().unwrap();
    form.click(GridHit::new(tomorrow, 9.0), w.now());
    form.click(GridHit::new(tomorrow, 17.0), w.now());
    let booking = form.confirm().await.unwrap();
    form.close().await;

    assert!(matches!(
        w.orchestrator(bob(), InteractionMode::Drag).cancel_booking(booking.id).await,
        Err(BookingError::Forbidden(_))
    ));
    a.cancel_booking(booking.id).await.unwrap();

    let delete = wait_for(&mut room, |d| {
        matches!(d, Delta::UpdateBookings { deleted_ids, .. } if !deleted_ids.is_empty())
    })
    .await;
    assert_eq!(delete, Delta::delete(7, vec![booking.id]));
    sync.close_all();
}
