use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::memory::InMemoryBackend;

pub const REAP_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that periodically purges expired desk locks and
/// announces bookings that started or ended since the last pass.
pub async fn run_reaper(backend: Arc<InMemoryBackend>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = backend.now();
        let reaped = backend.reap_expired_locks(now);
        let flipped = backend.sweep_booking_transitions(now);
        if reaped > 0 || flipped > 0 {
            debug!(reaped, flipped, "reaper pass");
        }
    }
}

pub fn spawn_reaper(backend: Arc<InMemoryBackend>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(run_reaper(backend, every))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    use crate::api::NewBooking;
    use crate::limits::HOUR_MS;
    use crate::lock::LockConfig;
    use crate::model::*;
    use crate::sync::{Delta, Scope};

    const T0: Ms = 1_700_000_000_000;

    #[tokio::test(start_paused = true)]
    async fn reaper_unlocks_abandoned_desk() {
        let clock = Arc::new(AtomicI64::new(0));
        let c = clock.clone();
        let backend = InMemoryBackend::new(&LockConfig::default()).with_clock(Arc::new(move || c.load(Ordering::SeqCst)));
        backend.add_room(Room::new(1, 1, "North")).unwrap();
        backend.add_desk(Desk::new(7, 1, "D7")).unwrap();
        let backend = Arc::new(backend);

        // Client takes the lock, then vanishes without releasing.
        backend.lock(&UserRef::new(1, "alice"), 7, 0).unwrap();
        let mut room = backend.notify().subscribe(Scope::Room(1));
        let reaper = spawn_reaper(backend.clone(), REAP_INTERVAL);
        let past_tick = REAP_INTERVAL + Duration::from_millis(10);

        clock.store(59_000, Ordering::SeqCst);
        tokio::time::sleep(past_tick).await;
        assert_eq!(backend.locks().len(), 1);

        clock.store(61_000, Ordering::SeqCst);
        tokio::time::sleep(past_tick).await;
        assert!(backend.locks().is_empty());
        assert_eq!(
            room.recv().await.unwrap(),
            Delta::DeskLock { desk_id: 7, locked: false, locked_by: None }
        );
        reaper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_announces_booking_start_and_end() {
        let clock = Arc::new(AtomicI64::new(T0));
        let c = clock.clone();
        let backend = InMemoryBackend::new(&LockConfig::default()).with_clock(Arc::new(move || c.load(Ordering::SeqCst)));
        backend.add_room(Room::new(1, 1, "North")).unwrap();
        backend.add_desk(Desk::new(7, 1, "D7")).unwrap();
        let backend = Arc::new(backend);
        let request = NewBooking { desk_id: 7, start: T0 + HOUR_MS, end: T0 + 2 * HOUR_MS };
        backend.create(&UserRef::new(1, "alice"), &request, T0).unwrap();

        let mut room = backend.notify().subscribe(Scope::Room(1));
        let mut location = backend.notify().subscribe(Scope::Location(1));
        let reaper = spawn_reaper(backend.clone(), REAP_INTERVAL);
        let past_tick = REAP_INTERVAL + Duration::from_millis(10);

        tokio::time::sleep(past_tick).await;
        assert!(room.try_recv().is_err());

        clock.store(T0 + HOUR_MS + 1_000, Ordering::SeqCst);
        tokio::time::sleep(past_tick).await;
        assert_eq!(
            room.try_recv().unwrap(),
            Delta::DeskStatus { desk_id: 7, is_booked: true, booked_by: Some("alice".into()) }
        );
        assert_eq!(
            location.try_recv().unwrap(),
            Delta::RoomAvailability { room_id: 1, available_desk_count: 0 }
        );

        clock.store(T0 + 2 * HOUR_MS + 1_000, Ordering::SeqCst);
        tokio::time::sleep(past_tick).await;
        assert_eq!(
            room.try_recv().unwrap(),
            Delta::DeskStatus { desk_id: 7, is_booked: false, booked_by: None }
        );
        assert_eq!(
            location.try_recv().unwrap(),
            Delta::RoomAvailability { room_id: 1, available_desk_count: 1 }
        );
        reaper.abort();
    }
}
