use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::{info, warn};

use deskgrid::calendar::{CalendarView, ViewMode};
use deskgrid::config::Config;
use deskgrid::memory::InMemoryBackend;
use deskgrid::model::*;
use deskgrid::orchestrator::{BookingOrchestrator, OpenOutcome};
use deskgrid::reaper::{REAP_INTERVAL, spawn_reaper};
use deskgrid::selection::{GridHit, InteractionMode};
use deskgrid::sync::{Delta, LiveState, Scope, SyncEvent, SyncManager, TokenFile, WsTransport};
use deskgrid::timemath::{add_days, local_date_key, now_ms};

const LOCATION: LocationId = 1;
const ROOM: RoomId = 1;
const DESK: DeskId = 7;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    deskgrid::observability::init(config.metrics_port)?;
    info!("deskgrid");
    info!("  tz: {}", config.tz);
    info!("  lock: heartbeat {:?}, ttl {:?}, max hold {:?}", config.lock.heartbeat(), config.lock.ttl(), config.lock.max_hold());
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("watch") => {
            let room: RoomId = args.next().and_then(|s| s.parse().ok()).unwrap_or(ROOM);
            watch(&config, room).await
        }
        _ => simulate(&config).await,
    }
}

/// Follow a remote room's deltas until ctrl-c.
async fn watch(config: &Config, room: RoomId) -> Result<(), Box<dyn std::error::Error>> {
    info!("watching room {room} on {}", config.ws_url);
    let mut transport = WsTransport::new(config.ws_url.clone());
    if let Some(path) = &config.token_file {
        transport = transport.with_tokens(Arc::new(TokenFile::new(path.clone())));
    }
    let sync = SyncManager::new(Arc::new(transport), config.reconnect);
    let mut sub = sync.open(Scope::Room(room));
    loop {
        tokio::select! {
            event = sub.next() => match event {
                Some(SyncEvent::Closed(reason)) => {
                    warn!(?reason, "sync channel closed");
                    break;
                }
                Some(event) => info!(?event, "sync"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    sync.close_all();
    Ok(())
}

/// Two users contend for one desk against the in-process backend.
async fn simulate(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let backend = Arc::new(InMemoryBackend::new(&config.lock));
    backend.add_room(Room::new(ROOM, LOCATION, "North wing"))?;
    backend.add_desk(Desk::new(DESK, ROOM, "Window desk"))?;
    backend.add_desk(Desk::new(8, ROOM, "Corner desk").with_assignee(UserRef::new(3, "carol")))?;
    let reaper = spawn_reaper(backend.clone(), REAP_INTERVAL);

    // A third viewer follows the room and its location.
    let sync = SyncManager::new(backend.clone(), config.reconnect);
    let mut live = LiveState::new();
    for desk in backend.desks_in_room(ROOM) {
        live.seed_desk(&desk);
    }
    let mut events = futures::stream::select(sync.open(Scope::Room(ROOM)), sync.open(Scope::Location(LOCATION)));
    let logger = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                SyncEvent::Delta(delta) => {
                    live.apply(&delta);
                    if let Delta::RoomAvailability { room_id, .. } = delta {
                        info!(room_id, available = ?live.available_desks(room_id), "room availability");
                    } else {
                        info!(?delta, "room delta");
                    }
                }
                other => info!(event = ?other, "sync channel"),
            }
        }
        live
    });

    let tz = config.tz;
    let now = now_ms();
    let tomorrow = add_days(local_date_key(now, tz), 1);
    let view = CalendarView::new(ViewMode::Week, tomorrow);

    let alice = BookingOrchestrator::new(backend.session(UserRef::new(1, "alice")), config.lock, tz, InteractionMode::Drag);
    let bob = BookingOrchestrator::new(backend.session(UserRef::new(2, "bob")), config.lock, tz, InteractionMode::ClickClick);

    // Alice opens the form first and holds the desk.
    let OpenOutcome::Opened(mut form) = alice.open(DESK, view, now).await? else {
        return Err("alice could not lock the desk".into());
    };
    if let OpenOutcome::Blocked { holder } = bob.open(DESK, view, now).await? {
        info!("bob blocked: desk {DESK} is being booked by {holder}");
    }

    form.pointer_down(GridHit::new(tomorrow, 10.0), now);
    form.pointer_move(GridHit::new(tomorrow, 11.0), now);
    form.pointer_up(Some(GridHit::new(tomorrow, 12.0)), now);
    if let Some(summary) = form.summary() {
        info!(?summary, "alice selected");
    }
    let booking = form.confirm().await?;
    info!(booking_id = booking.id, "alice booked");
    form.close().await;

    // Bob's turn. His first pick collides with alice's booking.
    let OpenOutcome::Opened(mut form) = bob.open(DESK, view, now).await? else {
        return Err("bob could not lock the desk".into());
    };
    info!(free = ?form.free_time(tomorrow), "bob sees free time");
    form.click(GridHit::new(tomorrow, 9.0), now);
    form.click(GridHit::new(tomorrow, 13.0), now);
    if let Some(summary) = form.summary() {
        info!(?summary, "bob selected");
    }
    if let Err(e) = form.confirm().await {
        warn!("bob refused: {e}");
    }
    form.click(GridHit::new(tomorrow, 13.0), now);
    form.click(GridHit::new(tomorrow, 14.0), now);
    let booking = form.confirm().await?;
    info!(booking_id = booking.id, "bob booked");
    form.close().await;

    // Let the last deltas reach the logger.
    tokio::time::sleep(Duration::from_millis(50)).await;
    sync.close_all();
    if let Ok(live) = logger.await {
        info!(can_book = live.can_book(DESK, &UserRef::new(3, "carol")), "desk {DESK} as carol sees it");
    }
    reaper.abort();
    info!("simulation finished");
    Ok(())
}
