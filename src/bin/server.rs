use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use gridlords_server::constants::{
    ARTILLERY_TICK_MS, FAST_OUTPOST_TICK_MS, MAX_PLAYERS, PRODUCTION_TICK_MS,
};
use gridlords_server::protocol::{parse_client_message, ParsedClientMessage};
use gridlords_server::reconnect::{DisconnectedRecord, ReconnectOptions, ReconnectTable};
use gridlords_server::registry::{RoomRegistry, SharedRoom};
use gridlords_server::room::{LeaveReport, Room, RoomUpdate};
use gridlords_server::scheduler::RoomScheduler;
use gridlords_server::types::{Coord, PlayerClass, PlayerColor, RoomError, RoomEvent};
use gridlords_server::win_ledger::WinLedger;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<AppState>;

#[derive(Debug, Parser)]
#[command(name = "gridlords-server", about = "Authoritative territory game server")]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,

    #[arg(long, env = "LEDGER_DB_PATH", default_value = ".data/wins.json")]
    ledger_path: PathBuf,

    #[arg(long, env = "GRACE_PERIOD_SECS", default_value_t = 60)]
    grace_period_secs: u64,
}

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<OutboundMessage>,
}

#[derive(Clone, Debug)]
enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

/// Connection plumbing only. Room state never lives here, so a slow client
/// cannot stall a room and a busy room cannot stall connection setup.
#[derive(Default)]
struct Gateway {
    clients: HashMap<String, ClientContext>,
    room_by_conn: HashMap<String, String>,
}

struct AppState {
    gateway: Mutex<Gateway>,
    registry: Mutex<RoomRegistry>,
    reconnect: Mutex<ReconnectTable>,
    ledger: Mutex<WinLedger>,
}

#[derive(Debug, Deserialize)]
struct RankingQuery {
    limit: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let state: SharedState = Arc::new(AppState {
        gateway: Mutex::new(Gateway::default()),
        registry: Mutex::new(RoomRegistry::new()),
        reconnect: Mutex::new(ReconnectTable::new(ReconnectOptions {
            grace_period_ms: args.grace_period_secs * 1_000,
        })),
        ledger: Mutex::new(WinLedger::new(args.ledger_path.clone())),
    });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/ranking", get(ranking_handler))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir(args.static_dir) {
        let index_file = static_dir.join("index.html");
        println!(
            "[server] static file root: {}",
            static_dir.to_string_lossy()
        );
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        eprintln!("[server] static file root not found; serving API and /ws only");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind server socket");

    println!("[server] listening on :{}", args.port);
    axum::serve(listener, app)
        .await
        .expect("server runtime failed");
}

fn resolve_static_dir(requested: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = requested {
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("dist/client"), PathBuf::from("static")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn healthz(State(state): State<SharedState>) -> impl IntoResponse {
    let rooms = state.registry.lock().await.room_count();
    let players = state.gateway.lock().await.clients.len();
    Json(json!({ "ok": true, "rooms": rooms, "players": players }))
}

async fn ranking_handler(
    State(state): State<SharedState>,
    Query(query): Query<RankingQuery>,
) -> impl IntoResponse {
    let guard = state.ledger.lock().await;
    Json(guard.build_response(parse_ranking_limit(query.limit.as_deref())))
}

fn parse_ranking_limit(raw: Option<&str>) -> Option<usize> {
    raw.and_then(|value| value.parse::<usize>().ok())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let conn_id = make_id("conn");
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);

    {
        let mut gateway = state.gateway.lock().await;
        gateway
            .clients
            .insert(conn_id.clone(), ClientContext { tx: tx.clone() });
    }

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &conn_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &conn_id, text).await;
                } else {
                    send_error(&state, &conn_id, "invalid_message", "invalid utf8 message").await;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &conn_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, conn_id: &str, raw: String) {
    let Some(message) = parse_client_message(&raw) else {
        send_error(&state, conn_id, "invalid_message", "invalid message").await;
        return;
    };

    match message {
        ParsedClientMessage::CreateRoom {
            name,
            class,
            session_token,
        } => {
            handle_create_room(state, conn_id, name, class, session_token).await;
        }
        ParsedClientMessage::JoinRoom {
            room_code,
            name,
            class,
            session_token,
        } => {
            handle_join_room(state, conn_id, room_code, name, class, session_token).await;
        }
        ParsedClientMessage::StartGame => {
            handle_start_game(state, conn_id).await;
        }
        ParsedClientMessage::Move { from, to, split } => {
            handle_move(state, conn_id, from, to, split).await;
        }
        ParsedClientMessage::LeaveRoom => {
            handle_leave_room(state, conn_id).await;
        }
        ParsedClientMessage::RequestReset => {
            handle_request_reset(state, conn_id).await;
        }
    }
}

async fn handle_create_room(
    state: SharedState,
    conn_id: &str,
    name: String,
    class: PlayerClass,
    session_token: Option<String>,
) {
    {
        let gateway = state.gateway.lock().await;
        if gateway.room_by_conn.contains_key(conn_id) {
            drop(gateway);
            send_room_error(&state, conn_id, RoomError::AlreadyInRoom).await;
            return;
        }
    }

    let token = session_token.unwrap_or_else(make_session_token);
    let (code, handle) = {
        let mut registry = state.registry.lock().await;
        registry.create(rand::rng().random())
    };

    let frames = {
        let mut guard = handle.lock().await;
        let color = match guard.room.join(conn_id, &name, class, &token) {
            Ok(color) => color,
            Err(error) => {
                drop(guard);
                send_room_error(&state, conn_id, error).await;
                return;
            }
        };
        let mut frames = vec![
            (
                conn_id.to_string(),
                json!({
                    "type": "room_created",
                    "roomCode": code,
                    "color": color,
                    "sessionToken": token,
                })
                .to_string(),
            ),
            (
                conn_id.to_string(),
                json!({
                    "type": "player_assigned",
                    "color": color,
                    "class": class,
                    "host": true,
                })
                .to_string(),
            ),
        ];
        frames.extend(room_info_frames(&guard.room));
        frames
    };

    {
        let mut gateway = state.gateway.lock().await;
        gateway
            .room_by_conn
            .insert(conn_id.to_string(), code.clone());
    }
    println!("[room] {code} created by {conn_id}");
    deliver_frames(&state, frames, QueuePolicy::DisconnectOnFull).await;
}

async fn handle_join_room(
    state: SharedState,
    conn_id: &str,
    room_code: String,
    name: String,
    class: PlayerClass,
    session_token: Option<String>,
) {
    // The binding check comes first: a connection that already sits in a
    // room must not be able to consume another session's reconnect record.
    {
        let gateway = state.gateway.lock().await;
        if gateway.room_by_conn.contains_key(conn_id) {
            drop(gateway);
            send_room_error(&state, conn_id, RoomError::AlreadyInRoom).await;
            return;
        }
    }

    if let Some(token) = session_token.as_deref() {
        if try_reconnect(&state, conn_id, token).await {
            return;
        }
    }

    let Some(handle) = state.registry.lock().await.get(&room_code) else {
        send_room_error(&state, conn_id, RoomError::RoomNotFound).await;
        return;
    };

    let token = session_token.unwrap_or_else(make_session_token);
    let frames = {
        let mut guard = handle.lock().await;
        let color = match guard.room.join(conn_id, &name, class, &token) {
            Ok(color) => color,
            Err(error) => {
                drop(guard);
                send_room_error(&state, conn_id, error).await;
                return;
            }
        };
        let mut frames = vec![
            (
                conn_id.to_string(),
                json!({
                    "type": "room_joined",
                    "roomCode": room_code,
                    "color": color,
                    "sessionToken": token,
                })
                .to_string(),
            ),
            (
                conn_id.to_string(),
                json!({
                    "type": "player_assigned",
                    "color": color,
                    "class": class,
                    "host": guard.room.host() == Some(color),
                })
                .to_string(),
            ),
        ];
        frames.extend(room_info_frames(&guard.room));
        frames
    };

    {
        let mut gateway = state.gateway.lock().await;
        gateway
            .room_by_conn
            .insert(conn_id.to_string(), room_code.clone());
    }
    deliver_frames(&state, frames, QueuePolicy::DisconnectOnFull).await;
}

/// Claims a pending-departure record for `token`, if any, and transfers the
/// binding to this connection. Returns true when the reconnection was
/// handled, whether or not it succeeded cleanly.
async fn try_reconnect(state: &SharedState, conn_id: &str, token: &str) -> bool {
    let record = {
        let mut reconnect = state.reconnect.lock().await;
        reconnect.consume(token)
    };
    let Some(record) = record else {
        return false;
    };

    let Some(handle) = state.registry.lock().await.get(&record.room_code) else {
        send_room_error(state, conn_id, RoomError::RoomNotFound).await;
        return true;
    };

    let frames = {
        let mut guard = handle.lock().await;
        let Some(color) = guard.room.rebind_connection(&record.conn_id, conn_id) else {
            drop(guard);
            send_room_error(state, conn_id, RoomError::RoomNotFound).await;
            return true;
        };

        let mut frames = vec![(
            conn_id.to_string(),
            json!({
                "type": "reconnected",
                "roomCode": record.room_code,
                "color": color,
            })
            .to_string(),
        )];
        for (other_conn, other_color) in guard.room.connected_participants() {
            if other_color != color {
                frames.push((
                    other_conn,
                    serialize_event(&RoomEvent::PlayerReconnected { color }),
                ));
            }
        }
        frames.extend(room_info_frames(&guard.room));
        if guard.room.started() {
            frames.push((
                conn_id.to_string(),
                state_frame_payload(&guard.room, color),
            ));
        }
        frames
    };

    {
        let mut gateway = state.gateway.lock().await;
        gateway
            .room_by_conn
            .insert(conn_id.to_string(), record.room_code.clone());
    }
    println!(
        "[room] {} reconnected as {} in {}",
        conn_id, record.color.as_str(), record.room_code
    );
    deliver_frames(state, frames, QueuePolicy::DisconnectOnFull).await;
    true
}

async fn handle_start_game(state: SharedState, conn_id: &str) {
    let Some((_code, handle)) = room_of_conn(&state, conn_id).await else {
        send_room_error(&state, conn_id, RoomError::RoomNotFound).await;
        return;
    };

    let frames = {
        let mut guard = handle.lock().await;
        let update = match guard.room.start(conn_id) {
            Ok(update) => update,
            Err(error) => {
                drop(guard);
                send_room_error(&state, conn_id, error).await;
                return;
            }
        };
        spawn_room_tickers(&state, &handle, &mut guard.timers);
        let mut frames = update_frames(&guard.room, &update, None);
        frames.extend(state_frames(&guard.room));
        frames
    };

    deliver_frames(&state, frames, QueuePolicy::DisconnectOnFull).await;
}

async fn handle_move(state: SharedState, conn_id: &str, from: Coord, to: Coord, split: bool) {
    let Some((code, handle)) = room_of_conn(&state, conn_id).await else {
        return;
    };

    let (frames, finished, poisoned) = {
        let mut guard = handle.lock().await;
        let update = match guard.room.apply_move(conn_id, from, to, split) {
            Ok(update) => update,
            // Stale and malformed moves are dropped without a reply; the next
            // state frame corrects the client.
            Err(_) => return,
        };
        let wins = if update.game_over {
            record_win_if_any(&state, &guard.room).await
        } else {
            None
        };
        let mut frames = update_frames(&guard.room, &update, wins);
        if update.changed {
            frames.extend(state_frames(&guard.room));
        }
        if update.game_over {
            guard.timers.cancel_all();
        }

        // A resolver bug takes down this room, never the process.
        let poisoned = match guard.room.check_invariants() {
            Ok(()) => false,
            Err(reason) => {
                eprintln!("[room] {code} invariant violation: {reason}");
                guard.timers.cancel_all();
                frames = guard
                    .room
                    .connected_participants()
                    .into_iter()
                    .map(|(conn, _)| {
                        (
                            conn,
                            json!({
                                "type": "error",
                                "code": "internal",
                                "message": "room state corrupted; room closed",
                            })
                            .to_string(),
                        )
                    })
                    .collect();
                true
            }
        };
        (frames, update.game_over, poisoned)
    };

    if poisoned {
        let mut registry = state.registry.lock().await;
        registry.remove(&code);
    } else if finished {
        println!("[room] {code} finished");
    }
    deliver_frames(&state, frames, QueuePolicy::DropOnFull).await;
}

async fn handle_leave_room(state: SharedState, conn_id: &str) {
    let Some((code, handle)) = room_of_conn(&state, conn_id).await else {
        send_room_error(&state, conn_id, RoomError::RoomNotFound).await;
        return;
    };

    {
        let mut gateway = state.gateway.lock().await;
        gateway.room_by_conn.remove(conn_id);
    }

    let (frames, empty) = {
        let mut guard = handle.lock().await;
        let Some(report) = guard.room.leave(conn_id) else {
            return;
        };
        let wins = if report.update.game_over {
            record_win_if_any(&state, &guard.room).await
        } else {
            None
        };
        let frames = departure_frames(&guard.room, &report, wins);
        if report.update.game_over || report.empty {
            guard.timers.cancel_all();
        }
        (frames, report.empty)
    };

    if empty {
        let mut registry = state.registry.lock().await;
        registry.remove(&code);
        println!("[room] {code} removed (empty)");
    }
    deliver_frames(&state, frames, QueuePolicy::DisconnectOnFull).await;
}

async fn handle_request_reset(state: SharedState, conn_id: &str) {
    let Some((_code, handle)) = room_of_conn(&state, conn_id).await else {
        send_room_error(&state, conn_id, RoomError::RoomNotFound).await;
        return;
    };

    let frames = {
        let mut guard = handle.lock().await;
        if let Err(error) = guard.room.reset(conn_id) {
            drop(guard);
            send_room_error(&state, conn_id, error).await;
            return;
        }
        guard.timers.cancel_all();
        let mut frames = room_info_frames(&guard.room);
        frames.extend(state_frames(&guard.room));
        frames
    };

    deliver_frames(&state, frames, QueuePolicy::DisconnectOnFull).await;
}

async fn handle_disconnect(state: SharedState, conn_id: &str) {
    let room_code = {
        let mut gateway = state.gateway.lock().await;
        gateway.clients.remove(conn_id);
        gateway.room_by_conn.remove(conn_id)
    };
    let Some(code) = room_code else {
        return;
    };
    let Some(handle) = state.registry.lock().await.get(&code) else {
        return;
    };

    let grace_ms = state.reconnect.lock().await.grace_period_ms();

    enum Departure {
        Graced {
            frames: Vec<(String, String)>,
            token: String,
            color: PlayerColor,
        },
        Final {
            frames: Vec<(String, String)>,
            empty: bool,
        },
    }

    let departure = {
        let mut guard = handle.lock().await;
        let in_grace_scope = guard.room.started() && guard.room.winner().is_none();
        let graced = if in_grace_scope {
            guard.room.mark_disconnected(conn_id)
        } else {
            None
        };
        match graced {
            Some((color, Some(token))) => {
                let mut frames = Vec::new();
                for (other_conn, _) in guard.room.connected_participants() {
                    frames.push((
                        other_conn,
                        serialize_event(&RoomEvent::PlayerDisconnecting {
                            color,
                            grace_secs: grace_ms / 1_000,
                        }),
                    ));
                }
                Departure::Graced {
                    frames,
                    token,
                    color,
                }
            }
            // A binding with no stored token can never be reconnected, so it
            // departs permanently instead of lingering in limbo.
            _ => {
                let Some(report) = guard.room.leave(conn_id) else {
                    return;
                };
                let wins = if report.update.game_over {
                    record_win_if_any(&state, &guard.room).await
                } else {
                    None
                };
                let frames = departure_frames(&guard.room, &report, wins);
                if report.update.game_over || report.empty {
                    guard.timers.cancel_all();
                }
                Departure::Final {
                    frames,
                    empty: report.empty,
                }
            }
        }
    };

    match departure {
        Departure::Graced {
            frames,
            token,
            color,
        } => {
            let record = DisconnectedRecord {
                room_code: code.clone(),
                conn_id: conn_id.to_string(),
                color,
                deadline_ms: now_ms() + grace_ms,
            };
            let timer_state = state.clone();
            let timer_token = token.clone();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(grace_ms)).await;
                finalize_grace_expiry(timer_state, &timer_token).await;
            });
            {
                let mut reconnect = state.reconnect.lock().await;
                reconnect.register(&token, record, timer);
            }
            println!(
                "[room] {} disconnected from {code}, grace {}s",
                color.as_str(),
                grace_ms / 1_000
            );
            deliver_frames(&state, frames, QueuePolicy::DropOnFull).await;
        }
        Departure::Final { frames, empty } => {
            if empty {
                let mut registry = state.registry.lock().await;
                registry.remove(&code);
                println!("[room] {code} removed (empty)");
            }
            deliver_frames(&state, frames, QueuePolicy::DropOnFull).await;
        }
    }
}

async fn finalize_grace_expiry(state: SharedState, token: &str) {
    let record = {
        let mut reconnect = state.reconnect.lock().await;
        reconnect.expire(token)
    };
    let Some(record) = record else {
        return;
    };
    let Some(handle) = state.registry.lock().await.get(&record.room_code) else {
        return;
    };

    let (frames, empty) = {
        let mut guard = handle.lock().await;
        let Some(report) = guard.room.finalize_departure(record.color) else {
            return;
        };
        let wins = if report.update.game_over {
            record_win_if_any(&state, &guard.room).await
        } else {
            None
        };
        let frames = departure_frames(&guard.room, &report, wins);
        if report.update.game_over || report.empty {
            guard.timers.cancel_all();
        }
        (frames, report.empty)
    };

    if empty {
        let mut registry = state.registry.lock().await;
        registry.remove(&record.room_code);
        println!("[room] {} removed (empty)", record.room_code);
    }
    println!(
        "[room] grace expired for {} in {}",
        record.color.as_str(),
        record.room_code
    );
    deliver_frames(&state, frames, QueuePolicy::DropOnFull).await;
}

fn spawn_room_tickers(state: &SharedState, handle: &SharedRoom, timers: &mut RoomScheduler) {
    timers.register(spawn_ticker(
        state.clone(),
        handle.clone(),
        PRODUCTION_TICK_MS,
        Room::production_tick,
    ));
    timers.register(spawn_ticker(
        state.clone(),
        handle.clone(),
        FAST_OUTPOST_TICK_MS,
        Room::fast_outpost_tick,
    ));
    timers.register(spawn_ticker(
        state.clone(),
        handle.clone(),
        ARTILLERY_TICK_MS,
        Room::artillery_tick,
    ));
}

fn spawn_ticker(
    state: SharedState,
    handle: SharedRoom,
    period_ms: u64,
    tick: fn(&mut Room) -> RoomUpdate,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(period_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let (frames, finished) = {
                let mut guard = handle.lock().await;
                if !guard.room.started() || guard.room.winner().is_some() {
                    continue;
                }
                let update = tick(&mut guard.room);
                if !update.changed {
                    continue;
                }
                let wins = if update.game_over {
                    record_win_if_any(&state, &guard.room).await
                } else {
                    None
                };
                let mut frames = update_frames(&guard.room, &update, wins);
                frames.extend(state_frames(&guard.room));
                (frames, update.game_over)
            };

            deliver_frames(&state, frames, QueuePolicy::DropOnFull).await;
            if finished {
                // Cancelling last: abort marks this task too, so the final
                // frames have to be flushed before the scheduler is drained.
                let mut guard = handle.lock().await;
                guard.timers.cancel_all();
                return;
            }
        }
    })
}

async fn record_win_if_any(state: &SharedState, room: &Room) -> Option<u64> {
    let name = room.winner_name()?.to_string();
    let mut ledger = state.ledger.lock().await;
    Some(ledger.record_win(&name))
}

/// The full fan-out for a permanent departure. Any departure that mutated
/// the board rebroadcasts the filtered state, so survivors never render a
/// stale grid.
fn departure_frames(room: &Room, report: &LeaveReport, wins: Option<u64>) -> Vec<(String, String)> {
    let mut frames = update_frames(room, &report.update, wins);
    frames.extend(room_info_frames(room));
    if report.update.changed {
        frames.extend(state_frames(room));
    }
    frames
}

/// Frames for one room mutation: broadcast events to every connected
/// participant and the targeted `eliminated` notice to the fallen player.
fn update_frames(room: &Room, update: &RoomUpdate, wins: Option<u64>) -> Vec<(String, String)> {
    let recipients = room.connected_participants();
    let mut frames = Vec::new();

    for event in &update.events {
        let payload = match event {
            RoomEvent::GameOver {
                winner,
                draw,
                reason,
                ..
            } => serialize_event(&RoomEvent::GameOver {
                winner: *winner,
                draw: *draw,
                reason: *reason,
                wins,
            }),
            other => serialize_event(other),
        };
        for (conn, _) in &recipients {
            frames.push((conn.clone(), payload.clone()));
        }
    }

    for notice in &update.notices {
        if let Some(conn) = room.conn_of(notice.color) {
            frames.push((
                conn.to_string(),
                json!({
                    "type": "eliminated",
                    "rank": notice.rank,
                    "by": notice.by,
                })
                .to_string(),
            ));
        }
    }

    frames
}

/// Per-recipient filtered board. Each participant only ever receives the grid
/// through their own fog filter.
fn state_frames(room: &Room) -> Vec<(String, String)> {
    room.connected_participants()
        .into_iter()
        .map(|(conn, color)| {
            let payload = state_frame_payload(room, color);
            (conn, payload)
        })
        .collect()
}

fn state_frame_payload(room: &Room, color: PlayerColor) -> String {
    json!({
        "type": "game_state",
        "grid": room.filtered_state(color),
    })
    .to_string()
}

fn room_info_frames(room: &Room) -> Vec<(String, String)> {
    let payload = json!({
        "type": "room_info",
        "roomCode": room.code(),
        "players": room.roster(),
        "capacity": MAX_PLAYERS,
        "started": room.started(),
    })
    .to_string();
    room.connected_participants()
        .into_iter()
        .map(|(conn, _)| (conn, payload.clone()))
        .collect()
}

fn serialize_event(event: &RoomEvent) -> String {
    serde_json::to_value(event)
        .unwrap_or_else(|_| json!({ "type": "error", "code": "internal" }))
        .to_string()
}

async fn room_of_conn(state: &SharedState, conn_id: &str) -> Option<(String, SharedRoom)> {
    let code = {
        let gateway = state.gateway.lock().await;
        gateway.room_by_conn.get(conn_id).cloned()
    }?;
    let handle = state.registry.lock().await.get(&code)?;
    Some((code, handle))
}

async fn deliver_frames(state: &SharedState, frames: Vec<(String, String)>, policy: QueuePolicy) {
    if frames.is_empty() {
        return;
    }
    let gateway = state.gateway.lock().await;
    let mut failed: Vec<String> = Vec::new();
    for (conn_id, payload) in frames {
        let Some(client) = gateway.clients.get(&conn_id) else {
            continue;
        };
        if client
            .tx
            .try_send(OutboundMessage::Text(payload))
            .is_err()
            && policy == QueuePolicy::DisconnectOnFull
            && !failed.contains(&conn_id)
        {
            failed.push(conn_id);
        }
    }
    for conn_id in &failed {
        if let Some(client) = gateway.clients.get(conn_id) {
            let _ = client.tx.try_send(OutboundMessage::Close {
                code: 1008,
                reason: "outbound queue overflow".to_string(),
            });
        }
    }
}

async fn send_error(state: &SharedState, conn_id: &str, code: &str, message: &str) {
    let payload = json!({
        "type": "error",
        "code": code,
        "message": message,
    })
    .to_string();
    deliver_frames(
        state,
        vec![(conn_id.to_string(), payload)],
        QueuePolicy::DisconnectOnFull,
    )
    .await;
}

async fn send_room_error(state: &SharedState, conn_id: &str, error: RoomError) {
    let code = serde_json::to_value(error)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_else(|| "internal".to_string());
    send_error(state, conn_id, &code, error.message()).await;
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn make_session_token() -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> SharedState {
        let ledger_path = std::env::temp_dir()
            .join(format!(
                "gridlords-server-test-{}-{}",
                std::process::id(),
                NEXT_ID.fetch_add(1, Ordering::Relaxed)
            ))
            .join("wins.json");
        Arc::new(AppState {
            gateway: Mutex::new(Gateway::default()),
            registry: Mutex::new(RoomRegistry::new()),
            reconnect: Mutex::new(ReconnectTable::new(ReconnectOptions::default())),
            ledger: Mutex::new(WinLedger::new(ledger_path)),
        })
    }

    #[test]
    fn departure_frames_refresh_survivor_state_after_a_mid_match_leave() {
        let mut room = Room::new("TEST", 5);
        room.join("conn_a", "Alice", PlayerClass::Tank, "t1").unwrap();
        room.join("conn_b", "Bob", PlayerClass::Scout, "t2").unwrap();
        room.join("conn_c", "Cleo", PlayerClass::Rusher, "t3").unwrap();
        room.start("conn_a").unwrap();

        let report = room.leave("conn_b").unwrap();
        let frames = departure_frames(&room, &report, None);

        let state_payloads: Vec<&(String, String)> = frames
            .iter()
            .filter(|(_, payload)| payload.contains("\"game_state\""))
            .collect();
        assert_eq!(state_payloads.len(), 2);
        for (conn, payload) in &state_payloads {
            assert!(conn == "conn_a" || conn == "conn_c");
            // Blue's territory decayed to neutral; no frame may still show it.
            assert!(!payload.contains("\"blue\""));
        }
    }

    #[tokio::test]
    async fn join_room_from_a_bound_connection_never_consumes_a_reconnect_record() {
        let state = test_state();
        let (code_a, _) = state.registry.lock().await.create(1);
        let (code_b, handle_b) = state.registry.lock().await.create(2);
        {
            let mut guard = handle_b.lock().await;
            guard
                .room
                .join("conn_old", "Bob", PlayerClass::Rusher, "tok_b")
                .unwrap();
            guard
                .room
                .join("conn_x", "Cleo", PlayerClass::Rusher, "tok_x")
                .unwrap();
            guard.room.start("conn_old").unwrap();
            guard.room.mark_disconnected("conn_old").unwrap();
        }
        {
            let mut reconnect = state.reconnect.lock().await;
            reconnect.register(
                "tok_b",
                DisconnectedRecord {
                    room_code: code_b.clone(),
                    conn_id: "conn_old".to_string(),
                    color: PlayerColor::Red,
                    deadline_ms: 0,
                },
                tokio::spawn(async {}),
            );
        }
        {
            let mut gateway = state.gateway.lock().await;
            gateway
                .room_by_conn
                .insert("conn_1".to_string(), code_a.clone());
        }

        handle_join_room(
            state.clone(),
            "conn_1",
            code_b.clone(),
            "Mallory".to_string(),
            PlayerClass::Rusher,
            Some("tok_b".to_string()),
        )
        .await;

        assert!(state.reconnect.lock().await.contains("tok_b"));
        assert_eq!(
            state.gateway.lock().await.room_by_conn.get("conn_1"),
            Some(&code_a)
        );
        let guard = handle_b.lock().await;
        assert_eq!(guard.room.color_of("conn_1"), None);
        assert_eq!(guard.room.color_of("conn_old"), Some(PlayerColor::Red));
    }

    #[tokio::test]
    async fn disconnect_mid_match_registers_a_grace_record() {
        let state = test_state();
        let (code, handle) = state.registry.lock().await.create(3);
        {
            let mut guard = handle.lock().await;
            guard
                .room
                .join("conn_1", "Alice", PlayerClass::Tank, "tok_1")
                .unwrap();
            guard
                .room
                .join("conn_2", "Bob", PlayerClass::Scout, "tok_2")
                .unwrap();
            guard.room.start("conn_1").unwrap();
        }
        {
            let mut gateway = state.gateway.lock().await;
            gateway.room_by_conn.insert("conn_2".to_string(), code.clone());
        }

        handle_disconnect(state.clone(), "conn_2").await;

        assert!(state.reconnect.lock().await.contains("tok_2"));
        let guard = handle.lock().await;
        assert_eq!(guard.room.color_of("conn_2"), Some(PlayerColor::Blue));
        assert!(!guard.room.is_eliminated(PlayerColor::Blue));
    }

    #[tokio::test]
    async fn disconnect_before_start_departs_permanently_and_frees_the_room() {
        let state = test_state();
        let (code, handle) = state.registry.lock().await.create(4);
        {
            let mut guard = handle.lock().await;
            guard
                .room
                .join("conn_1", "Alice", PlayerClass::Tank, "tok_1")
                .unwrap();
        }
        {
            let mut gateway = state.gateway.lock().await;
            gateway.room_by_conn.insert("conn_1".to_string(), code.clone());
        }

        handle_disconnect(state.clone(), "conn_1").await;

        assert!(!state.reconnect.lock().await.contains("tok_1"));
        assert!(state.registry.lock().await.get(&code).is_none());
    }

    #[test]
    fn session_tokens_are_long_and_alphanumeric() {
        let token = make_session_token();
        assert_eq!(token.len(), 48);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, make_session_token());
    }

    #[test]
    fn make_id_is_monotonic_per_prefix() {
        let first = make_id("conn");
        let second = make_id("conn");
        assert_ne!(first, second);
        assert!(first.starts_with("conn_"));
    }

    #[test]
    fn ranking_limit_parsing_is_lenient_for_invalid_values() {
        assert_eq!(parse_ranking_limit(Some("8")), Some(8));
        assert_eq!(parse_ranking_limit(Some("abc")), None);
        assert_eq!(parse_ranking_limit(None), None);
    }
}
