/// Per-connected-client session state and its WebSocket actor.
///
/// Spec §9's singleton-removal redesign flag requires one `Session` per
/// connected client rather than process-global state; this mirrors the
/// teacher's own `WsSession` actor (`src/bin/web_server.rs`) but wires it
/// to a `TransitionCoordinator`/`Broadcaster` pair instead of a shared
/// realtime feed.
use std::sync::Arc;
use std::time::{Duration, Instant};

use actix::{Actor, ActorContext, AsyncContext, Handler, StreamHandler};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};

use crate::broadcaster::{Broadcaster, BroadcastUpdate, ServerMessage};
use crate::candle_store::CandleStore;
use crate::config::Config;
use crate::skip_store::SkipStore;
use crate::transition::TransitionCoordinator;
use crate::validator::Validator;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything one connected client needs: its immutable historical data,
/// its own skip log, and its own serialized transition coordinator.
pub struct Session {
    pub store: Arc<CandleStore>,
    pub skip_store: Arc<SkipStore>,
    pub coordinator: Arc<TransitionCoordinator>,
    pub broadcaster: Arc<Broadcaster>,
    pub visible_window_size: usize,
}

impl Session {
    pub fn new(config: &Config) -> Self {
        let store = Arc::new(CandleStore::load_all(&config.data_path));
        let initial_tf = config.default_timeframe();
        let initial_anchor = store
            .series(initial_tf)
            .and_then(|s| s.last())
            .map(|c| c.time)
            .unwrap_or(0);
        let skip_store = Arc::new(SkipStore::new());
        let validator = Validator::new(config.price_min, config.price_max);
        let coordinator = Arc::new(TransitionCoordinator::with_ack_timeout(
            store.clone(),
            skip_store.clone(),
            validator,
            config.visible_window_size,
            config.transition_timeout_normal_ms,
            config.transition_timeout_after_goto_ms,
            config.recreation_ack_timeout_ms,
            initial_tf,
            initial_anchor,
        ));
        Session {
            store,
            skip_store,
            coordinator,
            broadcaster: Arc::new(Broadcaster::new()),
            visible_window_size: config.visible_window_size,
        }
    }

    /// Builds the `initial_chart_data` message for the coordinator's current
    /// state (spec §4.7: emitted once when a client opens the duplex
    /// channel). Kept as a plain async method on `Session` rather than
    /// inline in `WsSession::started` so it stays testable without an actor
    /// system, matching `broadcaster.rs`'s own testability goal.
    pub async fn initial_chart_data(&self) -> ServerMessage {
        let state = self.coordinator.debug_state().await;
        let end_index = self.store.find_index(state.timeframe, state.cursor).map(|i| i + 1).unwrap_or(0);
        let candles = self.store.slice(state.timeframe, end_index, self.visible_window_size);
        ServerMessage::InitialChartData { candles, timeframe: state.timeframe, cursor: state.cursor }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action")]
enum ClientMessage {
    Ping,
    // Sent by the client once it has destroyed and re-created its chart
    // series in response to `ChartSeriesRecreation` (spec §4.2 DESTRUCT).
    RecreationAck,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum WsAck {
    Pong,
}

pub struct WsSession {
    hb: Instant,
    session: Arc<Session>,
}

impl WsSession {
    pub fn new(session: Arc<Session>) -> Self {
        WsSession { hb: Instant::now(), session }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.start_heartbeat(ctx);
        self.session.broadcaster.attach(ctx.address().recipient());

        // Spec §4.7: deliver the initial window over the duplex channel as
        // soon as it's open. Mirrors the teacher's `start_broadcast_listener`
        // (web_server.rs), which also bridges an async read into a
        // `do_send` from a plain spawned task rather than the actor future.
        let session = self.session.clone();
        tokio::spawn(async move {
            let message = session.initial_chart_data().await;
            session.broadcaster.send(message);
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.session.broadcaster.detach();
    }
}

impl Handler<BroadcastUpdate> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: BroadcastUpdate, ctx: &mut Self::Context) {
        match serde_json::to_string(&msg.0) {
            Ok(json) => ctx.text(json),
            Err(e) => tracing::warn!(error = %e, "failed to serialize server message"),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, item: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match item {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(ClientMessage::Ping) => {
                        if let Ok(json) = serde_json::to_string(&WsAck::Pong) {
                            ctx.text(json);
                        }
                    }
                    Ok(ClientMessage::RecreationAck) => self.session.broadcaster.acknowledge_recreation(),
                    Err(_) => {}
                }
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Binary(_)) | Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(error = %e, "websocket protocol error");
                ctx.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.data_path = "./nonexistent-data-dir".to_string();
        config
    }

    #[tokio::test]
    async fn initial_chart_data_reports_the_coordinator_s_starting_timeframe_and_cursor() {
        let session = Session::new(&test_config());
        let message = session.initial_chart_data().await;
        match message {
            ServerMessage::InitialChartData { candles, timeframe, cursor } => {
                assert_eq!(timeframe, session.coordinator.debug_state().await.timeframe);
                assert_eq!(cursor, session.coordinator.debug_state().await.cursor);
                assert!(candles.is_empty());
            }
            other => panic!("expected InitialChartData, got {:?}", other),
        }
    }
}
