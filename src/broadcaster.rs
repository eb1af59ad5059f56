/// Typed duplex-channel messages and the component that emits them
/// (spec §4.7).
///
/// Generalizes the teacher's `ServerMessage`/`BroadcastUpdate` pair from
/// `src/bin/web_server.rs`: instead of fanning out Binance kline ticks to
/// every subscriber, a single `Broadcaster` per session fans out
/// `TransitionCoordinator` output to that session's `WsSession` actor.
/// Every variant carries only primitive-valued fields — spec §4.7 forbids
/// non-scalar payloads crossing the wire.
use actix::{Message, Recipient};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::model::{Candle, Timeframe};

// The `type` discriminator and every field travel on the wire in
// snake_case, matching spec §4.7/§6.3's documented message names
// (`skip_complete`, `clear_cache`, `load_anchor`, ...) and the teacher's
// own explicit `#[serde(rename = "...")]` tags in web_server.rs.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "initial_chart_data")]
    InitialChartData { candles: Vec<Candle>, timeframe: Timeframe, cursor: i64 },

    #[serde(rename = "bulletproof_timeframe_changed")]
    BulletproofTimeframeChanged {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        transaction_id: String,
        contamination: String,
        needs_recreation: bool,
        clear_cache: bool,
        load_anchor: i64,
    },

    #[serde(rename = "go_to_date_complete")]
    GoToDateComplete {
        candles: Vec<Candle>,
        timeframe: Timeframe,
        target_date: i64,
        clear_cache: bool,
        load_anchor: i64,
        autoplay_stopped: bool,
    },

    #[serde(rename = "skip_complete")]
    SkipComplete { candle: Candle, timeframe: Timeframe },

    #[serde(rename = "chart_series_recreation")]
    ChartSeriesRecreation { version: u32 },

    #[serde(rename = "emergency_recovery_required")]
    EmergencyRecoveryRequired,
}

/// Actix message wrapping one outbound `ServerMessage`. A `WsSession`
/// actor registers its address as the `Recipient` a `Broadcaster` sends
/// into.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct BroadcastUpdate(pub ServerMessage);

/// Owns the single duplex channel to one connected client. Holding only a
/// `Recipient`, not the actor itself, keeps this free of any actix-web
/// session/request types so it can be unit tested without spinning up an
/// actor system.
pub struct Broadcaster {
    recipient: std::sync::Mutex<Option<Recipient<BroadcastUpdate>>>,
    // Holds the sender half while a DESTRUCT phase is waiting for the
    // client's recreation ack (spec §4.2). `WsSession`'s text-message
    // handler resolves it when the client's ack arrives over the duplex
    // channel.
    pending_ack: std::sync::Mutex<Option<oneshot::Sender<()>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            recipient: std::sync::Mutex::new(None),
            pending_ack: std::sync::Mutex::new(None),
        }
    }

    pub fn attach(&self, recipient: Recipient<BroadcastUpdate>) {
        *self.recipient.lock().expect("broadcaster lock poisoned") = Some(recipient);
    }

    pub fn detach(&self) {
        *self.recipient.lock().expect("broadcaster lock poisoned") = None;
        // A disconnect cancels any pending ack wait (spec §5 cancellation);
        // dropping the sender makes the receiver resolve to `Err` rather
        // than hang until the DESTRUCT deadline.
        self.pending_ack.lock().expect("broadcaster lock poisoned").take();
    }

    /// Sends a message; silently drops it if nothing is attached yet (the
    /// client hasn't opened the duplex channel) or the recipient has gone
    /// away (client disconnected mid-transition, spec §5 cancellation).
    pub fn send(&self, message: ServerMessage) {
        if let Some(recipient) = &*self.recipient.lock().expect("broadcaster lock poisoned") {
            let _ = recipient.do_send(BroadcastUpdate(message));
        }
    }

    /// Sends `ChartSeriesRecreation` and arms a one-shot ack waiter. The
    /// caller awaits the returned receiver against the DESTRUCT deadline;
    /// a prior unacknowledged wait is replaced (only one recreation is ever
    /// in flight per session, since transitions are serialized).
    pub fn request_recreation(&self, version: u32) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        *self.pending_ack.lock().expect("broadcaster lock poisoned") = Some(tx);
        self.send(ServerMessage::ChartSeriesRecreation { version });
        rx
    }

    /// Called from the WebSocket message handler when the client's
    /// recreation ack arrives. A no-op if nothing is currently pending
    /// (ack arrived after the wait already timed out).
    pub fn acknowledge_recreation(&self) {
        if let Some(tx) = self.pending_ack.lock().expect("broadcaster lock poisoned").take() {
            let _ = tx.send(());
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_an_attached_recipient_does_not_panic() {
        let broadcaster = Broadcaster::new();
        broadcaster.send(ServerMessage::EmergencyRecoveryRequired);
    }

    #[test]
    fn server_message_serializes_with_a_snake_case_type_discriminator() {
        let message = ServerMessage::SkipComplete {
            candle: Candle { time: 0, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 },
            timeframe: Timeframe::M5,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "skip_complete");
        assert_eq!(json["timeframe"], "5m");
    }

    #[test]
    fn bulletproof_timeframe_changed_keeps_snake_case_field_names() {
        let message = ServerMessage::BulletproofTimeframeChanged {
            candles: vec![],
            timeframe: Timeframe::M5,
            transaction_id: "switch_tf-1".to_string(),
            contamination: "clean".to_string(),
            needs_recreation: false,
            clear_cache: true,
            load_anchor: 12345,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "bulletproof_timeframe_changed");
        assert_eq!(json["transaction_id"], "switch_tf-1");
        assert_eq!(json["clear_cache"], true);
        assert_eq!(json["load_anchor"], 12345);
        assert!(json.get("transactionId").is_none());
        assert!(json.get("clearCache").is_none());
    }

    #[test]
    fn emergency_recovery_required_has_no_extra_fields() {
        let json = serde_json::to_value(ServerMessage::EmergencyRecoveryRequired).unwrap();
        assert_eq!(json["type"], "emergency_recovery_required");
    }

    #[tokio::test]
    async fn acknowledge_recreation_resolves_the_pending_waiter() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.request_recreation(1);
        broadcaster.acknowledge_recreation();
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn detach_cancels_a_pending_ack_wait() {
        let broadcaster = Broadcaster::new();
        let rx = broadcaster.request_recreation(1);
        broadcaster.detach();
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn acknowledge_with_nothing_pending_is_a_no_op() {
        let broadcaster = Broadcaster::new();
        broadcaster.acknowledge_recreation();
    }
}
