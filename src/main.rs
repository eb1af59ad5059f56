use std::sync::Arc;

use actix_cors::Cors;
use actix_files::Files;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder, get, post};
use actix_web_actors::ws;
use clap::Parser;
use serde::{Deserialize, Serialize};

use candle_replay_server::config::Config;
use candle_replay_server::model::Timeframe;
use candle_replay_server::session::{Session, WsSession};

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
}

fn error_response(status_code: actix_web::http::StatusCode, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status_code).json(ErrorBody { status: "error", message: message.into() })
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[get("/api/chart/data")]
async fn chart_data(session: web::Data<Session>) -> impl Responder {
    let state = session.coordinator.debug_state().await;
    let candles = session.store.slice(
        state.timeframe,
        session
            .store
            .find_index(state.timeframe, state.cursor)
            .map(|i| i + 1)
            .unwrap_or(0),
        200,
    );
    HttpResponse::Ok().json(serde_json::json!({
        "candles": candles,
        "timeframe": state.timeframe,
    }))
}

#[derive(Deserialize)]
struct ChangeTimeframeBody {
    timeframe: String,
    #[serde(default)]
    visible_candles: Option<usize>,
}

#[post("/api/chart/change_timeframe")]
async fn change_timeframe(session: web::Data<Session>, body: web::Json<ChangeTimeframeBody>) -> impl Responder {
    let Some(tf) = Timeframe::parse(&body.timeframe) else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, format!("unknown timeframe: {}", body.timeframe));
    };
    match session.coordinator.switch_timeframe(&session.broadcaster, tf, body.visible_candles).await {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "timeframe": outcome.timeframe,
            "data": outcome.candles,
        })),
        Err(e) => error_response(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[post("/api/debug/skip")]
async fn debug_skip(session: web::Data<Session>) -> impl Responder {
    match session.coordinator.skip(&session.broadcaster).await {
        Ok(outcome) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "candle": outcome.candle,
        })),
        Err(e) => error_response(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[post("/api/debug/set_timeframe/{tf}")]
async fn debug_set_timeframe(session: web::Data<Session>, path: web::Path<String>) -> impl Responder {
    let Some(tf) = Timeframe::parse(&path.into_inner()) else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, "unknown timeframe");
    };
    match session.coordinator.switch_timeframe(&session.broadcaster, tf, None).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"status": "ok"})),
        Err(e) => error_response(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Deserialize)]
struct SetSpeedBody {
    speed: f64,
}

#[post("/api/debug/set_speed")]
async fn debug_set_speed(session: web::Data<Session>, body: web::Json<SetSpeedBody>) -> impl Responder {
    match session.coordinator.set_speed(body.speed).await {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({"status": "ok"})),
        Err(e) => error_response(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[post("/api/debug/toggle_play")]
async fn debug_toggle_play(session: web::Data<Session>) -> impl Responder {
    let playing = session.coordinator.toggle_play().await;
    HttpResponse::Ok().json(serde_json::json!({"status": "ok", "play_mode": playing}))
}

#[get("/api/debug/state")]
async fn debug_state(session: web::Data<Session>) -> impl Responder {
    let state = session.coordinator.debug_state().await;
    HttpResponse::Ok().json(serde_json::json!({
        "timeframe": state.timeframe,
        "cursor": state.cursor,
        "play_mode": state.play_mode,
        "speed": state.speed,
    }))
}

#[derive(Deserialize)]
struct GoToDateBody {
    target_date: String,
}

#[post("/api/chart/go_to_date")]
async fn go_to_date(session: web::Data<Session>, body: web::Json<GoToDateBody>) -> impl Responder {
    let Ok(naive) = chrono::NaiveDate::parse_from_str(&body.target_date, "%Y-%m-%d") else {
        return error_response(actix_web::http::StatusCode::BAD_REQUEST, "invalid date, expected YYYY-MM-DD");
    };
    let epoch = naive.and_hms_opt(0, 0, 0).expect("midnight is always a valid time").and_utc().timestamp();
    match session.coordinator.go_to_date(&session.broadcaster, epoch).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({"status": "ok", "target_date": body.target_date})),
        Err(e) => error_response(actix_web::http::StatusCode::BAD_REQUEST, e.to_string()),
    }
}

async fn ws_connect(req: HttpRequest, stream: web::Payload, session: web::Data<Session>) -> actix_web::Result<HttpResponse> {
    let actor = WsSession::new(session.into_inner());
    ws::start(actor, &req, stream)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(data_path = %config.data_path, port = config.port, "starting candle replay server");

    let session = web::Data::new(Session::new(&config));
    let port = config.port;

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .app_data(session.clone())
            .app_data(web::JsonConfig::default().limit(1_048_576))
            .service(health)
            .service(chart_data)
            .service(change_timeframe)
            .service(debug_skip)
            .service(debug_set_timeframe)
            .service(debug_set_speed)
            .service(debug_toggle_play)
            .service(debug_state)
            .service(go_to_date)
            .route("/ws", web::get().to(ws_connect))
            .service(Files::new("/", "./web").index_file("index.html"))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test as http_test;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.data_path = "./nonexistent-data-dir".to_string();
        config
    }

    #[actix_web::test]
    async fn health_endpoint_returns_ok() {
        let app = http_test::init_service(App::new().service(health)).await;
        let req = http_test::TestRequest::get().uri("/health").to_request();
        let resp = http_test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn change_timeframe_with_unknown_name_is_a_bad_request() {
        let session = web::Data::new(Session::new(&test_config()));
        let app = http_test::init_service(App::new().app_data(session.clone()).service(change_timeframe)).await;
        let req = http_test::TestRequest::post()
            .uri("/api/chart/change_timeframe")
            .set_json(serde_json::json!({"timeframe": "7m"}))
            .to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn go_to_date_with_malformed_date_is_a_bad_request() {
        let session = web::Data::new(Session::new(&test_config()));
        let app = http_test::init_service(App::new().app_data(session.clone()).service(go_to_date)).await;
        let req = http_test::TestRequest::post()
            .uri("/api/chart/go_to_date")
            .set_json(serde_json::json!({"target_date": "not-a-date"}))
            .to_request();
        let resp = http_test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn debug_state_reports_the_configured_default_timeframe() {
        let session = web::Data::new(Session::new(&test_config()));
        let app = http_test::init_service(App::new().app_data(session.clone()).service(debug_state)).await;
        let req = http_test::TestRequest::get().uri("/api/debug/state").to_request();
        let resp: serde_json::Value = http_test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp["timeframe"], "5m");
    }
}
