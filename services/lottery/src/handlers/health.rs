use axum::{extract::State, Json};
use redis::AsyncCommands;
use serde_json::{json, Value};

use crate::state::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<Value> {
    let store_healthy = state.engine.store.ping().await.is_ok();

    // Redis is optional; without it the component is reported as disabled
    let redis_status = match &state.redis {
        Some(conn) => {
            let mut conn = conn.clone();
            if conn.get::<_, Option<String>>("_health_check").await.is_ok() {
                "healthy"
            } else {
                "unhealthy"
            }
        }
        None => "disabled",
    };

    let active_round = match state.engine.rounds.get_active_round().await {
        Ok(Some(round)) => json!({
            "round_number": round.round_number,
            "draw_time": round.draw_time.to_rfc3339(),
            "total_bets": round.total_bets,
        }),
        _ => Value::Null,
    };

    let healthy = store_healthy && redis_status != "unhealthy";

    Json(json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "store": if store_healthy { "healthy" } else { "unhealthy" },
            "redis": redis_status,
        },
        "active_round": active_round,
    }))
}
