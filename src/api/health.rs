use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub message: &'static str,
}

/// GET /ping
///
/// Liveness probe. No authentication required.
pub async fn ping() -> Json<PingResponse> {
    Json(PingResponse { message: "pong" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ping() {
        let Json(resp) = ping().await;
        assert_eq!(resp.message, "pong");
    }
}
