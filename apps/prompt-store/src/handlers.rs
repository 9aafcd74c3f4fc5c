use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use relay_core::{CompleteInstruction, PendingInstruction, PutInstruction, PutReceipt};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::storage::{Storage, StorageError};

pub type SharedStorage = Arc<Storage>;

pub fn build_router(storage: SharedStorage) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/instruction",
            get(get_instruction)
                .put(put_instruction)
                .delete(delete_instruction),
        )
        .route("/prompt", post(put_instruction))
        .route("/current-prompt.json", get(get_instruction))
        .route("/api/mark-processed", post(delete_instruction))
        .with_state(storage)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(&'static str),
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal", msg),
        };
        (
            status,
            Json(ApiErrorBody {
                error,
                message: Some(message),
            }),
        )
            .into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::EmptyText => ApiError::BadRequest(err.to_string()),
            other => {
                error!(error = %other, "failed to store instruction");
                ApiError::Internal("failed to store instruction".into())
            }
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
    timestamp: u64,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        timestamp: epoch_millis(),
    })
}

pub async fn put_instruction(
    State(storage): State<SharedStorage>,
    payload: Result<Json<PutInstruction>, JsonRejection>,
) -> Result<Json<PutReceipt>, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let text = payload
        .text
        .ok_or_else(|| ApiError::BadRequest("text field is required".into()))?;
    let instruction = storage.put(text).await?;
    info!(issued_at = instruction.issued_at, "instruction received");
    Ok(Json(PutReceipt {
        success: true,
        text: instruction.text,
        issued_at: instruction.issued_at,
    }))
}

pub async fn get_instruction(
    State(storage): State<SharedStorage>,
) -> Result<Json<PendingInstruction>, ApiError> {
    storage
        .current()
        .map(Json)
        .ok_or(ApiError::NotFound("no instruction pending"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteResponse {
    success: bool,
    issued_at: u64,
}

/// The body is optional: an empty body removes whatever is pending.
pub async fn delete_instruction(
    State(storage): State<SharedStorage>,
    body: Bytes,
) -> Result<Json<CompleteResponse>, ApiError> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        CompleteInstruction::default()
    } else {
        serde_json::from_slice::<CompleteInstruction>(&body)
            .map_err(|err| ApiError::BadRequest(err.to_string()))?
    };
    let removed = storage
        .complete(request.timestamp)
        .await
        .ok_or(ApiError::NotFound("no matching instruction pending"))?;
    info!(issued_at = removed.issued_at, "instruction completed");
    Ok(Json(CompleteResponse {
        success: true,
        issued_at: removed.issued_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn app() -> Router {
        build_router(Arc::new(Storage::in_memory()))
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder().method(method).uri(uri);
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn put_then_get_then_delete() {
        let app = app();
        let response = app
            .clone()
            .oneshot(request(
                "PUT",
                "/instruction",
                Some(json!({ "text": "Transform this into a cyberpunk city" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let receipt = json_body(response).await;
        assert_eq!(receipt["success"], true);
        assert_eq!(receipt["text"], "Transform this into a cyberpunk city");
        let issued_at = receipt["issuedAt"].as_u64().unwrap();

        let response = app
            .clone()
            .oneshot(request("GET", "/instruction", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let pending = json_body(response).await;
        assert_eq!(pending["issuedAt"], issued_at);
        assert_eq!(pending["consumed"], false);

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                "/instruction",
                Some(json!({ "timestamp": issued_at })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/instruction", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "not_found");
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn missing_empty_or_malformed_text_is_rejected() {
        let app = app();
        for body in [json!({}), json!({ "text": "" }), json!({ "text": "   " })] {
            let response = app
                .clone()
                .oneshot(request("PUT", "/instruction", Some(body)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/instruction")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "bad_request");

        let response = app
            .oneshot(request("GET", "/instruction", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn stale_timestamp_does_not_delete_newer_instruction() {
        let app = app();
        let first = json_body(
            app.clone()
                .oneshot(request("PUT", "/instruction", Some(json!({ "text": "one" }))))
                .await
                .unwrap(),
        )
        .await;
        app.clone()
            .oneshot(request("PUT", "/instruction", Some(json!({ "text": "two" }))))
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "DELETE",
                "/instruction",
                Some(json!({ "timestamp": first["issuedAt"] })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let pending = json_body(
            app.oneshot(request("GET", "/instruction", None))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(pending["text"], "two");
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn delete_without_body_is_unconditional() {
        let app = app();
        let response = app
            .clone()
            .oneshot(request("DELETE", "/instruction", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        app.clone()
            .oneshot(request("PUT", "/instruction", Some(json!({ "text": "go" }))))
            .await
            .unwrap();
        let response = app
            .oneshot(request("DELETE", "/instruction", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn legacy_routes_map_onto_the_slot() {
        let app = app();
        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/prompt",
                Some(json!({ "text": "Make this look like an underwater world" })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/current-prompt.json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await["text"],
            "Make this look like an underwater world"
        );

        let response = app
            .clone()
            .oneshot(request("POST", "/api/mark-processed", Some(json!({}))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request("GET", "/current-prompt.json", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn health_reports_ok() {
        let response = app()
            .oneshot(request("GET", "/health", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].as_u64().unwrap() > 0);
    }
}
