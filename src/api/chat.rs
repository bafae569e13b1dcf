use axum::Extension;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Uri, header};
use axum::response::Response;

use crate::AppState;
use crate::auth::AuthorizationKey;
use crate::error::AppError;
use crate::proxy::{ChatRequest, ForwardedResponse};
use crate::spend::SpendRecord;

/// POST /v1/chat/completions
///
/// Checks the caller's model allow-list, relays the request to one backend
/// of the requested model group and returns the upstream response
/// unchanged. Successful completions are billed asynchronously.
pub async fn chat_completions(
    State(state): State<AppState>,
    Extension(key): Extension<AuthorizationKey>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: ChatRequest = serde_json::from_slice(&body)?;
    let group = request.model.clone();

    if !key.permits(&group) {
        tracing::warn!(key_id = %key.id, group = %group, "Model group not permitted for key");
        return Err(AppError::Forbidden(format!(
            "Key is not permitted to use model group '{group}'"
        )));
    }

    tracing::info!(
        key_id = %key.id,
        user_id = %key.user_id,
        group = %group,
        stream = request.stream,
        messages = request.messages.len(),
        "Chat completion request"
    );

    let forwarded = state
        .forwarder
        .forward(&group, request, uri.path(), &headers)
        .await?;

    if forwarded.status.is_success() {
        record_spend(&state, &key, &forwarded).await;
    } else {
        tracing::info!(
            group = %group,
            backend = %forwarded.backend,
            status = forwarded.status.as_u16(),
            "Upstream returned an error status; not billed"
        );
    }

    Ok(into_response(forwarded))
}

async fn record_spend(state: &AppState, key: &AuthorizationKey, forwarded: &ForwardedResponse) {
    match SpendRecord::from_completion(&forwarded.body, key, &forwarded.model_group, &state.prices)
    {
        Ok(record) => {
            tracing::debug!(
                request_id = %record.request_id,
                spend = record.spend,
                total_tokens = record.total_tokens,
                "Submitting spend record"
            );
            state.spend_queue.submit(record).await;
        }
        Err(e) => {
            tracing::warn!(
                group = %forwarded.model_group,
                backend = %forwarded.backend,
                error = %e,
                "Could not bill completion"
            );
        }
    }
}

fn into_response(forwarded: ForwardedResponse) -> Response {
    let mut response = Response::new(Body::from(forwarded.body));
    *response.status_mut() = forwarded.status;
    *response.headers_mut() = forwarded.headers;
    response
        .headers_mut()
        .entry(header::CONTENT_TYPE)
        .or_insert(HeaderValue::from_static("application/json"));
    response
}
