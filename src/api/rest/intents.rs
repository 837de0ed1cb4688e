use axum::extract::{Path, State};
use axum::Json;

use crate::core::services::UnsubscribeOutcome;
use crate::error::AppError;
use crate::observability::correlation::RequestContext;
use crate::state::AppState;
use crate::types::PaymentIntent;

/// `GET /v1/intents/:id`
pub async fn handle_get(
    State(state): State<AppState>,
    context: RequestContext,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentIntent>, AppError> {
    let intent = state
        .core
        .get_intent(&intent_id)
        .await
        .map_err(|e| AppError::from(e).with_context(context))?;
    Ok(Json(intent))
}

/// `POST /v1/intents/:id/unsubscribe`; unknown intents succeed with
/// `existed: false`
pub async fn handle_unsubscribe(
    State(state): State<AppState>,
    context: RequestContext,
    Path(intent_id): Path<String>,
) -> Result<Json<UnsubscribeOutcome>, AppError> {
    let outcome = state
        .core
        .unsubscribe(&intent_id)
        .await
        .map_err(|e| AppError::from(e).with_context(context))?;
    Ok(Json(outcome))
}
