use axum::extract::State;
use axum::Json;

use crate::core::operations::{IntakeResponse, PaymentRequest};
use crate::error::AppError;
use crate::observability::correlation::RequestContext;
use crate::state::AppState;

/// `POST /v1/payments`
pub async fn handle_rest(
    State(state): State<AppState>,
    context: RequestContext,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<IntakeResponse>, AppError> {
    let response = state
        .core
        .process_payment(req, context.clone())
        .await
        .map_err(|e| AppError::from(e).with_context(context))?;
    Ok(Json(response))
}
