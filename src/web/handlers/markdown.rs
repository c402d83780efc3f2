use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::app::AppState;
use crate::core::error::{AppError, AppResult};

/// Upper bound on preview input, in bytes.
const MAX_PREVIEW_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub html: String,
}

pub async fn preview(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PreviewRequest>,
) -> AppResult<Json<PreviewResponse>> {
    if request.text.len() > MAX_PREVIEW_LEN {
        return Err(AppError::InvalidRequest(format!(
            "Text exceeds {} bytes",
            MAX_PREVIEW_LEN
        )));
    }

    Ok(Json(PreviewResponse {
        html: state.markdown.render(&request.text),
    }))
}
