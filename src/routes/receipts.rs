use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use std::str::FromStr;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::job::ProcessedReceipt;
use crate::models::upload::{
    Backend, BatchStatusResponse, BatchSummary, ErrorResponse, ReceiptImage, SubmitBatchResponse,
};
use crate::services::persistence::Destination;

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// POST /api/v1/receipts : Upload receipt images and start processing them.
///
/// Multipart fields: one or more `image` parts, `target_id`, `access_token` and an
/// optional `backend` (`sheets` or `notion`). Responds 202 with the freshly created
/// records; progress is read back from `GET /api/v1/receipts`. A new upload cancels
/// the batch still running from the previous one.
pub async fn submit_receipts(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitBatchResponse>), ApiError> {
    let mut images = Vec::new();
    let mut target_id: Option<String> = None;
    let mut access_token: Option<String> = None;
    let mut backend = Backend::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" | "images" => {
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("receipt-{}", images.len() + 1));
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;

                // Validate image format using the `image` crate
                let format = image::guess_format(&data).map_err(|_| {
                    api_error(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        format!("{file_name} is not a supported image"),
                    )
                })?;

                images.push(ReceiptImage::new(
                    file_name,
                    format.to_mime_type(),
                    data.to_vec(),
                ));
            }
            "target_id" => target_id = Some(read_text(field).await?),
            "access_token" => access_token = Some(read_text(field).await?),
            "backend" => {
                let value = read_text(field).await?;
                backend = Backend::from_str(value.trim()).map_err(|_| {
                    api_error(
                        StatusCode::BAD_REQUEST,
                        format!("Unknown backend: {value}"),
                    )
                })?;
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let destination = match (target_id, access_token) {
        (Some(target_id), Some(access_token)) => Some(Destination::new(target_id, access_token)),
        _ => None,
    };

    let batch = state
        .orchestrator
        .spawn_batch(images, destination, state.collaborators(backend))
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBatchResponse {
            batch_id: batch.id,
            receipts: batch.initial.to_vec(),
            message: format!("Processing {} receipt(s)", batch.initial.len()),
        }),
    ))
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, ApiError> {
    field
        .text()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))
}

/// GET /api/v1/receipts : Current state of the active batch.
pub async fn get_receipts(State(state): State<AppState>) -> Json<BatchStatusResponse> {
    let snapshot = state.store.snapshot();
    Json(BatchStatusResponse {
        summary: BatchSummary::from_records(&snapshot),
        receipts: snapshot.to_vec(),
    })
}

/// GET /api/v1/receipts/{id} : One receipt of the active batch.
pub async fn get_receipt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProcessedReceipt>, ApiError> {
    state
        .store
        .get(id)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("No receipt {id} in the active batch")))
}
