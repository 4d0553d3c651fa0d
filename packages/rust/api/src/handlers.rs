use std::path::PathBuf;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use kbforge_core::Upload;
use kbforge_shared::{DocumentKind, MergeMode, TaskId, TaskRecord, TaskStatus, resolve_api_key};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::AppState;
use crate::error::ApiError;
use crate::upload::{secure_filename, stage};

/// Characters returned by `/api/preview`.
pub(crate) const PREVIEW_CHARS: usize = 10_000;

const DOWNLOAD_NAME: &str = "knowledge_base.md";

type ApiResult<T> = std::result::Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

#[derive(Default)]
struct UploadForm {
    file: Option<(String, Vec<u8>)>,
    mode: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let filename = field.file_name().unwrap_or_default().to_string();
                    let bytes = field.bytes().await.map_err(multipart_error)?;
                    form.file = Some((filename, bytes.to_vec()));
                }
                "mode" => form.mode = Some(field.text().await.map_err(multipart_error)?),
                "model" => form.model = Some(field.text().await.map_err(multipart_error)?),
                "api_key" => form.api_key = Some(field.text().await.map_err(multipart_error)?),
                other => warn!(field = other, "ignoring unknown upload field"),
            }
        }
        Ok(form)
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::new(err.status(), err.body_text())
}

#[derive(Serialize)]
pub(crate) struct UploadResponse {
    success: bool,
    task_id: TaskId,
    message: &'static str,
}

#[instrument(skip_all)]
pub(crate) async fn upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    let form = UploadForm::read(multipart).await?;

    let header_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty());
    let credential = resolve_api_key(header_key.or(form.api_key.as_deref()), &state.gemini)
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "missing API key"))?;

    let (original_name, bytes) = form
        .file
        .ok_or_else(|| ApiError::bad_request("no file uploaded"))?;
    if original_name.trim().is_empty() {
        return Err(ApiError::bad_request("empty file name"));
    }
    DocumentKind::require(&original_name)?;

    let mode: MergeMode = match form.mode.as_deref().map(str::trim) {
        None | Some("") => MergeMode::default(),
        Some(raw) => raw.parse()?,
    };
    let model = match form.model.as_deref().map(str::trim) {
        None | Some("") => state.gemini.default_model.clone(),
        Some(raw) if state.gemini.is_allowed_model(raw) => raw.to_string(),
        Some(raw) => {
            return Err(ApiError::bad_request(format!(
                "invalid model '{raw}' (expected one of: {})",
                state.gemini.allowed_models.join(", ")
            )));
        }
    };

    let filename = secure_filename(&original_name);
    let file_path = stage(&state.upload_dir, &filename, &bytes).await?;
    info!(%filename, bytes = bytes.len(), %mode, %model, "upload staged");

    let upload = Upload {
        file_path: file_path.clone(),
        filename,
        mode,
        credential,
        model,
    };
    let (task_id, _handle) = match state.processor.enqueue(upload).await {
        Ok(queued) => queued,
        Err(e) => {
            // Nothing was queued, so no job will clean up the staged copy.
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(e.into());
        }
    };

    Ok(Json(UploadResponse {
        success: true,
        task_id,
        message: "File uploaded, processing started",
    }))
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

async fn find_task(state: &AppState, raw_id: &str) -> ApiResult<TaskRecord> {
    let not_found = || ApiError::not_found("task not found");
    let id: TaskId = raw_id.parse().map_err(|_| not_found())?;
    state.processor.store().get(&id).await?.ok_or_else(not_found)
}

pub(crate) async fn status(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<TaskRecord>> {
    Ok(Json(find_task(&state, &task_id).await?))
}

#[derive(Serialize)]
struct TaskSummary {
    task_id: TaskId,
    filename: String,
    status: TaskStatus,
    created_at: chrono::DateTime<chrono::Utc>,
}

pub(crate) async fn tasks(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let mut records = state.processor.store().list().await?;
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let tasks: Vec<TaskSummary> = records
        .into_iter()
        .map(|r| TaskSummary {
            task_id: r.task_id,
            filename: r.filename,
            status: r.status,
            created_at: r.created_at,
        })
        .collect();
    Ok(Json(json!({ "tasks": tasks })))
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Output path of a completed task, or the error the result routes answer with.
async fn completed_output(state: &AppState, raw_id: &str) -> ApiResult<PathBuf> {
    let record = find_task(state, raw_id).await?;
    if record.status != TaskStatus::Completed {
        return Err(ApiError::bad_request(format!(
            "task is not completed (status: {})",
            record.status
        )));
    }
    record
        .output_file
        .ok_or_else(|| ApiError::not_found("output file not found"))
}

async fn read_output(path: &std::path::Path) -> ApiResult<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::not_found("output file not found"))
        }
        Err(e) => Err(kbforge_shared::KbForgeError::io(path, e).into()),
    }
}

pub(crate) async fn download(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Response> {
    let path = completed_output(&state, &task_id).await?;
    let content = read_output(&path).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
            ),
        ],
        content,
    )
        .into_response())
}

pub(crate) async fn preview(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let path = completed_output(&state, &task_id).await?;
    let content = read_output(&path).await?;

    let truncated = content.chars().count() > PREVIEW_CHARS;
    let content: String = content.chars().take(PREVIEW_CHARS).collect();
    Ok(Json(json!({ "content": content, "truncated": truncated })))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "task_store": state.processor.store().backend_name(),
    }))
}

pub(crate) async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "kbforge",
        "release_date": crate::RELEASE_DATE,
    }))
}
