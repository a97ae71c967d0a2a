use std::path::Path;

use axum::Json;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use rand::Rng;
use rand::distributions::Alphanumeric;
use upq_core::{FILE_FIELD, UploadReceipt};

use crate::SharedState;
use crate::error::AppError;

/// Partially written uploads live here until they are complete.
const STAGING_DIR: &str = ".incoming";

pub async fn list_files(State(state): State<SharedState>) -> Result<Json<Vec<String>>, AppError> {
    let dir = &state.config.upload_dir;
    ensure_dir(dir).await.map_err(|err| {
        AppError::internal(
            "Upload directory does not exist and could not be created.",
            err,
        )
    })?;

    let files = read_file_names(dir)
        .await
        .map_err(|err| AppError::internal("Could not read directory contents.", err))?;
    Ok(Json(files))
}

pub async fn upload_file(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadReceipt>, AppError> {
    let dir = &state.config.upload_dir;
    ensure_dir(dir)
        .await
        .map_err(|err| AppError::internal("Failed to create upload directory.", err))?;

    let Ok(mut multipart) = multipart else {
        return Err(no_file());
    };

    let mut upload = None;
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let content = field.bytes().await.map_err(upload_error)?;
        upload = Some((name, content));
        break;
    }
    let Some((name, content)) = upload else {
        return Err(no_file());
    };

    if !is_valid_file_name(&name) {
        tracing::warn!(filename = %name, "rejected upload with invalid file name");
        return Err(AppError::BadRequest("Invalid file name.".to_string()));
    }

    store_file(dir, &name, &content)
        .await
        .map_err(|err| AppError::internal("Failed to move uploaded file.", err))?;
    tracing::info!(filename = %name, bytes = content.len(), "file uploaded");

    Ok(Json(UploadReceipt {
        success: true,
        message: Some("File uploaded successfully.".to_string()),
        filename: Some(name),
    }))
}

pub async fn method_not_allowed() -> AppError {
    AppError::MethodNotAllowed
}

pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty() && !name.contains("..") && !name.contains('/') && !name.contains('\\')
}

fn no_file() -> AppError {
    AppError::BadRequest("No file provided in the request.".to_string())
}

fn upload_error(err: MultipartError) -> AppError {
    let reason = if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        "the file exceeds the maximum upload size".to_string()
    } else {
        err.body_text()
    };
    AppError::BadRequest(format!("File upload error: {reason}"))
}

async fn ensure_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await
}

async fn read_file_names(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

async fn store_file(dir: &Path, name: &str, content: &[u8]) -> std::io::Result<()> {
    let staging = dir.join(STAGING_DIR);
    tokio::fs::create_dir_all(&staging).await?;
    let partial = staging.join(format!("{}.partial", random_suffix()));
    if let Err(err) = write_then_rename(&partial, &dir.join(name), content).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(err);
    }
    Ok(())
}

async fn write_then_rename(partial: &Path, target: &Path, content: &[u8]) -> std::io::Result<()> {
    tokio::fs::write(partial, content).await?;
    tokio::fs::rename(partial, target).await
}

fn random_suffix() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}
