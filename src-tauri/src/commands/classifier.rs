use crate::error::AppError;
use crate::models::classify_types::{ClassificationReport, ModelStatus};
use crate::models::session_types::SessionSnapshot;
use crate::services::classifier::model_manager::ModelManager;
use crate::services::pipeline::{log_failure, PresentationController};
use std::sync::Arc;
use tauri::{AppHandle, Emitter, State};

#[tauri::command]
pub async fn get_model_status(model_manager: State<'_, ModelManager>) -> Result<ModelStatus, AppError> {
    Ok(ModelStatus {
        downloaded: model_manager.is_downloaded(),
        downloading: model_manager.is_downloading(),
        loading: model_manager.is_loading(),
        ready: model_manager.is_ready(),
        error: model_manager.get_error(),
    })
}

#[tauri::command]
pub async fn download_model(app: AppHandle, model_manager: State<'_, ModelManager>) -> Result<(), AppError> {
    model_manager
        .download_model(|progress| {
            let _ = app.emit("download-progress", progress);
        })
        .await?;
    model_manager.load_model().await
}

#[tauri::command]
pub fn cancel_model_download(model_manager: State<'_, ModelManager>) {
    model_manager.cancel_download();
}

/// "Speak": reclassify the selected image, then read the summary and labels aloud.
/// Failures are logged and leave the panels as they were.
#[tauri::command]
pub async fn speak(
    controller: State<'_, Arc<PresentationController>>,
) -> Result<Option<ClassificationReport>, AppError> {
    match controller.speak().await {
        Ok(report) => Ok(report),
        Err(e) => {
            log_failure("Speak", &e);
            Ok(None)
        }
    }
}

#[tauri::command]
pub fn cancel_pipeline(controller: State<'_, Arc<PresentationController>>) -> Result<(), AppError> {
    controller.cancel()
}

#[tauri::command]
pub fn get_session_state(
    controller: State<'_, Arc<PresentationController>>,
) -> Result<SessionSnapshot, AppError> {
    controller.snapshot()
}
