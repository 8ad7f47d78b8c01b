use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::session_types::{SelectionOutcome, StartupAssets};
use crate::services::image_loader::{self, IMAGE_EXTENSIONS};
use crate::services::pipeline::{log_failure, PresentationController};
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, State};
use tauri_plugin_dialog::DialogExt;
use tokio::sync::oneshot;
use tracing::debug;

/// "Select an Image": native picker, then display + classification.
/// Resolves to `None` when the dialog is dismissed or the file cannot be used.
#[tauri::command]
pub async fn select_image(
    app: AppHandle,
    controller: State<'_, Arc<PresentationController>>,
) -> Result<Option<SelectionOutcome>, AppError> {
    let (tx, rx) = oneshot::channel();
    app.dialog()
        .file()
        .set_title("Select an Image")
        .add_filter("Image files", IMAGE_EXTENSIONS)
        .pick_file(move |file_path| {
            let _ = tx.send(file_path);
        });

    let picked = rx
        .await
        .map_err(|_| AppError::from("File dialog closed unexpectedly"))?;
    let Some(picked) = picked else {
        debug!("Image selection cancelled");
        return Ok(None);
    };

    let path = match picked.into_path() {
        Ok(path) => path,
        Err(e) => {
            log_failure("Image selection", &AppError::from(e.to_string()));
            return Ok(None);
        }
    };

    Ok(select(&controller, path).await)
}

/// Same as `select_image` for a path the front end already has (drag and drop).
#[tauri::command]
pub async fn open_image(
    controller: State<'_, Arc<PresentationController>>,
    path: String,
) -> Result<Option<SelectionOutcome>, AppError> {
    Ok(select(&controller, PathBuf::from(path)).await)
}

async fn select(controller: &PresentationController, path: PathBuf) -> Option<SelectionOutcome> {
    match controller.select_image(path).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            log_failure("Image selection", &e);
            None
        }
    }
}

/// Background and logo artwork; either may be absent.
#[tauri::command]
pub fn load_assets(config: State<'_, AppConfig>) -> StartupAssets {
    let assets = &config.assets;
    StartupAssets {
        background: image_loader::load_asset(&assets.dir, &assets.background),
        logo: image_loader::load_asset(&assets.dir, &assets.logo),
    }
}
