mod commands;
mod config;
mod error;
mod models;
mod services;

use config::AppConfig;
use services::classifier::model_manager::ModelManager;
use services::classifier::OnnxClassifier;
use services::knowledge::WikipediaClient;
use services::pipeline::PresentationController;
use services::speech::SystemSpeech;
use std::sync::Arc;
use tauri::{Emitter, Manager};
use tracing::{error, info, warn};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_window_state::Builder::default().build())
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir()?;
            std::fs::create_dir_all(&app_data_dir)?;

            let config = match app.path().app_config_dir() {
                Ok(dir) => AppConfig::load_from_dir(&dir).unwrap_or_else(|e| {
                    warn!("Ignoring unreadable settings: {}", e);
                    AppConfig::default()
                }),
                Err(e) => {
                    warn!("No config directory ({}), using defaults", e);
                    AppConfig::default()
                }
            };

            let model_manager = ModelManager::new(app_data_dir, config.model.clone());
            let knowledge = WikipediaClient::new(config.lookup.clone())?;
            let speech = SystemSpeech::new(config.speech.clone());

            let app_handle = app.handle().clone();
            let controller = PresentationController::new(
                Arc::new(OnnxClassifier::new(model_manager.clone())),
                Arc::new(knowledge),
                Arc::new(speech),
                config.top_k,
            )
            .on_commit(move |report| {
                if let Err(e) = app_handle.emit("classification-updated", report) {
                    warn!("Failed to publish classification: {}", e);
                }
            });

            app.manage(Arc::new(controller));
            app.manage(model_manager.clone());
            app.manage(config);

            // Fetch and warm the model in the background on first start
            let app_handle = app.handle().clone();
            tauri::async_runtime::spawn(async move {
                if !model_manager.is_downloaded() {
                    let _ = app_handle.emit("model-auto-download", serde_json::json!({
                        "status": "downloading"
                    }));
                    let progress_handle = app_handle.clone();
                    if let Err(e) = model_manager
                        .download_model(move |progress| {
                            let _ = progress_handle.emit("download-progress", progress);
                        })
                        .await
                    {
                        error!("Auto-download: Failed to download model: {}", e);
                        let _ = app_handle.emit("model-auto-download", serde_json::json!({
                            "status": "error",
                            "message": e.message
                        }));
                        return;
                    }
                }

                let _ = app_handle.emit("model-auto-download", serde_json::json!({
                    "status": "loading"
                }));
                if let Err(e) = model_manager.load_model().await {
                    error!("Auto-download: Failed to load model: {}", e);
                    let _ = app_handle.emit("model-auto-download", serde_json::json!({
                        "status": "error",
                        "message": e.message
                    }));
                    return;
                }

                info!("Model ready");
                let _ = app_handle.emit("model-auto-download", serde_json::json!({
                    "status": "ready"
                }));
            });

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            commands::image::select_image,
            commands::image::open_image,
            commands::image::load_assets,
            commands::classifier::speak,
            commands::classifier::cancel_pipeline,
            commands::classifier::get_session_state,
            commands::classifier::get_model_status,
            commands::classifier::download_model,
            commands::classifier::cancel_model_download,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
