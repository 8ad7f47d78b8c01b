use crate::error::AppError;
use crate::services::classifier::labels::LabelMap;
use crate::services::image_loader::InputSpec;
use futures::{Stream, StreamExt};
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

const MOBILENET_V2_URL: &str =
    "https://github.com/onnx/models/raw/main/validated/vision/classification/mobilenet/model/mobilenetv2-12.onnx";
const IMAGENET_CLASS_INDEX_URL: &str =
    "https://storage.googleapis.com/download.tensorflow.org/data/imagenet_class_index.json";

pub type OnnxModel = Session;

/// When the network weights are read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    /// Load once and keep the session for the life of the app
    Cached,
    /// Build a fresh session for every classification
    PerRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(default = "default_labels_url")]
    pub labels_url: String,
    #[serde(default = "default_model_file")]
    pub model_file: String,
    #[serde(default = "default_labels_file")]
    pub labels_file: String,
    #[serde(default)]
    pub input: InputSpec,
    #[serde(default = "default_load_policy")]
    pub load_policy: LoadPolicy,
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,
}

fn default_model_url() -> String {
    MOBILENET_V2_URL.to_string()
}
fn default_labels_url() -> String {
    IMAGENET_CLASS_INDEX_URL.to_string()
}
fn default_model_file() -> String {
    "mobilenetv2-12.onnx".to_string()
}
fn default_labels_file() -> String {
    "imagenet_class_index.json".to_string()
}
fn default_load_policy() -> LoadPolicy {
    LoadPolicy::Cached
}
fn default_intra_threads() -> usize {
    4
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_url: default_model_url(),
            labels_url: default_labels_url(),
            model_file: default_model_file(),
            labels_file: default_labels_file(),
            input: InputSpec::default(),
            load_policy: default_load_policy(),
            intra_threads: default_intra_threads(),
        }
    }
}

#[derive(Clone)]
pub struct ModelManager {
    pub model_dir: PathBuf,
    config: ModelConfig,
    labels: Arc<Mutex<Option<Arc<LabelMap>>>>,
    model: Arc<Mutex<Option<OnnxModel>>>,
    loading: Arc<AtomicBool>,
    downloading: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    cancel_flag: Arc<AtomicBool>,
}

impl ModelManager {
    pub fn new(app_data_dir: PathBuf, config: ModelConfig) -> Self {
        Self {
            model_dir: app_data_dir.join("models"),
            config,
            labels: Arc::new(Mutex::new(None)),
            model: Arc::new(Mutex::new(None)),
            loading: Arc::new(AtomicBool::new(false)),
            downloading: Arc::new(AtomicBool::new(false)),
            error: Arc::new(Mutex::new(None)),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.config.model_file)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.model_dir.join(&self.config.labels_file)
    }

    pub fn is_downloaded(&self) -> bool {
        self.model_path().exists() && self.labels_path().exists()
    }

    /// A session is resident. Always false under `LoadPolicy::PerRequest`.
    pub fn is_ready(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Relaxed)
    }

    pub fn is_downloading(&self) -> bool {
        self.downloading.load(Ordering::Relaxed)
    }

    pub fn get_error(&self) -> Option<String> {
        self.error.lock().ok().and_then(|e| e.clone())
    }

    fn set_error(&self, message: Option<String>) {
        if let Ok(mut error) = self.error.lock() {
            *error = message;
        }
    }

    pub fn cancel_download(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    /// Fetches whichever of the model and label files is missing. Only one
    /// download runs at a time; a second caller gets an error.
    pub async fn download_model<F>(&self, on_progress: F) -> Result<(), AppError>
    where
        F: Fn(u64) + Send + Sync,
    {
        if self.is_downloaded() {
            return Ok(());
        }
        if self.downloading.swap(true, Ordering::SeqCst) {
            return Err(AppError::model("Model is already downloading"));
        }

        let result = self.download_missing(&on_progress).await;
        self.downloading.store(false, Ordering::SeqCst);
        if let Err(ref e) = result {
            if !e.is_cancelled() {
                self.set_error(Some(e.message.clone()));
            }
        }
        result
    }

    async fn download_missing(&self, on_progress: &(dyn Fn(u64) + Send + Sync)) -> Result<(), AppError> {
        self.set_error(None);
        tokio::fs::create_dir_all(&self.model_dir).await.map_err(|e| {
            AppError::model(format!("Failed to create model directory: {}", e))
        })?;

        self.cancel_flag.store(false, Ordering::Relaxed);

        let labels_path = self.labels_path();
        if !labels_path.exists() {
            download_file(&self.config.labels_url, &labels_path, &self.cancel_flag, &|_: u64| {}).await?;
        }

        let model_path = self.model_path();
        if !model_path.exists() {
            download_file(&self.config.model_url, &model_path, &self.cancel_flag, on_progress).await?;
        }

        info!("Model files ready in {}", self.model_dir.display());
        Ok(())
    }

    /// Warms the cache so the first classification does not pay for session creation.
    pub async fn load_model(&self) -> Result<(), AppError> {
        if self.config.load_policy == LoadPolicy::PerRequest || self.is_ready() {
            return Ok(());
        }
        if self.loading.swap(true, Ordering::SeqCst) {
            return Err(AppError::model("Model is already loading"));
        }
        self.set_error(None);

        let manager = self.clone();
        let result = tokio::task::spawn_blocking(move || -> Result<(), AppError> {
            manager.labels()?;
            let session = manager.build_session()?;
            let mut guard = manager
                .model
                .lock()
                .map_err(|_| AppError::model("Model lock poisoned"))?;
            *guard = Some(session);
            Ok(())
        })
        .await
        .map_err(AppError::from)
        .and_then(|r| r);

        self.loading.store(false, Ordering::SeqCst);
        if let Err(ref e) = result {
            self.set_error(Some(e.message.clone()));
        }
        result
    }

    /// Label table, read from disk once.
    pub fn labels(&self) -> Result<Arc<LabelMap>, AppError> {
        let mut guard = self
            .labels
            .lock()
            .map_err(|_| AppError::model("Label lock poisoned"))?;
        if let Some(labels) = guard.as_ref() {
            return Ok(labels.clone());
        }

        let labels = Arc::new(read_labels(&self.labels_path())?);
        debug!("Loaded {} class labels", labels.len());
        *guard = Some(labels.clone());
        Ok(labels)
    }

    /// Runs `f` against a session chosen by the configured `LoadPolicy`.
    pub fn with_model<R>(
        &self,
        f: impl FnOnce(&mut OnnxModel, &LabelMap) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let labels = self.labels()?;

        match self.config.load_policy {
            LoadPolicy::PerRequest => {
                let mut session = self.build_session()?;
                f(&mut session, &labels)
            }
            LoadPolicy::Cached => {
                let mut guard = self
                    .model
                    .lock()
                    .map_err(|_| AppError::model("Model lock poisoned"))?;
                if guard.is_none() {
                    *guard = Some(self.build_session()?);
                }
                let session = guard
                    .as_mut()
                    .ok_or_else(|| AppError::model("Model not loaded"))?;
                f(session, &labels)
            }
        }
    }

    fn build_session(&self) -> Result<OnnxModel, AppError> {
        let model_path = self.model_path();
        if !model_path.exists() {
            return Err(AppError::model(format!(
                "Model not downloaded: {} is missing",
                model_path.display()
            )));
        }

        let start = Instant::now();
        let _ = ort::init().with_name("object-lens").commit();

        let session = Session::builder()
            .map_err(|e| AppError::model(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
            .map_err(|e| AppError::model(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(self.config.intra_threads)
            .map_err(|e| AppError::model(format!("Failed to set intra threads: {}", e)))?
            .with_execution_providers([
                ort::execution_providers::CPUExecutionProvider::default().build(),
            ])
            .map_err(|e| AppError::model(format!("Failed to register CPU execution provider: {}", e)))?
            .commit_from_file(&model_path)
            .map_err(|e| AppError::model(format!("Failed to load ONNX model: {}", e)))?;

        debug!(
            "Built ONNX session from {} in {:.0} ms",
            model_path.display(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(session)
    }
}

fn read_labels(path: &Path) -> Result<LabelMap, AppError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        AppError::model(format!("Failed to read label file {}: {}", path.display(), e))
    })?;
    LabelMap::from_json(&content)
}

/// Streams `url` into `dest`, going through a `.part` file so an interrupted
/// download never looks complete.
async fn download_file(
    url: &str,
    dest: &Path,
    cancel_flag: &AtomicBool,
    on_progress: &(dyn Fn(u64) + Send + Sync),
) -> Result<(), AppError> {
    info!("Downloading {}", url);
    let client = reqwest::Client::new();
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(AppError::model(format!(
            "Failed to download {}: HTTP {}",
            url,
            response.status()
        )));
    }

    let total_size = response.content_length().unwrap_or(0);
    let result = save_stream(response.bytes_stream(), dest, total_size, cancel_flag, on_progress).await;
    if let Err(ref e) = result {
        if e.is_cancelled() {
            warn!("Download of {} cancelled", url);
        }
    }
    result
}

fn part_path(dest: &Path) -> PathBuf {
    let mut part = dest.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// Writes `stream` to `<dest>.part` and renames it into place. The part file
/// is removed on any failure, cancellation included.
async fn save_stream<S, B, E>(
    stream: S,
    dest: &Path,
    total_size: u64,
    cancel_flag: &AtomicBool,
    on_progress: &(dyn Fn(u64) + Send + Sync),
) -> Result<(), AppError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    AppError: From<E>,
{
    let part_path = part_path(dest);
    let result = write_part(stream, &part_path, total_size, cancel_flag, on_progress).await;
    let result = match result {
        Ok(()) => tokio::fs::rename(&part_path, dest).await.map_err(AppError::from),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            on_progress(100);
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part_path).await;
            Err(e)
        }
    }
}

async fn write_part<S, B, E>(
    stream: S,
    part_path: &Path,
    total_size: u64,
    cancel_flag: &AtomicBool,
    on_progress: &(dyn Fn(u64) + Send + Sync),
) -> Result<(), AppError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    AppError: From<E>,
{
    let mut file = tokio::fs::File::create(part_path).await.map_err(|e| {
        AppError::model(format!("Failed to create file {}: {}", part_path.display(), e))
    })?;

    let mut stream = std::pin::pin!(stream);
    let mut downloaded: u64 = 0;
    let mut last_emit = 0;

    while let Some(chunk) = stream.next().await {
        if cancel_flag.load(Ordering::Relaxed) {
            return Err(AppError::cancelled());
        }

        let chunk = chunk?;
        let bytes = chunk.as_ref();
        downloaded += bytes.len() as u64;
        tokio::io::AsyncWriteExt::write_all(&mut file, bytes)
            .await
            .map_err(|e| AppError::model(format!("Failed to write to file: {}", e)))?;

        if total_size > 0 {
            let progress = (downloaded * 100) / total_size;
            if progress > last_emit {
                on_progress(progress);
                last_emit = progress;
            }
        }
    }
    tokio::io::AsyncWriteExt::flush(&mut file).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_in(dir: &Path, policy: LoadPolicy) -> ModelManager {
        let config = ModelConfig {
            load_policy: policy,
            ..ModelConfig::default()
        };
        ModelManager::new(dir.to_path_buf(), config)
    }

    #[test]
    fn test_fresh_manager_status() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::Cached);
        assert!(!manager.is_downloaded());
        assert!(!manager.is_ready());
        assert!(!manager.is_loading());
        assert!(manager.get_error().is_none());
        assert_eq!(manager.model_path(), dir.path().join("models").join("mobilenetv2-12.onnx"));
    }

    #[test]
    fn test_missing_model_is_reported_not_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::PerRequest);
        std::fs::create_dir_all(&manager.model_dir).unwrap();
        std::fs::write(manager.labels_path(), r#"{"0": ["n01440764", "tench"]}"#).unwrap();

        let err = manager.with_model(|_, _| Ok(())).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Model);
        assert!(err.message.contains("not downloaded"));
    }

    #[test]
    fn test_labels_read_once_and_shared() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::Cached);
        std::fs::create_dir_all(&manager.model_dir).unwrap();
        std::fs::write(manager.labels_path(), r#"{"0": ["n01440764", "tench"]}"#).unwrap();

        let first = manager.labels().unwrap();
        std::fs::remove_file(manager.labels_path()).unwrap();
        let second = manager.labels().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_per_request_policy_never_warms() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::PerRequest);
        manager.load_model().await.unwrap();
        assert!(!manager.is_ready());
    }

    fn chunks(parts: Vec<Result<Vec<u8>, AppError>>) -> impl Stream<Item = Result<Vec<u8>, AppError>> {
        futures::stream::iter(parts)
    }

    #[tokio::test]
    async fn test_concurrent_download_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::Cached);
        manager.downloading.store(true, Ordering::SeqCst);

        let err = manager.download_model(|_| {}).await.unwrap_err();
        assert!(err.message.contains("already downloading"));
        assert!(manager.is_downloading());
        assert!(!manager.model_dir.exists());
    }

    #[tokio::test]
    async fn test_failed_download_is_reported_and_retryable() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelConfig {
            model_url: "http://127.0.0.1:9/mobilenetv2-12.onnx".to_string(),
            labels_url: "http://127.0.0.1:9/imagenet_class_index.json".to_string(),
            ..ModelConfig::default()
        };
        let manager = ModelManager::new(dir.path().to_path_buf(), config);

        assert!(manager.download_model(|_| {}).await.is_err());
        assert!(manager.get_error().is_some());
        assert!(!manager.is_downloading());
        assert!(!manager.is_downloaded());
        assert!(!part_path(&manager.labels_path()).exists());

        // The guard was released, so a retry reaches the network again.
        let retry = manager.download_model(|_| {}).await.unwrap_err();
        assert!(!retry.message.contains("already downloading"));
    }

    #[tokio::test]
    async fn test_saved_stream_lands_at_destination() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.onnx");
        let progress = Mutex::new(Vec::new());
        let cancel = AtomicBool::new(false);

        save_stream(
            chunks(vec![Ok(vec![1, 2]), Ok(vec![3, 4])]),
            &dest,
            4,
            &cancel,
            &|p: u64| progress.lock().unwrap().push(p),
        )
        .await
        .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), vec![1, 2, 3, 4]);
        assert!(!part_path(&dest).exists());
        assert_eq!(*progress.lock().unwrap(), vec![50, 100, 100]);
    }

    #[tokio::test]
    async fn test_stream_error_removes_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.onnx");
        let cancel = AtomicBool::new(false);

        let err = save_stream(
            chunks(vec![Ok(vec![1, 2]), Err(AppError::lookup("connection reset"))]),
            &dest,
            0,
            &cancel,
            &|_: u64| {},
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind, crate::error::ErrorKind::Lookup);
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_cancelled_stream_removes_part_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.onnx");
        let cancel = AtomicBool::new(true);

        let err = save_stream(chunks(vec![Ok(vec![1])]), &dest, 1, &cancel, &|_: u64| {})
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn test_failed_warm_up_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path(), LoadPolicy::Cached);
        assert!(manager.load_model().await.is_err());
        assert!(manager.get_error().is_some());
        assert!(!manager.is_loading());
    }
}
