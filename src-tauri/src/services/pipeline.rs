//! Select / classify / look up / speak orchestration.
//!
//! The controller owns the only session state: the currently selected image,
//! the controller phase and the last committed report. Every user action
//! starts a new *run* tagged with a generation number; starting a run
//! supersedes the previous one, whose remaining stages are dropped (killing any
//! speech child process) and whose results are never committed.

use crate::error::AppError;
use crate::models::classify_types::{ClassificationReport, PredictionSet};
use crate::models::session_types::{ControllerPhase, SelectionOutcome, SessionSnapshot};
use crate::services::classifier::ImageClassifier;
use crate::services::image_loader::{self, THUMBNAIL_SIZE};
use crate::services::knowledge::KnowledgeSource;
use crate::services::speech::SpeechOutput;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct SessionState {
    selected_image: Option<PathBuf>,
    phase: ControllerPhase,
    last_report: Option<ClassificationReport>,
}

impl SessionState {
    /// Idle | ImageSelected | Classified -> ImageSelected
    ///
    /// The last committed report stays until a newer one replaces it, matching
    /// what the panels still show.
    fn select(&mut self, path: PathBuf) {
        self.selected_image = Some(path);
        self.phase = ControllerPhase::ImageSelected;
    }

    /// ImageSelected | Classified -> Classified
    fn commit(&mut self, report: ClassificationReport) {
        self.last_report = Some(report);
        self.phase = ControllerPhase::Classified;
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            selected_image: self
                .selected_image
                .as_ref()
                .map(|p| p.to_string_lossy().to_string()),
            last_report: self.last_report.clone(),
        }
    }
}

/// Handle on one in-flight run.
struct Run {
    id: u64,
    generation: watch::Receiver<u64>,
}

impl Run {
    fn is_current(&self) -> bool {
        *self.generation.borrow() == self.id
    }

    async fn superseded(&mut self) {
        loop {
            if *self.generation.borrow_and_update() != self.id {
                return;
            }
            if self.generation.changed().await.is_err() {
                // Controller dropped; nothing can supersede us any more.
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drives `stage` unless the run is superseded first.
    async fn stage<T, F>(&mut self, stage: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        tokio::select! {
            biased;
            _ = self.superseded() => Err(AppError::cancelled()),
            result = stage => result,
        }
    }
}

type CommitHook = Box<dyn Fn(&ClassificationReport) + Send + Sync>;

pub struct PresentationController {
    classifier: Arc<dyn ImageClassifier>,
    knowledge: Arc<dyn KnowledgeSource>,
    speech: Arc<dyn SpeechOutput>,
    top_k: usize,
    session: Mutex<SessionState>,
    generation: watch::Sender<u64>,
    on_commit: Option<CommitHook>,
}

impl PresentationController {
    pub fn new(
        classifier: Arc<dyn ImageClassifier>,
        knowledge: Arc<dyn KnowledgeSource>,
        speech: Arc<dyn SpeechOutput>,
        top_k: usize,
    ) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            classifier,
            knowledge,
            speech,
            top_k,
            session: Mutex::new(SessionState::default()),
            generation,
            on_commit: None,
        }
    }

    /// Called with every committed report, in commit order. This is the one
    /// place the UI learns about new predictions and summary text.
    pub fn on_commit(mut self, hook: impl Fn(&ClassificationReport) + Send + Sync + 'static) -> Self {
        self.on_commit = Some(Box::new(hook));
        self
    }

    fn session(&self) -> Result<MutexGuard<'_, SessionState>, AppError> {
        self.session
            .lock()
            .map_err(|_| AppError::from("Session state lock poisoned"))
    }

    /// Must be called with the session lock held so that run order and
    /// session mutations agree.
    fn begin_run(&self, _session: &MutexGuard<'_, SessionState>) -> Run {
        let mut id = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            id = *g;
        });
        Run {
            id,
            generation: self.generation.subscribe(),
        }
    }

    pub fn snapshot(&self) -> Result<SessionSnapshot, AppError> {
        Ok(self.session()?.snapshot())
    }

    /// Aborts whatever run is in flight. The session itself is left as is.
    pub fn cancel(&self) -> Result<(), AppError> {
        let session = self.session()?;
        let run = self.begin_run(&session);
        info!("Cancelled in-flight work (generation {})", run.id);
        Ok(())
    }

    /// Makes `path` the selected image, then classifies it and looks up the top label.
    ///
    /// Fails only if the file cannot be shown at all; a failed or superseded
    /// classification is logged and reported as `report: None`.
    pub async fn select_image(&self, path: PathBuf) -> Result<SelectionOutcome, AppError> {
        if !image_loader::is_supported_image(&path) {
            return Err(AppError::image(format!(
                "Unsupported image type: {}",
                path.display()
            )));
        }

        let thumb_path = path.clone();
        let thumbnail = tokio::task::spawn_blocking(move || {
            image_loader::thumbnail_data_url(&thumb_path, THUMBNAIL_SIZE)
        })
        .await??;

        let mut run = {
            let mut session = self.session()?;
            session.select(path.clone());
            self.begin_run(&session)
        };
        info!("Selected {} (run {})", path.display(), run.id);

        let report = match self.classify_and_lookup(&mut run, &path).await {
            Ok(report) => Some(report),
            Err(e) => {
                log_failure("Classification", &e);
                None
            }
        };

        Ok(SelectionOutcome {
            image_path: path.to_string_lossy().to_string(),
            thumbnail,
            report,
        })
    }

    /// Re-runs classification and lookup for the selected image, then speaks
    /// the summary followed by the label list. Returns `None` when no image
    /// has been selected yet.
    pub async fn speak(&self) -> Result<Option<ClassificationReport>, AppError> {
        let (mut run, path) = {
            let session = self.session()?;
            let Some(path) = session.selected_image.clone() else {
                debug!("Speak requested with no image selected");
                return Ok(None);
            };
            (self.begin_run(&session), path)
        };

        let report = self.classify_and_lookup(&mut run, &path).await?;

        let speech = self.speech.clone();
        run.stage(speech.speak(&report.summary_text)).await?;
        run.stage(speech.speak(&report.predicted_objects_text)).await?;

        Ok(Some(report))
    }

    async fn classify_and_lookup(&self, run: &mut Run, path: &Path) -> Result<ClassificationReport, AppError> {
        let classifier = self.classifier.clone();
        let top_k = self.top_k;
        let image = path.to_path_buf();
        let predictions: PredictionSet = run
            .stage(async move {
                tokio::task::spawn_blocking(move || classifier.classify(&image, top_k)).await?
            })
            .await?;

        let top_label = predictions
            .top()
            .map(|p| p.label.clone())
            .ok_or_else(|| AppError::model("Classifier returned no predictions"))?;

        let knowledge = self.knowledge.clone();
        let summary = run.stage(knowledge.lookup(&top_label)).await?;

        let report = ClassificationReport::new(
            run.id,
            path.to_string_lossy().to_string(),
            predictions,
            summary,
        );
        self.commit(run, report.clone())?;
        Ok(report)
    }

    /// Publishes `report` if `run` is still the latest one for the selected image.
    fn commit(&self, run: &Run, report: ClassificationReport) -> Result<(), AppError> {
        let mut session = self.session()?;
        if !run.is_current() {
            return Err(AppError::cancelled());
        }
        debug!("Run {} committed: {:?}", run.id, report.predictions.labels());
        if let Some(hook) = &self.on_commit {
            hook(&report);
        }
        session.commit(report);
        Ok(())
    }
}

/// Failures are logged and swallowed; the UI keeps whatever it showed last.
pub fn log_failure(action: &str, err: &AppError) {
    if err.is_cancelled() {
        info!("{} superseded by a newer request", action);
    } else {
        error!("{} failed: {}", action, err);
    }
}
