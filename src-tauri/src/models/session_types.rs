use crate::models::classify_types::ClassificationReport;
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    #[default]
    Idle,
    ImageSelected,
    Classified,
}

/// Snapshot of the controller handed to the front end.
#[derive(Debug, Serialize, Clone)]
pub struct SessionSnapshot {
    pub phase: ControllerPhase,
    pub selected_image: Option<String>,
    /// What the panels currently show. After a failed classification this
    /// still belongs to an earlier image; compare `image_path` with `selected_image`.
    pub last_report: Option<ClassificationReport>,
}

/// Result of picking an image: the thumbnail is always present, the report is
/// absent when classification or lookup failed or was superseded.
#[derive(Debug, Serialize, Clone)]
pub struct SelectionOutcome {
    pub image_path: String,
    pub thumbnail: String,
    pub report: Option<ClassificationReport>,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct StartupAssets {
    pub background: Option<String>,
    pub logo: Option<String>,
}
