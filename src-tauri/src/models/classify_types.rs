use serde::Serialize;

#[derive(Debug, Serialize, Clone)]
pub struct ModelStatus {
    pub downloaded: bool,
    pub downloading: bool,
    pub loading: bool,
    pub ready: bool,
    pub error: Option<String>,
}

/// One ranked class from the classifier.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct Prediction {
    pub class_index: usize,
    /// WordNet synset id when the label file carries one (e.g. `n02099601`)
    pub synset: Option<String>,
    /// Label exactly as stored in the label file, e.g. `golden_retriever`
    pub raw_label: String,
    /// Human readable label, e.g. `golden retriever`
    pub label: String,
    pub confidence: f32,
}

/// Top-K predictions ordered by descending confidence.
#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct PredictionSet {
    pub predictions: Vec<Prediction>,
}

impl PredictionSet {
    pub fn new(predictions: Vec<Prediction>) -> Self {
        Self { predictions }
    }

    pub fn top(&self) -> Option<&Prediction> {
        self.predictions.first()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.predictions.iter().map(|p| p.label.as_str()).collect()
    }

    /// Text of the "Top Predicted Objects" panel: one label per line.
    pub fn labels_text(&self) -> String {
        self.labels().join("\n")
    }

    pub fn len(&self) -> usize {
        self.predictions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.predictions.is_empty()
    }
}

/// Encyclopedia result for the top label.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Summary {
    Found { title: String, extract: String },
    NotFound { label: String },
}

impl Summary {
    pub fn exists(&self) -> bool {
        matches!(self, Summary::Found { .. })
    }

    pub fn display_text(&self) -> String {
        match self {
            Summary::Found { extract, .. } => extract.clone(),
            Summary::NotFound { label } => not_found_message(label),
        }
    }
}

pub fn not_found_message(label: &str) -> String {
    format!("No information found for {} on Wikipedia.", label)
}

/// Everything one classification run puts on screen. Emitted as a single
/// payload so both text panels always change together.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ClassificationReport {
    pub run_id: u64,
    pub image_path: String,
    pub predictions: PredictionSet,
    pub summary: Summary,
    pub predicted_objects_text: String,
    pub summary_text: String,
}

impl ClassificationReport {
    pub fn new(run_id: u64, image_path: String, predictions: PredictionSet, summary: Summary) -> Self {
        let predicted_objects_text = predictions.labels_text();
        let summary_text = summary.display_text();
        Self {
            run_id,
            image_path,
            predictions,
            summary,
            predicted_objects_text,
            summary_text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(idx: usize, label: &str, confidence: f32) -> Prediction {
        Prediction {
            class_index: idx,
            synset: None,
            raw_label: label.replace(' ', "_"),
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn test_labels_text_one_per_line() {
        let set = PredictionSet::new(vec![
            prediction(207, "golden retriever", 0.8),
            prediction(208, "Labrador retriever", 0.1),
            prediction(222, "kuvasz", 0.05),
        ]);
        assert_eq!(set.labels_text(), "golden retriever\nLabrador retriever\nkuvasz");
        assert_eq!(set.top().unwrap().class_index, 207);
    }

    #[test]
    fn test_not_found_text_contains_label() {
        let summary = Summary::NotFound {
            label: "carbonara".to_string(),
        };
        assert!(!summary.exists());
        assert_eq!(
            summary.display_text(),
            "No information found for carbonara on Wikipedia."
        );
    }

    #[test]
    fn test_report_texts_follow_contents() {
        let set = PredictionSet::new(vec![prediction(1, "goldfish", 0.9)]);
        let summary = Summary::Found {
            title: "Goldfish".to_string(),
            extract: "The goldfish is a freshwater fish.".to_string(),
        };
        let report = ClassificationReport::new(4, "/tmp/fish.png".to_string(), set, summary);
        assert_eq!(report.predicted_objects_text, "goldfish");
        assert_eq!(report.summary_text, "The goldfish is a freshwater fish.");
    }
}
