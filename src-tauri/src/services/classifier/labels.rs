use crate::error::AppError;
use serde_json::Value;

/// One entry of the class index table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabel {
    pub synset: Option<String>,
    pub name: String,
}

/// Class index -> label table.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    labels: Vec<ClassLabel>,
}

impl LabelMap {
    /// Accepts either the Keras `imagenet_class_index.json` layout
    /// (`{"0": ["n01440764", "tench"], ...}`) or a Hugging Face config with an
    /// `id2label` object (`{"id2label": {"0": "tench"}}`).
    pub fn from_json(content: &str) -> Result<Self, AppError> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| AppError::model(format!("Failed to parse label JSON: {}", e)))?;

        let table = match root.get("id2label") {
            Some(id2label) => id2label,
            None => &root,
        };
        let table = table
            .as_object()
            .ok_or_else(|| AppError::model("Label file is not a JSON object"))?;

        let mut entries: Vec<(usize, ClassLabel)> = Vec::with_capacity(table.len());
        for (key, value) in table {
            let idx = key
                .parse::<usize>()
                .map_err(|_| AppError::model(format!("Invalid class index '{}'", key)))?;
            let label = match value {
                Value::String(name) => ClassLabel {
                    synset: None,
                    name: name.clone(),
                },
                Value::Array(parts) => match parts.as_slice() {
                    [Value::String(synset), Value::String(name)] => ClassLabel {
                        synset: Some(synset.clone()),
                        name: name.clone(),
                    },
                    _ => {
                        return Err(AppError::model(format!(
                            "Class {} should be [synset, name]",
                            idx
                        )))
                    }
                },
                _ => {
                    return Err(AppError::model(format!(
                        "Unsupported label value for class {}",
                        idx
                    )))
                }
            };
            entries.push((idx, label));
        }
        entries.sort_by_key(|(idx, _)| *idx);

        // Indices must be dense so that position == class index.
        let mut labels = Vec::with_capacity(entries.len());
        for (expected, (idx, label)) in entries.into_iter().enumerate() {
            if idx != expected {
                return Err(AppError::model(format!(
                    "Label file has no entry for class {}",
                    expected
                )));
            }
            labels.push(label);
        }

        Ok(Self { labels })
    }

    pub fn get(&self, idx: usize) -> Option<&ClassLabel> {
        self.labels.get(idx)
    }

    /// Raw label for `idx`, or `class_<idx>` when the table has no such entry.
    pub fn name_or_placeholder(&self, idx: usize) -> String {
        self.get(idx)
            .map(|l| l.name.clone())
            .unwrap_or_else(|| format!("class_{}", idx))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Turns a raw class label into display text: `golden_retriever` -> `golden retriever`.
///
/// Underscores become spaces, runs of whitespace collapse to one space and the
/// result is trimmed. Case is preserved (`Labrador_retriever` stays capitalised).
pub fn format_label(raw: &str) -> String {
    raw.replace('_', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
