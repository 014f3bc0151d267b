//! Ordered label vocabularies.
//!
//! Class index `i` of the network output maps to `labels[i]`. Reordering a
//! vocabulary without retraining the model silently mislabels every
//! detection, so vocabularies are immutable once built.

use std::{collections::HashSet, fs, path::Path};

use thiserror::Error;

/// Word vocabulary shipped with the continuous word model.
pub const WORD_LABELS: [&str; 8] = [
    "hello",
    "thank you",
    "yes",
    "no",
    "please",
    "sorry",
    "i love you",
    "help",
];

#[derive(Debug, Error)]
pub enum VocabularyError {
    #[error("vocabulary {0:?} has no labels")]
    Empty(String),
    #[error("label {label:?} appears more than once in vocabulary {name:?}")]
    Duplicate { name: String, label: String },
    #[error("failed to read vocabulary file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelVocabulary {
    name: String,
    labels: Vec<String>,
}

impl LabelVocabulary {
    pub fn new<I, S>(name: impl Into<String>, labels: I) -> Result<Self, VocabularyError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(VocabularyError::Empty(name));
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for label in &labels {
            if !seen.insert(label.as_str()) {
                return Err(VocabularyError::Duplicate {
                    name,
                    label: label.clone(),
                });
            }
        }
        Ok(Self { name, labels })
    }

    /// The 26 letters `A`..=`Z`.
    pub fn alphabet() -> Self {
        Self {
            name: "alphabet".into(),
            labels: ('A'..='Z').map(|c| c.to_string()).collect(),
        }
    }

    pub fn words() -> Self {
        Self {
            name: "words".into(),
            labels: WORD_LABELS.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Look up a built-in vocabulary by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "alphabet" => Some(Self::alphabet()),
            "words" => Some(Self::words()),
            _ => None,
        }
    }

    /// Load one label per line; blank lines and `#` comments are skipped.
    pub fn from_file(path: &Path) -> Result<Self, VocabularyError> {
        let text = fs::read_to_string(path).map_err(|source| VocabularyError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let labels = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'));
        Self::new(name, labels)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
