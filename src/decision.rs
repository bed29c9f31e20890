//! Mapping probability vectors to named gestures.
//!
//! The predicted class is the stable arg-max (ties go to the lowest index).
//! The class index is decoded through the label encoder exported at training
//! time and the decoded label is looked up in the display-name table. A label
//! missing from either table becomes `Unknown (<label>)` instead of an error.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::{self, ArtifactError};

const KIND: &str = "label encoder";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecisionError {
    /// The probability vector had no entries.
    #[error("Probability vector is empty")]
    EmptyProbabilities,
    /// Every score was NaN or infinite.
    #[error("Probability vector has no finite score")]
    NoFiniteScore,
    /// The encoder has no label for this class index.
    #[error("Class index {index} is outside the label encoder's {classes} classes")]
    UnknownClass { index: usize, classes: usize },
}

/// An original training label: integer or string.
///
/// Whole-number floats (`0.0`) load as integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged, try_from = "RawLabel")]
pub enum EncodedLabel {
    Integer(i64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLabel {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl TryFrom<RawLabel> for EncodedLabel {
    type Error = String;

    fn try_from(raw: RawLabel) -> Result<Self, Self::Error> {
        match raw {
            RawLabel::Integer(value) => Ok(EncodedLabel::Integer(value)),
            RawLabel::Float(value) if value.fract() == 0.0 && value.abs() < i64::MAX as f64 => {
                Ok(EncodedLabel::Integer(value as i64))
            }
            RawLabel::Float(value) => Err(format!("label {value} is not a whole number")),
            RawLabel::Text(value) => Ok(EncodedLabel::Text(value)),
        }
    }
}

impl fmt::Display for EncodedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodedLabel::Integer(value) => write!(f, "{value}"),
            EncodedLabel::Text(value) => f.write_str(value),
        }
    }
}

/// Class index to original label, as fitted during training.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    pub classes: Vec<EncodedLabel>,
}

impl LabelEncoder {
    /// Encoder whose labels are the class indices themselves.
    pub fn identity(classes: usize) -> Self {
        Self {
            classes: (0..classes as i64).map(EncodedLabel::Integer).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let encoder: Self = artifact::read_json(path, KIND)?;
        if encoder.classes.is_empty() {
            return Err(ArtifactError::invalid(KIND, "classes must not be empty"));
        }
        Ok(encoder)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn inverse_transform(&self, index: usize) -> Result<&EncodedLabel, DecisionError> {
        self.classes.get(index).ok_or(DecisionError::UnknownClass {
            index,
            classes: self.classes.len(),
        })
    }
}

/// Display names keyed by the decoded label's text form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GestureNames(BTreeMap<String, String>);

impl Default for GestureNames {
    fn default() -> Self {
        Self::from_pairs([("0", "Propulsion"), ("1", "Rest")])
    }
}

impl GestureNames {
    pub fn from_pairs<K: Into<String>, V: Into<String>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Display name for a label, or `Unknown (<label>)`.
    pub fn name_for(&self, label: &str) -> String {
        self.get(label)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unknown ({label})"))
    }
}

/// Outcome of one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub gesture: String,
    /// Decoded label, absent when the encoder does not cover the class.
    pub label: Option<String>,
    pub class_index: usize,
    pub confidence: f64,
    pub probabilities: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct GestureDecider {
    encoder: LabelEncoder,
    names: GestureNames,
}

impl GestureDecider {
    pub fn new(encoder: LabelEncoder, names: GestureNames) -> Self {
        Self { encoder, names }
    }

    pub fn encoder(&self) -> &LabelEncoder {
        &self.encoder
    }

    /// Display name of every encoder class, in class order.
    pub fn class_names(&self) -> Vec<String> {
        (0..self.encoder.len())
            .filter_map(|idx| self.encoder.inverse_transform(idx).ok())
            .map(|label| self.names.name_for(&label.to_string()))
            .collect()
    }

    pub fn decide(&self, probabilities: Vec<f64>) -> Result<Decision, DecisionError> {
        let class_index = stable_argmax(&probabilities)?;
        let confidence = probabilities[class_index];
        let (gesture, label) = match self.encoder.inverse_transform(class_index) {
            Ok(label) => {
                let label = label.to_string();
                (self.names.name_for(&label), Some(label))
            }
            Err(_) => (format!("Unknown ({class_index})"), None),
        };
        Ok(Decision {
            gesture,
            label,
            class_index,
            confidence,
            probabilities,
        })
    }
}

/// Index of the largest finite score; the first one wins ties.
pub fn stable_argmax(scores: &[f64]) -> Result<usize, DecisionError> {
    if scores.is_empty() {
        return Err(DecisionError::EmptyProbabilities);
    }
    let mut best: Option<(usize, f64)> = None;
    for (idx, &score) in scores.iter().enumerate() {
        if !score.is_finite() {
            continue;
        }
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx).ok_or(DecisionError::NoFiniteScore)
}
