//! Content feature space for the similarity index: TF-IDF weighted terms
//! over the combined product text plus standardized numerics.

use crate::error::{RecError, RecResult};
use ndarray::{concatenate, Array1, Array2, Axis};
use std::collections::{BTreeMap, BTreeSet};

/// Lower-cases and splits on anything that is not alphanumeric or `_`,
/// keeping tokens of two or more characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Term-frequency / inverse-document-frequency weighting fitted on one corpus.
///
/// Uses raw counts, smoothed idf `ln((1 + n) / (1 + df)) + 1` and L2-normalized
/// rows. The vocabulary is sorted. A corpus without any token fits to an empty
/// vocabulary; every document then maps to a zero-width row.
#[derive(Debug, Clone, Default)]
pub struct TfIdfVectorizer {
    vocabulary: BTreeMap<String, usize>,
    idf: Option<Vec<f32>>,
}

impl TfIdfVectorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terms(&self) -> Vec<&str> {
        self.vocabulary.keys().map(|t| t.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vocabulary.is_empty()
    }

    pub fn is_fitted(&self) -> bool {
        self.idf.is_some()
    }

    pub fn fit_transform<S: AsRef<str>>(&mut self, documents: &[S]) -> RecResult<Array2<f32>> {
        self.fit(documents)?;
        self.transform(documents)
    }

    /// Learns the vocabulary and document frequencies.
    pub fn fit<S: AsRef<str>>(&mut self, documents: &[S]) -> RecResult<()> {
        if documents.is_empty() {
            return Err(RecError::DegenerateIndex(
                "cannot fit tf-idf on an empty corpus".to_string(),
            ));
        }
        let tokenized: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d.as_ref())).collect();

        let terms: BTreeSet<&str> = tokenized.iter().flatten().map(|t| t.as_str()).collect();
        self.vocabulary = terms
            .into_iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i))
            .collect();

        let mut document_frequency = vec![0usize; self.vocabulary.len()];
        for tokens in &tokenized {
            let unique: BTreeSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
            for term in unique {
                if let Some(&i) = self.vocabulary.get(term) {
                    document_frequency[i] += 1;
                }
            }
        }

        let n = documents.len() as f32;
        self.idf = Some(
            document_frequency
                .iter()
                .map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0)
                .collect(),
        );
        Ok(())
    }

    /// Weights documents against the fitted vocabulary; unseen terms are ignored.
    pub fn transform<S: AsRef<str>>(&self, documents: &[S]) -> RecResult<Array2<f32>> {
        let idf = self
            .idf
            .as_ref()
            .ok_or_else(|| RecError::DegenerateIndex("tf-idf vectorizer not fitted".to_string()))?;

        let mut matrix = Array2::<f32>::zeros((documents.len(), self.vocabulary.len()));
        for (row, document) in documents.iter().enumerate() {
            for token in tokenize(document.as_ref()) {
                if let Some(&column) = self.vocabulary.get(&token) {
                    matrix[[row, column]] += 1.0;
                }
            }
            let mut weighted = matrix.row_mut(row);
            for (column, value) in weighted.iter_mut().enumerate() {
                *value *= idf[column];
            }
            let norm = weighted.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                weighted /= norm;
            }
        }
        Ok(matrix)
    }
}

/// Zero-mean, unit-variance scaling with population variance. Columns
/// without variance map to 0.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    pub fn fit(&mut self, data: &Array2<f64>) -> RecResult<()> {
        let mean = data
            .mean_axis(Axis(0))
            .ok_or_else(|| RecError::DegenerateIndex("cannot fit scaler with zero samples".to_string()))?;
        let scale = data
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(())
    }

    pub fn transform(&self, data: &Array2<f64>) -> RecResult<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => (mean, scale),
            _ => return Err(RecError::DegenerateIndex("scaler not fitted".to_string())),
        };
        if data.ncols() != mean.len() {
            return Err(RecError::DegenerateIndex(format!(
                "scaler fitted on {} columns, got {}",
                mean.len(),
                data.ncols()
            )));
        }
        Ok((data - mean) / scale)
    }

    pub fn fit_transform(&mut self, data: &Array2<f64>) -> RecResult<Array2<f64>> {
        self.fit(data)?;
        self.transform(data)
    }
}

/// Horizontal concatenation of text and numeric blocks. Both must have the
/// same number of rows.
pub fn hstack(text: &Array2<f32>, numeric: &Array2<f32>) -> RecResult<Array2<f32>> {
    concatenate(Axis(1), &[text.view(), numeric.view()]).map_err(|e| {
        RecError::DegenerateIndex(format!(
            "cannot join {} text rows with {} numeric rows: {e}",
            text.nrows(),
            numeric.nrows()
        ))
    })
}
