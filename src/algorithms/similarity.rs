use crate::algorithms::features::{hstack, StandardScaler, TfIdfVectorizer};
use crate::config::IndexConfig;
use crate::error::{RecError, RecResult};
use crate::models::{Product, ProductId};
use crate::utils::{cosine_similarity, top_k_indices};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Dense, symmetric product-by-product cosine similarity.
#[derive(Debug, Clone)]
pub struct SimilarityMatrix {
    product_ids: Vec<ProductId>,
    positions: HashMap<ProductId, usize>,
    values: Array2<f32>,
}

impl SimilarityMatrix {
    /// Builds a matrix from explicit rows; the row count and every row
    /// length must equal the number of ids.
    pub fn from_rows(product_ids: Vec<ProductId>, rows: Vec<Vec<f32>>) -> RecResult<Self> {
        let n = product_ids.len();
        if rows.len() != n || rows.iter().any(|r| r.len() != n) {
            return Err(RecError::DegenerateIndex(format!(
                "similarity matrix must be {n}x{n}"
            )));
        }
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| RecError::DegenerateIndex(e.to_string()))?;
        Ok(Self::from_parts(product_ids, values))
    }

    fn from_parts(product_ids: Vec<ProductId>, values: Array2<f32>) -> Self {
        let mut positions = HashMap::with_capacity(product_ids.len());
        for (i, id) in product_ids.iter().enumerate() {
            if positions.contains_key(id) {
                warn!("Duplicate product id {} in catalog; keeping first occurrence", id);
                continue;
            }
            positions.insert(id.clone(), i);
        }
        Self {
            product_ids,
            positions,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.product_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.product_ids.is_empty()
    }

    pub fn product_ids(&self) -> &[ProductId] {
        &self.product_ids
    }

    pub fn position(&self, product_id: &str) -> Option<usize> {
        self.positions.get(product_id).copied()
    }

    pub fn row(&self, position: usize) -> ArrayView1<'_, f32> {
        self.values.row(position)
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f32> {
        Some(self.values[[self.position(a)?, self.position(b)?]])
    }

    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// The `n` products most similar to `product_id`, excluding itself.
    pub fn similar_products(&self, product_id: &str, n: usize) -> RecResult<Vec<(ProductId, f32)>> {
        let position = self
            .position(product_id)
            .ok_or_else(|| RecError::UnknownProduct(product_id.to_string()))?;
        let row = self.values.row(position).to_vec();
        Ok(top_k_indices(&row, self.len())
            .into_iter()
            .filter(|&i| i != position)
            .take(n)
            .map(|i| (self.product_ids[i].clone(), row[i]))
            .collect())
    }
}

/// Row-aligned content feature matrix: TF-IDF over the combined product text
/// followed by the standardized numeric columns.
#[derive(Debug, Clone)]
pub struct ContentFeatures {
    pub terms: Vec<String>,
    pub matrix: Array2<f32>,
}

impl ContentFeatures {
    pub fn text_width(&self) -> usize {
        self.terms.len()
    }
}

pub fn content_features(products: &[Product], config: &IndexConfig) -> RecResult<ContentFeatures> {
    let documents: Vec<String> = products
        .iter()
        .map(|p| p.combined_text(config.include_numeric_tokens))
        .collect();

    let mut vectorizer = TfIdfVectorizer::new();
    let text = vectorizer.fit_transform(&documents)?;
    let terms = vectorizer.terms().into_iter().map(String::from).collect();

    let mut raw = Array2::<f64>::zeros((products.len(), 3));
    for (row, product) in products.iter().enumerate() {
        for (col, value) in product.numeric_features().iter().enumerate() {
            raw[[row, col]] = *value;
        }
    }
    let numeric = StandardScaler::new().fit_transform(&raw)?.mapv(|v| v as f32);

    Ok(ContentFeatures {
        terms,
        matrix: hstack(&text, &numeric)?,
    })
}

/// Builds the full similarity matrix for the catalog. The diagonal is 1 and
/// rows with an all-zero feature vector are 0 everywhere else.
pub fn build_similarity_index(products: &[Product], config: &IndexConfig) -> RecResult<SimilarityMatrix> {
    if products.is_empty() {
        return Err(RecError::DegenerateIndex("catalog is empty".to_string()));
    }
    if products.len() > config.large_catalog_warning {
        warn!(
            "Building dense similarity matrix for {} products ({} cells)",
            products.len(),
            products.len() * products.len()
        );
    }

    let features = content_features(products, config)?;
    let n = products.len();
    debug!(
        "Content features: {} terms + {} numeric columns",
        features.text_width(),
        features.matrix.ncols() - features.text_width()
    );

    let rows: Vec<Vec<f32>> = (0..n).map(|i| features.matrix.row(i).to_vec()).collect();

    // upper triangle, then mirrored
    let upper: Vec<Vec<f32>> = (0..n)
        .into_par_iter()
        .map(|i| {
            (i..n)
                .map(|j| {
                    if i == j {
                        1.0
                    } else {
                        cosine_similarity(&rows[i], &rows[j]).clamp(-1.0, 1.0)
                    }
                })
                .collect()
        })
        .collect();

    let mut values = Array2::<f32>::zeros((n, n));
    for (i, tail) in upper.into_iter().enumerate() {
        for (offset, value) in tail.into_iter().enumerate() {
            let j = i + offset;
            values[[i, j]] = value;
            values[[j, i]] = value;
        }
    }

    info!("Built content similarity index over {} products", n);
    let product_ids = products.iter().map(|p| p.id.clone()).collect();
    Ok(SimilarityMatrix::from_parts(product_ids, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AttributeField;

    fn catalog() -> Vec<Product> {
        vec![
            Product::new("P1", "Silk Gown")
                .with_tags(AttributeField::Category, "Dress")
                .with_tags(AttributeField::Color, "Red")
                .with_stats(100.0, 3, 4.0),
            Product::new("P2", "Silk Gown")
                .with_tags(AttributeField::Category, "Dress")
                .with_tags(AttributeField::Color, "Red")
                .with_stats(120.0, 5, 4.5),
            Product::new("P3", "Batik Shirt")
                .with_tags(AttributeField::Category, "Top")
                .with_tags(AttributeField::Color, "Blue")
                .with_stats(40.0, 10, 3.0),
        ]
    }

    #[test]
    fn test_matrix_is_symmetric_with_unit_diagonal() {
        let matrix = build_similarity_index(&catalog(), &IndexConfig::default()).unwrap();
        assert_eq!(matrix.len(), 3);
        for i in 0..3 {
            assert_eq!(matrix.values()[[i, i]], 1.0);
            for j in 0..3 {
                let v = matrix.values()[[i, j]];
                assert_eq!(v, matrix.values()[[j, i]]);
                assert!((-1.0..=1.0).contains(&v));
            }
        }
    }

    #[test]
    fn test_similar_products_rank_closer() {
        let matrix = build_similarity_index(&catalog(), &IndexConfig::default()).unwrap();
        let close = matrix.get("P1", "P2").unwrap();
        let far = matrix.get("P1", "P3").unwrap();
        assert!(close > far);
    }

    #[test]
    fn test_empty_catalog_is_rejected() {
        let err = build_similarity_index(&[], &IndexConfig::default()).unwrap_err();
        assert!(matches!(err, RecError::DegenerateIndex(_)));
    }

    #[test]
    fn test_single_product_catalog() {
        let products = vec![Product::new("P1", "Silk Gown")];
        let matrix = build_similarity_index(&products, &IndexConfig::default()).unwrap();
        assert_eq!(matrix.values()[[0, 0]], 1.0);
    }

    #[test]
    fn test_identical_numerics_do_not_produce_nan() {
        let products = vec![
            Product::new("P1", "Kebaya").with_stats(50.0, 1, 4.0),
            Product::new("P2", "Kebaya").with_stats(50.0, 1, 4.0),
        ];
        let matrix = build_similarity_index(&products, &IndexConfig::default()).unwrap();
        assert!(matrix.values().iter().all(|v| v.is_finite()));
        assert!((matrix.get("P1", "P2").unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_text_rows() {
        let products = vec![Product::new("P1", ""), Product::new("P2", "")];
        let matrix = build_similarity_index(&products, &IndexConfig::default()).unwrap();
        assert_eq!(matrix.get("P1", "P2"), Some(0.0));
        assert_eq!(matrix.get("P1", "P1"), Some(1.0));
    }

    #[test]
    fn test_from_rows_requires_square() {
        let ids = vec!["P1".to_string(), "P2".to_string()];
        assert!(SimilarityMatrix::from_rows(ids.clone(), vec![vec![1.0, 0.3]]).is_err());
        let matrix = SimilarityMatrix::from_rows(ids, vec![vec![1.0, 0.3], vec![0.3, 1.0]]).unwrap();
        assert_eq!(matrix.position("P2"), Some(1));
        assert_eq!(matrix.get("P1", "P2"), Some(0.3));
    }

    #[test]
    fn test_similar_products() {
        let matrix = build_similarity_index(&catalog(), &IndexConfig::default()).unwrap();
        let similar = matrix.similar_products("P1", 1).unwrap();
        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0, "P2");
        assert!(matches!(
            matrix.similar_products("P9", 1),
            Err(RecError::UnknownProduct(_))
        ));
    }

    #[test]
    fn test_numeric_tokens_extend_vocabulary() {
        let products = catalog();
        let plain = content_features(&products, &IndexConfig::default()).unwrap();
        let config = IndexConfig {
            include_numeric_tokens: true,
            ..IndexConfig::default()
        };
        let with_numbers = content_features(&products, &config).unwrap();
        assert!(with_numbers.text_width() > plain.text_width());
        assert_eq!(plain.matrix.ncols(), plain.text_width() + 3);
    }
}
