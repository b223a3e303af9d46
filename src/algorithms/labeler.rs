use crate::algorithms::encoder::{AttributeVector, EncodedAttributes};
use crate::error::{RecError, RecResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of indicator positions set in both vectors, summed over every
/// attribute group.
pub fn label(user: &AttributeVector, product: &AttributeVector) -> RecResult<u32> {
    user.ensure_same_layout(product)?;
    Ok(user
        .values()
        .iter()
        .zip(product.values().iter())
        .filter(|&(&u, &p)| u == 1 && p == 1)
        .count() as u32)
}

/// Labels for the full users x products cross-join, one matrix product per
/// attribute group. Entry `(u, p)` equals `label(users.row(u), products.row(p))`.
pub fn label_matrix(users: &EncodedAttributes, products: &EncodedAttributes) -> RecResult<Array2<u32>> {
    users.layout().ensure_compatible(products.layout())?;

    let mut labels = Array2::<u32>::zeros((users.rows(), products.rows()));
    for position in 0..users.layout().groups().len() {
        let u = users.group_matrix(position).mapv(u32::from);
        let p = products.group_matrix(position).mapv(u32::from);
        labels += &u.dot(&p.t());
    }
    Ok(labels)
}

/// Ordinal bucketing of raw labels into the scorer's output classes.
/// Class `k < n-1` holds label `k`; the last class holds every label `>= n-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelBuckets {
    num_classes: usize,
}

impl LabelBuckets {
    pub fn new(num_classes: usize) -> RecResult<Self> {
        if num_classes < 2 {
            return Err(RecError::InvalidConfig(format!(
                "label bucketing needs at least 2 classes, got {}",
                num_classes
            )));
        }
        Ok(Self { num_classes })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn class_of(&self, label: u32) -> usize {
        (label as usize).min(self.num_classes - 1)
    }

    /// Human-readable mapping, e.g. `["0", "1", "2", "3+"]`.
    pub fn describe(&self) -> Vec<String> {
        (0..self.num_classes)
            .map(|k| {
                if k + 1 == self.num_classes {
                    format!("{}+", k)
                } else {
                    k.to_string()
                }
            })
            .collect()
    }

    /// Fails unless every class is represented in `labels`.
    pub fn ensure_diversity<'a, I>(&self, labels: I) -> RecResult<()>
    where
        I: IntoIterator<Item = &'a u32>,
    {
        let mut seen = vec![false; self.num_classes];
        for &label in labels {
            seen[self.class_of(label)] = true;
        }
        let observed = seen.iter().filter(|&&s| s).count();
        if observed < self.num_classes {
            return Err(RecError::InsufficientLabelDiversity {
                observed,
                expected: self.num_classes,
            });
        }
        Ok(())
    }
}

pub fn label_distribution(labels: &Array2<u32>) -> BTreeMap<u32, usize> {
    let mut distribution = BTreeMap::new();
    for &label in labels.iter() {
        *distribution.entry(label).or_insert(0) += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::encoder::{encode, reconcile};
    use crate::models::{AttributeField, Product, User};

    fn fixture() -> (EncodedAttributes, EncodedAttributes) {
        let products = vec![
            Product::new("P1", "one")
                .with_tags(AttributeField::Category, "dress")
                .with_tags(AttributeField::Color, "red"),
            Product::new("P2", "two")
                .with_tags(AttributeField::Category, "dress")
                .with_tags(AttributeField::Color, "blue"),
            Product::new("P3", "three").with_tags(AttributeField::Size, "xl"),
        ];
        let users = vec![
            User::new("U")
                .with_preference(AttributeField::Category, "dress")
                .with_preference(AttributeField::Color, "red"),
            User::new("empty"),
        ];
        let (_, users, products) = reconcile(
            &encode(&users, &AttributeField::ALL),
            &encode(&products, &AttributeField::ALL),
        )
        .unwrap();
        (users, products)
    }

    #[test]
    fn test_label_counts_shared_attributes() {
        let (users, products) = fixture();
        assert_eq!(label(&users.row(0), &products.row(0)).unwrap(), 2);
        assert_eq!(label(&users.row(0), &products.row(1)).unwrap(), 1);
        assert_eq!(label(&users.row(0), &products.row(2)).unwrap(), 0);
    }

    #[test]
    fn test_empty_user_labels_zero_everywhere() {
        let (users, products) = fixture();
        for p in 0..products.rows() {
            assert_eq!(label(&users.row(1), &products.row(p)).unwrap(), 0);
        }
    }

    #[test]
    fn test_label_matrix_matches_elementwise_count() {
        let (users, products) = fixture();
        let matrix = label_matrix(&users, &products).unwrap();
        for u in 0..users.rows() {
            for p in 0..products.rows() {
                assert_eq!(matrix[[u, p]], label(&users.row(u), &products.row(p)).unwrap());
            }
        }
    }

    #[test]
    fn test_unreconciled_vectors_rejected() {
        let products = vec![Product::new("P1", "one").with_tags(AttributeField::Color, "red")];
        let users = vec![User::new("U").with_preference(AttributeField::Color, "red, blue")];
        let p = encode(&products, &AttributeField::ALL);
        let u = encode(&users, &AttributeField::ALL);
        assert!(matches!(label(&u.row(0), &p.row(0)), Err(RecError::EncodingMismatch(_))));
        assert!(matches!(label_matrix(&u, &p), Err(RecError::EncodingMismatch(_))));
    }

    #[test]
    fn test_label_buckets() {
        let buckets = LabelBuckets::new(4).unwrap();
        assert_eq!(buckets.class_of(0), 0);
        assert_eq!(buckets.class_of(3), 3);
        assert_eq!(buckets.class_of(7), 3);
        assert_eq!(buckets.describe(), vec!["0", "1", "2", "3+"]);

        assert!(buckets.ensure_diversity(&[0, 1, 2, 5]).is_ok());
        assert!(matches!(
            buckets.ensure_diversity(&[0, 1, 1]),
            Err(RecError::InsufficientLabelDiversity { observed: 2, expected: 4 })
        ));
    }
}
