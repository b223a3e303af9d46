//! Binary indicator encoding of multi-valued categorical attributes.
//!
//! Every encoded collection carries its [`FeatureLayout`]: the ordered list of
//! attribute groups and, per group, the lexicographically sorted vocabulary of
//! observed values. Columns are laid out group after group, so two encodings
//! are comparable column-for-column exactly when their layouts are equal.

use crate::error::{RecError, RecResult};
use crate::models::{AttributeField, Attributed};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

/// Ordered, immutable set of attribute values defining one group's columns.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Vocabulary {
    values: Vec<String>,
}

impl Vocabulary {
    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.as_ref().trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .collect();
        Self {
            values: set.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    pub fn index_of(&self, value: &str) -> Option<usize> {
        self.values.binary_search_by(|v| v.as_str().cmp(value)).ok()
    }

    pub fn union(&self, other: &Vocabulary) -> Vocabulary {
        Vocabulary::from_values(self.values.iter().chain(other.values.iter()))
    }

    pub fn is_subset_of(&self, other: &Vocabulary) -> bool {
        self.values.iter().all(|v| other.index_of(v).is_some())
    }
}

impl TryFrom<Vec<String>> for Vocabulary {
    type Error = String;

    fn try_from(values: Vec<String>) -> Result<Self, Self::Error> {
        if values.windows(2).any(|w| w[0] >= w[1]) {
            return Err("vocabulary must be strictly sorted and free of duplicates".to_string());
        }
        Ok(Self { values })
    }
}

impl From<Vocabulary> for Vec<String> {
    fn from(vocabulary: Vocabulary) -> Self {
        vocabulary.values
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldVocabulary {
    pub field: AttributeField,
    pub vocabulary: Vocabulary,
}

/// Column layout of an encoded attribute matrix.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FeatureLayout {
    groups: Vec<FieldVocabulary>,
}

impl FeatureLayout {
    pub fn new(groups: Vec<FieldVocabulary>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[FieldVocabulary] {
        &self.groups
    }

    pub fn fields(&self) -> Vec<AttributeField> {
        self.groups.iter().map(|g| g.field).collect()
    }

    pub fn vocabulary(&self, field: AttributeField) -> Option<&Vocabulary> {
        self.groups
            .iter()
            .find(|g| g.field == field)
            .map(|g| &g.vocabulary)
    }

    /// Total number of indicator columns.
    pub fn width(&self) -> usize {
        self.groups.iter().map(|g| g.vocabulary.len()).sum()
    }

    pub fn group_range(&self, position: usize) -> Range<usize> {
        let start: usize = self.groups[..position]
            .iter()
            .map(|g| g.vocabulary.len())
            .sum();
        start..start + self.groups[position].vocabulary.len()
    }

    /// Union of both layouts, group by group. Groups must appear in the same order.
    pub fn reconcile(&self, other: &FeatureLayout) -> RecResult<FeatureLayout> {
        if self.fields() != other.fields() {
            return Err(RecError::EncodingMismatch(format!(
                "attribute groups differ: {:?} vs {:?}",
                self.fields(),
                other.fields()
            )));
        }

        let groups = self
            .groups
            .iter()
            .zip(other.groups.iter())
            .map(|(a, b)| FieldVocabulary {
                field: a.field,
                vocabulary: a.vocabulary.union(&b.vocabulary),
            })
            .collect();

        Ok(FeatureLayout { groups })
    }

    pub fn ensure_compatible(&self, other: &FeatureLayout) -> RecResult<()> {
        if self == other {
            return Ok(());
        }
        Err(RecError::EncodingMismatch(format!(
            "layouts differ: {} columns over {:?} vs {} columns over {:?}",
            self.width(),
            self.fields(),
            other.width(),
            other.fields()
        )))
    }
}

/// Indicator rows for a collection of entities, bound to their layout.
#[derive(Debug, Clone)]
pub struct EncodedAttributes {
    layout: Arc<FeatureLayout>,
    data: Array2<u8>,
}

impl EncodedAttributes {
    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    pub fn matrix(&self) -> &Array2<u8> {
        &self.data
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn row(&self, index: usize) -> AttributeVector {
        AttributeVector {
            layout: self.layout.clone(),
            values: self.data.row(index).to_vec(),
        }
    }

    /// Re-expresses these rows under a wider layout. Columns are only ever
    /// added (as zeros), never dropped.
    pub fn align_to(&self, target: &Arc<FeatureLayout>) -> RecResult<EncodedAttributes> {
        if Arc::ptr_eq(&self.layout, target) || *self.layout == **target {
            return Ok(EncodedAttributes {
                layout: target.clone(),
                data: self.data.clone(),
            });
        }
        if self.layout.fields() != target.fields() {
            return Err(RecError::EncodingMismatch(format!(
                "cannot align groups {:?} to {:?}",
                self.layout.fields(),
                target.fields()
            )));
        }

        let mut data = Array2::<u8>::zeros((self.rows(), target.width()));
        for (position, (source, dest)) in self
            .layout
            .groups()
            .iter()
            .zip(target.groups().iter())
            .enumerate()
        {
            if !source.vocabulary.is_subset_of(&dest.vocabulary) {
                return Err(RecError::EncodingMismatch(format!(
                    "target {} vocabulary is missing observed values",
                    source.field.as_str()
                )));
            }
            let source_range = self.layout.group_range(position);
            let dest_offset = target.group_range(position).start;
            for (column, value) in source.vocabulary.values().iter().enumerate() {
                // subset check above guarantees the lookup succeeds
                if let Some(dest_column) = dest.vocabulary.index_of(value) {
                    data.column_mut(dest_offset + dest_column)
                        .assign(&self.data.column(source_range.start + column));
                }
            }
        }

        Ok(EncodedAttributes {
            layout: target.clone(),
            data,
        })
    }

    pub fn group_matrix(&self, position: usize) -> Array2<u8> {
        let range = self.layout.group_range(position);
        self.data.slice(s![.., range]).to_owned()
    }
}

/// One entity's indicator row together with the layout it was encoded under.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeVector {
    layout: Arc<FeatureLayout>,
    values: Vec<u8>,
}

impl AttributeVector {
    pub fn layout(&self) -> &Arc<FeatureLayout> {
        &self.layout
    }

    pub fn values(&self) -> &[u8] {
        &self.values
    }

    pub fn ensure_same_layout(&self, other: &AttributeVector) -> RecResult<()> {
        if Arc::ptr_eq(&self.layout, &other.layout) {
            return Ok(());
        }
        self.layout.ensure_compatible(&other.layout)
    }

    pub fn as_f32(&self) -> Vec<f32> {
        self.values.iter().map(|&v| v as f32).collect()
    }
}

/// Indicator matrix and vocabulary for a single field.
pub fn encode_field<E: Attributed>(entities: &[E], field: AttributeField) -> (Array2<u8>, Vocabulary) {
    let vocabulary = Vocabulary::from_values(entities.iter().flat_map(|e| e.tags(field).iter()));
    let mut data = Array2::<u8>::zeros((entities.len(), vocabulary.len()));
    for (row, entity) in entities.iter().enumerate() {
        for tag in entity.tags(field) {
            if let Some(column) = vocabulary.index_of(&tag.trim().to_lowercase()) {
                data[[row, column]] = 1;
            }
        }
    }
    (data, vocabulary)
}

/// Encodes `fields` for every entity, deriving each vocabulary from the
/// values observed in this collection.
pub fn encode<E: Attributed>(entities: &[E], fields: &[AttributeField]) -> EncodedAttributes {
    let mut groups = Vec::with_capacity(fields.len());
    let mut blocks = Vec::with_capacity(fields.len());
    for &field in fields {
        let (block, vocabulary) = encode_field(entities, field);
        debug!("Encoded {} with {} distinct values", field.as_str(), vocabulary.len());
        groups.push(FieldVocabulary { field, vocabulary });
        blocks.push(block);
    }

    let layout = FeatureLayout::new(groups);
    let mut data = Array2::<u8>::zeros((entities.len(), layout.width()));
    for (position, block) in blocks.iter().enumerate() {
        let range = layout.group_range(position);
        data.slice_mut(s![.., range]).assign(block);
    }

    EncodedAttributes {
        layout: Arc::new(layout),
        data,
    }
}

/// Encodes against a fixed layout, e.g. one loaded with a trained scorer.
/// Values the layout does not know are ignored.
pub fn encode_with_layout<E: Attributed>(entities: &[E], layout: &Arc<FeatureLayout>) -> EncodedAttributes {
    let mut data = Array2::<u8>::zeros((entities.len(), layout.width()));
    let mut unknown = 0usize;
    for (position, group) in layout.groups().iter().enumerate() {
        let offset = layout.group_range(position).start;
        for (row, entity) in entities.iter().enumerate() {
            for tag in entity.tags(group.field) {
                match group.vocabulary.index_of(&tag.trim().to_lowercase()) {
                    Some(column) => data[[row, offset + column]] = 1,
                    None => unknown += 1,
                }
            }
        }
    }
    if unknown > 0 {
        debug!("Ignored {} attribute values absent from the fixed layout", unknown);
    }

    EncodedAttributes {
        layout: layout.clone(),
        data,
    }
}

/// Brings two independent encodings onto one shared layout.
pub fn reconcile(
    left: &EncodedAttributes,
    right: &EncodedAttributes,
) -> RecResult<(Arc<FeatureLayout>, EncodedAttributes, EncodedAttributes)> {
    let layout = Arc::new(left.layout.reconcile(&right.layout)?);
    let left = left.align_to(&layout)?;
    let right = right.align_to(&layout)?;
    Ok((layout, left, right))
}
