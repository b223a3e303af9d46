use crate::algorithms::encoder::FeatureLayout;
use crate::algorithms::labeler::LabelBuckets;
use crate::utils::metrics::TrainingHistory;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type ProductId = String;
pub type UserId = String;
pub type TagSet = BTreeSet<String>;

/// Multi-valued categorical attribute shared by products and user preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeField {
    Category,
    Color,
    Size,
}

impl AttributeField {
    pub const ALL: [AttributeField; 3] = [
        AttributeField::Category,
        AttributeField::Color,
        AttributeField::Size,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeField::Category => "category",
            AttributeField::Color => "color",
            AttributeField::Size => "size",
        }
    }
}

/// Anything exposing categorical tag sets for the attribute encoder.
pub trait Attributed {
    fn tags(&self, field: AttributeField) -> &TagSet;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "product_id", deserialize_with = "deserialize_id")]
    pub id: ProductId,
    #[serde(rename = "product_name", default, deserialize_with = "deserialize_text")]
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub category: TagSet,
    #[serde(default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub color: TagSet,
    #[serde(default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub size: TagSet,
    #[serde(default, deserialize_with = "deserialize_non_negative_f64")]
    pub rent_price: f64,
    #[serde(rename = "count_num_rating", default, deserialize_with = "deserialize_count")]
    pub rating_count: u64,
    #[serde(default, deserialize_with = "deserialize_non_negative_f64")]
    pub avg_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "user_id", deserialize_with = "deserialize_id")]
    pub id: UserId,
    #[serde(rename = "category_preference", default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub category: TagSet,
    #[serde(rename = "color_preference", default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub color: TagSet,
    #[serde(rename = "size_preference", default, deserialize_with = "deserialize_tags", serialize_with = "serialize_tags")]
    pub size: TagSet,
    #[serde(rename = "count_num_rating_user", default, deserialize_with = "deserialize_count")]
    pub rating_count: u64,
    #[serde(rename = "avg_rating_user", default, deserialize_with = "deserialize_non_negative_f64")]
    pub avg_rating: f64,
    #[serde(rename = "count_num_order", default, deserialize_with = "deserialize_count")]
    pub order_count: u64,
}

/// A past order/rental linking a user to a product.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interaction {
    #[serde(deserialize_with = "deserialize_id")]
    pub user_id: UserId,
    #[serde(deserialize_with = "deserialize_id")]
    pub product_id: ProductId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    pub products: Vec<Product>,
    pub users: Vec<User>,
    pub interactions: Vec<Interaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    pub num_recommendations: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub recommendations: Vec<ProductId>,
    pub index_generation: u64,
    pub generated_at: DateTime<Utc>,
}

/// Body posted to the delivery sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub user_id: UserId,
    pub recommendation: Vec<ProductId>,
    pub model_type: String,
}

pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// Row-major dense layer parameters (`rows` outputs, `cols` inputs).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerParameters {
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

/// Trained scorer parameters persisted together with the vocabulary layout
/// that defines their input columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorerArtifact {
    pub format_version: u32,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub layout: FeatureLayout,
    pub buckets: LabelBuckets,
    pub layers: Vec<LayerParameters>,
    pub history: TrainingHistory,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            category: TagSet::new(),
            color: TagSet::new(),
            size: TagSet::new(),
            rent_price: 0.0,
            rating_count: 0,
            avg_rating: 0.0,
        }
    }

    pub fn with_tags(mut self, field: AttributeField, raw: &str) -> Self {
        *self.tags_mut(field) = parse_tags(raw);
        self
    }

    pub fn with_stats(mut self, rent_price: f64, rating_count: u64, avg_rating: f64) -> Self {
        self.rent_price = rent_price.max(0.0);
        self.rating_count = rating_count;
        self.avg_rating = avg_rating.max(0.0);
        self
    }

    fn tags_mut(&mut self, field: AttributeField) -> &mut TagSet {
        match field {
            AttributeField::Category => &mut self.category,
            AttributeField::Color => &mut self.color,
            AttributeField::Size => &mut self.size,
        }
    }

    /// Lower-cased, space-joined name and attribute tags.
    pub fn combined_text(&self, include_numeric_tokens: bool) -> String {
        let mut parts: Vec<String> = vec![self.name.to_lowercase()];
        for field in AttributeField::ALL {
            parts.extend(self.tags(field).iter().cloned());
        }
        if include_numeric_tokens {
            parts.push(self.rent_price.to_string());
            parts.push(self.rating_count.to_string());
            parts.push(self.avg_rating.to_string());
        }
        parts.retain(|p| !p.is_empty());
        parts.join(" ")
    }

    pub fn numeric_features(&self) -> [f64; 3] {
        [self.rent_price, self.rating_count as f64, self.avg_rating]
    }
}

impl Attributed for Product {
    fn tags(&self, field: AttributeField) -> &TagSet {
        match field {
            AttributeField::Category => &self.category,
            AttributeField::Color => &self.color,
            AttributeField::Size => &self.size,
        }
    }
}

impl User {
    pub fn new(id: impl Into<UserId>) -> Self {
        Self {
            id: id.into(),
            category: TagSet::new(),
            color: TagSet::new(),
            size: TagSet::new(),
            rating_count: 0,
            avg_rating: 0.0,
            order_count: 0,
        }
    }

    pub fn with_preference(mut self, field: AttributeField, raw: &str) -> Self {
        let tags = parse_tags(raw);
        match field {
            AttributeField::Category => self.category = tags,
            AttributeField::Color => self.color = tags,
            AttributeField::Size => self.size = tags,
        }
        self
    }

    pub fn with_order_count(mut self, order_count: u64) -> Self {
        self.order_count = order_count;
        self
    }

    pub fn with_rating_history(mut self, rating_count: u64, avg_rating: f64) -> Self {
        self.rating_count = rating_count;
        self.avg_rating = avg_rating.max(0.0);
        self
    }
}

impl Attributed for User {
    fn tags(&self, field: AttributeField) -> &TagSet {
        match field {
            AttributeField::Category => &self.category,
            AttributeField::Color => &self.color,
            AttributeField::Size => &self.size,
        }
    }
}

impl Interaction {
    pub fn new(user_id: impl Into<UserId>, product_id: impl Into<ProductId>) -> Self {
        Self {
            user_id: user_id.into(),
            product_id: product_id.into(),
        }
    }
}

/// Splits a comma-separated tag string into a lower-cased set.
pub fn parse_tags(raw: &str) -> TagSet {
    raw.to_lowercase()
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "identifier must be a string or number, got {}",
            other
        ))),
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

// Anything that is neither a string nor a list of strings counts as missing.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<TagSet, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => parse_tags(&s),
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .flat_map(parse_tags)
            .collect(),
        _ => TagSet::new(),
    })
}

fn serialize_tags<S>(tags: &TagSet, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let joined = tags.iter().cloned().collect::<Vec<_>>().join(", ");
    serializer.serialize_str(&joined)
}

fn lenient_f64(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if parsed.is_finite() {
        parsed
    } else {
        0.0
    }
}

fn deserialize_non_negative_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(&Value::deserialize(deserializer)?).max(0.0))
}

fn deserialize_count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value.as_u64() {
        Some(n) => n,
        None => lenient_f64(&value).max(0.0) as u64,
    })
}
