use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// One mirrored inventory item, as stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryRecord {
    /// Stable external identifier; the upsert key.
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub color: Option<String>,
    pub price_cents: Option<i64>,
    pub mileage: Option<i64>,
    pub rank_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    /// Upstream fields without a dedicated column.
    pub attributes: Value,
    pub content_hash: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_synced_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Returns the value of `field` for this record.
    pub fn sort_value(&self, field: SortField) -> SortValue {
        match field {
            SortField::PriceCents => self.price_cents.map_or(SortValue::Null, SortValue::Int),
            SortField::Year => SortValue::Int(self.year as i64),
            SortField::Mileage => self.mileage.map_or(SortValue::Null, SortValue::Int),
            SortField::Make => SortValue::Text(self.make.clone()),
            SortField::RankScore => self.rank_score.map_or(SortValue::Null, SortValue::Float),
            SortField::CreatedAt => SortValue::Timestamp(self.created_at),
        }
    }
}

/// A record ready to be upserted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewInventoryRecord {
    pub id: String,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub fuel: Option<String>,
    pub transmission: Option<String>,
    pub color: Option<String>,
    pub price_cents: Option<i64>,
    pub mileage: Option<i64>,
    pub rank_score: Option<f64>,
    /// `None` keeps the stored value (or the insert time for new rows).
    pub created_at: Option<DateTime<Utc>>,
    pub attributes: Value,
    /// SHA-256 of the business fields, used for delta detection.
    pub content_hash: String,
}

impl NewInventoryRecord {
    /// Computes the content hash over every business field of the record.
    ///
    /// Fields are separated by the ASCII unit separator so adjacent values
    /// cannot run into each other.
    pub fn compute_content_hash(&self) -> String {
        fn opt<T: ToString>(v: &Option<T>) -> String {
            v.as_ref().map(|x| x.to_string()).unwrap_or_default()
        }

        let created_at = self
            .created_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Micros, true))
            .unwrap_or_default();

        let parts = [
            self.id.clone(),
            self.make.clone(),
            self.model.clone(),
            self.year.to_string(),
            opt(&self.fuel),
            opt(&self.transmission),
            opt(&self.color),
            opt(&self.price_cents),
            opt(&self.mileage),
            opt(&self.rank_score),
            created_at,
            self.attributes.to_string(),
        ];

        let mut hasher = Sha256::new();
        hasher.update(parts.join("\u{1f}").as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Recomputes and stores the content hash.
    pub fn with_content_hash(mut self) -> Self {
        self.content_hash = self.compute_content_hash();
        self
    }
}

/// Raw item as delivered by the upstream API.
///
/// Only `id`, `make`, `model` and `year` are required by the transform step;
/// everything else is optional and unknown keys are kept in `extras`.
/// Fields of the wrong JSON type deserialize as `None` so that one bad row
/// never fails the page; numbers sent as strings are accepted.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceItem {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub make: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub year: Option<i64>,
    #[serde(default, deserialize_with = "lenient")]
    pub fuel: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub transmission: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub color: Option<String>,
    /// Price in currency units (e.g. dollars).
    #[serde(default, deserialize_with = "lenient_float")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub mileage: Option<i64>,
    #[serde(default, deserialize_with = "lenient_float")]
    pub rank_score: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extras: serde_json::Map<String, Value>,
}

/// Pagination metadata reported by the upstream API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct PageMeta {
    #[serde(default, deserialize_with = "lenient_int")]
    pub total: Option<u64>,
    #[serde(default, deserialize_with = "lenient_int")]
    pub last_page: Option<u32>,
}

/// One upstream page.
///
/// Entries of `data` that are not JSON objects become empty items, which
/// the transform step rejects individually.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcePage {
    #[serde(default, deserialize_with = "lenient_items")]
    pub data: Vec<SourceItem>,
    #[serde(default)]
    pub meta: Option<PageMeta>,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_int<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let int = match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    Ok(int.and_then(|i| T::try_from(i).ok()))
}

fn lenient_float<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_items<'de, D>(deserializer: D) -> Result<Vec<SourceItem>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .map(|v| serde_json::from_value(v).unwrap_or_default())
        .collect())
}

/// Aggregated mirror statistics.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_records: i64,
    pub distinct_makes: i64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    PriceCents,
    Year,
    Mileage,
    Make,
    RankScore,
    CreatedAt,
}

impl SortField {
    /// Column name in the `inventory` table. Always a static literal.
    pub fn column(&self) -> &'static str {
        match self {
            SortField::PriceCents => "price_cents",
            SortField::Year => "year",
            SortField::Mileage => "mileage",
            SortField::Make => "make",
            SortField::RankScore => "rank_score",
            SortField::CreatedAt => "created_at",
        }
    }
}

impl FromStr for SortField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "price" | "price_cents" => Ok(SortField::PriceCents),
            "year" => Ok(SortField::Year),
            "mileage" => Ok(SortField::Mileage),
            "make" => Ok(SortField::Make),
            "rank" | "rank_score" => Ok(SortField::RankScore),
            "created" | "created_at" => Ok(SortField::CreatedAt),
            other => Err(AppError::InvalidQuery(format!(
                "unknown sort field '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for SortField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

impl FromStr for SortDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            other => Err(AppError::InvalidQuery(format!(
                "unknown sort direction '{}'",
                other
            ))),
        }
    }
}

/// Sort key plus direction. The `id ASC` tie-break is implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Parses UI shorthands such as `price_asc`, `year_desc`, `newest` or a bare field name.
    ///
    /// ```
    /// use lotsync_core::models::{SortDirection, SortField, SortSpec};
    ///
    /// let sort = SortSpec::parse("price_asc").unwrap();
    /// assert_eq!(sort, SortSpec::new(SortField::PriceCents, SortDirection::Asc));
    /// ```
    pub fn parse(s: &str) -> Result<Self, AppError> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "newest" => return Ok(Self::new(SortField::CreatedAt, SortDirection::Desc)),
            "oldest" => return Ok(Self::new(SortField::CreatedAt, SortDirection::Asc)),
            _ => {}
        }
        if let Some((field, dir)) = s.rsplit_once('_') {
            if let Ok(direction) = dir.parse::<SortDirection>() {
                return Ok(Self::new(field.parse()?, direction));
            }
        }
        Ok(Self::new(s.parse()?, SortDirection::Asc))
    }
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::new(SortField::CreatedAt, SortDirection::Desc)
    }
}

/// Typed value of a sort key.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
    Null,
}

impl SortValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SortValue::Null)
    }
}
