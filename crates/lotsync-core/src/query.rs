//! Query surface types: filters, requests and page responses.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::AppError;
use crate::models::{InventoryRecord, SortDirection, SortField, SortSpec, SortValue};

/// Attributes usable in equality filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Make,
    Model,
    Year,
    Fuel,
    Transmission,
    Color,
}

impl FilterField {
    pub fn column(&self) -> &'static str {
        match self {
            FilterField::Make => "make",
            FilterField::Model => "model",
            FilterField::Year => "year",
            FilterField::Fuel => "fuel",
            FilterField::Transmission => "transmission",
            FilterField::Color => "color",
        }
    }

    fn value_of<'a>(&self, record: &'a InventoryRecord) -> Option<std::borrow::Cow<'a, str>> {
        use std::borrow::Cow;
        match self {
            FilterField::Make => Some(Cow::Borrowed(record.make.as_str())),
            FilterField::Model => Some(Cow::Borrowed(record.model.as_str())),
            FilterField::Year => Some(Cow::Owned(record.year.to_string())),
            FilterField::Fuel => record.fuel.as_deref().map(Cow::Borrowed),
            FilterField::Transmission => record.transmission.as_deref().map(Cow::Borrowed),
            FilterField::Color => record.color.as_deref().map(Cow::Borrowed),
        }
    }
}

impl FromStr for FilterField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "make" => Ok(FilterField::Make),
            "model" => Ok(FilterField::Model),
            "year" => Ok(FilterField::Year),
            "fuel" => Ok(FilterField::Fuel),
            "transmission" => Ok(FilterField::Transmission),
            "color" | "colour" => Ok(FilterField::Color),
            other => Err(AppError::InvalidQuery(format!(
                "unknown filter field '{}'",
                other
            ))),
        }
    }
}

/// Inclusive numeric range; either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Range {
    pub fn is_open(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    /// Null values never match a bounded range.
    fn contains(&self, value: Option<i64>) -> bool {
        if self.is_open() {
            return true;
        }
        match value {
            Some(v) => self.min.is_none_or(|m| v >= m) && self.max.is_none_or(|m| v <= m),
            None => false,
        }
    }
}

/// Filter predicate: every listed field must match one of its values,
/// and every bounded range must contain the record's value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryFilter {
    #[serde(default)]
    pub equals: BTreeMap<FilterField, Vec<String>>,
    #[serde(default)]
    pub price_cents: Range,
    #[serde(default)]
    pub mileage: Range,
    #[serde(default)]
    pub year: Range,
}

impl InventoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an accepted value for `field`.
    pub fn with(mut self, field: FilterField, value: impl Into<String>) -> Self {
        self.equals.entry(field).or_default().push(value.into());
        self
    }

    /// Builds a filter from `field -> values` pairs as sent by the UI.
    pub fn from_map(map: &BTreeMap<String, Vec<String>>) -> Result<Self, AppError> {
        let mut filter = Self::new();
        for (name, values) in map {
            let field: FilterField = name.parse()?;
            let values: Vec<String> = values
                .iter()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            if values.is_empty() {
                continue;
            }
            if field == FilterField::Year && values.iter().any(|v| v.parse::<i32>().is_err()) {
                return Err(AppError::InvalidQuery(format!(
                    "year filter values must be integers: {:?}",
                    values
                )));
            }
            filter.equals.entry(field).or_default().extend(values);
        }
        Ok(filter)
    }

    /// Parsed `year` equality values.
    pub fn year_values(&self) -> Vec<i32> {
        self.equals
            .get(&FilterField::Year)
            .map(|vs| vs.iter().filter_map(|v| v.parse().ok()).collect())
            .unwrap_or_default()
    }

    /// Evaluates the predicate against a record.
    pub fn matches(&self, record: &InventoryRecord) -> bool {
        let equals_ok = self.equals.iter().all(|(field, values)| {
            if values.is_empty() {
                return true;
            }
            match field.value_of(record) {
                Some(actual) => values.iter().any(|v| v.as_str() == actual.as_ref()),
                None => false,
            }
        });

        equals_ok
            && self.price_cents.contains(record.price_cents)
            && self.mileage.contains(record.mileage)
            && self.year.contains(Some(record.year as i64))
    }
}

/// Addressing mode of a request. Exactly one is set by construction.
#[derive(Debug, Clone, PartialEq)]
pub enum PageMode {
    /// Keyset pagination. `None` (or an undecodable token) means the first page.
    Cursor(Option<String>),
    /// Offset pagination, 1-based.
    Offset { page: u32 },
}

/// A validated query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub filter: InventoryFilter,
    pub sort: SortSpec,
    pub mode: PageMode,
    pub page_size: u32,
}

impl QueryRequest {
    pub fn first_page(filter: InventoryFilter, sort: SortSpec, page_size: u32) -> Self {
        Self {
            filter,
            sort,
            mode: PageMode::Cursor(None),
            page_size,
        }
    }

    pub fn offset(filter: InventoryFilter, sort: SortSpec, page: u32, page_size: u32) -> Self {
        Self {
            filter,
            sort,
            mode: PageMode::Offset { page },
            page_size,
        }
    }

    pub fn after(
        filter: InventoryFilter,
        sort: SortSpec,
        cursor: impl Into<String>,
        page_size: u32,
    ) -> Self {
        Self {
            filter,
            sort,
            mode: PageMode::Cursor(Some(cursor.into())),
            page_size,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModeParam {
    #[default]
    Cursor,
    Offset,
}

/// Loosely-typed request as received from the UI layer.
///
/// `sort` accepts a shorthand such as `price_asc`; `sortField`/`sortDir`
/// take precedence when present.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub price_min: Option<i64>,
    #[serde(default)]
    pub price_max: Option<i64>,
    #[serde(default)]
    pub mileage_max: Option<i64>,
    #[serde(default)]
    pub year_min: Option<i64>,
    #[serde(default)]
    pub year_max: Option<i64>,
    #[serde(default)]
    pub sort: Option<String>,
    #[serde(default)]
    pub sort_field: Option<String>,
    #[serde(default)]
    pub sort_dir: Option<String>,
    #[serde(default)]
    pub mode: ModeParam,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
}

impl QueryParams {
    /// Validates and converts into a [`QueryRequest`].
    ///
    /// A missing `pageSize` becomes 0, which the engine replaces with its default.
    pub fn into_request(self) -> Result<QueryRequest, AppError> {
        let mut filter = InventoryFilter::from_map(&self.filters)?;
        filter.price_cents = Range {
            min: self.price_min,
            max: self.price_max,
        };
        filter.mileage = Range {
            min: None,
            max: self.mileage_max,
        };
        filter.year = Range {
            min: self.year_min,
            max: self.year_max,
        };

        let sort = match (&self.sort_field, &self.sort) {
            (Some(field), _) => SortSpec::new(
                field.parse::<SortField>()?,
                match &self.sort_dir {
                    Some(dir) => dir.parse::<SortDirection>()?,
                    None => SortDirection::Asc,
                },
            ),
            (None, Some(shorthand)) => SortSpec::parse(shorthand)?,
            (None, None) => SortSpec::default(),
        };

        let mode = match (self.mode, self.cursor, self.page) {
            (ModeParam::Cursor, cursor, None) => PageMode::Cursor(cursor),
            (ModeParam::Offset, None, page) => PageMode::Offset {
                page: page.unwrap_or(1),
            },
            _ => {
                return Err(AppError::InvalidQuery(
                    "exactly one of cursor or page addressing may be used".to_string(),
                ))
            }
        };

        Ok(QueryRequest {
            filter,
            sort,
            mode,
            page_size: self.page_size.unwrap_or(0),
        })
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResponse {
    pub items: Vec<InventoryRecord>,
    pub total: u64,
    pub has_next: bool,
    pub has_prev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub page_size: u32,
}

/// Compares two records in the global order:
/// `sort field <dir> NULLS LAST, id ASC`.
pub fn compare_records(a: &InventoryRecord, b: &InventoryRecord, sort: SortSpec) -> Ordering {
    compare_keys(&a.sort_value(sort.field), &a.id, &b.sort_value(sort.field), &b.id, sort)
}

/// True when `record` comes strictly after `cursor` in the global order.
pub fn is_after_cursor(record: &InventoryRecord, cursor: &Cursor, sort: SortSpec) -> bool {
    compare_keys(
        &record.sort_value(sort.field),
        &record.id,
        &cursor.value,
        &cursor.id,
        sort,
    ) == Ordering::Greater
}

fn compare_keys(
    a: &SortValue,
    a_id: &str,
    b: &SortValue,
    b_id: &str,
    sort: SortSpec,
) -> Ordering {
    let primary = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ord = compare_values(a, b);
            match sort.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    };
    primary.then_with(|| a_id.as_bytes().cmp(b_id.as_bytes()))
}

fn compare_values(a: &SortValue, b: &SortValue) -> Ordering {
    match (a, b) {
        (SortValue::Int(x), SortValue::Int(y)) => x.cmp(y),
        (SortValue::Float(x), SortValue::Float(y)) => x.total_cmp(y),
        (SortValue::Int(x), SortValue::Float(y)) => (*x as f64).total_cmp(y),
        (SortValue::Float(x), SortValue::Int(y)) => x.total_cmp(&(*y as f64)),
        (SortValue::Text(x), SortValue::Text(y)) => x.as_bytes().cmp(y.as_bytes()),
        (SortValue::Timestamp(x), SortValue::Timestamp(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
