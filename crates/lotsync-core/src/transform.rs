//! Conversion of upstream items into storable records.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{NewInventoryRecord, SourceItem};

/// Converts an upstream item into a [`NewInventoryRecord`] with its content hash set.
///
/// # Errors
///
/// Returns `AppError::InvalidRecord` when `id`, `make`, `model` or `year`
/// is missing or unusable. Optional fields that cannot be interpreted are
/// dropped rather than failing the item.
///
/// # Examples
///
/// ```
/// use lotsync_core::models::SourceItem;
/// use lotsync_core::transform::into_record;
///
/// let item: SourceItem = serde_json::from_str(
///     r#"{"id": 7, "make": "Toyota", "model": "Yaris", "year": 2018, "price": 9999.99}"#,
/// ).unwrap();
///
/// let record = into_record(item).unwrap();
/// assert_eq!(record.id, "7");
/// assert_eq!(record.price_cents, Some(999_999));
/// ```
pub fn into_record(item: SourceItem) -> Result<NewInventoryRecord, AppError> {
    let id = match item.id {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(AppError::InvalidRecord("missing id".to_string())),
    };

    let make = required_text(item.make, "make", &id)?;
    let model = required_text(item.model, "model", &id)?;

    let year = match item.year {
        Some(y) if (1886..=2100).contains(&y) => y as i32,
        Some(y) => {
            return Err(AppError::InvalidRecord(format!(
                "{}: year {} out of range",
                id, y
            )))
        }
        None => return Err(AppError::InvalidRecord(format!("{}: missing year", id))),
    };

    let price_cents = item
        .price
        .filter(|p| p.is_finite() && *p >= 0.0)
        .map(|p| (p * 100.0).round() as i64);

    let created_at = item.created_at.as_deref().and_then(|raw| {
        match DateTime::parse_from_rfc3339(raw) {
            Ok(t) => Some(t.with_timezone(&Utc)),
            Err(e) => {
                tracing::debug!(record = %id, value = raw, error = %e, "Ignoring unparsable created_at");
                None
            }
        }
    });

    let record = NewInventoryRecord {
        id,
        make,
        model,
        year,
        fuel: optional_text(item.fuel),
        transmission: optional_text(item.transmission),
        color: optional_text(item.color),
        price_cents,
        mileage: item.mileage.filter(|m| *m >= 0),
        rank_score: item.rank_score.filter(|r| r.is_finite()),
        created_at,
        attributes: Value::Object(item.extras),
        content_hash: String::new(),
    };

    Ok(record.with_content_hash())
}

fn required_text(value: Option<String>, field: &str, id: &str) -> Result<String, AppError> {
    optional_text(value).ok_or_else(|| AppError::InvalidRecord(format!("{}: missing {}", id, field)))
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(json: &str) -> SourceItem {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_full_item() {
        let record = into_record(item(
            r#"{
                "id": "abc-1",
                "make": " Toyota ",
                "model": "Camry",
                "year": 2021,
                "fuel": "hybrid",
                "transmission": "automatic",
                "color": "",
                "price": 28000,
                "mileage": 12000,
                "rank_score": 0.91,
                "created_at": "2024-03-01T10:00:00Z",
                "body": "sedan"
            }"#,
        ))
        .unwrap();

        assert_eq!(record.id, "abc-1");
        assert_eq!(record.make, "Toyota");
        assert_eq!(record.color, None);
        assert_eq!(record.price_cents, Some(2_800_000));
        assert_eq!(record.rank_score, Some(0.91));
        assert!(record.created_at.is_some());
        assert_eq!(record.attributes["body"], "sedan");
        assert_eq!(record.content_hash.len(), 64);
    }

    #[test]
    fn test_numeric_id() {
        let record =
            into_record(item(r#"{"id": 123, "make": "Kia", "model": "Rio", "year": 2015}"#))
                .unwrap();
        assert_eq!(record.id, "123");
        assert_eq!(record.price_cents, None);
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_missing_required_fields() {
        assert!(into_record(item(r#"{"make": "Kia", "model": "Rio", "year": 2015}"#)).is_err());
        assert!(into_record(item(r#"{"id": "x", "model": "Rio", "year": 2015}"#)).is_err());
        assert!(into_record(item(r#"{"id": "x", "make": "Kia", "year": 2015}"#)).is_err());
        assert!(into_record(item(r#"{"id": "x", "make": "Kia", "model": "Rio"}"#)).is_err());
        assert!(
            into_record(item(r#"{"id": "x", "make": "Kia", "model": "Rio", "year": 12}"#))
                .is_err()
        );
    }

    #[test]
    fn test_unusable_optionals_are_dropped() {
        let record = into_record(item(
            r#"{"id": "x", "make": "Kia", "model": "Rio", "year": 2015,
                "price": -5, "mileage": -1, "created_at": "yesterday"}"#,
        ))
        .unwrap();
        assert_eq!(record.price_cents, None);
        assert_eq!(record.mileage, None);
        assert_eq!(record.created_at, None);
    }

    #[test]
    fn test_numbers_sent_as_strings() {
        let record = into_record(item(
            r#"{"id": "x", "make": "Kia", "model": "Rio", "year": "2018",
                "price": "12500.50", "mileage": "n/a"}"#,
        ))
        .unwrap();
        assert_eq!(record.year, 2018);
        assert_eq!(record.price_cents, Some(1_250_050));
        assert_eq!(record.mileage, None);

        assert!(into_record(item(
            r#"{"id": "x", "make": "Kia", "model": "Rio", "year": "unknown"}"#
        ))
        .is_err());
    }
}
