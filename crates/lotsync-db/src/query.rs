//! SQL construction for filtered, ordered and keyset-paged reads.
//!
//! Column names come only from static literals (`INVENTORY_COLUMNS`,
//! `SortField::column`, `FilterField::column`); every user-supplied value is
//! a bind parameter.

use lotsync_core::cursor::Cursor;
use lotsync_core::models::{SortDirection, SortSpec, SortValue};
use lotsync_core::query::{FilterField, InventoryFilter, Range};
use sqlx::{Postgres, QueryBuilder};

/// Column list for SELECT queries. Must remain a const literal.
pub(crate) const INVENTORY_COLUMNS: &str = "id, make, model, year, fuel, transmission, color, price_cents, mileage, rank_score, created_at, attributes, content_hash, first_seen_at, last_synced_at";

type Builder = QueryBuilder<'static, Postgres>;

fn select_where() -> Builder {
    QueryBuilder::new(format!(
        "SELECT {} FROM inventory WHERE TRUE",
        INVENTORY_COLUMNS
    ))
}

/// `SELECT COUNT(*)` over the filter predicate.
pub(crate) fn count(filter: &InventoryFilter) -> Builder {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM inventory WHERE TRUE");
    push_filter(&mut qb, filter);
    qb
}

/// Up to `limit` rows strictly after `after` in the global order.
pub(crate) fn page_after(
    filter: &InventoryFilter,
    sort: SortSpec,
    after: Option<&Cursor>,
    limit: u32,
) -> Builder {
    let mut qb = select_where();
    push_filter(&mut qb, filter);
    if let Some(cursor) = after {
        push_keyset(&mut qb, sort, cursor);
    }
    push_order(&mut qb, sort);
    qb.push(" LIMIT ").push_bind(limit as i64);
    qb
}

/// Up to `limit` rows starting at `offset` in the global order.
pub(crate) fn page_at_offset(
    filter: &InventoryFilter,
    sort: SortSpec,
    offset: u64,
    limit: u32,
) -> Builder {
    let mut qb = select_where();
    push_filter(&mut qb, filter);
    push_order(&mut qb, sort);
    qb.push(" LIMIT ")
        .push_bind(limit as i64)
        .push(" OFFSET ")
        .push_bind(i64::try_from(offset).unwrap_or(i64::MAX));
    qb
}

fn push_filter(qb: &mut Builder, filter: &InventoryFilter) {
    for (field, values) in &filter.equals {
        if values.is_empty() {
            continue;
        }
        qb.push(" AND ").push(field.column()).push(" = ANY(");
        if *field == FilterField::Year {
            qb.push_bind(filter.year_values());
        } else {
            qb.push_bind(values.clone());
        }
        qb.push(")");
    }
    push_range(qb, "price_cents", filter.price_cents);
    push_range(qb, "mileage", filter.mileage);
    push_range(qb, "year", filter.year);
}

// NULL never satisfies a comparison, so bounded ranges exclude null rows.
fn push_range(qb: &mut Builder, column: &'static str, range: Range) {
    if let Some(min) = range.min {
        qb.push(" AND ").push(column).push(" >= ").push_bind(min);
    }
    if let Some(max) = range.max {
        qb.push(" AND ").push(column).push(" <= ").push_bind(max);
    }
}

/// Restricts to rows after the cursor under `col <dir> NULLS LAST, id ASC`.
fn push_keyset(qb: &mut Builder, sort: SortSpec, cursor: &Cursor) {
    let column = sort.field.column();

    if cursor.value.is_null() {
        qb.push(" AND (")
            .push(column)
            .push(" IS NULL AND id > ")
            .push_bind(cursor.id.clone())
            .push(")");
        return;
    }

    let op = match sort.direction {
        SortDirection::Asc => " > ",
        SortDirection::Desc => " < ",
    };
    qb.push(" AND (").push(column).push(op);
    push_value(qb, &cursor.value);
    qb.push(" OR (").push(column).push(" = ");
    push_value(qb, &cursor.value);
    qb.push(" AND id > ")
        .push_bind(cursor.id.clone())
        .push(") OR ")
        .push(column)
        .push(" IS NULL)");
}

fn push_value(qb: &mut Builder, value: &SortValue) {
    match value {
        SortValue::Int(v) => qb.push_bind(*v),
        SortValue::Float(v) => qb.push_bind(*v),
        SortValue::Text(v) => qb.push_bind(v.clone()),
        SortValue::Timestamp(v) => qb.push_bind(*v),
        SortValue::Null => qb.push("NULL"),
    };
}

fn push_order(qb: &mut Builder, sort: SortSpec) {
    qb.push(" ORDER BY ")
        .push(sort.field.column())
        .push(" ")
        .push(sort.direction.as_sql())
        .push(" NULLS LAST, id ASC");
}
