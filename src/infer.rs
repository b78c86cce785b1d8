//! Type inference for raw CSV text.
//!
//! Two layers live here:
//!
//! - [`classify`] maps one raw value to a [`TypeTag`]. It is pure and total:
//!   anything that cannot be read as a narrower type is `text`.
//! - [`resolve`] folds the tags of a sampled column ([`ColumnSample`]) into the
//!   single type the staging column is narrowed to. Only the *set* of observed
//!   tags matters, never their order or frequency.
//!
//! [`sample_size`] decides how many non-null values are pulled per column.

use std::{collections::BTreeSet, fmt};

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;

const SMALLINT_RANGE: std::ops::RangeInclusive<i128> = -32_768..=32_767;
const INTEGER_RANGE: std::ops::RangeInclusive<i128> = -2_147_483_648..=2_147_483_647;

const LARGE_TABLE_ROWS: u64 = 10_000;
const MEDIUM_TABLE_ROWS: u64 = 5_000;
const SMALL_TABLE_ROWS: u64 = 1_000;
const LARGE_TABLE_SAMPLE: u64 = 1_000;
const MEDIUM_TABLE_SAMPLE: u64 = 500;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%m-%d-%Y",
    "%Y.%m.%d",
    "%d.%m.%Y",
    "%b %d %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
];

/// Relational type class assigned to a value or a column.
///
/// The derived ordering only exists so tags can live in a `BTreeSet`; it has
/// no meaning for resolution, which uses explicit precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    Boolean,
    Smallint,
    Integer,
    Bigint,
    Numeric,
    Date,
    Timestamp,
    Text,
}

impl TypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeTag::Boolean => "boolean",
            TypeTag::Smallint => "smallint",
            TypeTag::Integer => "integer",
            TypeTag::Bigint => "bigint",
            TypeTag::Numeric => "numeric",
            TypeTag::Date => "date",
            TypeTag::Timestamp => "timestamp",
            TypeTag::Text => "text",
        }
    }

    /// Whether a column of this type stays at the backend's widen-to-text type.
    pub fn is_text(&self) -> bool {
        matches!(self, TypeTag::Text)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-null values read from one staging column, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSample {
    values: Vec<String>,
}

impl ColumnSample {
    /// Builds a sample, dropping absent values and trimming the rest.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let values = rows
            .into_iter()
            .flatten()
            .map(|value| value.trim().to_string())
            .collect();
        Self { values }
    }

    pub fn from_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            values: values.into_iter().map(Into::into).collect(),
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

    pub fn truncate(&mut self, limit: usize) {
        self.values.truncate(limit);
    }

    pub fn push(&mut self, value: impl Into<String>) {
        self.values.push(value.into());
    }
}

enum NumberShape {
    Integral(i128),
    Fractional,
}

fn parse_number(value: &str) -> Option<NumberShape> {
    if let Ok(integral) = value.parse::<i128>() {
        return Some(NumberShape::Integral(integral));
    }
    // Exact parsing: values needing more than 28 fractional digits would
    // otherwise round to an integral Decimal.
    let decimal = Decimal::from_str_exact(value)
        .ok()
        .or_else(|| Decimal::from_scientific(value).ok());
    if let Some(decimal) = decimal {
        if decimal.fract().is_zero() {
            // Every integral Decimal fits in i128.
            return decimal.trunc().to_i128().map(NumberShape::Integral);
        }
        return Some(NumberShape::Fractional);
    }
    let float = value.parse::<f64>().ok()?;
    if float.is_finite() && float.fract() == 0.0 {
        Some(NumberShape::Integral(float as i128))
    } else {
        Some(NumberShape::Fractional)
    }
}

fn classify_integral(literal: &str, integral: i128) -> TypeTag {
    if literal == "0" || literal == "1" {
        return TypeTag::Smallint;
    }
    if literal.starts_with('0') {
        return TypeTag::Text;
    }
    if SMALLINT_RANGE.contains(&integral) {
        TypeTag::Smallint
    } else if INTEGER_RANGE.contains(&integral) {
        TypeTag::Integer
    } else {
        TypeTag::Bigint
    }
}

fn is_boolean_literal(value: &str) -> bool {
    ["true", "false", "t", "f"]
        .iter()
        .any(|token| value.eq_ignore_ascii_case(token))
}

/// Parses the date and date-time shapes found in warehouse extracts.
///
/// Date-only literals are returned at midnight.
pub fn parse_datetime_literal(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.naive_local());
    }
    for fmt in DATE_FORMATS {
        if let Ok(parsed) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(parsed.and_time(NaiveTime::MIN));
        }
    }
    if trimmed.len() == 8 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(trimmed, "%Y%m%d")
            .ok()
            .map(|date| date.and_time(NaiveTime::MIN));
    }
    None
}

fn is_midnight(value: &NaiveDateTime) -> bool {
    value.time() == NaiveTime::MIN
}

/// Classifies one raw value.
pub fn classify(value: &str) -> TypeTag {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return TypeTag::Text;
    }
    if let Some(number) = parse_number(trimmed) {
        return match number {
            NumberShape::Integral(integral) => classify_integral(trimmed, integral),
            NumberShape::Fractional => TypeTag::Numeric,
        };
    }
    if is_boolean_literal(trimmed) {
        return TypeTag::Boolean;
    }
    match parse_datetime_literal(trimmed) {
        Some(parsed) if is_midnight(&parsed) => TypeTag::Date,
        Some(_) => TypeTag::Timestamp,
        None => TypeTag::Text,
    }
}

/// Classifies a value for column resolution.
///
/// Integer-classified values that also read as a calendar date at midnight
/// (`20210101`) are promoted to `date`.
pub fn classify_for_column(value: &str) -> TypeTag {
    match classify(value) {
        TypeTag::Integer
            if parse_datetime_literal(value)
                .as_ref()
                .is_some_and(is_midnight) =>
        {
            TypeTag::Date
        }
        other => other,
    }
}

/// Distinct tags observed across a sample.
pub fn observed_tags(sample: &ColumnSample) -> BTreeSet<TypeTag> {
    sample
        .values()
        .iter()
        .map(|value| classify_for_column(value))
        .collect()
}

/// Resolves the set of observed tags to one column type.
pub fn resolve_tags(tags: &BTreeSet<TypeTag>) -> TypeTag {
    let mut iter = tags.iter();
    match (iter.next(), iter.next()) {
        (None, _) => TypeTag::Text,
        (Some(only), None) => *only,
        _ => {
            let has = |tag: TypeTag| tags.contains(&tag);
            if has(TypeTag::Text) {
                TypeTag::Text
            } else if has(TypeTag::Timestamp) {
                TypeTag::Timestamp
            } else if has(TypeTag::Date) && has(TypeTag::Integer) {
                TypeTag::Integer
            // A date mixed with smallint, bigint or numeric is not special-cased:
            // it falls through to the numeric chain and the ALTER cast decides.
            } else if has(TypeTag::Numeric) {
                TypeTag::Numeric
            } else if has(TypeTag::Bigint) {
                TypeTag::Bigint
            } else if has(TypeTag::Integer) {
                TypeTag::Integer
            } else if has(TypeTag::Smallint) {
                TypeTag::Smallint
            } else {
                TypeTag::Text
            }
        }
    }
}

pub fn resolve(sample: &ColumnSample) -> TypeTag {
    resolve_tags(&observed_tags(sample))
}

/// Number of non-null values to sample for a table holding `record_count` rows.
pub fn sample_size(record_count: u64) -> u64 {
    let cap = if record_count > LARGE_TABLE_ROWS {
        LARGE_TABLE_SAMPLE
    } else if record_count > MEDIUM_TABLE_ROWS {
        MEDIUM_TABLE_SAMPLE
    } else if record_count > SMALL_TABLE_ROWS {
        MEDIUM_TABLE_SAMPLE
    } else {
        record_count
    };
    record_count.min(cap)
}
