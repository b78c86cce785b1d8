//! SQL text helpers shared by every dialect.
//!
//! Statements that cannot bind parameters are assembled from these functions
//! only, so escaping lives in exactly one place.

use std::sync::OnceLock;

use itertools::Itertools;
use regex::Regex;

fn plain_identifier() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("identifier pattern compiles")
    })
}

/// Escapes a value for use inside a single-quoted SQL literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Renders a value as a quoted SQL text literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", escape_literal(value))
}

/// Renders an optional value, with `None` as `NULL`.
pub fn literal_or_null(value: Option<&str>) -> String {
    value.map(quote_literal).unwrap_or_else(|| "NULL".to_string())
}

/// Reserved key words of PostgreSQL and Vertica, lower case, sorted.
const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric",
    "authorization", "between", "binary", "both", "case", "cast", "check", "collate",
    "collation", "column", "concurrently", "constraint", "correlation", "create", "cross",
    "current_catalog", "current_database", "current_date", "current_role", "current_schema",
    "current_time", "current_timestamp", "current_user", "datediff", "datetime", "default",
    "deferrable", "desc", "distinct", "do", "else", "encoded", "end", "except", "false",
    "fetch", "flex", "flexible", "for", "foreign", "freeze", "from", "full", "grant", "group",
    "grouped", "having", "ilike", "in", "initially", "inner", "intersect", "interval",
    "intervalym", "into", "is", "isnull", "join", "ksafe", "lateral", "leading", "left",
    "like", "limit", "localtime", "localtimestamp", "match", "natural", "new", "not",
    "notnull", "null", "nullsequal", "off", "offset", "old", "on", "only", "or", "order",
    "outer", "overlaps", "pinned", "placing", "primary", "projection", "references",
    "returning", "right", "schema", "segmented", "select", "session_user", "similar", "some",
    "symmetric", "sysdate", "system_user", "table", "tablesample", "then", "timeseries", "to",
    "trailing", "true", "unbounded", "union", "unique", "unsegmented", "user", "using",
    "variadic", "verbose", "when", "where", "window", "with", "within",
];

pub fn is_plain_identifier(name: &str) -> bool {
    plain_identifier().is_match(name)
}

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS
        .binary_search(&name.to_ascii_lowercase().as_str())
        .is_ok()
}

fn needs_quotes(name: &str) -> bool {
    !is_plain_identifier(name) || is_reserved_word(name)
}

/// Quotes an identifier only when it would not survive unquoted: names with
/// characters outside `[A-Za-z0-9_$]`, a leading digit, or a reserved word.
///
/// Plain names are left as written so the backend folds their case the same
/// way the catalog reports them back.
pub fn quote_identifier(name: &str) -> String {
    if needs_quotes(name) {
        format!("\"{}\"", name.replace('"', "\"\""))
    } else {
        name.to_string()
    }
}

/// The name a case-folding catalog stores for `name` as rendered by
/// [`quote_identifier`]: unquoted names fold to lower case, quoted ones are
/// kept verbatim.
pub fn catalog_name(name: &str) -> String {
    if needs_quotes(name) {
        name.to_string()
    } else {
        name.to_lowercase()
    }
}

pub fn column_list<S: AsRef<str>>(columns: &[S]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(column.as_ref()))
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_literal_doubles_single_quotes() {
        assert_eq!(escape_literal("O'Brien"), "O''Brien");
        assert_eq!(escape_literal("''"), "''''");
        assert_eq!(escape_literal("plain"), "plain");
    }

    #[test]
    fn quote_literal_wraps_and_escapes() {
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal(""), "''");
        assert_eq!(literal_or_null(None), "NULL");
        assert_eq!(literal_or_null(Some("x")), "'x'");
    }

    #[test]
    fn quote_identifier_leaves_plain_names() {
        assert_eq!(quote_identifier("signup_date"), "signup_date");
        assert_eq!(quote_identifier("PersonID"), "PersonID");
        assert_eq!(quote_identifier("First Name"), "\"First Name\"");
        assert_eq!(quote_identifier("2021_total"), "\"2021_total\"");
        assert_eq!(quote_identifier("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn reserved_words_are_quoted() {
        assert_eq!(quote_identifier("order"), "\"order\"");
        assert_eq!(quote_identifier("Group"), "\"Group\"");
        assert_eq!(quote_identifier("user"), "\"user\"");
        assert_eq!(quote_identifier("order_id"), "order_id");
        assert_eq!(column_list(&["id", "order"]), "id, \"order\"");
    }

    #[test]
    fn reserved_word_list_is_sorted_for_lookup() {
        assert!(RESERVED_WORDS.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn catalog_name_folds_only_unquoted_names() {
        assert_eq!(catalog_name("Schema_HI"), "schema_hi");
        assert_eq!(catalog_name("people_build"), "people_build");
        assert_eq!(catalog_name("First Name"), "First Name");
        assert_eq!(catalog_name("Order"), "Order");
    }

    #[test]
    fn column_list_joins_quoted_names() {
        assert_eq!(column_list(&["id", "First Name"]), "id, \"First Name\"");
    }
}
