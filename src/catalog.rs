use std::fmt;

use serde::Serialize;

use crate::{infer::TypeTag, sql};

pub const BUILD_SUFFIX: &str = "_build";

/// A table addressed by schema and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// The staging counterpart, `<name>_build`, in the same schema.
    pub fn build(&self) -> TableRef {
        TableRef::new(&self.schema, format!("{}{BUILD_SUFFIX}", self.name))
    }

    /// `schema.name` with each part quoted when needed.
    pub fn qualified(&self) -> String {
        format!(
            "{}.{}",
            sql::quote_identifier(&self.schema),
            sql::quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: TypeTag,
}

/// A logical table and the current types of its build-table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSpec {
    pub table: TableRef,
    pub columns: Vec<ColumnDef>,
}

impl TableSpec {
    /// A freshly created build table: every column is text.
    pub fn all_text<S: AsRef<str>>(table: TableRef, columns: &[S]) -> Self {
        let columns = columns
            .iter()
            .map(|name| ColumnDef {
                name: name.as_ref().to_string(),
                column_type: TypeTag::Text,
            })
            .collect();
        Self { table, columns }
    }

    pub fn build_table(&self) -> TableRef {
        self.table.build()
    }

    /// Updates a column's type. The catalog may report unquoted names folded
    /// to lower case, so an exact match is tried first, then a case-insensitive
    /// one.
    pub fn set_column_type(&mut self, name: &str, column_type: TypeTag) {
        let position = self
            .columns
            .iter()
            .position(|c| c.name == name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
            });
        if let Some(idx) = position {
            self.columns[idx].column_type = column_type;
        }
    }

    pub fn column_type(&self, name: &str) -> Option<TypeTag> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.column_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_table_appends_suffix_in_same_schema() {
        let table = TableRef::new("schema_hi", "ph_d_person");
        let build = table.build();
        assert_eq!(build.schema, "schema_hi");
        assert_eq!(build.name, "ph_d_person_build");
        assert_eq!(build.to_string(), "schema_hi.ph_d_person_build");
    }

    #[test]
    fn qualified_quotes_unusual_names() {
        let table = TableRef::new("public", "2021 claims");
        assert_eq!(table.qualified(), "public.\"2021 claims\"");
    }

    #[test]
    fn table_spec_tracks_column_types() {
        let mut spec = TableSpec::all_text(TableRef::new("public", "t"), &["id", "name"]);
        assert_eq!(spec.column_type("id"), Some(TypeTag::Text));
        spec.set_column_type("id", TypeTag::Smallint);
        assert_eq!(spec.column_type("id"), Some(TypeTag::Smallint));
        assert_eq!(spec.column_type("missing"), None);
    }
}
