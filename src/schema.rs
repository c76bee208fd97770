use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as reported by the backend, lowercased.
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Option<String>) -> Self {
        self.default = default;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableInfo {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    // Rendered for the translation prompt
    fn to_prompt(&self) -> String {
        let columns: Vec<String> = self
            .columns
            .iter()
            .map(|col| format!("{} ({})", col.name, col.data_type))
            .collect();

        format!("Table: {}\nColumns: {}", self.name, columns.join(", "))
    }
}

/// Snapshot of a backend's structure, produced on demand and never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub tables: Vec<TableInfo>,
    pub total_tables: usize,
}

impl SchemaInfo {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        let total_tables = tables.len();
        Self {
            tables,
            total_tables,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Formats the schema as `Table: x\nColumns: a (int), b (text)` blocks.
    pub fn to_prompt(&self) -> String {
        self.tables
            .iter()
            .map(TableInfo::to_prompt)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn preview(&self, max_tables: usize) -> SchemaPreview {
        SchemaPreview {
            total_tables: self.total_tables,
            tables: self
                .tables
                .iter()
                .take(max_tables)
                .map(|table| table.name.clone())
                .collect(),
        }
    }
}

/// Short summary attached to connection-test reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaPreview {
    pub total_tables: usize,
    pub tables: Vec<String>,
}
