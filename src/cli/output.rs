use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// What a command shows on stdout.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Table {
        headers: &'static [&'static str],
        rows: Vec<Vec<String>>,
    },
    /// Name/value pairs of a single row, in display order.
    Fields(Vec<(&'static str, String)>),
    Message(String),
}

/// A command's result: a human view plus the machine-readable data behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub view: View,
    pub data: Value,
}

impl Output {
    pub fn table<T: Serialize>(headers: &'static [&'static str], rows: Vec<Vec<String>>, data: &T) -> Self {
        Self {
            view: View::Table { headers, rows },
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn fields<T: Serialize>(fields: Vec<(&'static str, String)>, data: &T) -> Self {
        Self {
            view: View::Fields(fields),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn message<T: Serialize>(text: impl Into<String>, data: &T) -> Self {
        Self {
            view: View::Message(text.into()),
            data: serde_json::to_value(data).unwrap_or(Value::Null),
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&self.data).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"))
            }
            OutputFormat::Table => match &self.view {
                View::Table { headers, rows } => {
                    let mut table = new_table(headers);
                    for row in rows {
                        table.add_row(row);
                    }
                    table.to_string()
                }
                View::Fields(fields) => {
                    let mut table = new_table(&["Field", "Value"]);
                    for (name, value) in fields {
                        table.add_row(vec![Cell::new(name).fg(Color::Green), Cell::new(value)]);
                    }
                    table.to_string()
                }
                View::Message(text) => text.clone(),
            },
        }
    }
}

fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(headers.iter().map(|h| Cell::new(*h).fg(Color::Cyan)).collect::<Vec<_>>());
    table
}
