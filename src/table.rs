// src/table.rs

use crate::error::TableError;
use crate::model::CaptionRecord;
use indexmap::IndexSet;
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

pub const ID_COLUMN: &str = "id";

/// Output rows with the union of their fields as columns, `id` always first
#[derive(Debug, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<CaptionRecord>,
}

impl Table {
    /// Keeps the first record for every id. Returns the table and how many
    /// duplicates were dropped.
    pub fn from_records(records: Vec<CaptionRecord>) -> (Self, usize) {
        let mut seen = HashSet::new();
        let mut columns: IndexSet<String> = IndexSet::new();
        columns.insert(ID_COLUMN.to_string());
        let mut rows = Vec::with_capacity(records.len());
        let mut dropped = 0;

        for record in records {
            if !seen.insert(record.id.clone()) {
                dropped += 1;
                continue;
            }
            for key in record.fields.keys() {
                if key != ID_COLUMN {
                    columns.insert(key.clone());
                }
            }
            rows.push(record);
        }

        let table = Self {
            columns: columns.into_iter().collect(),
            rows,
        };
        (table, dropped)
    }

    pub fn write_to<W: Write>(&self, out: W) -> Result<(), TableError> {
        let mut writer = csv::Writer::from_writer(out);
        writer.write_record(&self.columns)?;
        for row in &self.rows {
            let cells = self.columns.iter().map(|column| {
                if column == ID_COLUMN {
                    row.id.as_str()
                } else {
                    row.fields.get(column).map(String::as_str).unwrap_or("")
                }
            });
            writer.write_record(cells)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), TableError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.write_to(std::fs::File::create(path)?)
    }
}
