use crate::schema::CellValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A sheet as read from the workbook: ordered headers and rows of raw cells.
/// Rows are always exactly as wide as the header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl RawFrame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Builds a frame from headers and rows, padding short rows with empty
    /// cells and truncating long ones.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        let mut frame = Self::new(columns);
        for row in rows {
            frame.push_row(row);
        }
        frame
    }

    pub fn push_row(&mut self, mut row: Vec<CellValue>) {
        row.resize(self.columns.len(), CellValue::Empty);
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let idx = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(idx))
    }

    pub fn column_values<'a>(&'a self, column: &str) -> Option<impl Iterator<Item = &'a CellValue>> {
        let idx = self.column_index(column)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    /// Renames headers through `mapping`, trying an exact match before a
    /// trimmed case-insensitive one. Unmapped headers are kept, trimmed and
    /// lower-cased. When two headers land on the same name the first one wins
    /// and the later column is dropped.
    pub fn rename_columns(self, mapping: &[(&str, &str)]) -> Self {
        let exact: HashMap<&str, &str> = mapping.iter().copied().collect();
        let folded: HashMap<String, &str> = mapping
            .iter()
            .map(|(source, target)| (source.trim().to_lowercase(), *target))
            .collect();

        let mut keep = Vec::with_capacity(self.columns.len());
        let mut renamed: Vec<String> = Vec::with_capacity(self.columns.len());
        for header in &self.columns {
            let target = exact
                .get(header.as_str())
                .map(|t| t.to_string())
                .or_else(|| folded.get(&header.trim().to_lowercase()).map(|t| t.to_string()))
                .unwrap_or_else(|| header.trim().to_lowercase());
            if renamed.contains(&target) {
                keep.push(false);
            } else {
                keep.push(true);
                renamed.push(target);
            }
        }

        let rows = self
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .zip(keep.iter())
                    .filter_map(|(cell, keep)| keep.then_some(cell))
                    .collect()
            })
            .collect();

        Self {
            columns: renamed,
            rows,
        }
    }

    /// Stacks frames vertically, aligning by column name. Columns missing from
    /// a frame are filled with empty cells.
    pub fn concat(frames: Vec<RawFrame>) -> RawFrame {
        let mut columns: Vec<String> = Vec::new();
        for frame in &frames {
            for column in &frame.columns {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut combined = RawFrame::new(columns);
        for frame in frames {
            let positions: Vec<Option<usize>> = combined
                .columns
                .iter()
                .map(|c| frame.column_index(c))
                .collect();
            for row in frame.rows {
                let aligned = positions
                    .iter()
                    .map(|pos| pos.map(|i| row[i].clone()).unwrap_or_default())
                    .collect();
                combined.rows.push(aligned);
            }
        }
        combined
    }
}
