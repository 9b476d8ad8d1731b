use std::io::Cursor;

use calamine::{Data, Reader, open_workbook_auto_from_rs};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::expr::operand::number_value;

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xls", "ods"];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuxiliaryError {
    #[error("'{0}' is not a spreadsheet (expected .xlsx, .xls, or .ods)")]
    UnsupportedType(String),
    #[error("failed to read workbook '{file}': {message}")]
    Workbook { file: String, message: String },
    #[error("workbook '{0}' has no sheets")]
    NoSheets(String),
    #[error("no attached file with id '{0}'")]
    UnknownFile(String),
    #[error("row {index} is out of range for '{file}' ({len} rows)")]
    RowOutOfRange {
        file: String,
        index: usize,
        len: usize,
    },
    #[error("file name cannot be blank")]
    BlankName,
}

/// Tabular file attached to a report: first sheet, one object per data row keyed by header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuxiliaryFile {
    pub id: String,
    pub file_name: String,
    #[serde(default)]
    pub data: Vec<Map<String, Value>>,
}

/// Reads the first sheet of a workbook. The first row is the header.
pub fn parse_workbook(file_name: &str, bytes: &[u8]) -> Result<Vec<Map<String, Value>>, AuxiliaryError> {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();
    if !WORKBOOK_EXTENSIONS.contains(&extension.as_str()) {
        return Err(AuxiliaryError::UnsupportedType(file_name.to_string()));
    }

    let workbook_error = |message: String| AuxiliaryError::Workbook {
        file: file_name.to_string(),
        message,
    };
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| workbook_error(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| AuxiliaryError::NoSheets(file_name.to_string()))?
        .map_err(|err| workbook_error(err.to_string()))?;

    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let headers: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(index, cell)| {
            let name = cell.to_string();
            let name = name.trim();
            if name.is_empty() {
                format!("Column{}", index + 1)
            } else {
                name.to_string()
            }
        })
        .collect();

    let data = rows
        .filter(|row| row.iter().any(|cell| !matches!(cell, Data::Empty)))
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .map(|(index, name)| {
                    let value = row.get(index).map(cell_value).unwrap_or(Value::Null);
                    (name.clone(), value)
                })
                .collect()
        })
        .collect();
    Ok(data)
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::Int(value) => Value::from(*value),
        Data::Float(value) => number_value(*value).unwrap_or(Value::Null),
        Data::Bool(flag) => Value::Bool(*flag),
        Data::String(text) => Value::String(text.clone()),
        other => Value::String(other.to_string()),
    }
}

/// Files attached during review, in attach order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AuxiliaryFiles {
    files: Vec<AuxiliaryFile>,
}

impl AuxiliaryFiles {
    pub fn new(files: Vec<AuxiliaryFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[AuxiliaryFile] {
        &self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AuxiliaryFile> {
        self.files.iter().find(|file| file.id == id)
    }

    /// Parses and attaches a workbook, returning the new file's id.
    pub fn attach(&mut self, file_name: &str, bytes: &[u8]) -> Result<String, AuxiliaryError> {
        let data = parse_workbook(file_name, bytes)?;
        let id = self.next_id();
        self.files.push(AuxiliaryFile {
            id: id.clone(),
            file_name: file_name.to_string(),
            data,
        });
        Ok(id)
    }

    pub fn rename(&mut self, id: &str, file_name: &str) -> Result<(), AuxiliaryError> {
        let file_name = file_name.trim();
        if file_name.is_empty() {
            return Err(AuxiliaryError::BlankName);
        }
        self.get_mut(id)?.file_name = file_name.to_string();
        Ok(())
    }

    pub fn edit_cell(
        &mut self,
        id: &str,
        row_index: usize,
        column: &str,
        value: Value,
    ) -> Result<(), AuxiliaryError> {
        let file = self.get_mut(id)?;
        let len = file.data.len();
        let Some(row) = file.data.get_mut(row_index) else {
            return Err(AuxiliaryError::RowOutOfRange {
                file: file.file_name.clone(),
                index: row_index,
                len,
            });
        };
        row.insert(column.to_string(), value);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.files.len();
        self.files.retain(|file| file.id != id);
        self.files.len() != before
    }

    pub fn to_vec(&self) -> Vec<AuxiliaryFile> {
        self.files.clone()
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut AuxiliaryFile, AuxiliaryError> {
        self.files
            .iter_mut()
            .find(|file| file.id == id)
            .ok_or_else(|| AuxiliaryError::UnknownFile(id.to_string()))
    }

    fn next_id(&self) -> String {
        let last = self
            .files
            .iter()
            .filter_map(|file| file.id.strip_prefix("aux-")?.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        format!("aux-{}", last + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attached() -> AuxiliaryFiles {
        AuxiliaryFiles::new(vec![AuxiliaryFile {
            id: "aux-3".into(),
            file_name: "stock.xlsx".into(),
            data: vec![json!({ "Item": "Soap", "Qty": 4 })
                .as_object()
                .cloned()
                .unwrap_or_default()],
        }])
    }

    #[test]
    fn rejects_non_workbooks() {
        assert_eq!(
            parse_workbook("notes.txt", b"hello"),
            Err(AuxiliaryError::UnsupportedType("notes.txt".into()))
        );
        assert!(matches!(
            parse_workbook("broken.xlsx", b"not a zip"),
            Err(AuxiliaryError::Workbook { .. })
        ));
    }

    #[test]
    fn edits_and_removes_attached_files() {
        let mut files = attached();
        files.rename("aux-3", " stock-march.xlsx ").expect("rename");
        files.edit_cell("aux-3", 0, "Qty", json!(5)).expect("edit");
        assert_eq!(files.get("aux-3").map(|f| f.file_name.as_str()), Some("stock-march.xlsx"));
        assert_eq!(files.files()[0].data[0]["Qty"], 5);
        assert!(matches!(
            files.edit_cell("aux-3", 9, "Qty", json!(1)),
            Err(AuxiliaryError::RowOutOfRange { len: 1, .. })
        ));
        assert_eq!(files.next_id(), "aux-4");
        assert!(files.remove("aux-3"));
        assert!(!files.remove("aux-3"));
        assert!(files.is_empty());
    }
}
