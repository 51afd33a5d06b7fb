//! Upload validation, file fetching, and spreadsheet parsing into the
//! in-memory workbook model.

use std::collections::HashSet;
use std::io::{Cursor, Read, Seek};

use bytes::Bytes;
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsx};
use reqwest::Client;

use crate::error::AppError;
use crate::models::{Record, Value, Workbook};

const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_CONTENT_TYPE: &str = "application/vnd.ms-excel";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetKind {
    Xlsx,
    Xls,
}

/// Upload-boundary check: the declared content type wins, the filename
/// extension is the fallback. Runs before any bytes are fetched.
pub fn validate_upload(
    file_name: &str,
    content_type: Option<&str>,
) -> Result<SpreadsheetKind, AppError> {
    match content_type {
        Some(XLSX_CONTENT_TYPE) => return Ok(SpreadsheetKind::Xlsx),
        Some(XLS_CONTENT_TYPE) => return Ok(SpreadsheetKind::Xls),
        _ => {}
    }

    let lower = file_name.to_lowercase();
    if lower.ends_with(".xlsx") {
        Ok(SpreadsheetKind::Xlsx)
    } else if lower.ends_with(".xls") {
        Ok(SpreadsheetKind::Xls)
    } else {
        Err(AppError::FileValidation(format!(
            "\"{file_name}\" is not a supported spreadsheet (.xlsx or .xls)"
        )))
    }
}

pub async fn fetch_file(url: &str, max_bytes: usize) -> Result<Bytes, AppError> {
    let client = Client::new();
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Http(format!("failed to fetch file: {e}")))?;

    if !response.status().is_success() {
        return Err(AppError::Http(format!(
            "failed to fetch file. Status: {}",
            response.status()
        )));
    }

    if let Some(length) = response.content_length() {
        if length as usize > max_bytes {
            return Err(AppError::FileValidation(format!(
                "file is {length} bytes, limit is {max_bytes}"
            )));
        }
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| AppError::Http(format!("failed to read response bytes: {e}")))?;

    if bytes.len() > max_bytes {
        return Err(AppError::FileValidation(format!(
            "file is {} bytes, limit is {max_bytes}",
            bytes.len()
        )));
    }

    Ok(bytes)
}

/// Parse spreadsheet bytes into a Workbook. The first row of each sheet is
/// the header row; sheets with no data rows are skipped. Fails when no
/// sheet yields any records.
pub fn parse_workbook(data: Bytes, kind: SpreadsheetKind) -> Result<Workbook, AppError> {
    let cursor = Cursor::new(data);

    let workbook = match kind {
        SpreadsheetKind::Xlsx => {
            let mut reader: Xlsx<_> = open_workbook_from_rs(cursor)
                .map_err(|e| AppError::Parse(format!("failed to open xlsx workbook: {e}")))?;
            collect_sheets(&mut reader)
        }
        SpreadsheetKind::Xls => {
            let mut reader: Xls<_> = open_workbook_from_rs(cursor)
                .map_err(|e| AppError::Parse(format!("failed to open xls workbook: {e}")))?;
            collect_sheets(&mut reader)
        }
    };

    if workbook.is_empty() {
        return Err(AppError::Parse(
            "no data rows found in any sheet".to_string(),
        ));
    }

    Ok(workbook)
}

fn collect_sheets<RS, R>(reader: &mut R) -> Workbook
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Display,
{
    let sheet_names = reader.sheet_names().to_vec();
    tracing::info!(sheets = sheet_names.len(), "reading workbook");

    let mut sheets = Vec::new();
    for sheet_name in &sheet_names {
        let range = match reader.worksheet_range(sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!("failed to read worksheet {}: {}", sheet_name, e);
                continue;
            }
        };

        let mut rows = range.rows();
        let Some(header_row) = rows.next() else {
            tracing::warn!("sheet {} is empty, skipping", sheet_name);
            continue;
        };

        let headers = header_names(header_row);
        let records: Vec<Record> = rows.map(|row| record_from_row(&headers, row)).collect();

        if records.is_empty() {
            tracing::warn!("sheet {} has a header but no data rows, skipping", sheet_name);
            continue;
        }

        tracing::info!(
            sheet = %sheet_name,
            rows = records.len(),
            columns = headers.len(),
            "sheet loaded"
        );
        sheets.push((sheet_name.clone(), records));
    }

    Workbook::from_sheets(sheets)
}

/// Header cells verbatim (trimmed, case preserved). Blank headers are
/// named positionally; duplicates get a numeric suffix.
fn header_names(cells: &[Data]) -> Vec<String> {
    let mut taken = HashSet::new();
    cells
        .iter()
        .enumerate()
        .map(|(idx, cell)| {
            let raw = cell.to_string().trim().to_string();
            let base = if raw.is_empty() {
                format!("column_{}", idx + 1)
            } else {
                raw
            };

            let mut name = base.clone();
            let mut counter = 1;
            while !taken.insert(name.clone()) {
                name = format!("{}_{}", base, counter);
                counter += 1;
            }
            name
        })
        .collect()
}

fn record_from_row(headers: &[String], row: &[Data]) -> Record {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let value = row.get(idx).map(cell_to_value).unwrap_or(Value::Null);
            (name.clone(), value)
        })
        .collect()
}

fn cell_to_value(cell: &Data) -> Value {
    match cell {
        Data::Empty => Value::Null,
        Data::String(s) => Value::Text(s.clone()),
        Data::Float(f) => Value::Number(*f),
        Data::Int(i) => Value::Number(*i as f64),
        Data::Bool(b) => Value::Bool(*b),
        // Excel serial date number; the model sees it as a plain number.
        Data::DateTime(dt) => Value::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) => Value::Null,
    }
}
