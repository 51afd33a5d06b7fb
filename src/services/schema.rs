use crate::models::{SheetSchema, Workbook, SAMPLE_SIZE};

/// Derive one schema per sheet, preserving workbook order.
///
/// The column list is exactly the keys of the first record (no union
/// across rows); the sample is the first `SAMPLE_SIZE` records verbatim.
/// An empty workbook yields an empty vec.
pub fn extract_schemas(workbook: &Workbook) -> Vec<SheetSchema> {
    workbook
        .sheets()
        .iter()
        .map(|sheet| SheetSchema {
            sheet_name: sheet.name.clone(),
            columns: sheet
                .rows
                .first()
                .map(|record| record.keys().cloned().collect())
                .unwrap_or_default(),
            row_count: sheet.rows.len(),
            sample: sheet.rows.iter().take(SAMPLE_SIZE).cloned().collect(),
        })
        .collect()
}
