use std::path::Path;

use rust_xlsxwriter::Workbook;

use crate::hexatlas::engine::error::Result;
use crate::hexatlas::engine::io::table::TabularData;

/// Longest worksheet name Excel accepts.
const MAX_SHEET_NAME: usize = 31;

/// Writes the table to a single-sheet workbook. Numeric cells are stored as
/// numbers, empty cells are left blank.
pub fn write_table(path: &Path, table: &TabularData) -> Result<()> {
    let mut workbook_writer = Workbook::new();
    let worksheet = workbook_writer.add_worksheet();
    worksheet.set_name(sanitize_sheet_name(&table.name))?;

    for (col_idx, header) in table.columns.iter().enumerate() {
        worksheet.write_string(0, col_idx as u16, header)?;
    }

    for (row_idx, row) in table.rows.iter().enumerate() {
        let excel_row = (row_idx + 1) as u32;
        for (col_idx, cell) in row.iter().enumerate() {
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(number) if number.is_finite() => {
                    worksheet.write_number(excel_row, col_idx as u16, number)?;
                }
                _ => {
                    worksheet.write_string(excel_row, col_idx as u16, cell)?;
                }
            }
        }
    }

    if !table.columns.is_empty() {
        let mut excel_table = rust_xlsxwriter::Table::new();
        excel_table.set_autofilter(true);
        let col_end = (table.columns.len() as u16).saturating_sub(1);
        let row_end = if table.rows.is_empty() {
            1
        } else {
            table.rows.len() as u32
        };
        worksheet.add_table(0, 0, row_end, col_end, &excel_table)?;
    }

    workbook_writer.save(path)?;
    Ok(())
}

fn sanitize_sheet_name(raw: &str) -> String {
    let invalid = [':', '\\', '/', '?', '*', '[', ']', '\'', '"'];
    let mut sanitized: String = raw
        .chars()
        .map(|ch| {
            if invalid.contains(&ch) || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    sanitized = sanitized.trim().to_string();
    if sanitized.is_empty() {
        sanitized = "Sheet1".to_string();
    }
    if sanitized.chars().count() > MAX_SHEET_NAME {
        sanitized = sanitized.chars().take(MAX_SHEET_NAME).collect();
    }
    sanitized
}
