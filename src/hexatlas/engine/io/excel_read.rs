use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::io::table::TabularData;

/// Reads one worksheet as a table. The first row is the header; `sheet`
/// defaults to the first sheet in the workbook.
pub fn read_table(path: &Path, sheet: Option<&str>) -> Result<TabularData> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| EngineError::source_read(path.display().to_string(), "workbook has no sheets"))?,
    };
    let range = read_required_sheet(&mut workbook, &sheet_name)?;

    let mut rows = range.rows();
    let columns: Vec<String> = match rows.next() {
        Some(header) => header
            .iter()
            .map(|cell| cell_to_string(Some(cell)).trim().to_string())
            .collect(),
        None => Vec::new(),
    };

    let mut data = TabularData::new(sheet_name, columns);
    for row in rows {
        let cells: Vec<String> = row.iter().map(|cell| cell_to_string(Some(cell))).collect();
        if cells.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        data.rows.push(cells);
    }
    Ok(data)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<calamine::Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| EngineError::source_read(name, format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(EngineError::from)?;
    Ok(range)
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
