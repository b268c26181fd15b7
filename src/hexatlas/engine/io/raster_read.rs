use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::hexatlas::engine::error::{EngineError, Result};
use crate::hexatlas::engine::raster::{GeoTransform, RasterGrid};

/// Sentinel assumed when the header omits `NODATA_value`.
pub const DEFAULT_NODATA: f64 = -9999.0;

const HEADER_KEYS: [&str; 10] = [
    "ncols",
    "nrows",
    "xllcorner",
    "xllcenter",
    "yllcorner",
    "yllcenter",
    "cellsize",
    "dx",
    "dy",
    "nodata_value",
];

/// Reads an ESRI ASCII grid into a north-up [`RasterGrid`].
///
/// Every failure, including a missing file, is reported as
/// [`EngineError::SourceRead`] so callers can skip the source.
pub fn read_ascii_grid(path: &Path) -> Result<RasterGrid> {
    let source_name = path.display().to_string();
    let text =
        fs::read_to_string(path).map_err(|err| EngineError::source_read(&source_name, err))?;
    parse_ascii_grid(&text).map_err(|reason| EngineError::source_read(source_name, reason))
}

/// Parses the textual ASCII grid format.
pub fn parse_ascii_grid(text: &str) -> std::result::Result<RasterGrid, String> {
    let mut tokens = text.split_whitespace().peekable();
    let mut header: HashMap<String, f64> = HashMap::new();

    while let Some(&token) = tokens.peek() {
        let key = token.to_ascii_lowercase();
        if !HEADER_KEYS.contains(&key.as_str()) {
            break;
        }
        tokens.next();
        let raw = tokens
            .next()
            .ok_or_else(|| format!("header key '{key}' has no value"))?;
        let value: f64 = raw
            .parse()
            .map_err(|_| format!("header key '{key}' has non-numeric value '{raw}'"))?;
        header.insert(key, value);
    }

    let ncols = dimension(&header, "ncols")?;
    let nrows = dimension(&header, "nrows")?;
    let cellsize = header.get("cellsize").copied();
    let cell_width = header
        .get("dx")
        .copied()
        .or(cellsize)
        .ok_or("header is missing 'cellsize' or 'dx'")?;
    let cell_height = header
        .get("dy")
        .copied()
        .or(cellsize)
        .ok_or("header is missing 'cellsize' or 'dy'")?;
    if cell_width <= 0.0 || cell_height <= 0.0 {
        return Err("cell size must be positive".into());
    }

    let (left, bottom) = match (
        header.get("xllcorner"),
        header.get("yllcorner"),
        header.get("xllcenter"),
        header.get("yllcenter"),
    ) {
        (Some(&x), Some(&y), _, _) => (x, y),
        (_, _, Some(&x), Some(&y)) => (x - cell_width / 2.0, y - cell_height / 2.0),
        _ => return Err("header must define xllcorner/yllcorner or xllcenter/yllcenter".into()),
    };
    let top = bottom + nrows as f64 * cell_height;
    let nodata = header.get("nodata_value").copied().unwrap_or(DEFAULT_NODATA);

    let values = tokens
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| format!("non-numeric pixel value '{token}'"))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let transform = GeoTransform::north_up(left, top, cell_width, -cell_height);
    RasterGrid::new(ncols, nrows, values, transform, Some(nodata)).map_err(|err| err.to_string())
}

fn dimension(header: &HashMap<String, f64>, key: &str) -> std::result::Result<usize, String> {
    let value = header
        .get(key)
        .copied()
        .ok_or_else(|| format!("header is missing '{key}'"))?;
    if value < 1.0 || value.fract() != 0.0 {
        return Err(format!("'{key}' must be a positive integer, found {value}"));
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_corner_header() {
        let grid = parse_ascii_grid(
            "ncols 2\nnrows 2\nxllcorner 36.0\nyllcorner -1.0\ncellsize 0.5\nNODATA_value -1\n1 2\n3 -1\n",
        )
        .expect("grid parsed");
        assert_eq!((grid.width(), grid.height()), (2, 2));
        assert_eq!(grid.nodata(), Some(-1.0));
        let transform = grid.transform();
        assert_eq!(transform.apply(0.0, 0.0), (36.0, 0.0));
        assert_eq!(transform.apply(2.0, 2.0), (37.0, -1.0));
    }

    #[test]
    fn center_header_is_shifted_to_corner() {
        let grid = parse_ascii_grid("ncols 1\nnrows 1\nxllcenter 10.5\nyllcenter 20.5\ncellsize 1\n7\n")
            .expect("grid parsed");
        assert_eq!(grid.transform().apply(0.0, 0.0), (10.0, 21.0));
        assert_eq!(grid.nodata(), Some(DEFAULT_NODATA));
    }

    #[test]
    fn rejects_short_or_malformed_grids() {
        assert!(parse_ascii_grid("ncols 2\nnrows 2\nxllcorner 0\nyllcorner 0\ncellsize 1\n1 2 3\n").is_err());
        assert!(parse_ascii_grid("ncols 1\nnrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\nabc\n").is_err());
        assert!(parse_ascii_grid("nrows 1\nxllcorner 0\nyllcorner 0\ncellsize 1\n1\n").is_err());
    }

    #[test]
    fn missing_file_is_a_source_read_error() {
        let error = read_ascii_grid(Path::new("/nonexistent/raster_m15.asc")).expect_err("missing");
        assert!(matches!(error, EngineError::SourceRead { .. }));
    }
}
