use std::path::{Path, PathBuf};

use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::error::{ReaderError, Result};

/// Value of a single spreadsheet cell as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(NaiveDateTime),
    /// Serialized as `null`
    Empty,
}

impl CellValue {
    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl From<&Data> for CellValue {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::String(s.clone()),
            Data::Int(i) => CellValue::Int(*i),
            Data::Float(f) => CellValue::Float(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => dt
                .as_datetime()
                .map(CellValue::DateTime)
                .unwrap_or(CellValue::Float(dt.as_f64())),
            Data::DateTimeIso(s) => parse_iso_datetime(s)
                .map(CellValue::DateTime)
                .unwrap_or_else(|| CellValue::String(s.clone())),
            Data::DurationIso(s) => CellValue::String(s.clone()),
            // Error cells are reported the way a spreadsheet displays them, e.g. "#DIV/0!"
            Data::Error(e) => CellValue::String(e.to_string()),
        }
    }
}

fn parse_iso_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

/// Read-only view of a parsed spreadsheet document.
///
/// Coordinates are zero-based; translation from the one-based request
/// coordinates happens in the handlers.
pub trait DocumentHandle: Send + Sync + 'static {
    /// Sheet names in workbook order
    fn sheet_names(&self) -> Vec<String>;

    /// Value at (`row`, `col`), `None` when the cell holds nothing
    fn cell(&self, sheet_name: &str, row: u32, col: u32) -> Result<Option<CellValue>>;

    /// All rows of a sheet in document order
    fn rows(&self, sheet_name: &str, skip_empty_rows: bool) -> Result<Vec<Vec<CellValue>>>;
}

/// Turns a file on disk into a [`DocumentHandle`].
pub trait ParserAdapter: Send + Sync + 'static {
    type Document: DocumentHandle;

    fn parse(&self, path: &Path) -> Result<Self::Document>;
}

/// Parser backed by calamine (xlsx, xlsm, xlsb, xls, ods)
#[derive(Debug, Clone, Copy, Default)]
pub struct CalamineParser;

impl ParserAdapter for CalamineParser {
    type Document = Workbook;

    fn parse(&self, path: &Path) -> Result<Workbook> {
        let parse_error = |message: String| ReaderError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let mut workbook: Sheets<_> =
            open_workbook_auto(path).map_err(|e| parse_error(e.to_string()))?;

        let mut sheets = Vec::new();
        for sheet_name in workbook.sheet_names().to_owned() {
            let range = workbook
                .worksheet_range(&sheet_name)
                .map_err(|e| parse_error(format!("sheet '{}': {}", sheet_name, e)))?;
            sheets.push(Sheet {
                name: sheet_name,
                range,
            });
        }

        log::debug!("Parsed {} sheet(s) from {}", sheets.len(), path.display());
        Ok(Workbook {
            path: path.to_path_buf(),
            sheets,
        })
    }
}

#[derive(Debug)]
struct Sheet {
    name: String,
    range: Range<Data>,
}

/// Fully loaded workbook: every sheet's cells are read when the file is parsed,
/// so lookups never go back to disk.
#[derive(Debug)]
pub struct Workbook {
    path: PathBuf,
    sheets: Vec<Sheet>,
}

impl Workbook {
    /// Build a workbook from ranges that are already in memory
    pub fn from_ranges(path: impl Into<PathBuf>, sheets: Vec<(String, Range<Data>)>) -> Self {
        Self {
            path: path.into(),
            sheets: sheets
                .into_iter()
                .map(|(name, range)| Sheet { name, range })
                .collect(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn sheet(&self, name: &str) -> Result<&Sheet> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .ok_or_else(|| ReaderError::SheetNotFound {
                sheet: name.to_string(),
                file: self.path.clone(),
            })
    }
}

impl DocumentHandle for Workbook {
    fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.clone()).collect()
    }

    fn cell(&self, sheet_name: &str, row: u32, col: u32) -> Result<Option<CellValue>> {
        let sheet = self.sheet(sheet_name)?;
        Ok(sheet
            .range
            .get_value((row, col))
            .map(CellValue::from)
            .filter(|value| !value.is_empty()))
    }

    fn rows(&self, sheet_name: &str, skip_empty_rows: bool) -> Result<Vec<Vec<CellValue>>> {
        let sheet = self.sheet(sheet_name)?;
        let (Some((first_row, first_col)), Some((last_row, last_col))) =
            (sheet.range.start(), sheet.range.end())
        else {
            return Ok(Vec::new());
        };
        let is_blank = |row: u32| {
            (first_col..=last_col)
                .all(|col| matches!(sheet.range.get_value((row, col)), None | Some(Data::Empty)))
        };

        // Rows are anchored at A1 so rows[r][c] is the cell at (r, c). Rows
        // above the used range are always empty.
        let from_row = if skip_empty_rows { first_row } else { 0 };
        let mut rows = Vec::new();
        for row in from_row..=last_row {
            if skip_empty_rows && is_blank(row) {
                continue;
            }
            let values: Vec<CellValue> = (0..=last_col)
                .map(|col| {
                    sheet
                        .range
                        .get_value((row, col))
                        .map(CellValue::from)
                        .unwrap_or(CellValue::Empty)
                })
                .collect();
            rows.push(values);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_range() -> Range<Data> {
        let mut range = Range::new((0, 0), (3, 1));
        range.set_value((0, 0), Data::String("Name".to_string()));
        range.set_value((0, 1), Data::String("Age".to_string()));
        range.set_value((1, 0), Data::String("Ana".to_string()));
        range.set_value((1, 1), Data::Int(30));
        // row 2 left empty
        range.set_value((3, 0), Data::String("Bo".to_string()));
        range.set_value((3, 1), Data::Float(41.5));
        range
    }

    fn workbook() -> Workbook {
        Workbook::from_ranges(
            "/files/report.xlsx",
            vec![
                ("Sheet1".to_string(), report_range()),
                ("Empty".to_string(), Range::empty()),
            ],
        )
    }

    #[test]
    fn test_sheet_names_keep_workbook_order() {
        assert_eq!(workbook().sheet_names(), vec!["Sheet1", "Empty"]);
    }

    #[test]
    fn test_cell_lookup_is_zero_based() {
        let wb = workbook();
        assert_eq!(
            wb.cell("Sheet1", 0, 0).unwrap(),
            Some(CellValue::String("Name".to_string()))
        );
        assert_eq!(wb.cell("Sheet1", 1, 1).unwrap(), Some(CellValue::Int(30)));
        assert_eq!(wb.cell("Sheet1", 2, 0).unwrap(), None);
        assert_eq!(wb.cell("Sheet1", 100, 100).unwrap(), None);
    }

    #[test]
    fn test_sheet_lookup_is_case_sensitive() {
        let err = workbook().cell("sheet1", 0, 0).unwrap_err();
        assert!(matches!(err, ReaderError::SheetNotFound { ref sheet, .. } if sheet == "sheet1"));
    }

    #[test]
    fn test_rows_skip_empty_rows_by_request() {
        let wb = workbook();

        let rows = wb.rows("Sheet1", true).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2][0], CellValue::String("Bo".to_string()));

        let rows = wb.rows("Sheet1", false).unwrap();
        assert_eq!(rows.len(), 4);
        assert!(rows[2].iter().all(CellValue::is_empty));
        assert_eq!(rows[3][1], CellValue::Float(41.5));
    }

    #[test]
    fn test_rows_are_anchored_at_a1() {
        let mut range = Range::new((1, 1), (1, 2));
        range.set_value((1, 1), Data::Bool(true));
        range.set_value((1, 2), Data::String("x".to_string()));
        let wb = Workbook::from_ranges("/files/offset.xlsx", vec![("S".to_string(), range)]);

        let rows = wb.rows("S", false).unwrap();
        assert_eq!(
            rows,
            vec![
                vec![CellValue::Empty, CellValue::Empty, CellValue::Empty],
                vec![CellValue::Empty, CellValue::Bool(true), CellValue::String("x".to_string())],
            ]
        );
        assert_eq!(wb.rows("S", true).unwrap().len(), 1);
        assert_eq!(wb.cell("S", 1, 1).unwrap(), Some(CellValue::Bool(true)));
    }

    #[test]
    fn test_sparse_sheet_only_materializes_used_rows() {
        let mut range = Range::new((20_000, 3), (20_000, 3));
        range.set_value((20_000, 3), Data::Int(7));
        let wb = Workbook::from_ranges("/files/sparse.xlsx", vec![("S".to_string(), range)]);

        let rows = wb.rows("S", true).unwrap();
        assert_eq!(
            rows,
            vec![vec![CellValue::Empty, CellValue::Empty, CellValue::Empty, CellValue::Int(7)]]
        );

        let padded = wb.rows("S", false).unwrap();
        assert_eq!(padded.len(), 20_001);
        assert_eq!(padded[20_000], rows[0]);
    }

    #[test]
    fn test_empty_sheet_has_no_rows() {
        assert!(workbook().rows("Empty", false).unwrap().is_empty());
    }

    #[test]
    fn test_cell_value_serialization() {
        let values = vec![
            CellValue::String("a".to_string()),
            CellValue::Int(3),
            CellValue::Float(1.5),
            CellValue::Bool(false),
            CellValue::DateTime(
                NaiveDate::from_ymd_opt(2024, 3, 1)
                    .unwrap()
                    .and_hms_opt(12, 30, 0)
                    .unwrap(),
            ),
            CellValue::Empty,
        ];
        assert_eq!(
            serde_json::to_string(&values).unwrap(),
            r#"["a",3,1.5,false,"2024-03-01T12:30:00",null]"#
        );
    }

    #[test]
    fn test_iso_strings_become_datetimes() {
        assert_eq!(
            CellValue::from(&Data::DateTimeIso("2023-05-06".to_string())),
            CellValue::DateTime(NaiveDate::from_ymd_opt(2023, 5, 6).unwrap().and_hms_opt(0, 0, 0).unwrap())
        );
        assert_eq!(
            CellValue::from(&Data::DateTimeIso("not a date".to_string())),
            CellValue::String("not a date".to_string())
        );
        assert_eq!(
            CellValue::from(&Data::DurationIso("PT1H".to_string())),
            CellValue::String("PT1H".to_string())
        );
    }

    #[test]
    fn test_parse_missing_file_is_a_parse_error() {
        let err = CalamineParser.parse(Path::new("/nonexistent/dir/book.xlsx")).unwrap_err();
        assert_eq!(err.kind(), "parse_error");
    }

    #[test]
    fn test_parse_garbage_content_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        std::fs::write(&path, b"definitely not a zip archive").unwrap();

        let err = CalamineParser.parse(&path).unwrap_err();
        assert!(matches!(err, ReaderError::Parse { .. }));
    }
}
