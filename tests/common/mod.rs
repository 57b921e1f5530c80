use std::path::Path;

use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

/// Write `report.xlsx`: "Sheet1" holds a header and one data row, "Types"
/// holds one value of each kind with an empty row in between.
pub fn write_report(dir: &Path) {
    let mut workbook = Workbook::new();

    let sheet = workbook.add_worksheet();
    sheet.set_name("Sheet1").unwrap();
    sheet.write_string(0, 0, "Name").unwrap();
    sheet.write_string(0, 1, "Age").unwrap();
    sheet.write_string(1, 0, "Ana").unwrap();
    sheet.write_string(1, 1, "30").unwrap();

    let date_format = Format::new().set_num_format("yyyy-mm-dd");
    let date = ExcelDateTime::from_ymd(2024, 3, 1).unwrap();
    let types = workbook.add_worksheet();
    types.set_name("Types").unwrap();
    types.write_number(0, 0, 41.5).unwrap();
    types.write_boolean(0, 1, true).unwrap();
    types.write_datetime_with_format(0, 2, &date, &date_format).unwrap();
    // row 2 left empty
    types.write_string(2, 0, "after gap").unwrap();

    workbook.save(dir.join("report.xlsx")).unwrap();
}
