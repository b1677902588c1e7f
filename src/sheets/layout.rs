//! Worksheet geometry: one worksheet per year, five columns per month.

use crate::store::Expense;

/// Columns owned by each month block.
pub const BLOCK_WIDTH: u32 = 5;

/// Column labels written on row 2 of every block.
pub const COLUMN_LABELS: [&str; BLOCK_WIDTH as usize] = ["ID", "DATE", "TYPE", "DESCRIPTION", "AMOUNT"];

/// First row below the two header rows.
pub const FIRST_DATA_ROW: u32 = 3;

pub const MONTH_NAMES: [&str; 12] = [
    "JANUARY",
    "FEBRUARY",
    "MARCH",
    "APRIL",
    "MAY",
    "JUNE",
    "JULY",
    "AUGUST",
    "SEPTEMBER",
    "OCTOBER",
    "NOVEMBER",
    "DECEMBER",
];

/// Total columns used by a yearly worksheet.
pub const SHEET_COLUMNS: u32 = BLOCK_WIDTH * 12;

/// 1-based column holding the identity of `month` (1..=12).
pub fn id_column(month: u32) -> u32 {
    (month.clamp(1, 12) - 1) * BLOCK_WIDTH + 1
}

/// 1-based column holding the date of `month`.
pub fn date_column(month: u32) -> u32 {
    id_column(month) + 1
}

/// Spreadsheet column letters for a 1-based index (1 → A, 27 → AA).
pub fn column_letter(mut column: u32) -> String {
    let mut letters = Vec::new();
    while column > 0 {
        let rem = (column - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        column = (column - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Worksheet title holding `year`.
pub fn worksheet_name(year: i32) -> String {
    year.to_string()
}

/// A1 range of the five cells of `month` on `row`.
pub fn row_range(year: i32, month: u32, row: u32) -> String {
    let first = id_column(month);
    format!(
        "'{}'!{}{}:{}{}",
        worksheet_name(year),
        column_letter(first),
        row,
        column_letter(first + BLOCK_WIDTH - 1),
        row
    )
}

/// A1 range covering every data row of the worksheet.
pub fn data_range(year: i32) -> String {
    format!(
        "'{}'!A{}:{}",
        worksheet_name(year),
        FIRST_DATA_ROW,
        column_letter(SHEET_COLUMNS)
    )
}

/// The two header rows of a new worksheet, as row-major cell values.
pub fn header_rows() -> Vec<Vec<String>> {
    let mut months = Vec::with_capacity(SHEET_COLUMNS as usize);
    let mut labels = Vec::with_capacity(SHEET_COLUMNS as usize);
    for name in MONTH_NAMES {
        months.push(name.to_string());
        months.extend(std::iter::repeat_n(String::new(), BLOCK_WIDTH as usize - 1));
        labels.extend(COLUMN_LABELS.iter().map(|l| l.to_string()));
    }
    vec![months, labels]
}

/// Cell values of a record's row.
pub fn row_values(expense: &Expense) -> Vec<serde_json::Value> {
    vec![
        serde_json::json!(expense.id),
        serde_json::json!(expense.date),
        serde_json::json!(expense.expense_type),
        serde_json::json!(expense.description),
        serde_json::json!(expense.amount),
    ]
}

/// Next free row of a month block given the values read from its date
/// column (header rows included, trailing empties trimmed by the API).
pub fn next_empty_row(date_column_values: &[String]) -> u32 {
    let used = date_column_values
        .iter()
        .rposition(|v| !v.is_empty())
        .map(|i| i as u32 + 1)
        .unwrap_or(0);
    used.max(FIRST_DATA_ROW - 1) + 1
}

/// Row of `id` within a month block, given the id column values starting
/// at row 1.
pub fn find_in_id_column(id_column_values: &[String], id: i64) -> Option<u32> {
    let needle = id.to_string();
    id_column_values
        .iter()
        .enumerate()
        .skip(FIRST_DATA_ROW as usize - 1)
        .find(|(_, v)| v.trim() == needle)
        .map(|(i, _)| i as u32 + 1)
}

/// Locate the rows to blank for `ids` in a worksheet's data rows (as
/// returned for [`data_range`]). Blocks are scanned from December back to
/// January. Returns `(month, row)` pairs; ids absent from the sheet are
/// skipped.
pub fn locate_rows(data_rows: &[Vec<String>], ids: &[i64]) -> Vec<(u32, u32)> {
    let mut found = Vec::new();
    for &id in ids {
        let needle = id.to_string();
        'search: for month in (1..=12).rev() {
            let col = (id_column(month) - 1) as usize;
            for (offset, row) in data_rows.iter().enumerate() {
                if row.get(col).is_some_and(|v| v.trim() == needle) {
                    found.push((month, FIRST_DATA_ROW + offset as u32));
                    break 'search;
                }
            }
        }
    }
    found
}
