use crate::pivot::PivotTable;
use crate::table::Table;

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn push_record<'a>(out: &mut String, fields: impl IntoIterator<Item = &'a str>) {
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&csv_field(field));
    }
    out.push('\n');
}

/// Convert a pivot table to CSV
///
/// The first record is the header (row dimension then column labels), followed by
/// one record per pivot row and the totals row last. Values are written as shown
/// on the dashboard, so percent pivots carry a `%` suffix.
///
/// # Arguments
/// * `pivot` - Pivot table to export
///
/// # Returns
/// * `String` - CSV content
pub fn pivot_to_csv(pivot: &PivotTable) -> String {
    let mut out = String::new();
    for row in pivot.display_rows() {
        push_record(&mut out, row.iter().map(String::as_str));
    }
    out
}

/// Convert a table to CSV, nulls as empty fields.
pub fn table_to_csv(table: &Table) -> String {
    let mut out = String::new();
    push_record(&mut out, table.column_names());
    for i in 0..table.row_count() {
        let cells: Vec<String> = table.row(i).iter().map(|v| v.to_string()).collect();
        push_record(&mut out, cells.iter().map(String::as_str));
    }
    out
}

/// Convert a pivot table to XLSX format
///
/// Writes a single worksheet: a bold header row, one row per pivot row and the
/// totals row last. Cells hold numbers; percent pivots get a `0.0"%"` number format.
///
/// # Arguments
/// * `pivot` - Pivot table to export
/// * `sheet_name` - Worksheet name, truncated to Excel's 31 characters
///
/// # Returns
/// * `Result<Vec<u8>>` - XLSX file content or a render error
#[cfg(feature = "web")]
pub fn pivot_to_xlsx(pivot: &PivotTable, sheet_name: &str) -> crate::error::Result<Vec<u8>> {
    use crate::error::DashboardError;
    use crate::pivot::{TOTAL_LABEL, ValueMode};
    use rust_xlsxwriter::{Format, Workbook, XlsxError};

    let xlsx = |e: XlsxError| DashboardError::Render(e.to_string());
    let column_index = |c: usize| {
        u16::try_from(c + 1)
            .map_err(|_| DashboardError::Render(format!("too many columns for a worksheet: {}", c + 1)))
    };
    let row_index = |r: usize| {
        u32::try_from(r + 1)
            .map_err(|_| DashboardError::Render(format!("too many rows for a worksheet: {}", r + 1)))
    };

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let name: String = sheet_name
        .chars()
        .filter(|c| !"[]:*?/\\".contains(*c))
        .take(31)
        .collect();
    if !name.is_empty() {
        worksheet.set_name(&name).map_err(xlsx)?;
    }

    let bold = Format::new().set_bold();
    let number = match pivot.mode {
        ValueMode::Percent => Format::new().set_num_format("0.0\"%\""),
        ValueMode::Number => Format::new(),
    };

    worksheet
        .write_string_with_format(0, 0, &pivot.row_header, &bold)
        .map_err(xlsx)?;
    for (c, label) in pivot.columns.iter().enumerate() {
        worksheet
            .write_string_with_format(0, column_index(c)?, label, &bold)
            .map_err(xlsx)?;
    }

    let totals = pivot
        .totals
        .as_ref()
        .map(|values| (TOTAL_LABEL.to_string(), values));
    let body = pivot.rows.iter().map(|r| (r.label.clone(), &r.values)).chain(totals);
    for (r, (label, values)) in body.enumerate() {
        let row = row_index(r)?;
        worksheet.write_string(row, 0, &label).map_err(xlsx)?;
        for (c, value) in values.iter().enumerate() {
            worksheet
                .write_number_with_format(row, column_index(c)?, *value, &number)
                .map_err(xlsx)?;
        }
    }

    workbook.save_to_buffer().map_err(xlsx)
}
