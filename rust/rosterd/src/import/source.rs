use super::error::ImportError;
use crate::students::format_date;
use calamine::{open_workbook_auto_from_rs, Data, DataType, Reader};
use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::io::Cursor;
use std::path::Path;

/// Display index of the first data row; the header occupies row 1.
pub const FIRST_DATA_ROW: usize = 2;

/// Exact spellings that spreadsheet and dataframe tooling write for a missing value.
const NAN_LIKE: [&str; 9] = [
    "nan", "NaN", "NaT", "None", "null", "NULL", "N/A", "#N/A", "<NA>",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Delimited,
    Spreadsheet,
}

impl FileFormat {
    /// Dispatches on the filename suffix only; content is never sniffed.
    pub fn from_path(path: &Path) -> Result<Self, ImportError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("csv") => Ok(Self::Delimited),
            Some("xlsx") | Some("xls") | Some("xlsm") | Some("ods") => Ok(Self::Spreadsheet),
            _ => Err(ImportError::UnsupportedFormat(
                path.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
            )),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Delimited => "csv",
            Self::Spreadsheet => "spreadsheet",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Absent,
}

static ABSENT: Cell = Cell::Absent;

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl Cell {
    /// Trimmed content, or `None` for absent, blank and NaN-like cells.
    pub fn text(&self) -> Option<String> {
        match self {
            Cell::Absent => None,
            Cell::Text(s) => {
                let t = s.trim();
                if t.is_empty() || NAN_LIKE.contains(&t) {
                    None
                } else {
                    Some(t.to_string())
                }
            }
            Cell::Number(n) if n.is_finite() => Some(format_number(*n)),
            Cell::Number(_) => None,
            Cell::Date(d) => Some(format_date(*d)),
        }
    }

    pub fn is_missing(&self) -> bool {
        self.text().is_none()
    }

    fn to_json(&self) -> Value {
        match self {
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Number(n) if n.is_finite() => Value::String(format_number(*n)),
            Cell::Date(d) => Value::String(format_date(*d)),
            Cell::Number(_) | Cell::Absent => Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub line: usize,
    pub cells: Vec<(String, Cell)>,
}

impl RawRow {
    pub fn get(&self, column: &str) -> &Cell {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
            .unwrap_or(&ABSENT)
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).text()
    }

    /// First of several candidate column names that carries a value.
    pub fn text_any(&self, columns: &[&str]) -> Option<String> {
        columns.iter().find_map(|c| self.text(c))
    }

    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        for (name, cell) in &self.cells {
            obj.entry(name.clone()).or_insert_with(|| cell.to_json());
        }
        Value::Object(obj)
    }
}

/// A parsed upload: header names plus one cell vector per data row, in file order.
#[derive(Debug, Clone)]
pub struct RowSource {
    format: FileFormat,
    headers: Vec<String>,
    records: Vec<Vec<Cell>>,
}

impl RowSource {
    pub fn read_path(path: &Path) -> Result<Self, ImportError> {
        let format = FileFormat::from_path(path)?;
        let bytes = std::fs::read(path).map_err(|source| ImportError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        Self::from_bytes(format, &bytes)
    }

    pub fn from_bytes(format: FileFormat, bytes: &[u8]) -> Result<Self, ImportError> {
        let (headers, records) = match format {
            FileFormat::Delimited => read_delimited(bytes)?,
            FileFormat::Spreadsheet => read_spreadsheet(bytes)?,
        };
        if headers.iter().all(|h| h.is_empty()) {
            return Err(parse_error(format, "missing header row"));
        }
        Ok(Self {
            format,
            headers,
            records,
        })
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Can be called any number of times; each call yields the same rows in file order.
    pub fn rows(&self) -> impl Iterator<Item = RawRow> + '_ {
        self.records.iter().enumerate().map(move |(i, record)| RawRow {
            line: i + FIRST_DATA_ROW,
            cells: self
                .headers
                .iter()
                .enumerate()
                .map(|(col, name)| (name.clone(), record.get(col).cloned().unwrap_or(Cell::Absent)))
                .collect(),
        })
    }
}

fn parse_error(format: FileFormat, message: impl Into<String>) -> ImportError {
    ImportError::Parse {
        format: format.label(),
        message: message.into(),
    }
}

type Table = (Vec<String>, Vec<Vec<Cell>>);

fn read_delimited(bytes: &[u8]) -> Result<Table, ImportError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| parse_error(FileFormat::Delimited, format!("input is not UTF-8: {e}")))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .map_err(|e| parse_error(FileFormat::Delimited, e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| parse_error(FileFormat::Delimited, e.to_string()))?;
        records.push(record.iter().map(|f| Cell::Text(f.to_string())).collect());
    }
    Ok((headers, records))
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Absent,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(f) if f.is_nan() => Cell::Absent,
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => {
            data.as_date().map(Cell::Date).unwrap_or(Cell::Absent)
        }
        other => Cell::Text(other.to_string()),
    }
}

fn read_spreadsheet(bytes: &[u8]) -> Result<Table, ImportError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| parse_error(FileFormat::Spreadsheet, e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| parse_error(FileFormat::Spreadsheet, "workbook has no worksheets"))?
        .map_err(|e| parse_error(FileFormat::Spreadsheet, e.to_string()))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| {
            header
                .iter()
                .map(|c| cell_from_data(c).text().unwrap_or_default())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let records = rows
        .filter(|row| !row.iter().all(|c| matches!(c, Data::Empty)))
        .map(|row| row.iter().map(cell_from_data).collect())
        .collect();
    Ok((headers, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::write_xlsx_table;

    #[test]
    fn suffix_dispatch_is_case_insensitive_and_rejects_others() {
        assert_eq!(
            FileFormat::from_path(Path::new("Students.CSV")).expect("csv"),
            FileFormat::Delimited
        );
        assert_eq!(
            FileFormat::from_path(Path::new("a/b/batch.xlsx")).expect("xlsx"),
            FileFormat::Spreadsheet
        );
        for bad in ["students.txt", "students", "students.csv.bak"] {
            assert!(matches!(
                FileFormat::from_path(Path::new(bad)),
                Err(ImportError::UnsupportedFormat(_))
            ));
        }
    }

    #[test]
    fn delimited_rows_keep_order_and_mark_missing_columns_absent() {
        let csv = "\u{feff}Name,Gender,Phone Number\n\
                   Asha Rao,Female,9876543210\nRavi,Male\n\nMeena,,nan\n";
        let src = RowSource::from_bytes(FileFormat::Delimited, csv.as_bytes()).expect("parse");
        assert_eq!(src.headers(), ["Name", "Gender", "Phone Number"]);

        let rows = src.rows().collect::<Vec<_>>();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.line).collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(rows[0].text("Name").as_deref(), Some("Asha Rao"));
        assert_eq!(rows[1].get("Phone Number"), &Cell::Absent);
        assert!(rows[2].get("Gender").is_missing());
        assert!(rows[2].get("Phone Number").is_missing());
        assert_eq!(rows[0].get("No Such Column"), &Cell::Absent);

        // restartable
        assert_eq!(src.rows().collect::<Vec<_>>(), rows);
    }

    #[test]
    fn delimited_rejects_non_utf8_and_headerless_input() {
        assert!(matches!(
            RowSource::from_bytes(FileFormat::Delimited, &[0xff, 0xfe, 0x00]),
            Err(ImportError::Parse { .. })
        ));
        assert!(matches!(
            RowSource::from_bytes(FileFormat::Delimited, b""),
            Err(ImportError::Parse { .. })
        ));
    }

    #[test]
    fn spreadsheet_and_delimited_agree_on_absent_cells() {
        let headers = ["Name", "Gender", "Phone Number"];
        let rows = vec![
            vec![Some("Asha Rao".to_string()), Some("Female".into()), Some("9876543210".into())],
            vec![Some("Ravi Kumar".to_string()), Some("Male".into()), None],
        ];
        let mut buf = Cursor::new(Vec::new());
        write_xlsx_table("Students", &headers, &rows, &mut buf).expect("write xlsx");

        let xlsx =
            RowSource::from_bytes(FileFormat::Spreadsheet, buf.get_ref()).expect("parse xlsx");
        let csv = RowSource::from_bytes(
            FileFormat::Delimited,
            b"Name,Gender,Phone Number\nAsha Rao,Female,9876543210\nRavi Kumar,Male,\n",
        )
        .expect("parse csv");

        let a = xlsx.rows().collect::<Vec<_>>();
        let b = csv.rows().collect::<Vec<_>>();
        assert_eq!(a.len(), 2);
        for (x, c) in a.iter().zip(&b) {
            assert_eq!(x.line, c.line);
            for h in headers {
                assert_eq!(x.text(h), c.text(h), "column {h} row {}", x.line);
            }
        }
        assert!(a[1].get("Phone Number").is_missing());
    }

    #[test]
    fn numeric_cells_render_without_fraction() {
        assert_eq!(Cell::Number(9876543210.0).text().as_deref(), Some("9876543210"));
        assert_eq!(Cell::Number(2.5).text().as_deref(), Some("2.5"));
        assert_eq!(Cell::Number(f64::NAN).text(), None);
        assert_eq!(Cell::Text("  NaN ".into()).text(), None);
    }

    #[test]
    fn only_exact_missing_spellings_are_absent() {
        for missing in ["nan", "NaN", "NaT", "None", "null", "NULL", "N/A", "#N/A", "<NA>"] {
            assert!(Cell::Text(missing.into()).is_missing(), "{missing}");
        }
        for kept in ["Nan", "NONE", "Null", "NA", "n/a", "none"] {
            assert_eq!(Cell::Text(kept.into()).text().as_deref(), Some(kept));
        }
    }
}
