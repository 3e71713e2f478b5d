use crate::students::{self, StudentRecord};
use anyhow::Context;
use rusqlite::Connection;
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const EXPORT_HEADERS: [&str; 10] = [
    "Roll Number",
    "First Name",
    "Last Name",
    "Institutional Email",
    "Personal Email",
    "Phone",
    "Address",
    "Gender",
    "Department",
    "Year",
];

const SHEET_NAME: &str = "Students";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" => Some(Self::Xlsx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub rows_exported: usize,
    pub format: ExportFormat,
}

fn export_row(s: &StudentRecord) -> Vec<Option<String>> {
    vec![
        Some(s.roll_number.clone()),
        Some(s.first_name.clone()).filter(|v| !v.is_empty()),
        Some(s.last_name.clone()).filter(|v| !v.is_empty()),
        Some(s.institutional_email.clone()),
        Some(s.email.clone()),
        s.phone.clone(),
        s.address.clone(),
        Some(s.gender.as_str().to_string()),
        Some(s.department.clone()),
        s.state.clone(),
    ]
}

pub fn export_students(
    conn: &Connection,
    format: ExportFormat,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let rows = students::all_students(conn)
        .context("failed to load students")?
        .iter()
        .map(export_row)
        .collect::<Vec<_>>();

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;

    match format {
        ExportFormat::Csv => write_csv_table(&EXPORT_HEADERS, &rows, out_file)?,
        ExportFormat::Xlsx => write_xlsx_table(SHEET_NAME, &EXPORT_HEADERS, &rows, out_file)?,
    }

    tracing::info!(
        rows = rows.len(),
        format = format.as_str(),
        path = %out_path.display(),
        "students exported"
    );
    Ok(ExportSummary {
        rows_exported: rows.len(),
        format,
    })
}

pub fn write_csv_table<W: Write>(
    headers: &[&str],
    rows: &[Vec<Option<String>>],
    w: W,
) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_writer(w);
    writer
        .write_record(headers)
        .context("failed to write csv header")?;
    for row in rows {
        writer
            .write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))
            .context("failed to write csv row")?;
    }
    writer.flush().context("failed to flush csv output")?;
    Ok(())
}

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

fn workbook_xml(sheet_name: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets><sheet name="{}" sheetId="1" r:id="rId1"/></sheets>
</workbook>"#,
        xml_escape(sheet_name)
    )
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Spreadsheet column letters: 0 -> A, 25 -> Z, 26 -> AA.
fn column_name(mut idx: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn sheet_row_xml(out: &mut String, row_num: usize, cells: impl Iterator<Item = Option<String>>) {
    out.push_str(&format!("<row r=\"{}\">", row_num));
    for (col, cell) in cells.enumerate() {
        // Absent values are omitted so readers see an empty cell.
        let Some(v) = cell else { continue };
        out.push_str(&format!(
            "<c r=\"{}{}\" t=\"inlineStr\"><is><t xml:space=\"preserve\">{}</t></is></c>",
            column_name(col),
            row_num,
            xml_escape(&v)
        ));
    }
    out.push_str("</row>");
}

/// Writes a single-sheet workbook with inline string cells.
pub fn write_xlsx_table<W: Write + Seek>(
    sheet_name: &str,
    headers: &[&str],
    rows: &[Vec<Option<String>>],
    w: W,
) -> anyhow::Result<()> {
    let mut sheet = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    sheet_row_xml(&mut sheet, 1, headers.iter().map(|h| Some(h.to_string())));
    for (i, row) in rows.iter().enumerate() {
        sheet_row_xml(&mut sheet, i + 2, row.iter().cloned());
    }
    sheet.push_str("</sheetData></worksheet>");

    let mut zip = ZipWriter::new(w);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let workbook = workbook_xml(sheet_name);
    let parts: [(&str, &str); 5] = [
        ("[Content_Types].xml", CONTENT_TYPES_XML),
        ("_rels/.rels", ROOT_RELS_XML),
        ("xl/workbook.xml", &workbook),
        ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML),
        ("xl/worksheets/sheet1.xml", &sheet),
    ];
    for (name, body) in parts {
        zip.start_file(name, opts)
            .with_context(|| format!("failed to start {} entry", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("failed to write {} entry", name))?;
    }
    zip.finish().context("failed to finalize xlsx package")?;
    Ok(())
}
