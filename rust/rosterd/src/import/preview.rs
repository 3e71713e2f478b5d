use super::normalize::REQUIRED_COLUMNS;
use super::source::{RawRow, RowSource};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreviewRow {
    pub row: Value,
    pub is_valid: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub total: usize,
    pub preview: Vec<PreviewRow>,
}

/// Required columns that are absent, blank or NaN-like in `row`, in required-set order.
pub fn missing_columns(row: &RawRow) -> Vec<&'static str> {
    REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|col| row.get(col).is_missing())
        .collect()
}

/// Read-only pass: no identifiers are generated and nothing is persisted.
pub fn preview(source: &RowSource) -> Preview {
    let preview = source
        .rows()
        .map(|row| {
            let errors = missing_columns(&row)
                .into_iter()
                .map(|col| format!("Missing {}", col))
                .collect::<Vec<_>>();
            PreviewRow {
                row: row.to_json(),
                is_valid: errors.is_empty(),
                errors,
            }
        })
        .collect::<Vec<_>>();
    Preview {
        total: preview.len(),
        preview,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::source::FileFormat;

    const HEADER: &str =
        "Name,Address,Gender,Category,Date of Birth,Phone Number,Branch,Year,Mother Name\n";

    fn source(body: &str) -> RowSource {
        let csv = format!("{HEADER}{body}");
        RowSource::from_bytes(FileFormat::Delimited, csv.as_bytes()).expect("parse")
    }

    #[test]
    fn flags_only_the_row_with_empty_phone() {
        let src = source(
            "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera\n\
             Ravi Kumar,Pune,Male,OBC,2004-03-04,,CS,FE,Sita\n\
             Neha Shah,Pune,Female,OPEN,2004-05-06,9876543212,IT,SE,Gita\n",
        );
        let p = preview(&src);
        assert_eq!(p.total, 3);
        assert!(p.preview[0].is_valid);
        assert!(!p.preview[1].is_valid);
        assert_eq!(p.preview[1].errors, vec!["Missing Phone Number".to_string()]);
        assert!(p.preview[2].is_valid);
        assert_eq!(p.preview[0].row["Name"], "Asha Rao");
    }

    #[test]
    fn missing_columns_follow_required_order() {
        let src = RowSource::from_bytes(FileFormat::Delimited, b"Name,Gender\nnan,Male\n")
            .expect("parse");
        let p = preview(&src);
        assert_eq!(
            p.preview[0].errors,
            vec![
                "Missing Name",
                "Missing Address",
                "Missing Category",
                "Missing Date of Birth",
                "Missing Phone Number",
                "Missing Branch",
                "Missing Year",
                "Missing Mother Name",
            ]
        );
    }

    #[test]
    fn values_spelled_like_sentinels_are_not_missing() {
        let src = source(
            "Nan,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Nan\n\
             Li Na,NA,Female,NONE,2004-01-02,9876543211,CS,FE,Null\n",
        );
        let p = preview(&src);
        assert!(p.preview.iter().all(|r| r.is_valid), "{:?}", p.preview);
        assert_eq!(p.preview[1].row["Category"], "NONE");
    }

    #[test]
    fn preview_is_idempotent() {
        let src = source("Asha Rao,,Female,OPEN,2004-01-02,1,CS,FE,Meera\n");
        assert_eq!(preview(&src), preview(&src));
    }
}
