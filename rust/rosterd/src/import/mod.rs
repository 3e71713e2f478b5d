//! Bulk student import.
//!
//! Each row flows through `source` -> `normalize` -> `identifiers` -> `dedupe` ->
//! `sink` and ends up counted once in the `ImportReport`. A bad row never aborts
//! the batch; only request-level problems (format, parse, storage open) do.

pub mod dedupe;
pub mod error;
pub mod identifiers;
pub mod normalize;
pub mod preview;
pub mod report;
pub mod settings;
pub mod sink;
pub mod source;

pub use error::{ImportError, RowError};
pub use preview::preview;
pub use report::ImportReport;
pub use settings::ImportSettings;
pub use source::{FileFormat, RowSource};

use crate::students::{self, NewStudent, UniqueKey};
use normalize::NormalizedRow;
use rand::Rng;
use rusqlite::Connection;
use sink::InsertFailure;
use source::RawRow;

/// A row ready for insertion, remembering which keys were filled from generated identifiers.
struct Candidate {
    full_name: String,
    record: NewStudent,
    email_defaulted: bool,
    admission_defaulted: bool,
}

impl Candidate {
    fn build<R: Rng + ?Sized>(
        conn: &Connection,
        rng: &mut R,
        settings: &ImportSettings,
        row: NormalizedRow,
    ) -> Result<Self, RowError> {
        let institutional_email = identifiers::generate_institutional_email(
            conn,
            &row.full_name,
            &row.department,
            settings,
        )?;
        let roll_number = identifiers::generate_roll_number(conn, rng, settings)?;

        let email_defaulted = row.personal_email.is_none();
        let admission_defaulted = row.admission_number.is_none();
        let record = NewStudent {
            first_name: row.first_name,
            last_name: row.last_name,
            email: row
                .personal_email
                .unwrap_or_else(|| institutional_email.clone()),
            phone: row.phone,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            address: row.address,
            state: row.year,
            country: Some(settings.default_country.clone()).filter(|c| !c.is_empty()),
            postal_code: None,
            admission_number: row.admission_number.unwrap_or_else(|| roll_number.clone()),
            roll_number,
            institutional_email,
            department: row.department,
            category: row.category,
            mother_name: row.mother_name,
        };
        Ok(Self {
            full_name: row.full_name,
            record,
            email_defaulted,
            admission_defaulted,
        })
    }

    /// Draws a fresh identifier for the violated key. `false` when the key was
    /// supplied by the row and cannot be regenerated.
    fn regenerate<R: Rng + ?Sized>(
        &mut self,
        conn: &Connection,
        rng: &mut R,
        settings: &ImportSettings,
        key: UniqueKey,
    ) -> Result<bool, RowError> {
        match key {
            UniqueKey::RollNumber => self.redraw_roll(conn, rng, settings)?,
            UniqueKey::AdmissionNumber if self.admission_defaulted => {
                self.redraw_roll(conn, rng, settings)?
            }
            UniqueKey::InstitutionalEmail => self.redraw_email(conn, settings)?,
            UniqueKey::Email if self.email_defaulted => self.redraw_email(conn, settings)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn redraw_roll<R: Rng + ?Sized>(
        &mut self,
        conn: &Connection,
        rng: &mut R,
        settings: &ImportSettings,
    ) -> Result<(), RowError> {
        let roll = identifiers::generate_roll_number(conn, rng, settings)?;
        if self.admission_defaulted {
            self.record.admission_number = roll.clone();
        }
        self.record.roll_number = roll;
        Ok(())
    }

    fn redraw_email(
        &mut self,
        conn: &Connection,
        settings: &ImportSettings,
    ) -> Result<(), RowError> {
        let email = identifiers::generate_institutional_email(
            conn,
            &self.full_name,
            &self.record.department,
            settings,
        )?;
        if self.email_defaulted {
            self.record.email = email.clone();
        }
        self.record.institutional_email = email;
        Ok(())
    }
}

fn persist<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &ImportSettings,
    candidate: &mut Candidate,
) -> Result<i64, RowError> {
    let mut retries = 0;
    loop {
        match sink::insert_row(conn, &candidate.record) {
            Ok(id) => return Ok(id),
            Err(InsertFailure::Unique(key)) => {
                if retries < settings.insert_retries
                    && candidate.regenerate(conn, rng, settings, key)?
                {
                    retries += 1;
                    tracing::warn!(
                        column = key.column(),
                        attempt = retries,
                        "generated identifier taken at insert; regenerating"
                    );
                    continue;
                }
                return Err(RowError::Constraint(key.column()));
            }
            Err(InsertFailure::Storage(e)) => {
                tracing::warn!(error = %e, "student insert failed");
                return Err(e.into());
            }
        }
    }
}

fn import_row<R: Rng + ?Sized>(
    conn: &Connection,
    rng: &mut R,
    settings: &ImportSettings,
    row: &RawRow,
) -> Result<i64, RowError> {
    let normalized = normalize::normalize_row(row, settings)?;
    let mut candidate = Candidate::build(conn, rng, settings, normalized)?;
    dedupe::check_duplicate(conn, &candidate.record)?;
    persist(conn, rng, settings, &mut candidate)
}

/// Imports every row of `source` in file order. Each accepted row is committed
/// before the next is read.
pub fn run_import<R: Rng + ?Sized>(
    conn: &Connection,
    source: &RowSource,
    settings: &ImportSettings,
    rng: &mut R,
) -> Result<ImportReport, ImportError> {
    let batch_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "import",
        batch = %batch_id,
        format = source.format().label(),
        columns = source.headers().len(),
        rows = source.len()
    );
    let _enter = span.enter();

    let existing = students::count_students(conn)?;
    tracing::info!(existing, "import started");

    let mut report = ImportReport::default();
    for row in source.rows() {
        match import_row(conn, rng, settings, &row) {
            Ok(id) => {
                tracing::debug!(line = row.line, id, "row imported");
                report.record_success();
            }
            Err(cause) => {
                tracing::debug!(line = row.line, %cause, "row rejected");
                report.record_failure(row.line, cause);
            }
        }
    }

    tracing::info!(
        total = report.total,
        successful = report.successful,
        failed = report.failed,
        "import finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::settings::GenderPolicy;
    use super::*;
    use crate::db;
    use crate::students::tests::sample_student;
    use crate::students::{all_students, insert_student, Gender};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    const HEADER: &str =
        "Name,Address,Gender,Category,Date of Birth,Phone Number,Branch,Year,Mother Name";

    fn csv_source(header: &str, rows: &[&str]) -> RowSource {
        let mut text = format!("{header}\n");
        for r in rows {
            text.push_str(r);
            text.push('\n');
        }
        RowSource::from_bytes(FileFormat::Delimited, text.as_bytes()).expect("parse")
    }

    fn import(conn: &Connection, src: &RowSource) -> ImportReport {
        run_import(conn, src, &ImportSettings::default(), &mut StdRng::seed_from_u64(42))
            .expect("import")
    }

    #[test]
    fn same_name_and_branch_get_numbered_emails() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source(
            HEADER,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera",
                "Asha Rao,Nashik,Female,OPEN,2004-02-03,9876543211,CS,FE,Leela",
            ],
        );
        let report = import(&conn, &src);
        assert_eq!(report.successful, 2, "{:?}", report.errors);

        let stored = all_students(&conn).expect("list");
        assert_eq!(stored[0].institutional_email, "asha.rao@cs.scoe.edu.in");
        assert_eq!(stored[1].institutional_email, "asha.rao1@cs.scoe.edu.in");
        assert_ne!(stored[0].roll_number, stored[1].roll_number);
    }

    #[test]
    fn gender_spelling_variants_are_all_male() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source(
            HEADER,
            &[
                "Ravi Kumar,Pune,Male,OBC,2004-03-04,9876500001,IT,SE,Sita",
                "Arjun Patil,Pune,MALE,OBC,2004-03-05,9876500002,IT,SE,Uma",
            ],
        );
        let report = import(&conn, &src);
        assert_eq!(report.successful, 2, "{:?}", report.errors);
        assert!(all_students(&conn)
            .expect("list")
            .iter()
            .all(|s| s.gender == Gender::Male));
    }

    #[test]
    fn empty_phone_is_stored_as_absent() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source(
            HEADER,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera",
                "Ravi Kumar,Pune,Male,OBC,2004-03-04,,CS,FE,Sita",
                "Neha Shah,Pune,Female,OPEN,2004-05-06,9876543212,IT,SE,Gita",
            ],
        );
        let p = preview(&src);
        assert_eq!(p.preview[1].errors, vec!["Missing Phone Number".to_string()]);

        let report = import(&conn, &src);
        assert_eq!(report.successful, 3, "{:?}", report.errors);
        let ravi = students::find_by_key(
            &conn,
            UniqueKey::InstitutionalEmail,
            "ravi.kumar@cs.scoe.edu.in",
        )
        .expect("q")
        .expect("row");
        assert_eq!(ravi.phone, None);
    }

    #[test]
    fn duplicate_admission_number_fails_the_row() {
        let conn = db::open_memory_db().expect("db");
        insert_student(&conn, &sample_student(1)).expect("seed");

        let header = format!("{HEADER},Admission Number");
        let src = csv_source(
            &header,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera,ADM00001",
                "Ravi Kumar,Pune,Male,OBC,2004-03-04,9876543211,CS,FE,Sita,ADM00002",
            ],
        );
        let report = import(&conn, &src);
        assert_eq!(report.total, 2);
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(
            report.errors,
            vec!["Row 2: Duplicate record (email or roll/admission already exists)".to_string()]
        );
        assert_eq!(students::count_students(&conn).expect("count"), 2);
    }

    #[test]
    fn duplicate_personal_email_fails_the_row() {
        let conn = db::open_memory_db().expect("db");
        insert_student(&conn, &sample_student(1)).expect("seed");

        let header = format!("{HEADER},Personal Email");
        let src = csv_source(
            &header,
            &["Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera,PERSON1@example.com"],
        );
        let report = import(&conn, &src);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].contains("Duplicate record"));
    }

    #[test]
    fn phone_clash_fails_one_row_and_keeps_siblings() {
        let conn = db::open_memory_db().expect("db");
        insert_student(&conn, &sample_student(1)).expect("seed");

        let src = csv_source(
            HEADER,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera",
                "Ravi Kumar,Pune,Male,OBC,2004-03-04,9000000001,CS,FE,Sita",
                "Neha Shah,Pune,Female,OPEN,2004-05-06,9876543212,IT,SE,Gita",
            ],
        );
        let report = import(&conn, &src);
        assert_eq!(report.successful, 2);
        assert_eq!(
            report.errors,
            vec!["Row 3: UNIQUE constraint failed: students.phone".to_string()]
        );
        assert_eq!(students::count_students(&conn).expect("count"), 3);
    }

    #[test]
    fn bad_rows_are_reported_and_counts_balance() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source(
            HEADER,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera",
                "Ravi Kumar,Pune,M,OBC,2004-03-04,9876543211,CS,FE,Sita",
                "Neha Shah,Pune,Female,OPEN,not-a-date,9876543212,IT,SE,Gita",
                "Om Joshi,Pune,Male,OPEN,2004-05-06,98-76,IT,SE,Gita",
                ",Pune,Male,OPEN,2004-05-06,9876543214,IT,SE,Gita",
            ],
        );
        let report = import(&conn, &src);
        assert_eq!(report.total, 5);
        assert_eq!(report.successful, 1);
        assert_eq!(report.total, report.successful + report.failed);
        assert_eq!(report.errors.len(), 4);
        assert!(report.errors[0].starts_with("Row 3: Invalid Gender 'M'"));
        assert!(report.errors[1].starts_with("Row 4: Invalid Date of Birth"));
        assert_eq!(report.errors[2], "Row 5: Phone number must contain only digits");
        assert_eq!(
            report.errors[3],
            "Row 6: Name is required to derive an institutional email"
        );
    }

    #[test]
    fn fallback_policy_imports_unknown_gender_as_male() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source(
            HEADER,
            &["Ravi Kumar,Pune,unknown,OBC,2004-03-04,9876543211,CS,FE,Sita"],
        );
        let settings = ImportSettings {
            gender_policy: GenderPolicy::FallbackMale,
            ..ImportSettings::default()
        };
        let report =
            run_import(&conn, &src, &settings, &mut StdRng::seed_from_u64(1)).expect("import");
        assert_eq!(report.successful, 1);
        assert_eq!(all_students(&conn).expect("list")[0].gender, Gender::Male);
    }

    #[test]
    fn defaults_fill_unsupplied_keys() {
        let conn = db::open_memory_db().expect("db");
        let src = csv_source("Name,Gender,Year", &["Asha Devi Rao,Female,TE"]);
        let report = import(&conn, &src);
        assert_eq!(report.successful, 1, "{:?}", report.errors);

        let s = &all_students(&conn).expect("list")[0];
        assert_eq!(s.first_name, "Asha");
        assert_eq!(s.last_name, "Devi Rao");
        assert_eq!(s.department, "dept");
        assert_eq!(s.institutional_email, "asha.devi.rao@dept.scoe.edu.in");
        assert_eq!(s.email, s.institutional_email);
        assert_eq!(s.admission_number, s.roll_number);
        assert_eq!(s.state.as_deref(), Some("TE"));
        assert_eq!(s.country.as_deref(), Some("India"));
    }

    #[test]
    fn identifiers_stay_distinct_across_batches() {
        let conn = db::open_memory_db().expect("db");
        let rows = (0..40)
            .map(|n| {
                format!(
                    "Student {},Pune,Female,OPEN,2004-01-02,98765{:05},CS,FE,Meera",
                    n % 7,
                    n
                )
            })
            .collect::<Vec<_>>();
        let first = csv_source(HEADER, &rows[..20].iter().map(String::as_str).collect::<Vec<_>>());
        let second = csv_source(HEADER, &rows[20..].iter().map(String::as_str).collect::<Vec<_>>());

        let mut rng = StdRng::seed_from_u64(5);
        let settings = ImportSettings::default();
        for src in [&first, &second] {
            let report = run_import(&conn, src, &settings, &mut rng).expect("import");
            assert_eq!(report.successful, 20, "{:?}", report.errors);
        }

        let stored = all_students(&conn).expect("list");
        let rolls = stored.iter().map(|s| &s.roll_number).collect::<HashSet<_>>();
        let emails = stored.iter().map(|s| &s.institutional_email).collect::<HashSet<_>>();
        assert_eq!(rolls.len(), 40);
        assert_eq!(emails.len(), 40);
    }

    #[test]
    fn same_seed_gives_same_roll_numbers() {
        let src = csv_source(
            HEADER,
            &[
                "Asha Rao,Pune,Female,OPEN,2004-01-02,9876543210,CS,FE,Meera",
                "Ravi Kumar,Pune,Male,OBC,2004-03-04,9876543211,CS,FE,Sita",
            ],
        );
        let rolls = || {
            let conn = db::open_memory_db().expect("db");
            import(&conn, &src);
            all_students(&conn)
                .expect("list")
                .into_iter()
                .map(|s| s.roll_number)
                .collect::<Vec<_>>()
        };
        assert_eq!(rolls(), rolls());
    }

    fn asha_row(personal_email: Option<&str>) -> NormalizedRow {
        NormalizedRow {
            full_name: "Asha Rao".into(),
            first_name: "Asha".into(),
            last_name: "Rao".into(),
            address: None,
            gender: Gender::Female,
            phone: None,
            date_of_birth: None,
            department: "CS".into(),
            year: None,
            category: None,
            mother_name: None,
            personal_email: personal_email.map(str::to_string),
            admission_number: None,
        }
    }

    #[test]
    fn only_generated_keys_are_regenerated() {
        let conn = db::open_memory_db().expect("db");
        let settings = ImportSettings::default();
        let mut rng = StdRng::seed_from_u64(3);
        let row = asha_row(Some("asha@example.com"));
        let mut c = Candidate::build(&conn, &mut rng, &settings, row).expect("build");
        let first_roll = c.record.roll_number.clone();

        // Occupy the drawn roll so the redraw has to move.
        let mut holder = sample_student(1);
        holder.roll_number = first_roll.clone();
        insert_student(&conn, &holder).expect("holder");

        assert!(c
            .regenerate(&conn, &mut rng, &settings, UniqueKey::RollNumber)
            .expect("roll"));
        assert_ne!(c.record.roll_number, first_roll);
        assert_eq!(c.record.admission_number, c.record.roll_number);

        assert!(!c
            .regenerate(&conn, &mut rng, &settings, UniqueKey::Email)
            .expect("email"));
        assert!(!c
            .regenerate(&conn, &mut rng, &settings, UniqueKey::Phone)
            .expect("phone"));
    }

    #[test]
    fn keys_taken_after_generation_are_redrawn_at_insert() {
        let conn = db::open_memory_db().expect("db");
        let settings = ImportSettings {
            insert_retries: 3,
            ..ImportSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut c = Candidate::build(&conn, &mut rng, &settings, asha_row(None)).expect("build");
        let roll = c.record.roll_number.clone();
        assert_eq!(c.record.institutional_email, "asha.rao@cs.scoe.edu.in");

        // Another writer commits both generated keys before this row lands.
        let mut rival = sample_student(1);
        rival.roll_number = roll.clone();
        rival.institutional_email = c.record.institutional_email.clone();
        insert_student(&conn, &rival).expect("rival");

        let id = persist(&conn, &mut rng, &settings, &mut c).expect("persist");
        let stored = students::get_student(&conn, id).expect("get").expect("row");
        assert_ne!(stored.roll_number, roll);
        assert_eq!(stored.admission_number, stored.roll_number);
        assert_eq!(stored.institutional_email, "asha.rao1@cs.scoe.edu.in");
        assert_eq!(stored.email, stored.institutional_email);
        assert_eq!(students::count_students(&conn).expect("count"), 2);
    }

    #[test]
    fn taken_key_fails_the_row_when_no_retries_remain() {
        let conn = db::open_memory_db().expect("db");
        let settings = ImportSettings {
            insert_retries: 0,
            ..ImportSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut c = Candidate::build(&conn, &mut rng, &settings, asha_row(None)).expect("build");

        let mut rival = sample_student(1);
        rival.roll_number = "LEGACY01".into();
        rival.institutional_email = c.record.institutional_email.clone();
        insert_student(&conn, &rival).expect("rival");

        let err = persist(&conn, &mut rng, &settings, &mut c).expect_err("no retries left");
        assert_eq!(
            err.to_string(),
            "UNIQUE constraint failed: students.institutional_email"
        );
        assert_eq!(students::count_students(&conn).expect("count"), 1);
    }
}
