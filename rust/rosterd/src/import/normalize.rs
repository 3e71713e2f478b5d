use super::error::RowError;
use super::settings::{GenderPolicy, ImportSettings};
use super::source::{Cell, RawRow};
use crate::students::Gender;
use chrono::NaiveDate;

pub const COL_NAME: &str = "Name";
pub const COL_ADDRESS: &str = "Address";
pub const COL_GENDER: &str = "Gender";
pub const COL_CATEGORY: &str = "Category";
pub const COL_DATE_OF_BIRTH: &str = "Date of Birth";
pub const COL_PHONE: &str = "Phone Number";
pub const COL_BRANCH: &str = "Branch";
pub const COL_YEAR: &str = "Year";
pub const COL_MOTHER_NAME: &str = "Mother Name";
pub const COLS_PERSONAL_EMAIL: [&str; 2] = ["Email", "Personal Email"];
pub const COL_ADMISSION_NUMBER: &str = "Admission Number";

pub const REQUIRED_COLUMNS: [&str; 9] = [
    COL_NAME,
    COL_ADDRESS,
    COL_GENDER,
    COL_CATEGORY,
    COL_DATE_OF_BIRTH,
    COL_PHONE,
    COL_BRANCH,
    COL_YEAR,
    COL_MOTHER_NAME,
];

const NAME_MAX: usize = 50;
const PHONE_MAX: usize = 20;
const ADMISSION_MAX: usize = 20;
const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"];

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub full_name: String,
    pub first_name: String,
    pub last_name: String,
    pub address: Option<String>,
    pub gender: Gender,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub department: String,
    pub year: Option<String>,
    pub category: Option<String>,
    pub mother_name: Option<String>,
    pub personal_email: Option<String>,
    pub admission_number: Option<String>,
}

/// Splits on the first whitespace run. "Asha Devi Rao" -> ("Asha", "Devi Rao").
pub fn split_name(full: &str) -> (String, String) {
    let t = full.trim();
    match t.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim_start().to_string()),
        None => (t.to_string(), String::new()),
    }
}

pub fn normalize_gender(cell: &Cell, policy: GenderPolicy) -> Result<Gender, RowError> {
    let raw = cell.text();
    match (raw.as_deref().and_then(Gender::parse), policy) {
        (Some(g), _) => Ok(g),
        (None, GenderPolicy::FallbackMale) => Ok(Gender::Male),
        (None, GenderPolicy::Strict) => Err(RowError::InvalidEnumValue {
            field: COL_GENDER,
            value: raw.unwrap_or_default(),
        }),
    }
}

pub fn normalize_phone(cell: &Cell) -> Result<Option<String>, RowError> {
    let Some(phone) = cell.text() else {
        return Ok(None);
    };
    if !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(RowError::Validation(
            "Phone number must contain only digits".to_string(),
        ));
    }
    if phone.len() > PHONE_MAX {
        return Err(RowError::Validation(format!(
            "Phone number must be at most {PHONE_MAX} digits"
        )));
    }
    Ok(Some(phone))
}

pub fn normalize_date(cell: &Cell) -> Result<Option<NaiveDate>, RowError> {
    if let Cell::Date(d) = cell {
        return Ok(Some(*d));
    }
    let Some(raw) = cell.text() else {
        return Ok(None);
    };
    // Spreadsheet exports sometimes carry a midnight time component.
    let day = raw.split(['T', ' ']).next().unwrap_or(&raw);
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(day, f).ok())
        .map(Some)
        .ok_or_else(|| RowError::Validation(format!("Invalid Date of Birth '{raw}'")))
}

pub fn normalize_email(raw: Option<String>) -> Result<Option<String>, RowError> {
    let Some(email) = raw else {
        return Ok(None);
    };
    let email = email.to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !domain.contains('@')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(RowError::Validation(format!("Invalid email address '{email}'")));
    }
    Ok(Some(email))
}

pub fn normalize_row(row: &RawRow, settings: &ImportSettings) -> Result<NormalizedRow, RowError> {
    let full_name = row.text(COL_NAME).unwrap_or_default();
    let (first_name, last_name) = split_name(&full_name);
    if first_name.chars().count() > NAME_MAX || last_name.chars().count() > NAME_MAX {
        return Err(RowError::Validation(format!(
            "First and last name must each be at most {NAME_MAX} characters"
        )));
    }

    let gender = normalize_gender(row.get(COL_GENDER), settings.gender_policy)?;
    let phone = normalize_phone(row.get(COL_PHONE))?;
    let date_of_birth = normalize_date(row.get(COL_DATE_OF_BIRTH))?;
    let personal_email = normalize_email(row.text_any(&COLS_PERSONAL_EMAIL))?;

    let admission_number = row.text(COL_ADMISSION_NUMBER);
    if admission_number
        .as_ref()
        .is_some_and(|a| a.chars().count() > ADMISSION_MAX)
    {
        return Err(RowError::Validation(format!(
            "Admission Number must be at most {ADMISSION_MAX} characters"
        )));
    }

    Ok(NormalizedRow {
        full_name,
        first_name,
        last_name,
        address: row.text(COL_ADDRESS),
        gender,
        phone,
        date_of_birth,
        department: row
            .text(COL_BRANCH)
            .unwrap_or_else(|| settings.default_department.clone()),
        year: row.text(COL_YEAR),
        category: row.text(COL_CATEGORY),
        mother_name: row.text(COL_MOTHER_NAME),
        personal_email,
        admission_number,
    })
}
