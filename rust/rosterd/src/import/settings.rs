use crate::db;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

pub const SETTINGS_KEY: &str = "setup.import";

/// What to do with a Gender cell that is absent or outside {male, female, other}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenderPolicy {
    /// Reject the row with an invalid-enum failure.
    Strict,
    /// Record the row as `male`.
    FallbackMale,
}

impl GenderPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "fallback_male" => Some(Self::FallbackMale),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::FallbackMale => "fallback_male",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportSettings {
    pub roll_prefix: String,
    pub email_suffix: String,
    pub default_department: String,
    pub default_country: String,
    pub gender_policy: GenderPolicy,
    pub roll_draw_attempts: u32,
    pub email_suffix_attempts: u32,
    pub insert_retries: u32,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            roll_prefix: "SCOE".to_string(),
            email_suffix: "scoe.edu.in".to_string(),
            default_department: "dept".to_string(),
            default_country: "India".to_string(),
            gender_policy: GenderPolicy::Strict,
            roll_draw_attempts: 64,
            email_suffix_attempts: 10_000,
            insert_retries: 3,
        }
    }
}

fn parse_string(v: &Value, key: &str, min_len: usize, max_len: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim();
    if s.len() < min_len || s.len() > max_len {
        return Err(format!("{} length must be in {}..={}", key, min_len, max_len));
    }
    Ok(s.to_string())
}

fn parse_u32_range(v: &Value, key: &str, min: u32, max: u32) -> Result<u32, String> {
    let n = v
        .as_u64()
        .ok_or_else(|| format!("{} must be a non-negative integer", key))?;
    if n < min as u64 || n > max as u64 {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n as u32)
}

impl ImportSettings {
    pub fn to_json(&self) -> Value {
        json!({
            "rollPrefix": self.roll_prefix,
            "emailSuffix": self.email_suffix,
            "defaultDepartment": self.default_department,
            "defaultCountry": self.default_country,
            "genderPolicy": self.gender_policy.as_str(),
            "rollDrawAttempts": self.roll_draw_attempts,
            "emailSuffixAttempts": self.email_suffix_attempts,
            "insertRetries": self.insert_retries
        })
    }

    /// Validates and applies a camelCase patch. Stops at the first bad field.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        for (k, v) in patch {
            match k.as_str() {
                "rollPrefix" => {
                    let s = parse_string(v, k, 1, 12)?;
                    if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
                        return Err("rollPrefix must be ASCII letters and digits".into());
                    }
                    self.roll_prefix = s;
                }
                "emailSuffix" => {
                    let s = parse_string(v, k, 1, 64)?.to_ascii_lowercase();
                    if s.contains('@') || s.contains(char::is_whitespace) || s.starts_with('.') {
                        return Err("emailSuffix must be a bare domain such as scoe.edu.in".into());
                    }
                    self.email_suffix = s;
                }
                "defaultDepartment" => {
                    self.default_department = parse_string(v, k, 1, 100)?;
                }
                "defaultCountry" => {
                    self.default_country = parse_string(v, k, 0, 50)?;
                }
                "genderPolicy" => {
                    let s = v.as_str().ok_or("genderPolicy must be string")?;
                    self.gender_policy = GenderPolicy::parse(s)
                        .ok_or("genderPolicy must be one of: strict, fallback_male")?;
                }
                "rollDrawAttempts" => {
                    self.roll_draw_attempts = parse_u32_range(v, k, 1, 10_000)?;
                }
                "emailSuffixAttempts" => {
                    self.email_suffix_attempts = parse_u32_range(v, k, 1, 1_000_000)?;
                }
                "insertRetries" => {
                    self.insert_retries = parse_u32_range(v, k, 0, 10)?;
                }
                _ => return Err(format!("unknown import field: {}", k)),
            }
        }
        Ok(())
    }
}

/// Defaults overlaid with whatever is saved; malformed saved values are ignored.
pub fn load(conn: &Connection) -> anyhow::Result<ImportSettings> {
    let mut settings = ImportSettings::default();
    if let Some(saved) = db::settings_get_json(conn, SETTINGS_KEY)? {
        if let Some(obj) = saved.as_object() {
            for (k, v) in obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                let _ = settings.apply_patch(&single);
            }
        }
    }
    Ok(settings)
}
