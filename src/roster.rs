//! Student roster CSV parsing.
//!
//! Expected header:
//! `email,password,full_name,roll_number,department_code,current_semester,admission_year`.
//! Lines starting with `#` are comments. Each data line parses independently;
//! a bad line is reported without stopping the rest.

use crate::model::{self, ValidationError};
use serde_json::Value;
use std::io::Read;

pub const COLUMNS: [&str; 7] = [
    "email",
    "password",
    "full_name",
    "roll_number",
    "department_code",
    "current_semester",
    "admission_year",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RosterEntry {
    pub line: u64,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub roll_number: String,
    pub department_code: Option<String>,
    pub current_semester: Option<i64>,
    pub admission_year: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RosterLineError {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RosterError {
    #[error("roster header must be: {}", COLUMNS.join(","))]
    BadHeader,
    #[error("roster is not valid CSV: {0}")]
    Csv(#[from] csv::Error),
}

fn cell(record: &csv::StringRecord, idx: usize) -> Option<String> {
    record
        .get(idx)
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

fn entry_from_record(
    record: &csv::StringRecord,
    line: u64,
    max_semester: i64,
) -> Result<RosterEntry, ValidationError> {
    let text = |idx: usize| cell(record, idx).map(Value::String);

    let email = model::validate_email(text(0).as_ref())?;
    let password = model::required_str(text(1).as_ref(), "password")?;
    let full_name = model::required_str(text(2).as_ref(), "full_name")?;
    let roll_number = model::required_str(text(3).as_ref(), "roll_number")?;
    let current_semester = model::parse_optional_semester(text(5).as_ref(), max_semester)?;
    let admission_year = match text(6) {
        Some(v) => Some(model::parse_admission_year(Some(&v))?),
        None => None,
    };

    Ok(RosterEntry {
        line,
        email,
        password,
        full_name,
        roll_number,
        department_code: cell(record, 4),
        current_semester,
        admission_year,
    })
}

pub fn parse_roster<R: Read>(
    r: R,
    max_semester: i64,
) -> Result<Vec<Result<RosterEntry, RosterLineError>>, RosterError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(false)
        .has_headers(true)
        .from_reader(r);

    let headers = csv_reader.headers()?.clone();
    let normalized: Vec<String> = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
    if normalized != COLUMNS {
        return Err(RosterError::BadHeader);
    }

    let mut out = Vec::new();
    for (n, res) in csv_reader.records().enumerate() {
        let entry = match res {
            Ok(record) => {
                let line = record.position().map(|p| p.line()).unwrap_or(n as u64 + 2);
                entry_from_record(&record, line, max_semester).map_err(|e| RosterLineError {
                    line,
                    message: e.message,
                })
            }
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or(n as u64 + 2);
                Err(RosterLineError {
                    line,
                    message: e.to_string(),
                })
            }
        };
        if let Err(e) = &entry {
            log::debug!("roster line {}: {}", e.line, e.message);
        }
        out.push(entry);
    }
    log::trace!("parse_roster read {} lines", out.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "email,password,full_name,roll_number,department_code,current_semester,admission_year\n";

    #[test]
    fn parses_rows_and_skips_comments() {
        let text = format!(
            "{}# first cohort\nasha@college.edu, secret1 ,Asha Rao,CS-01,CSE,3,2023\nbo@college.edu,secret2,Bo Li,CS-02,,,\n",
            HEADER
        );
        let rows = parse_roster(text.as_bytes(), 8).expect("roster");
        assert_eq!(rows.len(), 2);
        let a = rows[0].as_ref().expect("first row");
        assert_eq!(a.password, "secret1");
        assert_eq!(a.department_code.as_deref(), Some("CSE"));
        assert_eq!(a.current_semester, Some(3));
        assert_eq!(a.admission_year, Some(2023));
        let b = rows[1].as_ref().expect("second row");
        assert_eq!(b.department_code, None);
        assert_eq!(b.current_semester, None);
    }

    #[test]
    fn bad_lines_are_reported_individually() {
        let text = format!(
            "{}a@college.edu,secret1,A,R1,,9,2023\nnot-an-email,secret1,B,R2,,1,2023\nc@college.edu,secret1,C,R3,,1\nd@college.edu,secret1,D,R4,,2,2024\n",
            HEADER
        );
        let rows = parse_roster(text.as_bytes(), 8).expect("roster");
        assert_eq!(rows.len(), 4);
        let e0 = rows[0].as_ref().expect_err("semester out of range");
        assert_eq!(e0.line, 2);
        assert!(e0.message.contains("semester"));
        assert!(rows[1].is_err());
        assert!(rows[2].is_err());
        assert!(rows[3].is_ok());
    }

    #[test]
    fn wrong_header_is_fatal() {
        let text = "name,email\nA,a@college.edu\n";
        assert!(matches!(
            parse_roster(text.as_bytes(), 8),
            Err(RosterError::BadHeader)
        ));
    }
}
