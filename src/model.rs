use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MIN_ADMISSION_YEAR: i64 = 1900;
pub const MAX_ADMISSION_YEAR: i64 = 2100;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExamType {
    Internal1,
    Internal2,
    Lab,
    Assignment,
    Final,
}

impl ExamType {
    pub const ALL: [ExamType; 5] = [
        ExamType::Internal1,
        ExamType::Internal2,
        ExamType::Lab,
        ExamType::Assignment,
        ExamType::Final,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExamType::Internal1 => "internal1",
            ExamType::Internal2 => "internal2",
            ExamType::Lab => "lab",
            ExamType::Assignment => "assignment",
            ExamType::Final => "final",
        }
    }
}

impl fmt::Display for ExamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExamType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        ExamType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == t)
            .ok_or_else(|| {
                ValidationError::new(
                    "examType",
                    "examType must be one of: internal1, internal2, lab, assignment, final",
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            _ => Err(ValidationError::new(
                "status",
                "status must be one of: present, absent, late, excused",
            )),
        }
    }
}

// SQLite hands booleans back as 0/1 integers.
fn bool_from_int<'de, D>(de: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(de)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Department {
    pub id: String,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentProfile {
    pub id: String,
    pub user_id: String,
    pub roll_number: String,
    pub department_id: Option<String>,
    pub current_semester: Option<i64>,
    pub admission_year: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacultyProfile {
    pub id: String,
    pub user_id: String,
    pub employee_id: String,
    pub department_id: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub code: String,
    pub name: String,
    pub department_id: Option<String>,
    pub semester: Option<i64>,
    pub credits: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacultyAssignment {
    pub faculty_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: Option<String>,
    pub exam_type: String,
    pub marks_obtained: Option<f64>,
    pub max_marks: Option<f64>,
    #[serde(deserialize_with = "bool_from_int")]
    pub published: bool,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: Option<String>,
    pub date: String,
    pub status: String,
    pub marked_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRecord {
    pub id: String,
    pub student_id: String,
    pub semester: i64,
    #[serde(default)]
    pub tuition_fee: f64,
    #[serde(default)]
    pub lab_fee: f64,
    #[serde(default)]
    pub other_fee: f64,
    #[serde(default)]
    pub amount_paid: f64,
    pub due_date: Option<String>,
}

/// Accepts a JSON integer or a numeric string ("3", " 3 ").
pub fn parse_int(v: Option<&serde_json::Value>, field: &str) -> Result<i64, ValidationError> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Err(ValidationError::new(field, format!("missing {}", field)));
    };
    if let Some(n) = v.as_i64() {
        return Ok(n);
    }
    if let Some(f) = v.as_f64() {
        if f.fract() == 0.0 && f.is_finite() {
            return Ok(f as i64);
        }
        return Err(ValidationError::new(
            field,
            format!("{} must be a whole number", field),
        ));
    }
    v.as_str()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| ValidationError::new(field, format!("{} must be an integer", field)))
}

pub fn parse_number(v: Option<&serde_json::Value>, field: &str) -> Result<f64, ValidationError> {
    let Some(v) = v.filter(|v| !v.is_null()) else {
        return Err(ValidationError::new(field, format!("missing {}", field)));
    };
    let n = match v.as_f64() {
        Some(n) => Some(n),
        None => v.as_str().and_then(|s| s.trim().parse::<f64>().ok()),
    };
    match n {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationError::new(
            field,
            format!("{} must be a number", field),
        )),
    }
}

pub fn parse_semester(
    v: Option<&serde_json::Value>,
    max_semester: i64,
) -> Result<i64, ValidationError> {
    let n = parse_int(v, "semester")?;
    if !(1..=max_semester).contains(&n) {
        return Err(ValidationError::new(
            "semester",
            format!("semester must be between 1 and {}", max_semester),
        ));
    }
    Ok(n)
}

/// `None` when the parameter is absent or null; otherwise validated like [`parse_semester`].
pub fn parse_optional_semester(
    v: Option<&serde_json::Value>,
    max_semester: i64,
) -> Result<Option<i64>, ValidationError> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) if v.as_str().map(|s| s.trim().is_empty()).unwrap_or(false) => Ok(None),
        Some(v) => parse_semester(Some(v), max_semester).map(Some),
    }
}

pub fn parse_admission_year(v: Option<&serde_json::Value>) -> Result<i64, ValidationError> {
    let n = parse_int(v, "admissionYear")?;
    if !(MIN_ADMISSION_YEAR..=MAX_ADMISSION_YEAR).contains(&n) {
        return Err(ValidationError::new(
            "admissionYear",
            format!(
                "admissionYear must be between {} and {}",
                MIN_ADMISSION_YEAR, MAX_ADMISSION_YEAR
            ),
        ));
    }
    Ok(n)
}

pub fn parse_amount(v: Option<&serde_json::Value>, field: &str) -> Result<f64, ValidationError> {
    let n = parse_number(v, field)?;
    if n < 0.0 {
        return Err(ValidationError::new(field, format!("{} must be >= 0", field)));
    }
    Ok(n)
}

/// Missing or null amounts default to zero.
pub fn parse_amount_or_zero(
    v: Option<&serde_json::Value>,
    field: &str,
) -> Result<f64, ValidationError> {
    match v {
        None => Ok(0.0),
        Some(v) if v.is_null() => Ok(0.0),
        Some(v) => parse_amount(Some(v), field),
    }
}

pub fn parse_credits(v: Option<&serde_json::Value>) -> Result<f64, ValidationError> {
    let n = parse_number(v, "credits")?;
    if n <= 0.0 {
        return Err(ValidationError::new("credits", "credits must be > 0"));
    }
    Ok(n)
}

pub fn parse_date(v: Option<&serde_json::Value>) -> Result<NaiveDate, ValidationError> {
    let s = required_str(v, "date")?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|_| ValidationError::new("date", "date must be YYYY-MM-DD"))
}

pub fn required_str(v: Option<&serde_json::Value>, field: &str) -> Result<String, ValidationError> {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| ValidationError::new(field, format!("missing {}", field)))
}

pub fn optional_str(v: Option<&serde_json::Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

pub fn parse_exam_type(v: Option<&serde_json::Value>) -> Result<ExamType, ValidationError> {
    required_str(v, "examType")?.parse()
}

pub fn parse_status(v: Option<&serde_json::Value>) -> Result<AttendanceStatus, ValidationError> {
    required_str(v, "status")?.parse()
}

/// Write-time guard. Stored rows that predate it are still aggregated as-is.
pub fn validate_marks(marks_obtained: f64, max_marks: f64) -> Result<(), ValidationError> {
    if max_marks <= 0.0 {
        return Err(ValidationError::new("maxMarks", "maxMarks must be > 0"));
    }
    if marks_obtained < 0.0 {
        return Err(ValidationError::new(
            "marksObtained",
            "marksObtained must be >= 0",
        ));
    }
    if marks_obtained > max_marks {
        return Err(ValidationError::new(
            "marksObtained",
            "marksObtained cannot exceed maxMarks",
        ));
    }
    Ok(())
}

pub fn validate_email(v: Option<&serde_json::Value>) -> Result<String, ValidationError> {
    let email = required_str(v, "email")?.to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid {
        return Err(ValidationError::new("email", "email is not a valid address"));
    }
    Ok(email)
}
