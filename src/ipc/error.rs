use crate::access::AccessError;
use crate::account::AccountError;
use crate::identity::IdentityError;
use crate::model::ValidationError;
use crate::saga::SagaError;
use crate::store::StoreError;
use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    /// Shape used for one failed entry inside a bulk result.
    pub fn entry(&self, index: usize) -> serde_json::Value {
        json!({
            "index": index,
            "code": self.code,
            "message": self.message,
        })
    }

    fn db_failed(cause: &dyn std::fmt::Display) -> Self {
        log::error!("store failure: {}", cause);
        Self::new("db_failed", "database operation failed")
    }
}

impl From<AccessError> for HandlerErr {
    fn from(e: AccessError) -> Self {
        let code = match e {
            AccessError::Unauthorized => "unauthorized",
            AccessError::Forbidden | AccessError::NotAssigned => "forbidden",
            AccessError::ProfileNotFound => "not_found",
        };
        Self::new(code, e.to_string())
    }
}

impl From<ValidationError> for HandlerErr {
    fn from(e: ValidationError) -> Self {
        Self::bad_params(e.message).with_details(json!({ "field": e.field }))
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { table } => {
                log::debug!("no matching row in {}", table);
                Self::new("not_found", "record not found")
            }
            StoreError::Conflict(detail) => {
                log::debug!("unique constraint: {}", detail);
                Self::new("conflict", "a record with the same key already exists")
            }
            StoreError::MissingReference(detail) => {
                log::debug!("foreign key constraint: {}", detail);
                Self::bad_params("referenced record does not exist")
            }
            other => Self::db_failed(&other),
        }
    }
}

impl From<IdentityError> for HandlerErr {
    fn from(e: IdentityError) -> Self {
        let message = e.to_string();
        match e {
            IdentityError::BadCredentials | IdentityError::InvalidSession => {
                Self::new("unauthorized", message)
            }
            IdentityError::WeakPassword => {
                Self::bad_params(message).with_details(json!({ "field": "password" }))
            }
            IdentityError::DuplicateEmail => Self::new("conflict", message),
            IdentityError::NotFound => Self::new("not_found", message),
            IdentityError::Sqlite(inner) => Self::db_failed(&inner),
        }
    }
}

impl From<AccountError> for HandlerErr {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Identity(e) => e.into(),
            AccountError::Store(e) => e.into(),
            AccountError::MissingIdentity => Self::db_failed(&AccountError::MissingIdentity),
        }
    }
}

/// A failure on the first step is reported as that step's own error; later
/// failures become `saga_failed` with the unwinding record attached.
impl From<SagaError<AccountError>> for HandlerErr {
    fn from(e: SagaError<AccountError>) -> Self {
        let clean = e.is_clean_first_step();
        let step = e.step;
        let unwound = e.unwound;
        let failures: Vec<serde_json::Value> = e
            .compensation_failures
            .iter()
            .map(|f| json!({ "step": f.step, "message": f.message }))
            .collect();
        let cause = HandlerErr::from(e.cause);
        if clean {
            return cause;
        }
        Self::new("saga_failed", format!("{} (step: {})", cause.message, step)).with_details(
            json!({
                "step": step,
                "cause": { "code": cause.code, "message": cause.message },
                "unwound": unwound,
                "compensationFailures": failures,
            }),
        )
    }
}
