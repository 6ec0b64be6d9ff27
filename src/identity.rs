//! Credential and session handling.
//!
//! Stands in for the hosted auth service: it only knows identities (email +
//! salted password hash) and sessions. Roles and profiles live in the store.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email or password")]
    BadCredentials,
    #[error("password must be at least 6 characters")]
    WeakPassword,
    #[error("an account with this email already exists")]
    DuplicateEmail,
    #[error("session expired or invalid")]
    InvalidSession,
    #[error("identity not found")]
    NotFound,
    #[error("identity store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub subject_id: String,
    pub token: String,
    pub expires_at: String,
}

pub trait IdentityProvider {
    fn authenticate(&self, email: &str, password: &str) -> Result<Session, IdentityError>;
    fn create_identity(&self, email: &str, password: &str) -> Result<String, IdentityError>;
    fn delete_identity(&self, subject_id: &str) -> Result<(), IdentityError>;
    fn resolve_session(&self, token: &str) -> Result<String, IdentityError>;
    fn revoke_session(&self, token: &str) -> Result<(), IdentityError>;
}

pub struct SqliteIdentity<'a> {
    conn: &'a Connection,
    session_ttl: Duration,
}

impl<'a> SqliteIdentity<'a> {
    pub fn new(conn: &'a Connection, session_ttl_hours: i64) -> Self {
        Self {
            conn,
            session_ttl: Duration::hours(session_ttl_hours.max(0)),
        }
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

impl IdentityProvider for SqliteIdentity<'_> {
    fn authenticate(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let email = email.trim().to_ascii_lowercase();
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, salt, password_hash FROM identities WHERE email = ?",
                [&email],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        let Some((subject_id, salt, expected)) = row else {
            return Err(IdentityError::BadCredentials);
        };
        if hash_password(&salt, password) != expected {
            return Err(IdentityError::BadCredentials);
        }

        let now = Utc::now();
        let token = Uuid::new_v4().to_string();
        let expires_at = timestamp(now + self.session_ttl);
        self.conn.execute(
            "INSERT INTO sessions(token, identity_id, created_at, expires_at) VALUES(?, ?, ?, ?)",
            (&token, &subject_id, timestamp(now), &expires_at),
        )?;
        Ok(Session {
            subject_id,
            token,
            expires_at,
        })
    }

    fn create_identity(&self, email: &str, password: &str) -> Result<String, IdentityError> {
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(IdentityError::WeakPassword);
        }
        let id = Uuid::new_v4().to_string();
        let salt = Uuid::new_v4().simple().to_string();
        let res = self.conn.execute(
            "INSERT INTO identities(id, email, salt, password_hash, created_at) VALUES(?, ?, ?, ?, ?)",
            (
                &id,
                email.trim().to_ascii_lowercase(),
                &salt,
                hash_password(&salt, password),
                timestamp(Utc::now()),
            ),
        );
        match res {
            Ok(_) => Ok(id),
            Err(rusqlite::Error::SqliteFailure(f, _)) if f.code == ErrorCode::ConstraintViolation => {
                Err(IdentityError::DuplicateEmail)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn delete_identity(&self, subject_id: &str) -> Result<(), IdentityError> {
        self.conn
            .execute("DELETE FROM sessions WHERE identity_id = ?", [subject_id])?;
        let n = self
            .conn
            .execute("DELETE FROM identities WHERE id = ?", [subject_id])?;
        if n == 0 {
            return Err(IdentityError::NotFound);
        }
        Ok(())
    }

    fn resolve_session(&self, token: &str) -> Result<String, IdentityError> {
        let row: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT identity_id, expires_at FROM sessions WHERE token = ?",
                [token],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((subject_id, expires_at)) = row else {
            return Err(IdentityError::InvalidSession);
        };
        let expired = DateTime::parse_from_rfc3339(&expires_at)
            .map(|t| t.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            log::debug!("session for {} expired at {}", subject_id, expires_at);
            self.conn
                .execute("DELETE FROM sessions WHERE token = ?", [token])?;
            return Err(IdentityError::InvalidSession);
        }
        Ok(subject_id)
    }

    fn revoke_session(&self, token: &str) -> Result<(), IdentityError> {
        self.conn
            .execute("DELETE FROM sessions WHERE token = ?", [token])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn create_and_authenticate() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let id = idp
            .create_identity("Ravi@College.edu", "s3cret!")
            .expect("create");

        let session = idp.authenticate("ravi@college.edu", "s3cret!").expect("login");
        assert_eq!(session.subject_id, id);
        assert_eq!(idp.resolve_session(&session.token).expect("resolve"), id);

        assert!(matches!(
            idp.authenticate("ravi@college.edu", "wrong"),
            Err(IdentityError::BadCredentials)
        ));
        assert!(matches!(
            idp.authenticate("nobody@college.edu", "s3cret!"),
            Err(IdentityError::BadCredentials)
        ));
    }

    #[test]
    fn duplicate_email_and_weak_password_are_rejected() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        idp.create_identity("a@college.edu", "longenough").expect("create");
        assert!(matches!(
            idp.create_identity("A@college.edu", "longenough"),
            Err(IdentityError::DuplicateEmail)
        ));
        assert!(matches!(
            idp.create_identity("b@college.edu", "123"),
            Err(IdentityError::WeakPassword)
        ));
    }

    #[test]
    fn revoked_and_expired_sessions_do_not_resolve() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        idp.create_identity("a@college.edu", "longenough").expect("create");
        let s = idp.authenticate("a@college.edu", "longenough").expect("login");
        idp.revoke_session(&s.token).expect("revoke");
        assert!(matches!(
            idp.resolve_session(&s.token),
            Err(IdentityError::InvalidSession)
        ));

        let zero_ttl = SqliteIdentity::new(&conn, 0);
        let s = zero_ttl
            .authenticate("a@college.edu", "longenough")
            .expect("login");
        assert!(matches!(
            zero_ttl.resolve_session(&s.token),
            Err(IdentityError::InvalidSession)
        ));
    }

    #[test]
    fn delete_identity_drops_sessions() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let id = idp.create_identity("a@college.edu", "longenough").expect("create");
        let s = idp.authenticate("a@college.edu", "longenough").expect("login");
        idp.delete_identity(&id).expect("delete");
        assert!(idp.resolve_session(&s.token).is_err());
        assert!(matches!(idp.delete_identity(&id), Err(IdentityError::NotFound)));
    }
}
