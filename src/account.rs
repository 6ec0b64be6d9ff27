//! Account lifecycle across the identity provider and the record store.
//!
//! An account is an identity, a `users` row sharing its id, and for students
//! and faculty a linked profile row. Creation and removal touch both
//! backends, so each runs as a [`Saga`].

use crate::access::Role;
use crate::config::Cfg;
use crate::identity::{IdentityError, IdentityProvider};
use crate::model::User;
use crate::saga::{Saga, SagaError};
use crate::store::{fetch_one, to_row, Filter, Row, Store, StoreError};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("account step ran before its identity existed")]
    MissingIdentity,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub roll_number: String,
    pub department_id: Option<String>,
    pub current_semester: Option<i64>,
    pub admission_year: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewFaculty {
    pub employee_id: String,
    pub department_id: Option<String>,
    pub designation: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProfileSpec {
    Admin,
    Student(NewStudent),
    Faculty(NewFaculty),
}

#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub profile: ProfileSpec,
}

impl NewAccount {
    pub fn role(&self) -> Role {
        match self.profile {
            ProfileSpec::Admin => Role::Admin,
            ProfileSpec::Student(_) => Role::Student,
            ProfileSpec::Faculty(_) => Role::Faculty,
        }
    }
}

#[derive(Debug, Default)]
struct CreateCtx {
    identity_id: Option<String>,
    profile_id: Option<String>,
}

impl CreateCtx {
    fn identity(&self) -> Result<String, AccountError> {
        self.identity_id.clone().ok_or(AccountError::MissingIdentity)
    }
}

#[derive(Debug, Clone)]
pub struct CreatedAccount {
    pub user: User,
    pub profile_id: Option<String>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn profile_table(spec: &ProfileSpec) -> Option<&'static str> {
    match spec {
        ProfileSpec::Admin => None,
        ProfileSpec::Student(_) => Some("students"),
        ProfileSpec::Faculty(_) => Some("faculty"),
    }
}

fn profile_row(spec: &ProfileSpec, id: &str, user_id: &str) -> Option<Row> {
    let v = match spec {
        ProfileSpec::Admin => return None,
        ProfileSpec::Student(s) => json!({
            "id": id,
            "user_id": user_id,
            "roll_number": s.roll_number,
            "department_id": s.department_id,
            "current_semester": s.current_semester,
            "admission_year": s.admission_year,
        }),
        ProfileSpec::Faculty(f) => json!({
            "id": id,
            "user_id": user_id,
            "employee_id": f.employee_id,
            "department_id": f.department_id,
            "designation": f.designation,
        }),
    };
    match v {
        serde_json::Value::Object(m) => Some(m),
        _ => None,
    }
}

pub fn create_account(
    idp: &dyn IdentityProvider,
    store: &dyn Store,
    new: &NewAccount,
) -> Result<CreatedAccount, SagaError<AccountError>> {
    let mut ctx = CreateCtx::default();
    let role = new.role();

    let saga: Saga<'_, CreateCtx, AccountError> = Saga::new("create_account");
    saga
        .step(
            "identity",
            |ctx: &mut CreateCtx| {
                ctx.identity_id = Some(idp.create_identity(&new.email, &new.password)?);
                Ok(())
            },
            |ctx: &mut CreateCtx| {
                idp.delete_identity(&ctx.identity()?)?;
                Ok(())
            },
        )
        .step(
            "user",
            |ctx: &mut CreateCtx| {
                let user = User {
                    id: ctx.identity()?,
                    email: new.email.trim().to_ascii_lowercase(),
                    full_name: new.full_name.clone(),
                    role: role.as_str().to_string(),
                    created_at: Some(now()),
                };
                store.insert("users", to_row(&user)?)?;
                Ok(())
            },
            |ctx: &mut CreateCtx| {
                store.delete("users", &Filter::new().eq("id", ctx.identity()?))?;
                Ok(())
            },
        )
        .step(
            "profile",
            |ctx: &mut CreateCtx| {
                let Some(table) = profile_table(&new.profile) else {
                    return Ok(());
                };
                let id = Uuid::new_v4().to_string();
                let Some(row) = profile_row(&new.profile, &id, &ctx.identity()?) else {
                    return Ok(());
                };
                store.insert(table, row)?;
                ctx.profile_id = Some(id);
                Ok(())
            },
            |ctx: &mut CreateCtx| {
                if let (Some(table), Some(id)) = (profile_table(&new.profile), &ctx.profile_id) {
                    store.delete(table, &Filter::new().eq("id", id.as_str()))?;
                }
                Ok(())
            },
        )
        .run(&mut ctx)
        .map_err(|e| {
            log::warn!("account creation for {} rolled back: {}", new.email, e);
            e
        })?;

    let user_id = ctx.identity_id.clone().unwrap_or_default();
    let user: User = fetch_one(store, "users", &Filter::new().eq("id", user_id.as_str()))
        .map_err(|e| SagaError {
            step: "reload",
            cause: AccountError::from(e),
            unwound: Vec::new(),
            compensation_failures: Vec::new(),
        })?;
    log::info!("created {} account {}", role, user.email);
    Ok(CreatedAccount {
        user,
        profile_id: ctx.profile_id,
    })
}

#[derive(Debug, Default)]
struct RemoveCtx {
    user: Option<Row>,
    profiles: Vec<(&'static str, Row)>,
}

/// Removes the `users` row (its profile and the profile's records cascade)
/// and then the identity. Compensation restores the user and profile rows;
/// cascaded marks, attendance and fees are not restored.
pub fn remove_account(
    idp: &dyn IdentityProvider,
    store: &dyn Store,
    user_id: &str,
) -> Result<(), SagaError<AccountError>> {
    let mut ctx = RemoveCtx::default();
    let saga: Saga<'_, RemoveCtx, AccountError> = Saga::new("remove_account");
    saga
        .step(
            "user",
            |ctx: &mut RemoveCtx| {
                let by_id = Filter::new().eq("id", user_id);
                let by_user = Filter::new().eq("user_id", user_id);
                ctx.user = Some(store.find_one("users", &by_id)?);
                for table in ["students", "faculty"] {
                    for row in store.find(table, &by_user)? {
                        ctx.profiles.push((table, row));
                    }
                }
                store.delete("users", &by_id)?;
                Ok(())
            },
            |ctx: &mut RemoveCtx| {
                if let Some(user) = ctx.user.take() {
                    store.insert("users", user)?;
                }
                for (table, row) in ctx.profiles.drain(..) {
                    store.insert(table, row)?;
                }
                log::warn!("restored account {} without its cascaded records", user_id);
                Ok(())
            },
        )
        .step(
            "identity",
            |_: &mut RemoveCtx| match idp.delete_identity(user_id) {
                Ok(()) | Err(IdentityError::NotFound) => Ok(()),
                Err(e) => Err(e.into()),
            },
            |_: &mut RemoveCtx| Ok(()),
        )
        .run(&mut ctx)
}

/// Creates the configured admin when the workspace has no admin user yet.
pub fn ensure_default_admin(
    idp: &dyn IdentityProvider,
    store: &dyn Store,
    cfg: &Cfg,
) -> anyhow::Result<()> {
    let admins = store.find("users", &Filter::new().eq("role", Role::Admin.as_str()))?;
    if !admins.is_empty() {
        log::trace!("workspace already has {} admin(s)", admins.len());
        return Ok(());
    }
    log::info!(
        "no admin in workspace; creating default admin {}",
        cfg.default_admin_email
    );
    create_account(
        idp,
        store,
        &NewAccount {
            email: cfg.default_admin_email.clone(),
            password: cfg.default_admin_password.clone(),
            full_name: cfg.default_admin_name.clone(),
            profile: ProfileSpec::Admin,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::identity::SqliteIdentity;
    use crate::model::StudentProfile;
    use crate::store::{fetch, SqliteStore};
    use rusqlite::Connection;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::ensure_schema(&conn).expect("schema");
        conn
    }

    fn student(email: &str, roll: &str) -> NewAccount {
        NewAccount {
            email: email.to_string(),
            password: "password1".to_string(),
            full_name: "Asha Rao".to_string(),
            profile: ProfileSpec::Student(NewStudent {
                roll_number: roll.to_string(),
                department_id: None,
                current_semester: Some(3),
                admission_year: Some(2023),
            }),
        }
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn student_account_links_identity_user_and_profile() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let store = SqliteStore::new(&conn);
        let created = create_account(&idp, &store, &student("asha@college.edu", "CS-01"))
            .expect("create");
        assert_eq!(created.user.role, "student");
        let profiles: Vec<StudentProfile> =
            fetch(&store, "students", &Filter::new()).expect("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].user_id, created.user.id);
        assert_eq!(Some(profiles[0].id.clone()), created.profile_id);

        let session = idp.authenticate("asha@college.edu", "password1").expect("login");
        assert_eq!(session.subject_id, created.user.id);
    }

    #[test]
    fn duplicate_roll_number_leaves_no_identity_behind() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let store = SqliteStore::new(&conn);
        create_account(&idp, &store, &student("a@college.edu", "CS-01")).expect("first");

        let e = create_account(&idp, &store, &student("b@college.edu", "CS-01"))
            .expect_err("duplicate roll number");
        assert_eq!(e.step, "profile");
        assert!(matches!(e.cause, AccountError::Store(StoreError::Conflict(_))));
        assert_eq!(e.unwound, vec!["user", "identity"]);
        assert!(e.compensation_failures.is_empty());

        assert_eq!(count(&conn, "identities"), 1);
        assert_eq!(count(&conn, "users"), 1);
        assert!(idp.authenticate("b@college.edu", "password1").is_err());
    }

    #[test]
    fn duplicate_email_fails_before_anything_is_written() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let store = SqliteStore::new(&conn);
        create_account(&idp, &store, &student("a@college.edu", "CS-01")).expect("first");
        let e = create_account(&idp, &store, &student("A@college.edu", "CS-02"))
            .expect_err("duplicate email");
        assert_eq!(e.step, "identity");
        assert!(e.is_clean_first_step());
        assert_eq!(count(&conn, "students"), 1);
    }

    #[test]
    fn remove_account_clears_every_trace() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let store = SqliteStore::new(&conn);
        let created = create_account(&idp, &store, &student("a@college.edu", "CS-01"))
            .expect("create");
        remove_account(&idp, &store, &created.user.id).expect("remove");
        assert_eq!(count(&conn, "identities"), 0);
        assert_eq!(count(&conn, "users"), 0);
        assert_eq!(count(&conn, "students"), 0);

        let e = remove_account(&idp, &store, &created.user.id).expect_err("gone");
        assert!(matches!(
            e.cause,
            AccountError::Store(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn default_admin_is_created_once() {
        let conn = conn();
        let idp = SqliteIdentity::new(&conn, 12);
        let store = SqliteStore::new(&conn);
        let cfg = Cfg::default();
        ensure_default_admin(&idp, &store, &cfg).expect("first");
        ensure_default_admin(&idp, &store, &cfg).expect("second");
        assert_eq!(count(&conn, "users"), 1);
        idp.authenticate(&cfg.default_admin_email, &cfg.default_admin_password)
            .expect("admin login");
    }
}
