use crate::{
    auth,
    db::{get_role, get_uuid, now_millis},
    error::AppError,
    model::{Role, UserSummary},
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

/// What register and login hand back to the caller.
#[derive(Debug, Serialize)]
pub struct Session {
    pub user: UserSummary,
    pub token: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserSummary> {
    Ok(UserSummary {
        id: get_uuid(row, 0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        role: get_role(row, 3)?,
    })
}

/// Insert a new identity. The password must already be hashed.
pub fn insert_user(
    conn: &Connection,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<UserSummary, AppError> {
    let id = Uuid::new_v4();
    let email = normalize_email(email);
    let res = conn.execute(
        "INSERT INTO users (id, name, email, password_hash, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id.to_string(), name, email, password_hash, role.as_str(), now_millis()],
    );
    match res {
        Ok(_) => Ok(UserSummary {
            id,
            name: name.into(),
            email,
            role,
        }),
        Err(e)
            if matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::ConstraintViolation)
            ) =>
        {
            Err(AppError::Conflict("User already exists".into()))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn find_by_id(conn: &Connection, id: &Uuid) -> Result<Option<UserSummary>, AppError> {
    let user = conn
        .query_row(
            "SELECT id, name, email, role FROM users WHERE id = ?1",
            [id.to_string()],
            row_to_summary,
        )
        .optional()?;
    Ok(user)
}

/// Look up an identity together with its password hash.
fn find_credentials(
    conn: &Connection,
    email: &str,
) -> Result<Option<(UserSummary, String)>, AppError> {
    let found = conn
        .query_row(
            "SELECT id, name, email, role, password_hash FROM users WHERE email = ?1",
            [normalize_email(email)],
            |row| Ok((row_to_summary(row)?, row.get::<_, String>(4)?)),
        )
        .optional()?;
    Ok(found)
}

pub fn count_by_email(conn: &Connection, email: &str) -> Result<i64, AppError> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE email = ?1",
        [normalize_email(email)],
        |row| row.get(0),
    )?;
    Ok(n)
}

fn blank(s: &Option<String>) -> bool {
    s.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Register a new identity and issue its first credential.
pub fn register(
    conn: &Connection,
    secret: &[u8],
    name: Option<String>,
    email: Option<String>,
    password: Option<String>,
    role: Option<Role>,
) -> Result<Session, AppError> {
    if blank(&name) || blank(&email) || password.as_deref().map_or(true, str::is_empty) {
        return Err(AppError::validation("Please provide all required fields"));
    }
    let (name, email, password) = (
        name.unwrap_or_default(),
        email.unwrap_or_default(),
        password.unwrap_or_default(),
    );
    if find_credentials(conn, &email)?.is_some() {
        return Err(AppError::Conflict("User already exists".into()));
    }
    let hash = auth::hash_password(&password)?;
    let user = insert_user(conn, name.trim(), &email, &hash, role.unwrap_or_default())?;
    let token = auth::issue_jwt(secret, &user.id, user.role, auth::TOKEN_TTL)?;
    tracing::info!(user_id = %user.id, role = %user.role, "registered user");
    Ok(Session { user, token })
}

/// Verify credentials and issue a fresh credential. Unknown email and wrong
/// password fail identically.
pub fn login(
    conn: &Connection,
    secret: &[u8],
    email: Option<String>,
    password: Option<String>,
) -> Result<Session, AppError> {
    let (Some(email), Some(password)) = (email, password) else {
        return Err(AppError::Auth(INVALID_CREDENTIALS.into()));
    };
    let Some((user, hash)) = find_credentials(conn, &email)? else {
        tracing::info!("login failed: unknown email");
        return Err(AppError::Auth(INVALID_CREDENTIALS.into()));
    };
    if !auth::verify_password(&password, &hash) {
        tracing::info!(user_id = %user.id, "login failed: bad password");
        return Err(AppError::Auth(INVALID_CREDENTIALS.into()));
    }
    let token = auth::issue_jwt(secret, &user.id, user.role, auth::TOKEN_TTL)?;
    Ok(Session { user, token })
}
