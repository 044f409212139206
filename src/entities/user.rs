use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::auth;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// ROLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access: user, product, and config administration.
    Admin,
    /// Day-to-day treasury work: clients, statements, analyses, decisions.
    Analyst,
    /// Read-only access.
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Analyst => "analyst",
            Role::Viewer => "viewer",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "admin" => Ok(Role::Admin),
            "analyst" => Ok(Role::Analyst),
            "viewer" => Ok(Role::Viewer),
            other => Err(ApiError::bad_request(format!("Unknown role: {}", other))),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Whether this role may mutate business records.
    pub fn can_write(&self) -> bool {
        matches!(self, Role::Admin | Role::Analyst)
    }
}

// ============================================================================
// USER
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_digest: String,
    #[serde(skip_serializing)]
    pub salt: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

pub fn create_user(
    conn: &Connection,
    username: &str,
    password: &str,
    role: Role,
) -> ApiResult<User> {
    if username.trim().is_empty() {
        return Err(ApiError::bad_request("Username must not be empty"));
    }
    if password.len() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let salt = uuid::Uuid::new_v4().to_string();
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        password_digest: auth::hash_password(&salt, password),
        salt,
        role,
        created_at: Utc::now(),
    };

    let result = conn.execute(
        "INSERT INTO users (id, username, password_digest, salt, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.id,
            user.username,
            user.password_digest,
            user.salt,
            user.role.as_str(),
            user.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(user),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(ApiError::conflict(format!("Username already taken: {}", username)))
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_digest: row.get(2)?,
        salt: row.get(3)?,
        role: Role::parse(&role_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

pub fn find_by_username(conn: &Connection, username: &str) -> ApiResult<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, username, password_digest, salt, role, created_at
             FROM users WHERE username = ?1",
            params![username],
            row_to_user,
        )
        .optional()?;

    Ok(user)
}

pub fn get_user(conn: &Connection, id: &str) -> ApiResult<User> {
    conn.query_row(
        "SELECT id, username, password_digest, salt, role, created_at
         FROM users WHERE id = ?1",
        params![id],
        row_to_user,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("User not found: {}", id)))
}

pub fn list_users(conn: &Connection) -> ApiResult<Vec<User>> {
    let mut stmt = conn.prepare(
        "SELECT id, username, password_digest, salt, role, created_at
         FROM users ORDER BY username",
    )?;

    let users = stmt
        .query_map([], row_to_user)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(users)
}
