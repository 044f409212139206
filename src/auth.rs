// Session authentication
// Login issues a bearer token with a TTL; middleware resolves the token to
// a caller identity and stores it in request extensions.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::api::AppState;
use crate::entities::user::{find_by_username, Role, User};
use crate::error::{ApiError, ApiResult};

/// Authenticated caller identity, available to handlers via request extensions.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub user_id: String,
    pub username: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// PASSWORDS
// ============================================================================

/// Salted sha256 digest, hex-encoded.
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{}", salt, password));
    format!("{:x}", hasher.finalize())
}

/// Constant-time digest comparison.
pub fn verify_password(user: &User, password: &str) -> bool {
    let candidate = hash_password(&user.salt, password);
    candidate
        .as_bytes()
        .ct_eq(user.password_digest.as_bytes())
        .into()
}

// ============================================================================
// SESSIONS
// ============================================================================

pub fn create_session(conn: &Connection, user_id: &str, ttl_minutes: i64) -> ApiResult<Session> {
    let session = Session {
        token: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        expires_at: Utc::now() + Duration::minutes(ttl_minutes),
    };

    conn.execute(
        "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
        params![session.token, session.user_id, session.expires_at.to_rfc3339()],
    )?;

    Ok(session)
}

pub fn delete_session(conn: &Connection, token: &str) -> ApiResult<()> {
    conn.execute("DELETE FROM sessions WHERE token = ?1", params![token])?;
    Ok(())
}

/// Resolve a bearer token to a caller identity. Expired sessions are
/// removed on sight.
pub fn resolve_token(conn: &Connection, token: &str) -> ApiResult<Option<CallerIdentity>> {
    let row = conn
        .query_row(
            "SELECT s.expires_at, u.id, u.username, u.role
             FROM sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?1",
            params![token],
            |row| {
                let expires_str: String = row.get(0)?;
                let role_str: String = row.get(3)?;
                Ok((expires_str, row.get::<_, String>(1)?, row.get::<_, String>(2)?, role_str))
            },
        )
        .optional()?;

    let (expires_str, user_id, username, role_str) = match row {
        Some(row) => row,
        None => return Ok(None),
    };

    let expires_at = DateTime::parse_from_rfc3339(&expires_str)
        .map_err(|_| ApiError::internal("Corrupt session expiry"))?
        .with_timezone(&Utc);

    if expires_at <= Utc::now() {
        delete_session(conn, token)?;
        return Ok(None);
    }

    Ok(Some(CallerIdentity {
        user_id,
        username,
        role: Role::parse(&role_str)?,
    }))
}

/// Verify credentials and issue a session.
pub fn login(
    conn: &Connection,
    username: &str,
    password: &str,
    ttl_minutes: i64,
) -> ApiResult<(User, Session)> {
    let user = find_by_username(conn, username)?
        .ok_or_else(|| ApiError::unauthorized("Invalid username or password"))?;

    if !verify_password(&user, password) {
        tracing::warn!(username = %username, "failed login attempt");
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let session = create_session(conn, &user.id, ttl_minutes)?;
    tracing::debug!(username = %user.username, role = %user.role.as_str(), "login");

    Ok((user, session))
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
}

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&req) {
        Some(token) => token.to_string(),
        None => {
            return ApiError::unauthorized(
                "Missing bearer token. Provide Authorization: Bearer <token>",
            )
            .into_response()
        }
    };

    let identity = {
        let conn = state.db.lock().unwrap();
        resolve_token(&conn, &token)
    };

    match identity {
        Ok(Some(identity)) => {
            req.extensions_mut().insert(identity);
            next.run(req).await
        }
        Ok(None) => {
            tracing::warn!("invalid or expired session token");
            ApiError::unauthorized("Invalid or expired session token").into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Role guards used by handlers.
pub fn require_admin(caller: &CallerIdentity) -> ApiResult<()> {
    if caller.role.is_admin() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Admin role required"))
    }
}

pub fn require_writer(caller: &CallerIdentity) -> ApiResult<()> {
    if caller.role.can_write() {
        Ok(())
    } else {
        Err(ApiError::forbidden("Read-only role cannot modify records"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::user::create_user;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_hash_is_salted() {
        let a = hash_password("salt-a", "password");
        let b = hash_password("salt-b", "password");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_verify_password() {
        let conn = test_conn();
        let user = create_user(&conn, "alice", "hunter22hunter22", Role::Analyst).unwrap();

        assert!(verify_password(&user, "hunter22hunter22"));
        assert!(!verify_password(&user, "wrong"));
    }

    #[test]
    fn test_login_and_resolve() {
        let conn = test_conn();
        create_user(&conn, "alice", "hunter22hunter22", Role::Analyst).unwrap();

        let (user, session) = login(&conn, "alice", "hunter22hunter22", 60).unwrap();
        assert_eq!(user.username, "alice");

        let identity = resolve_token(&conn, &session.token).unwrap().unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Analyst);
        assert_eq!(identity.user_id, user.id);
    }

    #[test]
    fn test_login_rejects_bad_credentials() {
        let conn = test_conn();
        create_user(&conn, "alice", "hunter22hunter22", Role::Analyst).unwrap();

        assert!(login(&conn, "alice", "wrong-password", 60).is_err());
        assert!(login(&conn, "nobody", "hunter22hunter22", 60).is_err());
    }

    #[test]
    fn test_expired_session_is_rejected_and_removed() {
        let conn = test_conn();
        let user = create_user(&conn, "alice", "hunter22hunter22", Role::Analyst).unwrap();

        // Negative TTL: already expired
        let session = create_session(&conn, &user.id, -5).unwrap();
        assert!(resolve_token(&conn, &session.token).unwrap().is_none());

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn test_logout_invalidates_token() {
        let conn = test_conn();
        create_user(&conn, "alice", "hunter22hunter22", Role::Analyst).unwrap();
        let (_, session) = login(&conn, "alice", "hunter22hunter22", 60).unwrap();

        delete_session(&conn, &session.token).unwrap();
        assert!(resolve_token(&conn, &session.token).unwrap().is_none());
    }

    #[test]
    fn test_unknown_token_resolves_to_none() {
        let conn = test_conn();
        assert!(resolve_token(&conn, "not-a-token").unwrap().is_none());
    }

    #[test]
    fn test_role_guards() {
        let admin = CallerIdentity {
            user_id: "u1".to_string(),
            username: "root".to_string(),
            role: Role::Admin,
        };
        let viewer = CallerIdentity {
            user_id: "u2".to_string(),
            username: "guest".to_string(),
            role: Role::Viewer,
        };

        assert!(require_admin(&admin).is_ok());
        assert!(require_writer(&admin).is_ok());
        assert!(require_admin(&viewer).is_err());
        assert!(require_writer(&viewer).is_err());
    }
}
