use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientStatus {
    Active,
    Inactive,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientStatus::Active => "active",
            ClientStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "active" => Ok(ClientStatus::Active),
            "inactive" => Ok(ClientStatus::Inactive),
            other => Err(ApiError::bad_request(format!("Unknown client status: {}", other))),
        }
    }
}

/// Treasury client: a corporate customer whose bank statements we analyze.
#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: String,
    pub name: String,
    pub contact_email: String,
    /// Business segment, e.g. "manufacturing" or "logistics".
    pub segment: String,
    pub status: ClientStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn create_client(
    conn: &Connection,
    name: &str,
    contact_email: &str,
    segment: &str,
) -> ApiResult<Client> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("Client name must not be empty"));
    }
    if !contact_email.contains('@') {
        return Err(ApiError::bad_request(format!(
            "Invalid contact email: {}",
            contact_email
        )));
    }

    let now = Utc::now();
    let client = Client {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        contact_email: contact_email.to_string(),
        segment: segment.to_string(),
        status: ClientStatus::Active,
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO clients (id, name, contact_email, segment, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            client.id,
            client.name,
            client.contact_email,
            client.segment,
            client.status.as_str(),
            client.created_at.to_rfc3339(),
            client.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(client)
}

fn row_to_client(row: &rusqlite::Row<'_>) -> rusqlite::Result<Client> {
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    let updated_str: String = row.get(6)?;

    Ok(Client {
        id: row.get(0)?,
        name: row.get(1)?,
        contact_email: row.get(2)?,
        segment: row.get(3)?,
        status: ClientStatus::parse(&status_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

pub fn get_client(conn: &Connection, id: &str) -> ApiResult<Client> {
    conn.query_row(
        "SELECT id, name, contact_email, segment, status, created_at, updated_at
         FROM clients WHERE id = ?1",
        params![id],
        row_to_client,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Client not found: {}", id)))
}

pub fn list_clients(conn: &Connection, status: Option<ClientStatus>) -> ApiResult<Vec<Client>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, contact_email, segment, status, created_at, updated_at
         FROM clients
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY name",
    )?;

    let clients = stmt
        .query_map(params![status.map(|s| s.as_str())], row_to_client)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(clients)
}

/// Partial update: only the provided fields change.
pub fn update_client(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    contact_email: Option<&str>,
    segment: Option<&str>,
    status: Option<ClientStatus>,
) -> ApiResult<Client> {
    let mut client = get_client(conn, id)?;

    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("Client name must not be empty"));
        }
        client.name = name.to_string();
    }
    if let Some(email) = contact_email {
        if !email.contains('@') {
            return Err(ApiError::bad_request(format!("Invalid contact email: {}", email)));
        }
        client.contact_email = email.to_string();
    }
    if let Some(segment) = segment {
        client.segment = segment.to_string();
    }
    if let Some(status) = status {
        client.status = status;
    }
    client.updated_at = Utc::now();

    conn.execute(
        "UPDATE clients
         SET name = ?2, contact_email = ?3, segment = ?4, status = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            client.id,
            client.name,
            client.contact_email,
            client.segment,
            client.status.as_str(),
            client.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(client)
}

/// Delete a client. Statements, transactions, analyses, recommendations and
/// reports cascade via foreign keys.
pub fn delete_client(conn: &Connection, id: &str) -> ApiResult<()> {
    let deleted = conn.execute("DELETE FROM clients WHERE id = ?1", params![id])?;
    if deleted == 0 {
        return Err(ApiError::not_found(format!("Client not found: {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_create_and_get() {
        let conn = test_conn();

        let client = create_client(&conn, "Acme Corp", "cfo@acme.example", "manufacturing").unwrap();
        assert_eq!(client.status, ClientStatus::Active);

        let fetched = get_client(&conn, &client.id).unwrap();
        assert_eq!(fetched.name, "Acme Corp");
        assert_eq!(fetched.segment, "manufacturing");
    }

    #[test]
    fn test_validation() {
        let conn = test_conn();

        assert!(create_client(&conn, "", "cfo@acme.example", "x").is_err());
        assert!(create_client(&conn, "Acme", "not-an-email", "x").is_err());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let conn = test_conn();
        let err = get_client(&conn, "missing").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_list_with_status_filter() {
        let conn = test_conn();

        let a = create_client(&conn, "Active Co", "a@a.example", "x").unwrap();
        let b = create_client(&conn, "Dormant Co", "b@b.example", "x").unwrap();
        update_client(&conn, &b.id, None, None, None, Some(ClientStatus::Inactive)).unwrap();

        assert_eq!(list_clients(&conn, None).unwrap().len(), 2);

        let active = list_clients(&conn, Some(ClientStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, a.id);

        let inactive = list_clients(&conn, Some(ClientStatus::Inactive)).unwrap();
        assert_eq!(inactive.len(), 1);
        assert_eq!(inactive[0].id, b.id);
    }

    #[test]
    fn test_partial_update() {
        let conn = test_conn();
        let client = create_client(&conn, "Acme", "cfo@acme.example", "manufacturing").unwrap();

        let updated = update_client(&conn, &client.id, Some("Acme Holdings"), None, None, None).unwrap();
        assert_eq!(updated.name, "Acme Holdings");
        assert_eq!(updated.contact_email, "cfo@acme.example");
        assert_eq!(updated.segment, "manufacturing");
    }

    #[test]
    fn test_delete() {
        let conn = test_conn();
        let client = create_client(&conn, "Acme", "cfo@acme.example", "x").unwrap();

        delete_client(&conn, &client.id).unwrap();
        assert!(get_client(&conn, &client.id).is_err());
        assert!(delete_client(&conn, &client.id).is_err());
    }
}
