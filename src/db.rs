use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Open (or create) the database at `path` and ensure the schema exists.
pub fn open_database(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            username TEXT UNIQUE NOT NULL,
            password_digest TEXT NOT NULL,
            salt TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            contact_email TEXT NOT NULL,
            segment TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS statement_files (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
            filename TEXT NOT NULL,
            format TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            status TEXT NOT NULL,
            transaction_count INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            uploaded_at TEXT NOT NULL,
            UNIQUE(client_id, content_hash)
        );

        CREATE TABLE IF NOT EXISTS statement_transactions (
            id TEXT PRIMARY KEY,
            statement_id TEXT NOT NULL REFERENCES statement_files(id) ON DELETE CASCADE,
            client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            amount REAL NOT NULL,
            direction TEXT NOT NULL,
            category TEXT NOT NULL,
            balance_after REAL
        );

        CREATE TABLE IF NOT EXISTS analyses (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
            period_start TEXT,
            period_end TEXT,
            transaction_count INTEGER NOT NULL,
            total_inflow REAL NOT NULL,
            total_outflow REAL NOT NULL,
            net_flow REAL NOT NULL,
            balance_mean REAL NOT NULL,
            balance_std_dev REAL NOT NULL,
            min_balance REAL NOT NULL,
            idle_balance REAL NOT NULL,
            projected_idle_yield REAL NOT NULL,
            category_breakdown TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS products (
            id TEXT PRIMARY KEY,
            name TEXT UNIQUE NOT NULL,
            category TEXT NOT NULL,
            min_balance REAL NOT NULL,
            annual_yield_pct REAL NOT NULL,
            liquidity TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recommendations (
            id TEXT PRIMARY KEY,
            analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
            client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
            product_id TEXT NOT NULL REFERENCES products(id),
            rationale TEXT NOT NULL,
            projected_earnings REAL NOT NULL,
            status TEXT NOT NULL,
            decided_by TEXT,
            decided_at TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS reports (
            id TEXT PRIMARY KEY,
            client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
            analysis_id TEXT NOT NULL REFERENCES analyses(id) ON DELETE CASCADE,
            title TEXT NOT NULL,
            period TEXT NOT NULL,
            body TEXT NOT NULL,
            generated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS system_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            description TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_entries (
            id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            action TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            detail TEXT NOT NULL,
            actor TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_tx_statement ON statement_transactions(statement_id);
        CREATE INDEX IF NOT EXISTS idx_tx_client_date ON statement_transactions(client_id, date);
        CREATE INDEX IF NOT EXISTS idx_statements_client ON statement_files(client_id);
        CREATE INDEX IF NOT EXISTS idx_analyses_client ON analyses(client_id);
        CREATE INDEX IF NOT EXISTS idx_recs_client ON recommendations(client_id);
        CREATE INDEX IF NOT EXISTS idx_reports_client ON reports(client_id);
        CREATE INDEX IF NOT EXISTS idx_audit_entity ON audit_entries(entity_type, entity_id);
        CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_entries(timestamp);
        CREATE INDEX IF NOT EXISTS idx_sessions_expiry ON sessions(expires_at);",
    )?;

    Ok(())
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Immutable audit record. There is deliberately no update or delete path.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub detail: serde_json::Value,
    pub actor: String,
}

impl AuditEntry {
    pub fn new(
        action: &str,
        entity_type: &str,
        entity_id: &str,
        detail: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            detail,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_audit(conn: &Connection, entry: &AuditEntry) -> Result<()> {
    let detail_json = serde_json::to_string(&entry.detail)?;

    conn.execute(
        "INSERT INTO audit_entries (
            id, timestamp, action, entity_type, entity_id, detail, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.id,
            entry.timestamp.to_rfc3339(),
            entry.action,
            entry.entity_type,
            entry.entity_id,
            detail_json,
            entry.actor,
        ],
    )?;

    Ok(())
}

/// List audit entries, newest first, optionally filtered by entity.
pub fn list_audit(
    conn: &Connection,
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    limit: usize,
) -> Result<Vec<AuditEntry>> {
    let mut sql = String::from(
        "SELECT id, timestamp, action, entity_type, entity_id, detail, actor
         FROM audit_entries WHERE 1=1",
    );
    let mut args: Vec<String> = Vec::new();

    if let Some(et) = entity_type {
        args.push(et.to_string());
        sql.push_str(&format!(" AND entity_type = ?{}", args.len()));
    }
    if let Some(eid) = entity_id {
        args.push(eid.to_string());
        sql.push_str(&format!(" AND entity_id = ?{}", args.len()));
    }
    sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let entries = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            let timestamp_str: String = row.get(1)?;
            let detail_json: String = row.get(5)?;

            Ok(AuditEntry {
                id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
                action: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                detail: serde_json::from_str(&detail_json)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

// ============================================================================
// SYSTEM CONFIG
// ============================================================================

/// Operating buffer subtracted from the minimum observed balance before
/// any funds are considered idle.
pub const KEY_IDLE_THRESHOLD: &str = "idle_balance_threshold";
/// Fixed annual yield rate applied to idle balances (fraction, e.g. 0.04).
pub const KEY_IDLE_YIELD_RATE: &str = "idle_yield_rate";
/// Coefficient-of-variation cutoff above which a client is treated as
/// too volatile for term-liquidity products.
pub const KEY_VOLATILITY_CUTOFF: &str = "volatility_cutoff";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub description: String,
    pub updated_at: DateTime<Utc>,
}

/// Seed default config knobs. Existing values are left untouched.
pub fn seed_defaults(conn: &Connection) -> Result<()> {
    let defaults = [
        (KEY_IDLE_THRESHOLD, "50000", "Operating buffer excluded from idle balance (account currency)"),
        (KEY_IDLE_YIELD_RATE, "0.04", "Annual yield rate applied to idle balances"),
        (KEY_VOLATILITY_CUTOFF, "0.5", "Balance coefficient-of-variation cutoff for term products"),
    ];

    for (key, value, description) in defaults {
        conn.execute(
            "INSERT OR IGNORE INTO system_config (key, value, description, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, value, description, Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}

pub fn get_config_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM system_config WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;

    Ok(value)
}

/// Numeric config accessor with a fallback for missing or malformed values.
pub fn get_config_f64(conn: &Connection, key: &str, default: f64) -> f64 {
    match get_config_value(conn, key) {
        Ok(Some(value)) => value.parse().unwrap_or(default),
        _ => default,
    }
}

pub fn set_config_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE system_config SET value = ?2, updated_at = ?3 WHERE key = ?1",
        params![key, value, Utc::now().to_rfc3339()],
    )?;

    if updated == 0 {
        conn.execute(
            "INSERT INTO system_config (key, value, description, updated_at)
             VALUES (?1, ?2, '', ?3)",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
    }

    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<ConfigEntry>> {
    let mut stmt = conn.prepare(
        "SELECT key, value, description, updated_at FROM system_config ORDER BY key",
    )?;

    let entries = stmt
        .query_map([], |row| {
            let updated_str: String = row.get(3)?;
            Ok(ConfigEntry {
                key: row.get(0)?,
                value: row.get(1)?,
                description: row.get(2)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_str)
                    .map_err(|_| rusqlite::Error::InvalidQuery)?
                    .with_timezone(&Utc),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_setup_is_idempotent() {
        let conn = test_conn();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();
    }

    #[test]
    fn test_audit_insert_and_list() {
        let conn = test_conn();

        let entry = AuditEntry::new(
            "client_created",
            "client",
            "client-1",
            serde_json::json!({"name": "Acme"}),
            "admin",
        );
        insert_audit(&conn, &entry).unwrap();

        let all = list_audit(&conn, None, None, 100).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].action, "client_created");
        assert_eq!(all[0].actor, "admin");

        let filtered = list_audit(&conn, Some("client"), Some("client-1"), 100).unwrap();
        assert_eq!(filtered.len(), 1);

        let none = list_audit(&conn, Some("product"), None, 100).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_audit_respects_limit() {
        let conn = test_conn();

        for i in 0..5 {
            let entry = AuditEntry::new(
                "config_updated",
                "system_config",
                &format!("key-{}", i),
                serde_json::json!({}),
                "admin",
            );
            insert_audit(&conn, &entry).unwrap();
        }

        let limited = list_audit(&conn, None, None, 3).unwrap();
        assert_eq!(limited.len(), 3);
    }

    #[test]
    fn test_config_seed_and_read() {
        let conn = test_conn();
        seed_defaults(&conn).unwrap();

        assert_eq!(get_config_f64(&conn, KEY_IDLE_THRESHOLD, 0.0), 50000.0);
        assert_eq!(get_config_f64(&conn, KEY_IDLE_YIELD_RATE, 0.0), 0.04);

        // Seeding again must not clobber an updated value
        set_config_value(&conn, KEY_IDLE_THRESHOLD, "75000").unwrap();
        seed_defaults(&conn).unwrap();
        assert_eq!(get_config_f64(&conn, KEY_IDLE_THRESHOLD, 0.0), 75000.0);
    }

    #[test]
    fn test_config_missing_key_uses_default() {
        let conn = test_conn();
        assert_eq!(get_config_f64(&conn, "no_such_key", 1.25), 1.25);
        assert!(get_config_value(&conn, "no_such_key").unwrap().is_none());
    }

    #[test]
    fn test_config_set_unknown_key_inserts() {
        let conn = test_conn();
        set_config_value(&conn, "custom_knob", "42").unwrap();
        assert_eq!(
            get_config_value(&conn, "custom_knob").unwrap().as_deref(),
            Some("42")
        );
        assert_eq!(list_config(&conn).unwrap().len(), 1);
    }
}
