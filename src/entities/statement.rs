use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ApiError, ApiResult};

// ============================================================================
// STATEMENT FILE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementStatus {
    Uploading,
    Parsed,
    Failed,
}

impl StatementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatementStatus::Uploading => "uploading",
            StatementStatus::Parsed => "parsed",
            StatementStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "uploading" => Ok(StatementStatus::Uploading),
            "parsed" => Ok(StatementStatus::Parsed),
            "failed" => Ok(StatementStatus::Failed),
            other => Err(ApiError::bad_request(format!(
                "Unknown statement status: {}",
                other
            ))),
        }
    }
}

/// An uploaded bank statement awaiting or having completed parsing.
#[derive(Debug, Clone, Serialize)]
pub struct StatementFile {
    pub id: String,
    pub client_id: String,
    pub filename: String,
    pub format: String,
    #[serde(skip_serializing)]
    pub content_hash: String,
    pub status: StatementStatus,
    pub transaction_count: i64,
    pub error: Option<String>,
    pub uploaded_at: DateTime<Utc>,
}

/// Content hash used for upload idempotency per client.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn insert_statement_file(
    conn: &Connection,
    client_id: &str,
    filename: &str,
    format: &str,
    hash: &str,
) -> ApiResult<StatementFile> {
    let file = StatementFile {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        filename: filename.to_string(),
        format: format.to_string(),
        content_hash: hash.to_string(),
        status: StatementStatus::Uploading,
        transaction_count: 0,
        error: None,
        uploaded_at: Utc::now(),
    };

    let result = conn.execute(
        "INSERT INTO statement_files (
            id, client_id, filename, format, content_hash, status,
            transaction_count, error, uploaded_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            file.id,
            file.client_id,
            file.filename,
            file.format,
            file.content_hash,
            file.status.as_str(),
            file.transaction_count,
            file.error,
            file.uploaded_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(file),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(ApiError::conflict(format!(
                "Statement already uploaded for this client: {}",
                filename
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub fn mark_parsed(conn: &Connection, id: &str, transaction_count: i64) -> ApiResult<()> {
    conn.execute(
        "UPDATE statement_files SET status = ?2, transaction_count = ?3, error = NULL
         WHERE id = ?1",
        params![id, StatementStatus::Parsed.as_str(), transaction_count],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> ApiResult<()> {
    conn.execute(
        "UPDATE statement_files SET status = ?2, error = ?3 WHERE id = ?1",
        params![id, StatementStatus::Failed.as_str(), error],
    )?;
    Ok(())
}

fn row_to_statement(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatementFile> {
    let status_str: String = row.get(5)?;
    let uploaded_str: String = row.get(8)?;

    Ok(StatementFile {
        id: row.get(0)?,
        client_id: row.get(1)?,
        filename: row.get(2)?,
        format: row.get(3)?,
        content_hash: row.get(4)?,
        status: StatementStatus::parse(&status_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        transaction_count: row.get(6)?,
        error: row.get(7)?,
        uploaded_at: DateTime::parse_from_rfc3339(&uploaded_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

const STATEMENT_COLUMNS: &str = "id, client_id, filename, format, content_hash, status,
    transaction_count, error, uploaded_at";

pub fn get_statement(conn: &Connection, id: &str) -> ApiResult<StatementFile> {
    conn.query_row(
        &format!("SELECT {} FROM statement_files WHERE id = ?1", STATEMENT_COLUMNS),
        params![id],
        row_to_statement,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Statement not found: {}", id)))
}

pub fn list_statements(conn: &Connection, client_id: &str) -> ApiResult<Vec<StatementFile>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statement_files WHERE client_id = ?1 ORDER BY uploaded_at DESC",
        STATEMENT_COLUMNS
    ))?;

    let files = stmt
        .query_map(params![client_id], row_to_statement)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(files)
}

// ============================================================================
// STATEMENT TRANSACTIONS (parse results)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inflow,
    Outflow,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inflow => "inflow",
            Direction::Outflow => "outflow",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "inflow" => Ok(Direction::Inflow),
            "outflow" => Ok(Direction::Outflow),
            other => Err(ApiError::bad_request(format!("Unknown direction: {}", other))),
        }
    }

    /// Direction implied by a signed amount. Zero counts as inflow.
    pub fn from_amount(amount: f64) -> Self {
        if amount < 0.0 {
            Direction::Outflow
        } else {
            Direction::Inflow
        }
    }
}

/// A normalized transaction extracted from a statement file.
#[derive(Debug, Clone, Serialize)]
pub struct StatementTransaction {
    pub id: String,
    pub statement_id: String,
    pub client_id: String,
    pub date: NaiveDate,
    pub description: String,
    /// Signed amount: inflows positive, outflows negative.
    pub amount: f64,
    pub direction: Direction,
    pub category: String,
    pub balance_after: Option<f64>,
}

/// Bulk-insert parse results inside a single transaction so a failed file
/// leaves no partial rows behind.
pub fn insert_transactions(
    conn: &mut Connection,
    transactions: &[StatementTransaction],
) -> ApiResult<usize> {
    let tx = conn.transaction().map_err(ApiError::from)?;

    for record in transactions {
        tx.execute(
            "INSERT INTO statement_transactions (
                id, statement_id, client_id, date, description, amount,
                direction, category, balance_after
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.id,
                record.statement_id,
                record.client_id,
                record.date.to_string(),
                record.description,
                record.amount,
                record.direction.as_str(),
                record.category,
                record.balance_after,
            ],
        )?;
    }

    tx.commit().map_err(ApiError::from)?;
    Ok(transactions.len())
}

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatementTransaction> {
    let date_str: String = row.get(3)?;
    let direction_str: String = row.get(6)?;

    Ok(StatementTransaction {
        id: row.get(0)?,
        statement_id: row.get(1)?,
        client_id: row.get(2)?,
        date: NaiveDate::parse_from_str(&date_str, "%Y-%m-%d")
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        description: row.get(4)?,
        amount: row.get(5)?,
        direction: Direction::parse(&direction_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        category: row.get(7)?,
        balance_after: row.get(8)?,
    })
}

const TX_COLUMNS: &str = "id, statement_id, client_id, date, description, amount,
    direction, category, balance_after";

pub fn transactions_by_statement(
    conn: &Connection,
    statement_id: &str,
) -> ApiResult<Vec<StatementTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statement_transactions WHERE statement_id = ?1 ORDER BY date, id",
        TX_COLUMNS
    ))?;

    let transactions = stmt
        .query_map(params![statement_id], row_to_transaction)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

/// All parse results for a client, optionally restricted to a date range.
pub fn transactions_by_client(
    conn: &Connection,
    client_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
) -> ApiResult<Vec<StatementTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM statement_transactions
         WHERE client_id = ?1
           AND (?2 IS NULL OR date >= ?2)
           AND (?3 IS NULL OR date <= ?3)
         ORDER BY date, id",
        TX_COLUMNS
    ))?;

    let transactions = stmt
        .query_map(
            params![
                client_id,
                from.map(|d| d.to_string()),
                to.map(|d| d.to_string())
            ],
            row_to_transaction,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::client::create_client;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn make_tx(
        statement_id: &str,
        client_id: &str,
        date: &str,
        amount: f64,
        balance: Option<f64>,
    ) -> StatementTransaction {
        StatementTransaction {
            id: uuid::Uuid::new_v4().to_string(),
            statement_id: statement_id.to_string(),
            client_id: client_id.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: "TEST".to_string(),
            amount,
            direction: Direction::from_amount(amount),
            category: "Uncategorized".to_string(),
            balance_after: balance,
        }
    }

    #[test]
    fn test_direction_from_amount() {
        assert_eq!(Direction::from_amount(100.0), Direction::Inflow);
        assert_eq!(Direction::from_amount(0.0), Direction::Inflow);
        assert_eq!(Direction::from_amount(-0.01), Direction::Outflow);
    }

    #[test]
    fn test_statement_lifecycle() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();

        let hash = content_hash("date,description,amount\n");
        let file =
            insert_statement_file(&conn, &client.id, "jan.csv", "generic-csv", &hash).unwrap();
        assert_eq!(file.status, StatementStatus::Uploading);

        let rows = vec![
            make_tx(&file.id, &client.id, "2024-01-02", 1000.0, Some(5000.0)),
            make_tx(&file.id, &client.id, "2024-01-03", -250.0, Some(4750.0)),
        ];
        insert_transactions(&mut conn, &rows).unwrap();
        mark_parsed(&conn, &file.id, rows.len() as i64).unwrap();

        let fetched = get_statement(&conn, &file.id).unwrap();
        assert_eq!(fetched.status, StatementStatus::Parsed);
        assert_eq!(fetched.transaction_count, 2);
        assert!(fetched.error.is_none());

        let transactions = transactions_by_statement(&conn, &file.id).unwrap();
        assert_eq!(transactions.len(), 2);
        assert_eq!(transactions[0].direction, Direction::Inflow);
        assert_eq!(transactions[1].direction, Direction::Outflow);
    }

    #[test]
    fn test_duplicate_upload_is_conflict() {
        let conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();

        let hash = content_hash("same content");
        insert_statement_file(&conn, &client.id, "jan.csv", "generic-csv", &hash).unwrap();

        let err = insert_statement_file(&conn, &client.id, "jan-copy.csv", "generic-csv", &hash)
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn test_same_content_different_clients_is_allowed() {
        let conn = test_conn();
        let a = create_client(&conn, "A", "a@a.example", "x").unwrap();
        let b = create_client(&conn, "B", "b@b.example", "x").unwrap();

        let hash = content_hash("shared content");
        insert_statement_file(&conn, &a.id, "jan.csv", "generic-csv", &hash).unwrap();
        insert_statement_file(&conn, &b.id, "jan.csv", "generic-csv", &hash).unwrap();
    }

    #[test]
    fn test_mark_failed() {
        let conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();

        let file = insert_statement_file(&conn, &client.id, "bad.csv", "generic-csv", "h").unwrap();
        mark_failed(&conn, &file.id, "line 3: invalid amount").unwrap();

        let fetched = get_statement(&conn, &file.id).unwrap();
        assert_eq!(fetched.status, StatementStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("line 3: invalid amount"));
        assert_eq!(fetched.transaction_count, 0);
    }

    #[test]
    fn test_transactions_by_client_period_filter() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();
        let file = insert_statement_file(&conn, &client.id, "q1.csv", "generic-csv", "h").unwrap();

        let rows = vec![
            make_tx(&file.id, &client.id, "2024-01-15", 100.0, None),
            make_tx(&file.id, &client.id, "2024-02-15", 200.0, None),
            make_tx(&file.id, &client.id, "2024-03-15", 300.0, None),
        ];
        insert_transactions(&mut conn, &rows).unwrap();

        let all = transactions_by_client(&conn, &client.id, None, None).unwrap();
        assert_eq!(all.len(), 3);

        let feb = transactions_by_client(
            &conn,
            &client.id,
            Some(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()),
            Some(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()),
        )
        .unwrap();
        assert_eq!(feb.len(), 1);
        assert_eq!(feb[0].amount, 200.0);
    }

    #[test]
    fn test_delete_client_cascades_to_statements() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();
        let file = insert_statement_file(&conn, &client.id, "jan.csv", "generic-csv", "h").unwrap();
        insert_transactions(
            &mut conn,
            &[make_tx(&file.id, &client.id, "2024-01-02", 10.0, None)],
        )
        .unwrap();

        crate::entities::client::delete_client(&conn, &client.id).unwrap();

        assert!(get_statement(&conn, &file.id).is_err());
        let orphans = transactions_by_client(&conn, &client.id, None, None).unwrap();
        assert!(orphans.is_empty());
    }
}
