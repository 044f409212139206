use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationStatus {
    Pending,
    Approved,
    Rejected,
}

impl RecommendationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationStatus::Pending => "pending",
            RecommendationStatus::Approved => "approved",
            RecommendationStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "pending" => Ok(RecommendationStatus::Pending),
            "approved" => Ok(RecommendationStatus::Approved),
            "rejected" => Ok(RecommendationStatus::Rejected),
            other => Err(ApiError::bad_request(format!(
                "Unknown recommendation status: {}",
                other
            ))),
        }
    }
}

/// A suggested treasury product tied to an analysis, with an approval
/// workflow: pending -> approved | rejected. Terminal states are final.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub id: String,
    pub analysis_id: String,
    pub client_id: String,
    pub product_id: String,
    pub rationale: String,
    /// Projected first-year earnings if the idle balance moves into the product.
    pub projected_earnings: f64,
    pub status: RecommendationStatus,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub fn insert_recommendation(
    conn: &Connection,
    analysis_id: &str,
    client_id: &str,
    product_id: &str,
    rationale: &str,
    projected_earnings: f64,
) -> ApiResult<Recommendation> {
    let rec = Recommendation {
        id: uuid::Uuid::new_v4().to_string(),
        analysis_id: analysis_id.to_string(),
        client_id: client_id.to_string(),
        product_id: product_id.to_string(),
        rationale: rationale.to_string(),
        projected_earnings,
        status: RecommendationStatus::Pending,
        decided_by: None,
        decided_at: None,
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO recommendations (
            id, analysis_id, client_id, product_id, rationale, projected_earnings,
            status, decided_by, decided_at, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            rec.id,
            rec.analysis_id,
            rec.client_id,
            rec.product_id,
            rec.rationale,
            rec.projected_earnings,
            rec.status.as_str(),
            rec.decided_by,
            rec.decided_at.map(|dt| dt.to_rfc3339()),
            rec.created_at.to_rfc3339(),
        ],
    )?;

    Ok(rec)
}

fn row_to_recommendation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Recommendation> {
    let status_str: String = row.get(6)?;
    let decided_at_str: Option<String> = row.get(8)?;
    let created_str: String = row.get(9)?;

    Ok(Recommendation {
        id: row.get(0)?,
        analysis_id: row.get(1)?,
        client_id: row.get(2)?,
        product_id: row.get(3)?,
        rationale: row.get(4)?,
        projected_earnings: row.get(5)?,
        status: RecommendationStatus::parse(&status_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        decided_by: row.get(7)?,
        decided_at: decided_at_str
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

const REC_COLUMNS: &str = "id, analysis_id, client_id, product_id, rationale,
    projected_earnings, status, decided_by, decided_at, created_at";

pub fn get_recommendation(conn: &Connection, id: &str) -> ApiResult<Recommendation> {
    conn.query_row(
        &format!("SELECT {} FROM recommendations WHERE id = ?1", REC_COLUMNS),
        params![id],
        row_to_recommendation,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Recommendation not found: {}", id)))
}

pub fn list_by_client(conn: &Connection, client_id: &str) -> ApiResult<Vec<Recommendation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recommendations WHERE client_id = ?1 ORDER BY created_at DESC",
        REC_COLUMNS
    ))?;

    let recs = stmt
        .query_map(params![client_id], row_to_recommendation)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(recs)
}

pub fn list_by_analysis(conn: &Connection, analysis_id: &str) -> ApiResult<Vec<Recommendation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM recommendations WHERE analysis_id = ?1 ORDER BY projected_earnings DESC",
        REC_COLUMNS
    ))?;

    let recs = stmt
        .query_map(params![analysis_id], row_to_recommendation)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(recs)
}

/// Record an approval decision. Only pending recommendations can be decided,
/// and a decision is recorded exactly once.
pub fn decide(
    conn: &Connection,
    id: &str,
    approve: bool,
    actor: &str,
) -> ApiResult<Recommendation> {
    let rec = get_recommendation(conn, id)?;

    if rec.status != RecommendationStatus::Pending {
        return Err(ApiError::conflict(format!(
            "Recommendation already {}",
            rec.status.as_str()
        )));
    }

    let status = if approve {
        RecommendationStatus::Approved
    } else {
        RecommendationStatus::Rejected
    };
    let decided_at = Utc::now();

    conn.execute(
        "UPDATE recommendations
         SET status = ?2, decided_by = ?3, decided_at = ?4
         WHERE id = ?1 AND status = 'pending'",
        params![id, status.as_str(), actor, decided_at.to_rfc3339()],
    )?;

    get_recommendation(conn, id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis;
    use crate::db::setup_database;
    use crate::entities::client::create_client;
    use crate::entities::product::{create_product, Liquidity, ProductCategory};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn seed_recommendation(conn: &Connection) -> Recommendation {
        let client = create_client(conn, "Acme", "a@a.example", "x").unwrap();
        let product =
            create_product(conn, "Sweep", ProductCategory::Sweep, 0.0, 3.0, Liquidity::Daily)
                .unwrap();
        let analysis = analysis::run_analysis(
            conn,
            &client.id,
            None,
            None,
            &analysis::AnalysisKnobs::default(),
        )
        .unwrap();

        insert_recommendation(conn, &analysis.id, &client.id, &product.id, "idle funds", 1500.0)
            .unwrap()
    }

    #[test]
    fn test_insert_starts_pending() {
        let conn = test_conn();
        let rec = seed_recommendation(&conn);

        assert_eq!(rec.status, RecommendationStatus::Pending);
        assert!(rec.decided_by.is_none());
        assert!(rec.decided_at.is_none());
    }

    #[test]
    fn test_approve() {
        let conn = test_conn();
        let rec = seed_recommendation(&conn);

        let decided = decide(&conn, &rec.id, true, "alice").unwrap();
        assert_eq!(decided.status, RecommendationStatus::Approved);
        assert_eq!(decided.decided_by.as_deref(), Some("alice"));
        assert!(decided.decided_at.is_some());
    }

    #[test]
    fn test_reject() {
        let conn = test_conn();
        let rec = seed_recommendation(&conn);

        let decided = decide(&conn, &rec.id, false, "bob").unwrap();
        assert_eq!(decided.status, RecommendationStatus::Rejected);
    }

    #[test]
    fn test_double_decision_is_conflict() {
        let conn = test_conn();
        let rec = seed_recommendation(&conn);

        decide(&conn, &rec.id, true, "alice").unwrap();
        let err = decide(&conn, &rec.id, false, "bob").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);

        // The original decision is untouched
        let fetched = get_recommendation(&conn, &rec.id).unwrap();
        assert_eq!(fetched.status, RecommendationStatus::Approved);
        assert_eq!(fetched.decided_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_decide_missing_is_not_found() {
        let conn = test_conn();
        let err = decide(&conn, "missing", true, "alice").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_list_by_client() {
        let conn = test_conn();
        let rec = seed_recommendation(&conn);

        let recs = list_by_client(&conn, &rec.client_id).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].id, rec.id);

        let by_analysis = list_by_analysis(&conn, &rec.analysis_id).unwrap();
        assert_eq!(by_analysis.len(), 1);
    }
}
