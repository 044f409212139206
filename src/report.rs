// Report generation
// Assembles a persisted report for a client from an analysis and its
// recommendations.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::analysis::{self, Analysis};
use crate::entities::client::get_client;
use crate::entities::product::get_product;
use crate::entities::recommendation::{list_by_analysis, RecommendationStatus};
use crate::error::{ApiError, ApiResult};

/// A generated treasury report. The body is a JSON document of named
/// sections so consumers can render what they need.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: String,
    pub client_id: String,
    pub analysis_id: String,
    pub title: String,
    pub period: String,
    pub body: serde_json::Value,
    pub generated_at: DateTime<Utc>,
}

impl Report {
    /// One-line human summary for logs and listings.
    pub fn summary(&self) -> String {
        format!("{} ({}) generated {}", self.title, self.period, self.generated_at.to_rfc3339())
    }
}

fn period_label(analysis: &Analysis) -> String {
    match (analysis.period_start, analysis.period_end) {
        (Some(start), Some(end)) => format!("{} to {}", start, end),
        (Some(start), None) => format!("from {}", start),
        (None, Some(end)) => format!("through {}", end),
        (None, None) => "all activity".to_string(),
    }
}

/// Generate and persist a report from the given analysis (or the client's
/// latest when `analysis_id` is None).
pub fn generate_report(
    conn: &Connection,
    client_id: &str,
    analysis_id: Option<&str>,
) -> ApiResult<Report> {
    let client = get_client(conn, client_id)?;

    let analysis = match analysis_id {
        Some(id) => {
            let analysis = analysis::get_analysis(conn, id)?;
            if analysis.client_id != client.id {
                return Err(ApiError::bad_request(
                    "Analysis does not belong to this client",
                ));
            }
            analysis
        }
        None => analysis::latest_for_client(conn, client_id)?,
    };

    let recommendations = list_by_analysis(conn, &analysis.id)?;
    let mut recommendation_sections = Vec::new();
    for rec in &recommendations {
        let product = get_product(conn, &rec.product_id)?;
        recommendation_sections.push(serde_json::json!({
            "product": product.name,
            "category": product.category,
            "status": rec.status,
            "projected_earnings": rec.projected_earnings,
            "rationale": rec.rationale,
        }));
    }
    let approved = recommendations
        .iter()
        .filter(|r| r.status == RecommendationStatus::Approved)
        .count();

    let period = period_label(&analysis);
    let body = serde_json::json!({
        "overview": {
            "client": client.name,
            "segment": client.segment,
            "period": period,
            "transaction_count": analysis.transaction_count,
        },
        "cash_flow": {
            "total_inflow": analysis.total_inflow,
            "total_outflow": analysis.total_outflow,
            "net_flow": analysis.net_flow,
        },
        "balances": {
            "mean": analysis.balance_mean,
            "std_dev": analysis.balance_std_dev,
            "minimum": analysis.min_balance,
        },
        "idle_funds": {
            "idle_balance": analysis.idle_balance,
            "projected_annual_yield": analysis.projected_idle_yield,
        },
        "spending_by_category": analysis.category_breakdown,
        "recommendations": {
            "total": recommendations.len(),
            "approved": approved,
            "items": recommendation_sections,
        },
    });

    let report = Report {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client.id.clone(),
        analysis_id: analysis.id.clone(),
        title: format!("Treasury report - {}", client.name),
        period,
        body,
        generated_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO reports (id, client_id, analysis_id, title, period, body, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            report.id,
            report.client_id,
            report.analysis_id,
            report.title,
            report.period,
            serde_json::to_string(&report.body)?,
            report.generated_at.to_rfc3339(),
        ],
    )?;

    tracing::info!(client_id = %client.id, report_id = %report.id, "report generated");

    Ok(report)
}

fn row_to_report(row: &rusqlite::Row<'_>) -> rusqlite::Result<Report> {
    let body_json: String = row.get(5)?;
    let generated_str: String = row.get(6)?;

    Ok(Report {
        id: row.get(0)?,
        client_id: row.get(1)?,
        analysis_id: row.get(2)?,
        title: row.get(3)?,
        period: row.get(4)?,
        body: serde_json::from_str(&body_json).map_err(|_| rusqlite::Error::InvalidQuery)?,
        generated_at: DateTime::parse_from_rfc3339(&generated_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

const REPORT_COLUMNS: &str = "id, client_id, analysis_id, title, period, body, generated_at";

pub fn get_report(conn: &Connection, id: &str) -> ApiResult<Report> {
    conn.query_row(
        &format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS),
        params![id],
        row_to_report,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Report not found: {}", id)))
}

pub fn list_by_client(conn: &Connection, client_id: &str) -> ApiResult<Vec<Report>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM reports WHERE client_id = ?1 ORDER BY generated_at DESC",
        REPORT_COLUMNS
    ))?;

    let reports = stmt
        .query_map(params![client_id], row_to_report)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{run_analysis, AnalysisKnobs};
    use crate::db::setup_database;
    use crate::entities::client::create_client;
    use crate::entities::product::{create_product, Liquidity, ProductCategory};
    use crate::entities::recommendation::{decide, insert_recommendation};
    use crate::entities::statement::{insert_statement_file, insert_transactions, Direction,
        StatementTransaction};
    use chrono::NaiveDate;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn seed_activity(conn: &mut Connection, client_id: &str) {
        let file = insert_statement_file(conn, client_id, "jan.csv", "balance-csv", "h").unwrap();
        let rows = vec![
            StatementTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                statement_id: file.id.clone(),
                client_id: client_id.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
                description: "ADP PAYROLL".to_string(),
                amount: -30_000.0,
                direction: Direction::Outflow,
                category: "Payroll".to_string(),
                balance_after: Some(170_000.0),
            },
            StatementTransaction {
                id: uuid::Uuid::new_v4().to_string(),
                statement_id: file.id,
                client_id: client_id.to_string(),
                date: NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
                description: "CUSTOMER WIRE".to_string(),
                amount: 80_000.0,
                direction: Direction::Inflow,
                category: "Uncategorized".to_string(),
                balance_after: Some(250_000.0),
            },
        ];
        insert_transactions(conn, &rows).unwrap();
    }

    #[test]
    fn test_generate_report_sections() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "manufacturing").unwrap();
        seed_activity(&mut conn, &client.id);

        let analysis =
            run_analysis(&conn, &client.id, None, None, &AnalysisKnobs::default()).unwrap();
        let product = create_product(
            &conn, "MMF", ProductCategory::MoneyMarket, 100_000.0, 4.0, Liquidity::Daily,
        )
        .unwrap();
        let rec = insert_recommendation(
            &conn, &analysis.id, &client.id, &product.id, "idle funds", 4_800.0,
        )
        .unwrap();
        decide(&conn, &rec.id, true, "alice").unwrap();

        let report = generate_report(&conn, &client.id, Some(&analysis.id)).unwrap();

        assert_eq!(report.client_id, client.id);
        assert_eq!(report.analysis_id, analysis.id);
        assert_eq!(report.body["overview"]["client"], "Acme");
        assert_eq!(report.body["cash_flow"]["total_inflow"], 80_000.0);
        assert_eq!(report.body["cash_flow"]["total_outflow"], 30_000.0);
        assert_eq!(report.body["recommendations"]["total"], 1);
        assert_eq!(report.body["recommendations"]["approved"], 1);
        assert_eq!(report.body["recommendations"]["items"][0]["product"], "MMF");
        assert!(report.summary().contains("Acme"));
    }

    #[test]
    fn test_generate_uses_latest_analysis_by_default() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();
        seed_activity(&mut conn, &client.id);

        run_analysis(&conn, &client.id, None, None, &AnalysisKnobs::default()).unwrap();
        let second =
            run_analysis(&conn, &client.id, None, None, &AnalysisKnobs::default()).unwrap();

        let report = generate_report(&conn, &client.id, None).unwrap();
        assert_eq!(report.analysis_id, second.id);
    }

    #[test]
    fn test_generate_without_analysis_is_not_found() {
        let conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();

        let err = generate_report(&conn, &client.id, None).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_analysis_client_mismatch_is_bad_request() {
        let mut conn = test_conn();
        let a = create_client(&conn, "A", "a@a.example", "x").unwrap();
        let b = create_client(&conn, "B", "b@b.example", "x").unwrap();
        seed_activity(&mut conn, &a.id);

        let analysis = run_analysis(&conn, &a.id, None, None, &AnalysisKnobs::default()).unwrap();

        let err = generate_report(&conn, &b.id, Some(&analysis.id)).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_get_and_list() {
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();
        seed_activity(&mut conn, &client.id);
        run_analysis(&conn, &client.id, None, None, &AnalysisKnobs::default()).unwrap();

        let report = generate_report(&conn, &client.id, None).unwrap();

        let fetched = get_report(&conn, &report.id).unwrap();
        assert_eq!(fetched.title, report.title);

        let listed = list_by_client(&conn, &client.id).unwrap();
        assert_eq!(listed.len(), 1);

        assert!(get_report(&conn, "missing").is_err());
    }

    #[test]
    fn test_latest_analysis_ordering_needs_distinct_timestamps() {
        // run_analysis timestamps are rfc3339 with sub-second precision, so
        // two back-to-back runs still order correctly by created_at then id;
        // this guards the ORDER BY used by latest_for_client.
        let mut conn = test_conn();
        let client = create_client(&conn, "Acme", "a@a.example", "x").unwrap();
        seed_activity(&mut conn, &client.id);

        let list_before = crate::analysis::list_by_client(&conn, &client.id).unwrap();
        assert!(list_before.is_empty());

        run_analysis(&conn, &client.id, None, None, &AnalysisKnobs::default()).unwrap();
        let listed = crate::analysis::list_by_client(&conn, &client.id).unwrap();
        assert_eq!(listed.len(), 1);
    }
}
