// Statement aggregation
// Single-pass aggregations over normalized transactions: flow totals,
// balance statistics, category breakdown, and idle-balance detection.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db;
use crate::entities::client::get_client;
use crate::entities::statement::{transactions_by_client, Direction, StatementTransaction};
use crate::error::{ApiError, ApiResult};

// ============================================================================
// KNOBS
// ============================================================================

/// Tunable inputs to the aggregation, sourced from system_config.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisKnobs {
    /// Operating buffer excluded from the idle balance.
    pub idle_threshold: f64,
    /// Fixed annual yield rate applied to idle balances.
    pub idle_yield_rate: f64,
}

impl Default for AnalysisKnobs {
    fn default() -> Self {
        AnalysisKnobs {
            idle_threshold: 50_000.0,
            idle_yield_rate: 0.04,
        }
    }
}

impl AnalysisKnobs {
    pub fn from_config(conn: &Connection) -> Self {
        let defaults = Self::default();
        AnalysisKnobs {
            idle_threshold: db::get_config_f64(
                conn,
                db::KEY_IDLE_THRESHOLD,
                defaults.idle_threshold,
            ),
            idle_yield_rate: db::get_config_f64(
                conn,
                db::KEY_IDLE_YIELD_RATE,
                defaults.idle_yield_rate,
            ),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Share of total outflow attributed to one spending category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryShare {
    pub category: String,
    pub outflow: f64,
    pub pct: f64,
}

/// The computed metrics, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisMetrics {
    pub transaction_count: usize,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub net_flow: f64,
    pub balance_mean: f64,
    pub balance_std_dev: f64,
    pub min_balance: f64,
    pub idle_balance: f64,
    pub projected_idle_yield: f64,
    pub category_breakdown: Vec<CategoryShare>,
}

/// Aggregate a transaction list. Empty input yields zeroed metrics.
///
/// Flow totals count every transaction; balance statistics use only the
/// transactions that carry a running balance (population mean/std-dev).
/// Category percentages are relative to total outflow.
pub fn compute_metrics(
    transactions: &[StatementTransaction],
    knobs: &AnalysisKnobs,
) -> AnalysisMetrics {
    let mut total_inflow = 0.0;
    let mut total_outflow = 0.0;
    let mut category_totals: std::collections::HashMap<String, f64> =
        std::collections::HashMap::new();

    for tx in transactions {
        match tx.direction {
            Direction::Inflow => total_inflow += tx.amount.abs(),
            Direction::Outflow => {
                let amount = tx.amount.abs();
                total_outflow += amount;
                *category_totals.entry(tx.category.clone()).or_insert(0.0) += amount;
            }
        }
    }

    let balances: Vec<f64> = transactions.iter().filter_map(|tx| tx.balance_after).collect();

    let balance_mean = if balances.is_empty() {
        0.0
    } else {
        balances.iter().sum::<f64>() / balances.len() as f64
    };

    let balance_std_dev = if balances.is_empty() {
        0.0
    } else {
        let variance = balances
            .iter()
            .map(|b| (b - balance_mean).powi(2))
            .sum::<f64>()
            / balances.len() as f64;
        variance.sqrt()
    };

    let min_balance = balances.iter().cloned().fold(f64::INFINITY, f64::min);
    let min_balance = if min_balance.is_finite() { min_balance } else { 0.0 };

    let idle_balance = (min_balance - knobs.idle_threshold).max(0.0);
    let projected_idle_yield = idle_balance * knobs.idle_yield_rate;

    let mut category_breakdown: Vec<CategoryShare> = category_totals
        .into_iter()
        .map(|(category, outflow)| CategoryShare {
            category,
            outflow,
            pct: if total_outflow > 0.0 {
                outflow / total_outflow * 100.0
            } else {
                0.0
            },
        })
        .collect();
    category_breakdown.sort_by(|a, b| {
        b.outflow
            .partial_cmp(&a.outflow)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.category.cmp(&b.category))
    });

    AnalysisMetrics {
        transaction_count: transactions.len(),
        total_inflow,
        total_outflow,
        net_flow: total_inflow - total_outflow,
        balance_mean,
        balance_std_dev,
        min_balance,
        idle_balance,
        projected_idle_yield,
        category_breakdown,
    }
}

/// Relative balance volatility: std-dev over mean. Zero when the mean is
/// non-positive (no meaningful baseline).
pub fn coefficient_of_variation(metrics: &AnalysisMetrics) -> f64 {
    if metrics.balance_mean > 0.0 {
        metrics.balance_std_dev / metrics.balance_mean
    } else {
        0.0
    }
}

// ============================================================================
// PERSISTED ANALYSIS
// ============================================================================

/// Aggregated financial metrics computed from a client's parse results.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub id: String,
    pub client_id: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub transaction_count: i64,
    pub total_inflow: f64,
    pub total_outflow: f64,
    pub net_flow: f64,
    pub balance_mean: f64,
    pub balance_std_dev: f64,
    pub min_balance: f64,
    pub idle_balance: f64,
    pub projected_idle_yield: f64,
    pub category_breakdown: Vec<CategoryShare>,
    pub created_at: DateTime<Utc>,
}

/// Compute and persist an analysis for a client over an optional period.
pub fn run_analysis(
    conn: &Connection,
    client_id: &str,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    knobs: &AnalysisKnobs,
) -> ApiResult<Analysis> {
    // 404 before computing anything
    get_client(conn, client_id)?;

    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::bad_request("Period start is after period end"));
        }
    }

    let transactions = transactions_by_client(conn, client_id, from, to)?;
    let metrics = compute_metrics(&transactions, knobs);

    let analysis = Analysis {
        id: uuid::Uuid::new_v4().to_string(),
        client_id: client_id.to_string(),
        period_start: from,
        period_end: to,
        transaction_count: metrics.transaction_count as i64,
        total_inflow: metrics.total_inflow,
        total_outflow: metrics.total_outflow,
        net_flow: metrics.net_flow,
        balance_mean: metrics.balance_mean,
        balance_std_dev: metrics.balance_std_dev,
        min_balance: metrics.min_balance,
        idle_balance: metrics.idle_balance,
        projected_idle_yield: metrics.projected_idle_yield,
        category_breakdown: metrics.category_breakdown,
        created_at: Utc::now(),
    };

    let breakdown_json = serde_json::to_string(&analysis.category_breakdown)?;

    conn.execute(
        "INSERT INTO analyses (
            id, client_id, period_start, period_end, transaction_count,
            total_inflow, total_outflow, net_flow, balance_mean, balance_std_dev,
            min_balance, idle_balance, projected_idle_yield, category_breakdown, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            analysis.id,
            analysis.client_id,
            analysis.period_start.map(|d| d.to_string()),
            analysis.period_end.map(|d| d.to_string()),
            analysis.transaction_count,
            analysis.total_inflow,
            analysis.total_outflow,
            analysis.net_flow,
            analysis.balance_mean,
            analysis.balance_std_dev,
            analysis.min_balance,
            analysis.idle_balance,
            analysis.projected_idle_yield,
            breakdown_json,
            analysis.created_at.to_rfc3339(),
        ],
    )?;

    tracing::info!(
        client_id = %client_id,
        transactions = metrics.transaction_count,
        idle_balance = metrics.idle_balance,
        "analysis completed"
    );

    Ok(analysis)
}

fn row_to_analysis(row: &rusqlite::Row<'_>) -> rusqlite::Result<Analysis> {
    let period_start: Option<String> = row.get(2)?;
    let period_end: Option<String> = row.get(3)?;
    let breakdown_json: String = row.get(13)?;
    let created_str: String = row.get(14)?;

    Ok(Analysis {
        id: row.get(0)?,
        client_id: row.get(1)?,
        period_start: period_start.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        period_end: period_end.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        transaction_count: row.get(4)?,
        total_inflow: row.get(5)?,
        total_outflow: row.get(6)?,
        net_flow: row.get(7)?,
        balance_mean: row.get(8)?,
        balance_std_dev: row.get(9)?,
        min_balance: row.get(10)?,
        idle_balance: row.get(11)?,
        projected_idle_yield: row.get(12)?,
        category_breakdown: serde_json::from_str(&breakdown_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

const ANALYSIS_COLUMNS: &str = "id, client_id, period_start, period_end, transaction_count,
    total_inflow, total_outflow, net_flow, balance_mean, balance_std_dev,
    min_balance, idle_balance, projected_idle_yield, category_breakdown, created_at";

pub fn get_analysis(conn: &Connection, id: &str) -> ApiResult<Analysis> {
    conn.query_row(
        &format!("SELECT {} FROM analyses WHERE id = ?1", ANALYSIS_COLUMNS),
        params![id],
        row_to_analysis,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Analysis not found: {}", id)))
}

pub fn list_by_client(conn: &Connection, client_id: &str) -> ApiResult<Vec<Analysis>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM analyses WHERE client_id = ?1 ORDER BY created_at DESC",
        ANALYSIS_COLUMNS
    ))?;

    let analyses = stmt
        .query_map(params![client_id], row_to_analysis)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(analyses)
}

pub fn latest_for_client(conn: &Connection, client_id: &str) -> ApiResult<Analysis> {
    conn.query_row(
        &format!(
            "SELECT {} FROM analyses WHERE client_id = ?1 ORDER BY created_at DESC LIMIT 1",
            ANALYSIS_COLUMNS
        ),
        params![client_id],
        row_to_analysis,
    )
    .optional()?
    .ok_or_else(|| {
        ApiError::not_found(format!("No analysis exists for client: {}", client_id))
    })
}
