// Recommendation engine
// Matches an analysis against the active product catalog and records
// pending recommendations for the approval workflow.

use rusqlite::Connection;

use crate::analysis::Analysis;
use crate::db;
use crate::entities::product::{list_products, Liquidity, Product, ProductStatus};
use crate::entities::recommendation::{insert_recommendation, Recommendation};
use crate::error::ApiResult;

/// Outcome of evaluating one product against an analysis.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Eligible { rationale: String, projected_earnings: f64 },
    BelowMinimum,
    TooVolatileForTerm,
}

/// Relative balance volatility for a persisted analysis.
fn volatility(analysis: &Analysis) -> f64 {
    if analysis.balance_mean > 0.0 {
        analysis.balance_std_dev / analysis.balance_mean
    } else {
        0.0
    }
}

/// Evaluate a single product against an analysis.
///
/// A product matches when the idle balance covers its minimum, and
/// term-liquidity products are withheld from clients whose balances are
/// too volatile to lock funds away.
pub fn evaluate_product(
    analysis: &Analysis,
    product: &Product,
    volatility_cutoff: f64,
) -> MatchOutcome {
    if analysis.idle_balance < product.min_balance {
        return MatchOutcome::BelowMinimum;
    }

    if product.liquidity == Liquidity::Term && volatility(analysis) > volatility_cutoff {
        return MatchOutcome::TooVolatileForTerm;
    }

    let projected_earnings = analysis.idle_balance * product.annual_yield_pct / 100.0;
    let rationale = format!(
        "Idle balance of {:.2} clears the {:.2} minimum for {}; projected {:.2}/yr at {:.2}% yield",
        analysis.idle_balance,
        product.min_balance,
        product.name,
        projected_earnings,
        product.annual_yield_pct,
    );

    MatchOutcome::Eligible {
        rationale,
        projected_earnings,
    }
}

/// Generate pending recommendations for an analysis from the active catalog.
/// Returns them sorted by projected earnings, best first.
pub fn generate_recommendations(
    conn: &Connection,
    analysis: &Analysis,
) -> ApiResult<Vec<Recommendation>> {
    let volatility_cutoff = db::get_config_f64(conn, db::KEY_VOLATILITY_CUTOFF, 0.5);
    let products = list_products(conn, Some(ProductStatus::Active))?;

    let mut recommendations = Vec::new();
    for product in &products {
        match evaluate_product(analysis, product, volatility_cutoff) {
            MatchOutcome::Eligible {
                rationale,
                projected_earnings,
            } => {
                let rec = insert_recommendation(
                    conn,
                    &analysis.id,
                    &analysis.client_id,
                    &product.id,
                    &rationale,
                    projected_earnings,
                )?;
                recommendations.push(rec);
            }
            MatchOutcome::BelowMinimum | MatchOutcome::TooVolatileForTerm => continue,
        }
    }

    recommendations.sort_by(|a, b| {
        b.projected_earnings
            .partial_cmp(&a.projected_earnings)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    tracing::info!(
        analysis_id = %analysis.id,
        client_id = %analysis.client_id,
        matched = recommendations.len(),
        evaluated = products.len(),
        "recommendations generated"
    );

    Ok(recommendations)
}
