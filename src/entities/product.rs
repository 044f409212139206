use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    MoneyMarket,
    Sweep,
    TermDeposit,
    TreasuryBill,
}

impl ProductCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCategory::MoneyMarket => "money_market",
            ProductCategory::Sweep => "sweep",
            ProductCategory::TermDeposit => "term_deposit",
            ProductCategory::TreasuryBill => "treasury_bill",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "money_market" => Ok(ProductCategory::MoneyMarket),
            "sweep" => Ok(ProductCategory::Sweep),
            "term_deposit" => Ok(ProductCategory::TermDeposit),
            "treasury_bill" => Ok(ProductCategory::TreasuryBill),
            other => Err(ApiError::bad_request(format!(
                "Unknown product category: {}",
                other
            ))),
        }
    }
}

/// How quickly invested funds can be recalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liquidity {
    Daily,
    Weekly,
    Term,
}

impl Liquidity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Liquidity::Daily => "daily",
            Liquidity::Weekly => "weekly",
            Liquidity::Term => "term",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "daily" => Ok(Liquidity::Daily),
            "weekly" => Ok(Liquidity::Weekly),
            "term" => Ok(Liquidity::Term),
            other => Err(ApiError::bad_request(format!("Unknown liquidity: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> ApiResult<Self> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(ApiError::bad_request(format!(
                "Unknown product status: {}",
                other
            ))),
        }
    }
}

/// A treasury product offered to clients with excess liquidity.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub category: ProductCategory,
    /// Minimum idle balance a client must hold to be eligible.
    pub min_balance: f64,
    pub annual_yield_pct: f64,
    pub liquidity: Liquidity,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
}

pub fn create_product(
    conn: &Connection,
    name: &str,
    category: ProductCategory,
    min_balance: f64,
    annual_yield_pct: f64,
    liquidity: Liquidity,
) -> ApiResult<Product> {
    if name.trim().is_empty() {
        return Err(ApiError::bad_request("Product name must not be empty"));
    }
    if min_balance < 0.0 {
        return Err(ApiError::bad_request("Minimum balance must not be negative"));
    }
    if annual_yield_pct < 0.0 {
        return Err(ApiError::bad_request("Annual yield must not be negative"));
    }

    let product = Product {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        category,
        min_balance,
        annual_yield_pct,
        liquidity,
        status: ProductStatus::Active,
        created_at: Utc::now(),
    };

    let result = conn.execute(
        "INSERT INTO products (
            id, name, category, min_balance, annual_yield_pct, liquidity, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            product.id,
            product.name,
            product.category.as_str(),
            product.min_balance,
            product.annual_yield_pct,
            product.liquidity.as_str(),
            product.status.as_str(),
            product.created_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(product),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(ApiError::conflict(format!("Product name already exists: {}", name)))
        }
        Err(e) => Err(e.into()),
    }
}

fn row_to_product(row: &rusqlite::Row<'_>) -> rusqlite::Result<Product> {
    let category_str: String = row.get(2)?;
    let liquidity_str: String = row.get(5)?;
    let status_str: String = row.get(6)?;
    let created_str: String = row.get(7)?;

    Ok(Product {
        id: row.get(0)?,
        name: row.get(1)?,
        category: ProductCategory::parse(&category_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        min_balance: row.get(3)?,
        annual_yield_pct: row.get(4)?,
        liquidity: Liquidity::parse(&liquidity_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        status: ProductStatus::parse(&status_str).map_err(|_| rusqlite::Error::InvalidQuery)?,
        created_at: DateTime::parse_from_rfc3339(&created_str)
            .map_err(|_| rusqlite::Error::InvalidQuery)?
            .with_timezone(&Utc),
    })
}

const PRODUCT_COLUMNS: &str =
    "id, name, category, min_balance, annual_yield_pct, liquidity, status, created_at";

pub fn get_product(conn: &Connection, id: &str) -> ApiResult<Product> {
    conn.query_row(
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS),
        params![id],
        row_to_product,
    )
    .optional()?
    .ok_or_else(|| ApiError::not_found(format!("Product not found: {}", id)))
}

pub fn list_products(conn: &Connection, status: Option<ProductStatus>) -> ApiResult<Vec<Product>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM products WHERE (?1 IS NULL OR status = ?1) ORDER BY name",
        PRODUCT_COLUMNS
    ))?;

    let products = stmt
        .query_map(params![status.map(|s| s.as_str())], row_to_product)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(products)
}

#[allow(clippy::too_many_arguments)]
pub fn update_product(
    conn: &Connection,
    id: &str,
    name: Option<&str>,
    category: Option<ProductCategory>,
    min_balance: Option<f64>,
    annual_yield_pct: Option<f64>,
    liquidity: Option<Liquidity>,
    status: Option<ProductStatus>,
) -> ApiResult<Product> {
    let mut product = get_product(conn, id)?;

    if let Some(name) = name {
        if name.trim().is_empty() {
            return Err(ApiError::bad_request("Product name must not be empty"));
        }
        product.name = name.to_string();
    }
    if let Some(category) = category {
        product.category = category;
    }
    if let Some(min_balance) = min_balance {
        if min_balance < 0.0 {
            return Err(ApiError::bad_request("Minimum balance must not be negative"));
        }
        product.min_balance = min_balance;
    }
    if let Some(yield_pct) = annual_yield_pct {
        if yield_pct < 0.0 {
            return Err(ApiError::bad_request("Annual yield must not be negative"));
        }
        product.annual_yield_pct = yield_pct;
    }
    if let Some(liquidity) = liquidity {
        product.liquidity = liquidity;
    }
    if let Some(status) = status {
        product.status = status;
    }

    conn.execute(
        "UPDATE products
         SET name = ?2, category = ?3, min_balance = ?4, annual_yield_pct = ?5,
             liquidity = ?6, status = ?7
         WHERE id = ?1",
        params![
            product.id,
            product.name,
            product.category.as_str(),
            product.min_balance,
            product.annual_yield_pct,
            product.liquidity.as_str(),
            product.status.as_str(),
        ],
    )?;

    Ok(product)
}

pub fn delete_product(conn: &Connection, id: &str) -> ApiResult<()> {
    let result = conn.execute("DELETE FROM products WHERE id = ?1", params![id]);

    match result {
        Ok(0) => Err(ApiError::not_found(format!("Product not found: {}", id))),
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            // Referenced by recommendations; retire instead of deleting.
            Err(ApiError::conflict(
                "Product is referenced by recommendations; set it inactive instead",
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Seed a starter product catalog. Existing products are left untouched.
pub fn seed_catalog(conn: &Connection) -> ApiResult<Vec<Product>> {
    let catalog = [
        ("Overnight Sweep", ProductCategory::Sweep, 25_000.0, 3.1, Liquidity::Daily),
        ("Money Market Fund", ProductCategory::MoneyMarket, 100_000.0, 4.2, Liquidity::Daily),
        ("90-Day Term Deposit", ProductCategory::TermDeposit, 250_000.0, 4.8, Liquidity::Term),
        ("T-Bill Ladder", ProductCategory::TreasuryBill, 500_000.0, 5.1, Liquidity::Weekly),
    ];

    let mut created = Vec::new();
    for (name, category, min_balance, yield_pct, liquidity) in catalog {
        match create_product(conn, name, category, min_balance, yield_pct, liquidity) {
            Ok(product) => created.push(product),
            Err(e) if e.status == axum::http::StatusCode::CONFLICT => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(created)
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

        let product = create_product(
            &conn,
            "Money Market Fund",
            ProductCategory::MoneyMarket,
            100_000.0,
            4.2,
            Liquidity::Daily,
        )
        .unwrap();

        let fetched = get_product(&conn, &product.id).unwrap();
        assert_eq!(fetched.name, "Money Market Fund");
        assert_eq!(fetched.category, ProductCategory::MoneyMarket);
        assert_eq!(fetched.status, ProductStatus::Active);
    }

    #[test]
    fn test_validation() {
        let conn = test_conn();

        assert!(create_product(&conn, "", ProductCategory::Sweep, 0.0, 1.0, Liquidity::Daily).is_err());
        assert!(
            create_product(&conn, "X", ProductCategory::Sweep, -1.0, 1.0, Liquidity::Daily).is_err()
        );
        assert!(
            create_product(&conn, "X", ProductCategory::Sweep, 0.0, -1.0, Liquidity::Daily).is_err()
        );
    }

    #[test]
    fn test_duplicate_name_is_conflict() {
        let conn = test_conn();
        create_product(&conn, "Sweep", ProductCategory::Sweep, 0.0, 3.0, Liquidity::Daily).unwrap();

        let err = create_product(&conn, "Sweep", ProductCategory::Sweep, 0.0, 3.0, Liquidity::Daily)
            .unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::CONFLICT);
    }

    #[test]
    fn test_update_and_status_filter() {
        let conn = test_conn();
        let product =
            create_product(&conn, "Sweep", ProductCategory::Sweep, 0.0, 3.0, Liquidity::Daily)
                .unwrap();

        update_product(
            &conn,
            &product.id,
            None,
            None,
            Some(50_000.0),
            Some(3.5),
            None,
            Some(ProductStatus::Inactive),
        )
        .unwrap();

        let fetched = get_product(&conn, &product.id).unwrap();
        assert_eq!(fetched.min_balance, 50_000.0);
        assert_eq!(fetched.annual_yield_pct, 3.5);
        assert_eq!(fetched.status, ProductStatus::Inactive);

        assert!(list_products(&conn, Some(ProductStatus::Active)).unwrap().is_empty());
        assert_eq!(list_products(&conn, None).unwrap().len(), 1);
    }

    #[test]
    fn test_delete() {
        let conn = test_conn();
        let product =
            create_product(&conn, "Sweep", ProductCategory::Sweep, 0.0, 3.0, Liquidity::Daily)
                .unwrap();

        delete_product(&conn, &product.id).unwrap();
        assert!(get_product(&conn, &product.id).is_err());
        assert!(delete_product(&conn, &product.id).is_err());
    }

    #[test]
    fn test_seed_catalog_is_idempotent() {
        let conn = test_conn();

        let first = seed_catalog(&conn).unwrap();
        assert_eq!(first.len(), 4);

        let second = seed_catalog(&conn).unwrap();
        assert!(second.is_empty());
        assert_eq!(list_products(&conn, None).unwrap().len(), 4);
    }
}
