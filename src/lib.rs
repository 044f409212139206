// Treasury Management Backend - Core Library
// Exposes all modules for use in the CLI, API server, and tests

pub mod analysis;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod parser;
pub mod recommend;
pub mod report;
pub mod rules;

// Re-export commonly used types
pub use db::{
    open_database, setup_database, seed_defaults,
    AuditEntry, ConfigEntry,
    insert_audit, list_audit,
    get_config_value, get_config_f64, set_config_value, list_config,
};
pub use entities::{
    User, Role,
    Client, ClientStatus,
    StatementFile, StatementStatus, StatementTransaction, Direction,
    Product, ProductCategory, Liquidity, ProductStatus,
    Recommendation, RecommendationStatus,
};
pub use report::Report;
pub use parser::{
    StatementFormat, StatementParser, RawStatementRow, ParsedStatement, ParsedRow,
    detect_format, get_parser, parse_statement,
};
pub use rules::{CategoryRule, CategoryMatcher};
pub use analysis::{Analysis, AnalysisKnobs, CategoryShare, compute_metrics};
pub use error::{ApiError, ApiResult};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
