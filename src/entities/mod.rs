// Entity records backed by the relational store.
// Each module owns one table: the record struct, its status enums, and the
// rusqlite queries that read and write it.

pub mod client;
pub mod product;
pub mod recommendation;
pub mod statement;
pub mod user;

pub use client::{Client, ClientStatus};
pub use product::{Liquidity, Product, ProductCategory, ProductStatus};
pub use recommendation::{Recommendation, RecommendationStatus};
pub use statement::{Direction, StatementFile, StatementStatus, StatementTransaction};
pub use user::{Role, User};
