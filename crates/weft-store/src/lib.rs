pub mod database;
pub mod error;
pub mod messages;
pub mod row_helpers;
pub mod schema;
pub mod threads;
pub mod todos;

pub use database::Database;
pub use error::StoreError;
