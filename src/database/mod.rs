pub mod executor;
pub mod identifier;
pub mod table_info;

use thiserror::Error;

/// Errors from the database layer that are not classified into a response
/// category. Classification happens once, in the executor; everything else
/// (metadata introspection included) surfaces as a generic server error.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}
