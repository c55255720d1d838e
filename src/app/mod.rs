pub mod auth;
pub mod documents;
pub mod error;
pub mod ingest;
pub mod pagination;
pub mod streams;
pub mod users;

pub use error::{ServiceError, ServiceResult};
