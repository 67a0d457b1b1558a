pub mod backend;
pub mod config;
pub mod error;
pub mod extractors;
pub mod logging;
pub mod mutation;
pub mod parser;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use error::{AppError, AppResult};
pub use mutation::{MutationRequest, RelationMutationResolver};
pub use parser::FilterExpression;
pub use query::{QueryContext, QueryPlanApplier};
pub use schema::{Entity, SchemaGuard};
