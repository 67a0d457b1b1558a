pub mod payload;
pub mod repository;
pub mod resolver;

pub use payload::{entries_from_json, MutationRequest, RawEntry};
pub use repository::EntityRepository;
pub use resolver::RelationMutationResolver;
