pub mod criteria;
pub mod filter_operator;
pub mod filter_parser;
pub mod query_string;
pub mod sort_parser;

pub use criteria::{CriteriaGroup, Criterion};
pub use filter_operator::Operator;
pub use filter_parser::FilterExpression;
pub use query_string::{decode_nested, decode_scalar};
pub use sort_parser::{SortOrder, SortSpec};
