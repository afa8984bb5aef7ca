pub mod aggregate;
mod bound;
mod consolidate;
mod contain;
pub mod exec;
pub mod merge;
mod nested;
pub mod order;
mod predicate;
pub mod resultset;
mod restore;
mod select;

pub use aggregate::Aggregator;
pub use exec::exec;
pub use merge::merge;
pub use order::order_by;
pub use resultset::{marshal_result_set, Column, ResultSet};
