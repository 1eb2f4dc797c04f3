pub mod aggregate;
pub mod verdict;

pub use aggregate::{aggregate, Aggregate};
pub use verdict::{compare, CompareContext, PairVerdict};
