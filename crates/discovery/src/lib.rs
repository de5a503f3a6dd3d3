pub mod pagination;

pub use pagination::{PaginationDetector, PaginationStyle};
