pub mod job_extract;
pub mod selector;
pub mod validate;

pub use job_extract::{JobExtractor, RawJobFields};
pub use selector::{Acceptor, FieldFallback, ListingLocator, Strategy};
pub use validate::{validate_batch, ValidationOutcome, ValidatorConfig};
