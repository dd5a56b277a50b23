pub mod datetime;
pub mod error;
pub mod fhir;
pub mod fhir_reference;
pub mod id;
pub mod index;

pub use datetime::{DatePrecision, PartialDateTime, format_index_instant, now_utc};
pub use error::{CoreError, ErrorCategory, Result};
pub use fhir::{is_known_resource_type, is_valid_resource_type_name};
pub use fhir_reference::{FhirReference, ReferenceIdentity, UnresolvableReference};
pub use id::{generate_id, validate_id};
pub use index::{IndexRow, IndexValue, ResourceKey, SearchParameterType};
