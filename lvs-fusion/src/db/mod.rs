//! Database access for the fusion engine
//!
//! Schema creation lives in `lvs_common::db`; this module holds the queries.

pub mod documents;
pub mod verification;

pub use documents::latest_identity_document;
pub use verification::{get_verification, VerificationGateway, VerificationWrite};
