//! Remote population for the certificate registry.
//!
//! A registry only knows the entities registered in its own process. When a
//! populate rule targets an entity served elsewhere, the registry hands the
//! call to an [`HttpResolver`], which speaks the `resolve` and
//! `populate-by-prop` routes of the owning server.

pub mod http;

pub use http::HttpResolver;
