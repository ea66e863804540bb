//! Certificate registry REST server.
//!
//! Every registered entity gets the same read routes under `/api/:entity`.
//! Certificates add the declared search action and document file routes.

pub mod app;
pub mod config;
pub mod error;
pub mod files;
pub mod handlers;
pub mod router;
