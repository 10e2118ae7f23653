//! External data sources
//!
//! The CDR database is the one historical collaborator: given a date it
//! yields per-extension aggregates for that day.

pub mod cdr;

pub use cdr::CdrDatabase;
