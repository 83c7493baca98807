//! Operator-facing adapters: script input and CSV reports.

pub mod csv;
pub mod script;
