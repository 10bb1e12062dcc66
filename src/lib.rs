//! Readmission insights: aggregate statistics over hospital patient-visit
//! records, rendered as console reports or served to a small dashboard.

pub mod config;
pub mod console;
pub mod logging;
pub mod pipeline;
pub mod queries;
pub mod record;
pub mod report;
pub mod server;
pub mod store;
