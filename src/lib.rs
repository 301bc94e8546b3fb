pub mod aggregate;
pub mod archive;
pub mod config;
pub mod control;
pub mod datatypes;
pub mod eligibility;
pub mod fetch;
pub mod logging;
pub mod normalization;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod schema;
pub mod stats;
pub mod store;
pub mod transfer;
pub mod watermark;
pub mod xml;
