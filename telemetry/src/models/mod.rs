//! Data models shared by the trace and log pipelines.
//!
//! This module contains the service-identity descriptor, the activity that
//! carries span correlation through a request flow, and the log record.

pub mod activity;
pub mod log;
pub mod resource;

pub use activity::{Activity, ActivitySource, ActivityStatus};
pub use log::{Correlation, LogLevel, LogRecord};
pub use resource::ResourceDescriptor;
