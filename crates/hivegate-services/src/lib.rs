//! Background services.
//!
//! Currently one: the cron service, which fires scheduled jobs as
//! synthetic inbound envelopes on the message bus.

pub mod cron_service;
pub mod error;

pub use cron_service::{CronService, Scheduler};
pub use error::{Result, ServiceError};
