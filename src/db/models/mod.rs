#![allow(unused_imports)]

//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work across the crate.

pub mod audit_log;
pub mod campaign;
pub mod chatbot_usage;
pub mod queued_message;
pub mod rate_limit;
pub mod user;
pub mod webhook_event;

pub use self::audit_log::*;
pub use self::campaign::*;
pub use self::chatbot_usage::*;
pub use self::queued_message::*;
pub use self::rate_limit::*;
pub use self::user::*;
pub use self::webhook_event::*;
