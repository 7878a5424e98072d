//! Small shared helpers

pub mod names;
pub mod rate_limit;
pub mod time;
