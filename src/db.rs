//! Row types and SQL for the tables created by `migrations/`.

pub mod message;
