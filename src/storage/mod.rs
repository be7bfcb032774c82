//! File-backed persistence. Everything is plain JSON so the data stays
//! inspectable with standard tools.

pub mod activity_store;
pub mod category_store;
pub mod entities;
pub mod entry_store;
pub mod rule_store;
