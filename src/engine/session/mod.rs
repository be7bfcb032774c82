pub mod broadcast;
pub mod entry;
pub mod machine;
