pub mod event_table;
pub mod progress;
pub mod writer;
