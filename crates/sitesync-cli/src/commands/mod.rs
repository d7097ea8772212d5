pub mod actions;
pub mod common;
pub mod completions;
pub mod conflicts;
pub mod enqueue;
pub mod list;
pub mod settings;
pub mod storage;
pub mod sync;
