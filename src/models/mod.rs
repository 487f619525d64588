pub mod api;
pub mod checkpoint;
pub mod event;
pub mod job;
pub mod mode;
