pub mod checkpoint;
pub mod dispatcher;
pub mod engine;
pub mod events;
pub mod http_engine;
pub mod job_store;
pub mod mode_mapper;
pub mod persistence;
pub mod queue;
pub mod worker;
