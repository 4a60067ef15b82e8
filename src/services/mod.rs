pub mod error_classifier;
pub mod fault;
pub mod part_builder;
pub mod progress;
pub mod source;
pub mod storage;
pub mod transfer_engine;
pub mod transfer_store;
pub mod upload_sink;
pub mod worker;
