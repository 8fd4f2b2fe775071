pub mod batch;
pub mod downloader;
pub mod library;
pub mod throughput;
