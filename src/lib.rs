pub mod cli;
pub mod config;
pub mod falcon;
pub mod humio;
pub mod shipper;
pub mod storage;
