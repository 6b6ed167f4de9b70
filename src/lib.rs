pub mod app;
pub mod cellxgene;
pub mod census;
pub mod citation;
pub mod columnar;
pub mod config;
pub mod domain;
pub mod error;
pub mod eutils;
pub mod http;
pub mod output;
pub mod pool;
pub mod store;
pub mod throttle;
pub mod tools;
