#[macro_use]
pub mod lang;
pub mod app;
pub mod checksum;
pub mod common;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod exchange;
pub mod gc;
pub mod inter_service;
pub mod meta_store;
pub mod model;
pub mod net;
pub mod party_mgr;
pub mod prepare;
pub mod query_coord_es;
pub mod session;
pub mod sql_refs;
pub mod test_utils;
