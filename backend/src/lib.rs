pub mod auth;
pub mod config;
pub mod db;
pub mod inference;
pub mod parser;
pub mod pipeline;
pub mod quality;
pub mod rate_limit;
pub mod results;
pub mod retry;
pub mod routes;
pub mod storage;

#[cfg(test)]
pub(crate) mod testing;
