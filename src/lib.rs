pub mod access;
pub mod attachments;
pub mod auth;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod models;
pub mod residency;
pub mod routes;
pub mod s3;
pub mod schema;
pub mod state;
pub mod storage;
pub mod utils;
pub mod workflow;
