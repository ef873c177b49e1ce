//! Asynchronous image processing service
//!
//! Accepts an uploaded image plus a processing directive (resize, watermark,
//! thumbnail), runs the transformation on a pool of queue workers, and serves
//! the result by id. Originals and results live in S3-compatible object
//! storage, job status in PostgreSQL, and the job queue in Redis.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
