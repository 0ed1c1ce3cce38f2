//! Core library for the forkful recipe server: canonical models, the SQLite
//! store, the upstream record normalizer, caches, and the service layer that
//! ties them together. The HTTP surface lives in the `forkful` binary crate.

pub mod cache;
pub mod db;
pub mod mealdb;
pub mod models;
pub mod service;
