// src/lib.rs

//! Nutrition Harvester Library
//!
//! Crawls a restaurant nutrition site brand by brand, normalizes every menu
//! item and serving into canonical entities, and upserts them into a
//! document store with resumable, per-unit checkpoints.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
