//! Asynchronous photo annotation for the Momento photo backend.
//!
//! A stored photo is handed to the [`annotate::Orchestrator`], which runs a
//! local image analysis and an optional vision-model call, keeps the best
//! result, reconciles its tags with the shared vocabulary and records a
//! terminal status on the photo.

pub mod analysis;
pub mod annotate;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod tagging;
pub mod tasks;
pub mod vision;
