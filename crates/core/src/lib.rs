//! Domain types for the LoRA dataset pipeline backend.
//!
//! This crate holds everything the HTTP layer and the process supervisor
//! share: the task record and its state machine (`task`), the in-memory
//! task registry (`registry`), subject normalization (`subject`), and the
//! domain error type (`error`). It deliberately knows nothing about HTTP
//! or child processes.

pub mod error;
pub mod registry;
pub mod subject;
pub mod task;
