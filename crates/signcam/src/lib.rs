//! Real-time hand-sign recognition from a live camera feed.
//!
//! `recognition` wires the model, the camera stream and the validation
//! strategies into a single recognition loop; `cli` exposes it as the
//! `signcam` command.

pub mod cli;
pub mod recognition;
