//! Traffic Microsimulation Library
//!
//! A lane-level traffic simulation engine that runs headless or behind any
//! front end that consumes its snapshots.

pub mod simulation;
