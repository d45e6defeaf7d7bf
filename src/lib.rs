//! Live MIDI remapping between an isomorphic grid controller and a downstream
//! microtonal synthesizer.
//!
//! # Architecture
//!
//! ```text
//! controller descriptor (YAML) ──► ControllerDescriptor ──┐
//! tuning feed (/pitchgrid/tuning) ──► Scale ───────────────┼──► Coordinator ──► MappingSnapshot
//! layout edits / controller switch ──► Layout ─────────────┘          │
//!                                                                      ▼
//! controller input callback ──► bounded queue ──► remap thread ──► virtual MIDI out
//! ```
//!
//! The coordinator is the only module that knows about all of scale, layout, and
//! descriptor at once; the MIDI core only ever reads a [`midi::MappingSnapshot`]
//! through the [`midi::MappingProvider`] trait, so the two halves never call back into
//! each other directly.

pub mod config;
pub mod controller;
pub mod coordinator;
pub mod error;
pub mod layout;
pub mod midi;
pub mod mos;
pub mod osc;
pub mod template;

pub use config::AppConfig;
pub use controller::ControllerDescriptor;
pub use coordinator::{Coordinator, CoordinatorError};
pub use layout::{Layout, Pad};
pub use mos::Scale;
pub use osc::TuningMessage;
