//! Types shared between the duo relay and the clients that talk to it.
//!
//! This crate provides:
//! - Payload classification: control-phrase matching and media sniffing ([`classify`])
//! - Protocol defaults and constants ([`types`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod classify;
pub mod types;

pub use classify::{Classifier, ClassifyError, ControlPhrase, PayloadKind, SniffingClassifier};
