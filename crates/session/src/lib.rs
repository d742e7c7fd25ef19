//! Liveproof Session
//!
//! The liveness-session core: a thin client for the remote detection
//! backend and the orchestrator that drives a detection attempt from a
//! live camera feed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │             LivenessOrchestrator                  │
//! │  ┌──────────┐  ┌───────────┐  ┌──────────────┐   │
//! │  │ Frame    │  │ Liveness  │  │ Recorder     │   │
//! │  │ Sampler  │  │ Backend   │  │ (concurrent) │   │
//! │  └────┬─────┘  └─────┬─────┘  └──────┬───────┘   │
//! │       │              │               │            │
//! │       ▼              ▼               ▼            │
//! │   still JPEG    frame replies   RecordingArtifact │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! The orchestrator owns the state machine and the throttled submission
//! loop; everything it talks to sits behind a trait so the whole machine
//! runs against fakes in tests.

pub mod client;
pub mod comparison;
pub mod orchestrator;
pub mod types;

pub use client::{HttpLivenessClient, LivenessBackend};
pub use comparison::ComparisonClient;
pub use orchestrator::LivenessOrchestrator;
pub use types::*;
