//! Socialstream Services Layer
//!
//! This crate is the business service layer: the media lifecycle coordinator
//! with its saga and timeout discipline, the compression state machine, the
//! profile pointer RPC, routing of bus deliveries and the reconciliation
//! sweep. Keep coordination here; keep thin HTTP handling in
//! socialstream-api.

pub mod compression;
pub mod coordinator;
pub mod events;
pub mod profile_pointer;
pub mod race;
pub mod reconciliation;

pub use compression::CompressionStateMachine;
pub use coordinator::{MediaContent, MediaLifecycleCoordinator, OrphanRemoval, ServedMedia};
pub use events::MediaEventHandler;
pub use profile_pointer::{
    HttpProfilePointerClient, MemoryProfilePointers, PointerError, PointerResult,
    ProfilePointerClient,
};
pub use race::race;
pub use reconciliation::{ReconciliationService, SweepReport};
