//! vmflow lifecycle core
//!
//! Provisions, tears down and recreates a single cloud instance while
//! preserving its boot disk across cycles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                   vmflow CLI                     │
//! │    (create / destroy-vm / recreate / info ...)   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────┐
//! │                 vmflow-cloud                     │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │           Lifecycle Orchestrator          │   │
//! │  └──────────────────────────────────────────┘   │
//! │  ┌────────────┐ ┌────────────┐ ┌────────────┐   │
//! │  │  Naming    │ │ State Mgmt │ │ Bootstrap  │   │
//! │  └────────────┘ └────────────┘ └────────────┘   │
//! │  ┌──────────────────────────────────────────┐   │
//! │  │  trait ProvisioningClient { ... }         │   │
//! │  └──────────────────────────────────────────┘   │
//! └─────────────────┬───────────────────────────────┘
//!                   │
//!           ┌───────▼───────┐
//!           │     azure     │
//!           │   (az CLI)    │
//!           └───────────────┘
//! ```

pub mod artifact;
pub mod bootstrap;
pub mod error;
pub mod keys;
pub mod lifecycle;
pub mod naming;
pub mod outcome;
pub mod provider;
pub mod scripts;
pub mod state;

// Re-exports
pub use artifact::AddressArtifact;
pub use bootstrap::{BootstrapDeployer, BootstrapParameters, BootstrapTarget, BootstrapTemplate};
pub use error::{CloudError, OperationStage, Result};
pub use lifecycle::Orchestrator;
pub use naming::ResourceNameSet;
pub use outcome::{
    BootstrapStatus, DestroyAllOutcome, DestroyAllReport, DestroyVmOutcome, InfoReport,
    InstanceInfo, Probe, ProvisionOutcome, ProvisionReport, RemoteAccess, ResourceListing,
    ResourceSummary,
};
pub use provider::{
    AdminCredentials, BlobLocation, BlobRef, CompletedOperation, ExtensionSpec, InstanceSpec,
    InstanceView, OperationHandle, OsDisk, PendingOperation, Placement, ProvisioningClient,
    Resource, ResourceId, ResourceKind, ResourceSpec, SecurityRule, SpotPolicy,
    StorageCredentials,
};
pub use state::{LifecyclePhase, LifecycleState, StateManager};
