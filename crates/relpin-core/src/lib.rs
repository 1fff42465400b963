//! Relpin Core Library
//!
//! Drift detection, ticket ledger, repository patching, CI gating, and
//! downstream propagation for the pinned-version reconciliation pipeline.

pub mod capabilities;
pub mod config;
pub mod drift;
pub mod error;
pub mod fakes;
pub mod feed;
pub mod gate;
pub mod patcher;
pub mod pipeline;
pub mod propagate;
pub mod telemetry;
pub mod ticket;
pub mod version;

pub use capabilities::{
    BuildStatus, ChangeRequest, ChangeRequestSpec, CiRunner, CodeHost, ConfigRepo, ForkInfo,
    NewTicket, OpenTicket, TicketId, TicketStore,
};

pub use config::{
    DryRunConfig, EnvironmentTarget, FeedConfig, GateConfig, PatchConfig, PipelineConfig,
    PropagationConfig, PropagationPolicy, TicketConfig,
};

pub use drift::DriftDetector;
pub use error::{PipelineError, Result, VendorError, VendorResult};
pub use feed::{parse_latest_release_text, parse_release_index, PinnedDocument, PinnedEntry, VersionSource};
pub use gate::{GateOutcome, PromotionGate};
pub use patcher::{GitWorkspace, RepoPatcher};
pub use pipeline::{Orchestrator, Outcome, PropagationReport, RunMode, RunReport};
pub use propagate::{ConfigPropagator, MergeOutcome};
pub use ticket::{TicketDisposition, TicketLedger, SUMMARY_FORMAT_VERSION};
pub use version::{
    build_id_from_boot_params, compare_versions, is_pre_release, latest_in_line, minor_of,
    os_version_from_image_url, version_from_release_image, DriftSet, ReleaseLine, VersionPair,
};

pub use telemetry::init_tracing;

/// Relpin version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
