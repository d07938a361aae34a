//! Turning resolved plans into deployments: export, signatures, bypass,
//! patch reconciliation and loops.

pub mod bypass;
pub mod export;
pub mod loops;
pub mod reconciler;
pub mod signature;

pub use export::{AssetResolver, ExportOptions, PatchExport, PlainAssets, export_subgraph};
pub use loops::{DeployedLoop, LoopDeployments};
pub use reconciler::{DeployedRecord, PatchReconciler, ReconcileContext, ReconcileOutcome, ReconcilePass};
pub use signature::topology_signature;
