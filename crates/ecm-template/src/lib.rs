//! ClusterTemplate reconciler, status writer, deletion guard and admission
//! webhook

#![deny(missing_docs)]

pub mod controller;
pub mod guard;
pub mod status;
pub mod webhook;

pub use controller::{error_policy, reconcile, Context, ContextBuilder, ReconcilerConfig};
pub use guard::{check_delete, cluster_class_indexer};
pub use webhook::{router, WebhookState};
