use async_trait::async_trait;
use thiserror::Error;

use crate::kubeclient;

mod configmap;
mod trafficsplit;
pub mod update;
pub mod writer;

pub use configmap::ConfigMapReconciler;
pub(crate) use trafficsplit::derive_from_template;
pub use trafficsplit::TrafficSplitReconciler;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] kubeclient::Error),

    #[error("failed to decode {file}: {source}")]
    DecodeConfig {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to encode {file}: {source}")]
    EncodeConfig {
        file: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(transparent)]
    Write(#[from] writer::Error),

    #[error("no template configmap configured for trafficsplit {0:?}")]
    UnmappedTrafficSplit(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Not-found means "retry on the next tick", not failure; the reconcile
    /// loop swallows it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Client(err) if err.is_not_found())
    }
}

/// A single attempt to drive observed state toward desired state for one
/// named resource. Must be idempotent: names are re-enqueued freely.
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile(&self, name: &str) -> Result<()>;
}
