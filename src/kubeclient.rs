//! Thin typed wrapper over [`kube::Api`] carrying the status-code policy the
//! reconcilers rely on: 404 becomes a [`Error::NotFound`] sentinel everywhere,
//! and a 409 on replace is collapsed into success because another replica of
//! this sidecar has simply won the race to publish an equivalent object.
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams, WatchParams};
use kube::error::ErrorResponse;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed delay before a broken watch stream is reopened.
pub const WATCH_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("resource not found")]
    NotFound,

    #[error("kubernetes api request failed: {0}")]
    Api(#[source] kube::Error),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }
}

fn classify(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ErrorResponse { code: 404, .. }) => Error::NotFound,
        other => Error::Api(other),
    }
}

/// Streams change notifications for single named resources.
///
/// Object safe so a controller can watch configmaps and trafficsplits through
/// the same seam.
#[async_trait]
pub trait Watch: Send + Sync {
    /// Watches `name` until cancelled, pushing the name into `updated` for
    /// every change frame received. Reopens the stream after [`WATCH_BACKOFF`]
    /// whenever it ends, for any reason.
    async fn retry_watch(&self, token: CancellationToken, name: &str, updated: mpsc::Sender<String>);
}

#[derive(Clone)]
pub struct KubeClient<K> {
    api: Api<K>,
}

impl<K> KubeClient<K>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Serialize + Debug,
    K::DynamicType: Default,
{
    pub fn namespaced(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }

    pub async fn get(&self, name: &str) -> Result<K> {
        self.api.get(name).await.map_err(classify)
    }

    pub async fn create(&self, obj: &K) -> Result<K> {
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(classify)
    }

    /// Replaces `name` with `obj`. Returns `Ok(None)` when the api server
    /// reports a conflict: the object the loser meant to publish is already
    /// superseded by an equivalent or newer one.
    pub async fn replace(&self, name: &str, obj: &K) -> Result<Option<K>> {
        match self.api.replace(name, &PostParams::default(), obj).await {
            Ok(replaced) => Ok(Some(replaced)),
            Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
                info!(resource = %name, "replace conflicted, another replica won the race");
                Ok(None)
            }
            Err(err) => Err(classify(err)),
        }
    }
}

#[async_trait]
impl<K> Watch for KubeClient<K>
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
    K::DynamicType: Default + Send + Sync,
{
    async fn retry_watch(&self, token: CancellationToken, name: &str, updated: mpsc::Sender<String>) {
        let params = WatchParams::default().fields(&format!("metadata.name={name}"));
        loop {
            debug!(resource = %name, "watch starting");
            match self.api.watch(&params, "0").await {
                Ok(events) => {
                    futures::pin_mut!(events);
                    loop {
                        tokio::select! {
                            () = token.cancelled() => {
                                debug!(resource = %name, "watch cancelled");
                                return;
                            }
                            event = events.next() => match event {
                                // The frame only tells us something changed;
                                // the reconciler re-reads the object anyway.
                                Some(Ok(_)) => {
                                    if updated.send(name.to_owned()).await.is_err() {
                                        debug!(resource = %name, "reconcile loop gone, stopping watch");
                                        return;
                                    }
                                }
                                Some(Err(err)) => {
                                    warn!(resource = %name, error = %err, "watch stream failed");
                                    break;
                                }
                                None => {
                                    debug!(resource = %name, "watch stream ended");
                                    break;
                                }
                            }
                        }
                    }
                }
                Err(err) => warn!(resource = %name, error = %err, "watch request failed"),
            }

            // Prevent a busy loop against a flapping api server.
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(WATCH_BACKOFF) => {}
            }
        }
    }
}
