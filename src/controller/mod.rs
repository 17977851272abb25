use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::kubeclient::Watch;
use crate::reconciler::{self, Reconcile};

mod init;
mod manager;

pub use manager::Manager;

/// Binds one resource kind to a list of names and owns the queue between the
/// enqueue sides (poll, watch) and the single reconcile consumer.
pub struct Controller {
    resource_names: Vec<String>,
    watcher: Arc<dyn Watch>,
    reconciler: Arc<dyn Reconcile>,
    updated_tx: mpsc::Sender<String>,
    updated_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl Controller {
    pub fn new(
        resource_names: Vec<String>,
        watcher: Arc<dyn Watch>,
        reconciler: Arc<dyn Reconcile>,
    ) -> Self {
        // Rendezvous queue: producers block until the run loop accepts, so a
        // slow reconcile throttles enqueueing instead of growing a backlog.
        let (updated_tx, updated_rx) = mpsc::channel(1);
        Self {
            resource_names,
            watcher,
            reconciler,
            updated_tx,
            updated_rx: Mutex::new(Some(updated_rx)),
        }
    }

    /// Reconciles every configured name sequentially, propagating the first
    /// error.
    pub async fn once(&self) -> reconciler::Result<()> {
        for name in &self.resource_names {
            self.reconciler.reconcile(name).await?;
        }
        Ok(())
    }

    /// Enqueues every configured name, then sleeps `interval`; forever, until
    /// cancelled.
    pub async fn poll(&self, token: CancellationToken, interval: Duration) {
        loop {
            for name in &self.resource_names {
                tokio::select! {
                    () = token.cancelled() => return,
                    sent = self.updated_tx.send(name.clone()) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            debug!(
                enqueued = self.resource_names.len(),
                "enqueued resources, next sync in {:?}", interval,
            );
            tokio::select! {
                () = token.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Watches every configured name concurrently; returns once all watchers
    /// have, which only happens on cancellation.
    pub async fn watch(&self, token: CancellationToken) {
        let watches = self.resource_names.iter().map(|name| {
            self.watcher
                .retry_watch(token.clone(), name, self.updated_tx.clone())
        });
        futures::future::join_all(watches).await;
    }

    /// The sole consumer of the queue. Not-found is absorbed (the next tick
    /// retries); any other reconcile error ends the loop and is fatal to the
    /// caller.
    pub async fn run(&self, token: CancellationToken) -> reconciler::Result<()> {
        let mut updated = self
            .updated_rx
            .lock()
            .await
            .take()
            .expect("run consumes the queue exactly once");
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                received = updated.recv() => match received {
                    Some(name) => match self.reconciler.reconcile(&name).await {
                        Ok(()) => {}
                        Err(err) if err.is_not_found() => {
                            debug!(resource = %name, "resource not found, will retry on the next tick");
                        }
                        Err(err) => return Err(err),
                    },
                    None => break,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::time::timeout;

    use super::*;
    use crate::kubeclient;

    struct IdleWatch;

    #[async_trait]
    impl Watch for IdleWatch {
        async fn retry_watch(
            &self,
            token: CancellationToken,
            _name: &str,
            _updated: mpsc::Sender<String>,
        ) {
            token.cancelled().await;
        }
    }

    struct Recording {
        seen: StdMutex<Vec<String>>,
        outcome: fn(&str) -> reconciler::Result<()>,
    }

    impl Recording {
        fn new(outcome: fn(&str) -> reconciler::Result<()>) -> Arc<Self> {
            Arc::new(Self {
                seen: StdMutex::new(Vec::new()),
                outcome,
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Reconcile for Recording {
        async fn reconcile(&self, name: &str) -> reconciler::Result<()> {
            self.seen.lock().unwrap().push(name.to_owned());
            (self.outcome)(name)
        }
    }

    fn controller(names: &[&str], reconciler: Arc<Recording>) -> Arc<Controller> {
        Arc::new(Controller::new(
            names.iter().map(|n| (*n).to_owned()).collect(),
            Arc::new(IdleWatch),
            reconciler,
        ))
    }

    #[tokio::test]
    async fn once_reconciles_names_in_order() {
        let recording = Recording::new(|_| Ok(()));
        controller(&["a", "b", "c"], recording.clone())
            .once()
            .await
            .unwrap();
        assert_eq!(recording.seen(), ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn once_propagates_the_first_error() {
        let recording = Recording::new(|name| match name {
            "b" => Err(reconciler::Error::UnmappedTrafficSplit(name.to_owned())),
            _ => Ok(()),
        });
        let err = controller(&["a", "b", "c"], recording.clone())
            .once()
            .await
            .unwrap_err();
        assert!(matches!(err, reconciler::Error::UnmappedTrafficSplit(_)));
        assert_eq!(recording.seen(), ["a", "b"]);
    }

    #[tokio::test]
    async fn run_swallows_not_found() {
        let recording = Recording::new(|_| Err(kubeclient::Error::NotFound.into()));
        let controller = controller(&["a"], recording.clone());
        let token = CancellationToken::new();

        let run = tokio::spawn({
            let controller = controller.clone();
            let token = token.clone();
            async move { controller.run(token).await }
        });

        controller.updated_tx.send("a".to_owned()).await.unwrap();
        controller.updated_tx.send("a".to_owned()).await.unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while recording.seen().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "run loop stalled");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap().unwrap();
        assert_eq!(recording.seen(), ["a", "a"]);
    }

    #[tokio::test]
    async fn run_stops_on_a_real_error() {
        let recording = Recording::new(|name| {
            Err(reconciler::Error::UnmappedTrafficSplit(name.to_owned()))
        });
        let controller = controller(&["a"], recording.clone());

        let run = tokio::spawn({
            let controller = controller.clone();
            async move { controller.run(CancellationToken::new()).await }
        });

        controller.updated_tx.send("a".to_owned()).await.unwrap();
        let result = timeout(Duration::from_secs(1), run).await.unwrap().unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn poll_keeps_feeding_the_run_loop() {
        let recording = Recording::new(|_| Ok(()));
        let controller = controller(&["a", "b"], recording.clone());
        let token = CancellationToken::new();

        let run = tokio::spawn({
            let (controller, token) = (controller.clone(), token.clone());
            async move { controller.run(token).await }
        });
        let poll = tokio::spawn({
            let (controller, token) = (controller.clone(), token.clone());
            async move { controller.poll(token, Duration::from_millis(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        token.cancel();
        timeout(Duration::from_secs(1), poll).await.unwrap().unwrap();
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap().unwrap();

        let seen = recording.seen();
        assert!(seen.iter().filter(|n| *n == "a").count() >= 2, "{seen:?}");
        assert!(seen.contains(&"b".to_owned()));
    }

    #[tokio::test]
    async fn everything_returns_promptly_on_cancel() {
        let recording = Recording::new(|_| Ok(()));
        let controller = controller(&["a"], recording);
        let token = CancellationToken::new();
        token.cancel();

        timeout(Duration::from_secs(1), controller.poll(token.clone(), Duration::from_secs(3600)))
            .await
            .unwrap();
        timeout(Duration::from_secs(1), controller.watch(token.clone()))
            .await
            .unwrap();
        timeout(Duration::from_secs(1), controller.run(token))
            .await
            .unwrap()
            .unwrap();
    }
}
