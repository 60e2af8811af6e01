//! Liveness check of the cluster connection: can namespaces be listed?

use std::{sync::Arc, time::Duration};

use log::debug;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::kubectl::NamespaceList;

pub type ListError = Box<dyn std::error::Error + Send + Sync>;

/// Lists all namespaces. The call blocks and can not be interrupted.
pub trait NamespaceLister: Send + Sync {
    fn list(&self) -> Result<NamespaceList, ListError>;
}

/// Lists namespaces once and delivers the outcome on `success` or on `failure`, never both.
///
/// Meant to be spawned. When `stop` is cancelled before the outcome is delivered, nothing is sent
/// and the function returns. The list call itself keeps running on the blocking pool, only its
/// delivery is abandoned.
pub async fn list_async(
    lister: Arc<dyn NamespaceLister>,
    success: oneshot::Sender<NamespaceList>,
    failure: oneshot::Sender<ListError>,
    stop: CancellationToken,
) {
    let listing = tokio::task::spawn_blocking(move || lister.list());

    let outcome = tokio::select! {
        biased;
        _ = stop.cancelled() => {
            debug!("namespace listing cancelled before delivery");
            return;
        }
        joined = listing => match joined {
            Ok(outcome) => outcome,
            Err(error) => Err(error.into()),
        },
    };

    if stop.is_cancelled() {
        return;
    }

    // A dropped receiver means nobody is waiting anymore, which is fine.
    match outcome {
        Ok(namespaces) => {
            let _ = success.send(namespaces);
        }
        Err(error) => {
            let _ = failure.send(error);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("listing namespaces failed: {0}")]
    List(#[source] ListError),
    #[error("listing namespaces did not finish within {0:?}")]
    Timeout(Duration),
}

/// Lists namespaces with a time limit and returns how many there are.
pub async fn check_namespaces(
    lister: Arc<dyn NamespaceLister>,
    timeout: Duration,
) -> Result<usize, HealthError> {
    let (success_tx, success_rx) = oneshot::channel();
    let (failure_tx, failure_rx) = oneshot::channel();
    let stop = CancellationToken::new();

    let task = tokio::spawn(list_async(lister, success_tx, failure_tx, stop.clone()));

    let result = tokio::select! {
        Ok(namespaces) = success_rx => Ok(namespaces.len()),
        Ok(error) = failure_rx => Err(HealthError::List(error)),
        _ = tokio::time::sleep(timeout) => Err(HealthError::Timeout(timeout)),
    };

    stop.cancel();
    let _ = task.await;
    result
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Mutex};

    use super::*;
    use crate::kubectl::{Namespace, ResourceMetadata};

    fn namespace(name: &str) -> Namespace {
        Namespace {
            metadata: ResourceMetadata {
                name: name.to_owned(),
                ..Default::default()
            },
        }
    }

    struct StaticLister(Result<Vec<&'static str>, &'static str>);

    impl NamespaceLister for StaticLister {
        fn list(&self) -> Result<NamespaceList, ListError> {
            match &self.0 {
                Ok(names) => Ok(names.iter().map(|name| namespace(name)).collect()),
                Err(error) => Err((*error).into()),
            }
        }
    }

    /// Blocks inside `list` until released.
    struct GatedLister {
        entered: Mutex<Option<mpsc::Sender<()>>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl NamespaceLister for GatedLister {
        fn list(&self) -> Result<NamespaceList, ListError> {
            if let Some(entered) = self.entered.lock().unwrap().take() {
                let _ = entered.send(());
            }
            let _ = self.release.lock().unwrap().recv();
            Ok(vec![namespace("default")])
        }
    }

    #[tokio::test]
    async fn success_is_delivered_on_success_channel_only() {
        let (success_tx, success_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        let lister = Arc::new(StaticLister(Ok(vec!["default", "deis"])));

        list_async(lister, success_tx, failure_tx, CancellationToken::new()).await;

        let namespaces = success_rx.await.unwrap();
        assert_eq!(namespaces.len(), 2);
        assert_eq!(namespaces[1].metadata.name, "deis");
        assert!(failure_rx.await.is_err());
    }

    #[tokio::test]
    async fn error_is_delivered_on_failure_channel_only() {
        let (success_tx, success_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        let lister = Arc::new(StaticLister(Err("forbidden")));

        list_async(lister, success_tx, failure_tx, CancellationToken::new()).await;

        assert_eq!(failure_rx.await.unwrap().to_string(), "forbidden");
        assert!(success_rx.await.is_err());
    }

    #[tokio::test]
    async fn cancelled_before_completion_delivers_nothing() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let lister = Arc::new(GatedLister {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        let (success_tx, success_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        let stop = CancellationToken::new();

        let task = tokio::spawn(list_async(lister, success_tx, failure_tx, stop.clone()));

        tokio::task::spawn_blocking(move || entered_rx.recv())
            .await
            .unwrap()
            .unwrap();
        stop.cancel();

        // The function returns even though the list call is still blocked.
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("list_async should return once cancelled")
            .unwrap();

        release_tx.send(()).unwrap();
        assert!(success_rx.await.is_err());
        assert!(failure_rx.await.is_err());
    }

    #[tokio::test]
    async fn cancelled_up_front_delivers_nothing() {
        let (success_tx, success_rx) = oneshot::channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        stop.cancel();

        list_async(
            Arc::new(StaticLister(Ok(vec!["default"]))),
            success_tx,
            failure_tx,
            stop,
        )
        .await;

        assert!(success_rx.await.is_err());
        assert!(failure_rx.await.is_err());
    }

    #[tokio::test]
    async fn check_reports_namespace_count_and_errors() {
        let count = check_namespaces(
            Arc::new(StaticLister(Ok(vec!["default", "deis", "kube-system"]))),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(count, 3);

        let error = check_namespaces(
            Arc::new(StaticLister(Err("forbidden"))),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(error, HealthError::List(_)));
    }

    #[tokio::test]
    async fn check_times_out_on_a_hanging_lister() {
        let (entered_tx, _entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let lister = Arc::new(GatedLister {
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });

        let error = check_namespaces(lister, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(error, HealthError::Timeout(_)));
        release_tx.send(()).unwrap();
    }
}
