use std::{sync::Arc, time::Duration};

use clap::Args;
use log::info;

use crate::{
    health::{check_namespaces, NamespaceLister},
    kubectl::Kubectl,
    Result,
};

#[derive(Debug, Args)]
pub struct HealthArgs {
    /// How long listing namespaces may take, in milliseconds.
    #[arg(
        long = "timeout-ms",
        env = "HEALTH_CHECK_TIMEOUT",
        default_value_t = 5000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_ms: u64,
}

pub fn health(kubectl: Kubectl, args: HealthArgs) -> Result<()> {
    let count = count_namespaces(Arc::new(kubectl), Duration::from_millis(args.timeout_ms))?;
    info!("Cluster reachable, {count} namespaces");
    Ok(())
}

/// Returns within `timeout` even when the list call hangs. The runtime is shut down without
/// waiting for the blocking list call, which is left to finish or die with the process.
fn count_namespaces(lister: Arc<dyn NamespaceLister>, timeout: Duration) -> Result<usize> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let result = runtime.block_on(check_namespaces(lister, timeout));
    runtime.shutdown_background();
    Ok(result?)
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Instant};

    use super::*;
    use crate::{
        health::{HealthError, ListError},
        kubectl::NamespaceList,
    };

    struct HangingLister(Duration);

    impl NamespaceLister for HangingLister {
        fn list(&self) -> Result<NamespaceList, ListError> {
            thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    #[test]
    fn hanging_lister_does_not_outlast_the_timeout() {
        let start = Instant::now();
        let error = count_namespaces(
            Arc::new(HangingLister(Duration::from_secs(10))),
            Duration::from_millis(100),
        )
        .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
        assert!(
            matches!(
                error.downcast_ref::<HealthError>(),
                Some(HealthError::Timeout(_))
            ),
            "{error}"
        );
    }

    #[test]
    fn responsive_lister_is_counted() {
        let count = count_namespaces(
            Arc::new(HangingLister(Duration::from_millis(1))),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(count, 0);
    }
}
