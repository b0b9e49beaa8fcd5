/// Waiting for a freshly created cluster to reach the running state
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::client::ClusterApi;
use super::models::{ClusterState, ClusterStatus};
use crate::error::{Error, Result};
use crate::utils::polling::PollingConfig;

/// Polls the provider until a cluster reports `running`
pub struct ReadinessPoller {
    polling: PollingConfig,
}

impl ReadinessPoller {
    /// Create a poller with a fixed interval, deadline and optional attempt cap
    pub fn new(polling: PollingConfig) -> Self {
        Self { polling }
    }

    /// Block until the cluster is running and return that observation
    ///
    /// Returns on the first `running` status. A cluster in the `error` state
    /// aborts the wait immediately.
    pub async fn wait_until_running<C>(
        &self,
        api: &C,
        cluster_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ClusterStatus>
    where
        C: ClusterApi + ?Sized,
    {
        self.polling
            .poll(cancel, move || async move {
                let status = api.get_cluster_status(cluster_id).await?;
                if status.is_running() {
                    return Ok(Some(status));
                }
                match status.state() {
                    ClusterState::Error => Err(Error::ClusterFailed(cluster_id.to_string())),
                    state => {
                        info!("Still waiting for cluster {} (state: {})", cluster_id, state);
                        Ok(None)
                    }
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::models::{ClusterOptions, ClusterSpec, StatusBlock, VersionOption};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Cluster API double replaying a scripted sequence of states
    struct ScriptedCluster {
        states: Mutex<VecDeque<ClusterState>>,
        status_calls: Mutex<u32>,
    }

    impl ScriptedCluster {
        fn new(states: &[ClusterState]) -> Self {
            Self {
                states: Mutex::new(states.iter().copied().collect()),
                status_calls: Mutex::new(0),
            }
        }

        fn status(&self, id: &str, state: ClusterState) -> ClusterStatus {
            ClusterStatus {
                id: id.to_string(),
                name: "devkube".to_string(),
                status: StatusBlock {
                    state,
                    message: None,
                },
                endpoint: "https://203.0.113.1".to_string(),
                created_at: None,
            }
        }
    }

    #[async_trait]
    impl ClusterApi for ScriptedCluster {
        async fn get_options(&self) -> Result<ClusterOptions> {
            Ok(ClusterOptions {
                versions: vec![VersionOption {
                    slug: "1.29.1-do.0".to_string(),
                    kubernetes_version: "1.29.1".to_string(),
                }],
            })
        }

        async fn create_cluster(&self, _spec: &ClusterSpec) -> Result<ClusterStatus> {
            Ok(self.status("c-1", ClusterState::Provisioning))
        }

        async fn get_cluster_status(&self, id: &str) -> Result<ClusterStatus> {
            *self.status_calls.lock().unwrap() += 1;
            let mut states = self.states.lock().unwrap();
            // The last scripted state repeats forever
            let state = if states.len() > 1 {
                states.pop_front().unwrap()
            } else {
                *states.front().unwrap()
            };
            Ok(self.status(id, state))
        }

        async fn get_kubeconfig(&self, id: &str) -> Result<String> {
            Err(Error::NotReady(id.to_string()))
        }
    }

    fn poller(interval_secs: u64, max_attempts: u32) -> ReadinessPoller {
        ReadinessPoller::new(
            PollingConfig::new(
                Duration::from_secs(3600),
                Duration::from_secs(interval_secs),
                "Waiting for cluster",
            )
            .with_max_attempts(max_attempts),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_at_first_running_observation() {
        let api = ScriptedCluster::new(&[
            ClusterState::Provisioning,
            ClusterState::Provisioning,
            ClusterState::Running,
        ]);
        let start = Instant::now();

        let status = poller(10, 30)
            .wait_until_running(&api, "c-1", &CancellationToken::new())
            .await
            .unwrap();

        assert!(status.is_running());
        assert_eq!(*api.status_calls.lock().unwrap(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_after_max_attempts() {
        let api = ScriptedCluster::new(&[ClusterState::Provisioning]);

        let result = poller(10, 5)
            .wait_until_running(&api, "c-1", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::Timeout { attempts: 5, .. })));
        assert_eq!(*api.status_calls.lock().unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_state_aborts() {
        let api = ScriptedCluster::new(&[ClusterState::Provisioning, ClusterState::Error]);

        let result = poller(10, 30)
            .wait_until_running(&api, "c-1", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(Error::ClusterFailed(id)) if id == "c-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait() {
        let api = ScriptedCluster::new(&[ClusterState::Provisioning]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = poller(10, 30).wait_until_running(&api, "c-1", &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(*api.status_calls.lock().unwrap(), 0);
    }
}
