//! CI-gated promotion: trigger the validation job against the update
//! branch, poll it to a terminal result, and lift or keep the hold on the
//! change request accordingly.

use tokio::time::{sleep, Duration, Instant};
use tracing::{info, warn};

use crate::capabilities::{ChangeRequest, CiRunner, CodeHost};
use crate::config::GateConfig;
use crate::error::Result;

/// Terminal state of one gate run. `Failed` and `TimedOut` both leave the
/// hold in place; they differ in whether CI reached a verdict at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Passed { build_url: String },
    Failed { build_url: String },
    TimedOut,
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, GateOutcome::Passed { .. })
    }
}

/// Drives one validation build for one change request.
pub struct PromotionGate<'a> {
    ci: &'a dyn CiRunner,
    host: &'a dyn CodeHost,
    config: &'a GateConfig,
}

impl<'a> PromotionGate<'a> {
    pub fn new(ci: &'a dyn CiRunner, host: &'a dyn CodeHost, config: &'a GateConfig) -> Self {
        Self { ci, host, config }
    }

    /// Trigger the validation job for `branch` on `fork_web_url`, poll
    /// until it finishes or the maximum wait expires, and annotate `change`
    /// with the outcome. Only a pass lifts the hold; every other outcome
    /// leaves the change request held for a human.
    pub async fn run(
        &self,
        change: &ChangeRequest,
        branch: &str,
        fork_web_url: &str,
        version: &str,
    ) -> Result<GateOutcome> {
        let job = &self.config.job;
        let build = self.ci.next_build_number(job).await?;

        let parameters = vec![
            ("SERVICE_BRANCH".to_string(), branch.to_string()),
            ("SERVICE_REPO".to_string(), fork_web_url.to_string()),
            ("JOB_NAME".to_string(), self.config.job_label.clone()),
            ("NOTIFY".to_string(), "false".to_string()),
            ("OPENSHIFT_VERSION".to_string(), version.to_string()),
        ];
        self.ci.trigger(job, &parameters).await?;
        info!(job = %job, build, branch = %branch, "validation job triggered");

        let deadline = Instant::now() + Duration::from_secs(self.config.max_wait_secs);
        sleep(Duration::from_secs(self.config.initial_delay_secs)).await;

        loop {
            let status = self.ci.build_status(job, build).await?;

            if let Some(result) = status.result {
                return if result == self.config.success_result {
                    self.host.unhold(change).await?;
                    self.host
                        .comment(
                            change,
                            &format!("Validation passed, hold removed, see {}", status.url),
                        )
                        .await?;
                    info!(build, url = %status.url, "validation passed, hold removed");
                    Ok(GateOutcome::Passed {
                        build_url: status.url,
                    })
                } else {
                    self.host
                        .comment(
                            change,
                            &format!(
                                "Validation finished with result {result}, leaving hold in place, see {}",
                                status.url
                            ),
                        )
                        .await?;
                    warn!(build, result = %result, url = %status.url, "validation failed, hold kept");
                    Ok(GateOutcome::Failed {
                        build_url: status.url,
                    })
                };
            }

            if Instant::now() >= deadline {
                self.host
                    .comment(
                        change,
                        &format!(
                            "Validation did not finish within {}s, leaving hold in place",
                            self.config.max_wait_secs
                        ),
                    )
                    .await?;
                warn!(build, "validation timed out, hold kept");
                return Ok(GateOutcome::TimedOut);
            }

            sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }
    }
}
