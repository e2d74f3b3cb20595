//! Boot-test validation of a built image.
//!
//! A disposable VM is booted from the artifact and a fixed, ordered
//! checklist of probes runs against it over SSH. Probes are classified
//! independently; everything behind the boot gate is skipped — not
//! attempted and mis-reported — when the guest never becomes reachable.

pub mod vm;

use anyhow::Result;
use tracing::warn;

use crate::params::BuildParams;
use crate::retry::{retry, RetryPolicy};
use crate::transport::Transport;

pub const BOOT_PROBE: &str = "boot";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Pass,
    Warn,
    Fail,
}

/// What a non-zero probe exit means for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Fail,
    Warn,
}

#[derive(Debug, Clone)]
pub struct Probe {
    pub name: &'static str,
    pub command: String,
    pub on_failure: FailureClass,
}

/// The fixed checklist run after the boot gate, in order.
pub fn checklist(params: &BuildParams) -> Vec<Probe> {
    vec![
        Probe {
            name: "cloud-init",
            command: "cloud-init status --wait".to_string(),
            on_failure: FailureClass::Fail,
        },
        Probe {
            name: "nested-virtualization",
            command: "test -c /dev/kvm".to_string(),
            on_failure: FailureClass::Warn,
        },
        Probe {
            name: "containerd-active",
            command: "systemctl is-active --quiet containerd".to_string(),
            on_failure: FailureClass::Fail,
        },
        Probe {
            name: "kubelet-enabled",
            command: "systemctl is-enabled --quiet kubelet".to_string(),
            on_failure: FailureClass::Fail,
        },
        Probe {
            name: "kubeadm-present",
            command: "command -v kubeadm >/dev/null".to_string(),
            on_failure: FailureClass::Fail,
        },
        Probe {
            name: "kubeadm-version",
            command: format!(
                "kubeadm version -o short | grep -q v{}",
                params.k8s_version
            ),
            on_failure: FailureClass::Warn,
        },
        Probe {
            name: "cni-plugins",
            command: "test -d /opt/cni/bin".to_string(),
            on_failure: FailureClass::Fail,
        },
        Probe {
            name: "swap-disabled",
            command: "test -z \"$(swapon --noheadings)\"".to_string(),
            on_failure: FailureClass::Warn,
        },
        Probe {
            name: "ip-forwarding",
            command: "sysctl -n net.ipv4.ip_forward | grep -q 1".to_string(),
            on_failure: FailureClass::Warn,
        },
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub name: String,
    pub outcome: ProbeOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Pass,
    PassWithWarnings,
    Fail,
}

#[derive(Debug, Default)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
    /// Probes never attempted because the boot gate failed.
    pub skipped: Vec<String>,
}

impl ProbeReport {
    pub fn record(&mut self, name: &str, outcome: ProbeOutcome) {
        self.results.push(ProbeResult {
            name: name.to_string(),
            outcome,
        });
    }

    pub fn skip(&mut self, name: &str) {
        self.skipped.push(name.to_string());
    }

    fn count(&self, outcome: ProbeOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.count(ProbeOutcome::Fail) > 0 {
            RunOutcome::Fail
        } else if self.count(ProbeOutcome::Warn) > 0 {
            RunOutcome::PassWithWarnings
        } else {
            RunOutcome::Pass
        }
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} passed, {} failed, {} warnings",
            self.count(ProbeOutcome::Pass),
            self.count(ProbeOutcome::Fail),
            self.count(ProbeOutcome::Warn)
        )
    }

    /// One line per probe, for the console and the test log.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for r in &self.results {
            let mark = match r.outcome {
                ProbeOutcome::Pass => "✓",
                ProbeOutcome::Warn => "⚠",
                ProbeOutcome::Fail => "✗",
            };
            out.push_str(&format!("  {} {}\n", mark, r.name));
        }
        for name in &self.skipped {
            out.push_str(&format!("  - {} (skipped)\n", name));
        }
        out.push_str(&format!("\n{}\n", self.summary_line()));
        out
    }
}

/// Run the boot gate and then the checklist against the guest transport.
pub async fn run_checklist(
    transport: &dyn Transport,
    params: &BuildParams,
    boot_policy: RetryPolicy,
) -> Result<ProbeReport> {
    let mut report = ProbeReport::default();

    // Boot gate: nothing else can run without a reachable guest
    let booted = retry(boot_policy, "guest boot", || async move {
        let out = transport.exec("true").await?;
        if out.success() {
            Ok(())
        } else {
            anyhow::bail!("guest not reachable yet (exit {})", out.exit_code)
        }
    })
    .await;

    match booted {
        Ok(()) => report.record(BOOT_PROBE, ProbeOutcome::Pass),
        Err(e) => {
            warn!(target: "validate", error = %e, "boot gate timed out");
            report.record(BOOT_PROBE, ProbeOutcome::Fail);
            for probe in checklist(params) {
                report.skip(probe.name);
            }
            return Ok(report);
        }
    }

    for probe in checklist(params) {
        let outcome = match transport.exec(&probe.command).await {
            Ok(out) if out.success() => ProbeOutcome::Pass,
            _ => match probe.on_failure {
                FailureClass::Fail => ProbeOutcome::Fail,
                FailureClass::Warn => ProbeOutcome::Warn,
            },
        };
        report.record(probe.name, outcome);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_of(outcomes: &[(&str, ProbeOutcome)]) -> ProbeReport {
        let mut report = ProbeReport::default();
        for (name, outcome) in outcomes {
            report.record(name, *outcome);
        }
        report
    }

    #[test]
    fn test_outcome_reduction() {
        use ProbeOutcome::*;
        assert_eq!(report_of(&[("a", Pass), ("b", Pass)]).outcome(), RunOutcome::Pass);
        assert_eq!(
            report_of(&[("a", Pass), ("b", Warn)]).outcome(),
            RunOutcome::PassWithWarnings
        );
        // fail dominates warn
        assert_eq!(
            report_of(&[("a", Warn), ("b", Fail)]).outcome(),
            RunOutcome::Fail
        );
    }

    #[test]
    fn test_summary_line_format() {
        use ProbeOutcome::*;
        let report = report_of(&[("a", Pass), ("b", Pass), ("c", Fail), ("d", Warn)]);
        assert_eq!(report.summary_line(), "2 passed, 1 failed, 1 warnings");
    }

    #[test]
    fn test_render_marks_skipped() {
        let mut report = report_of(&[(BOOT_PROBE, ProbeOutcome::Fail)]);
        report.skip("cloud-init");
        let text = report.render();
        assert!(text.contains("✗ boot"));
        assert!(text.contains("cloud-init (skipped)"));
    }

    #[test]
    fn test_checklist_is_ordered_and_gated_probes_only() {
        let params = crate::BuildParams::resolve_with(
            &crate::cli::VersionOpts::default(),
            None,
            |_| None,
        );
        let probes = checklist(&params);
        assert_eq!(probes.first().unwrap().name, "cloud-init");
        // the boot gate itself is not part of the checklist
        assert!(probes.iter().all(|p| p.name != BOOT_PROBE));
    }
}
