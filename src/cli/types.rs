use super::args::RunArgs;
use crate::infra::{HostSelection, Teardown};

impl RunArgs {
    /// Which teardown, if any, the run should finish with.
    pub fn teardown(&self) -> Option<Teardown> {
        if self.cleanup {
            Some(Teardown::All)
        } else if self.cleanup_vms_only {
            Some(Teardown::ComputeOnly)
        } else {
            None
        }
    }

    pub fn hosts(&self) -> HostSelection {
        HostSelection {
            test_host: true,
            build_host: self.with_build_host,
            pxe_server: self.with_pxe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;
    use clap::Parser;

    fn parse_run(extra: &[&str]) -> RunArgs {
        let mut argv = vec!["nodeforge", "run", "--profile", "dev", "--region", "us-west-2"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().cmd {
            crate::cli::Commands::Run(args) => args,
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_teardown_mapping() {
        assert_eq!(parse_run(&[]).teardown(), None);
        assert_eq!(parse_run(&["--cleanup"]).teardown(), Some(Teardown::All));
        assert_eq!(
            parse_run(&["--cleanup-vms-only"]).teardown(),
            Some(Teardown::ComputeOnly)
        );
    }

    #[test]
    fn test_host_selection() {
        let hosts = parse_run(&["--with-build-host"]).hosts();
        assert!(hosts.test_host);
        assert!(hosts.build_host);
        assert!(!hosts.pxe_server);
    }
}
