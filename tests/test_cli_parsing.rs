// Focused CLI parsing tests (tests command-line parsing only, not business logic)

use clap::Parser;
use nodeforge::cli::{Cli, Commands};

#[test]
fn test_all_commands_parse() {
    let test_cases = vec![
        vec!["nodeforge", "run", "--profile", "dev", "--region", "us-west-2"],
        vec![
            "nodeforge", "run", "--profile", "dev", "--region", "us-west-2",
            "--skip-infra", "--skip-build",
        ],
        vec!["nodeforge", "infra", "--profile", "dev", "--region", "us-west-2", "up"],
        vec!["nodeforge", "infra", "--profile", "dev", "--region", "us-west-2", "outputs"],
        vec!["nodeforge", "infra", "--profile", "dev", "--region", "us-west-2", "destroy-all"],
        vec!["nodeforge", "infra", "--profile", "dev", "--region", "us-west-2", "destroy-compute"],
        vec!["nodeforge", "build", "--host", "203.0.113.9"],
        vec!["nodeforge", "upload", "--host", "203.0.113.9", "--bucket", "imgs", "--latest"],
        vec!["nodeforge", "test", "--image", "/tmp/node.qcow2"],
        vec!["nodeforge", "preflight"],
    ];

    for args in test_cases {
        Cli::try_parse_from(&args).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", args, e));
    }
}

#[test]
fn test_run_with_all_options() {
    let args = vec![
        "nodeforge", "run",
        "--profile", "dev",
        "--region", "us-west-2",
        "--k8s-version", "1.30.1",
        "--containerd-version", "1.7.15",
        "--bucket", "my-images",
        "--skip-test",
        "--cleanup-vms-only",
        "--with-build-host",
    ];

    let cli = Cli::try_parse_from(args).unwrap();
    match cli.cmd {
        Commands::Run(r) => {
            assert_eq!(r.aws.profile, "dev");
            assert_eq!(r.aws.region, "us-west-2");
            assert_eq!(r.versions.k8s_version.as_deref(), Some("1.30.1"));
            assert_eq!(r.versions.containerd_version.as_deref(), Some("1.7.15"));
            assert_eq!(r.bucket.as_deref(), Some("my-images"));
            assert!(r.skip_test);
            assert!(r.cleanup_vms_only);
            assert!(!r.cleanup);
            assert!(r.with_build_host);
        }
        _ => panic!("expected run command"),
    }
}

#[test]
fn test_run_requires_profile_and_region() {
    assert!(Cli::try_parse_from(["nodeforge", "run"]).is_err());
    assert!(Cli::try_parse_from(["nodeforge", "run", "--profile", "dev"]).is_err());
}

#[test]
fn test_cleanup_flags_are_mutually_exclusive() {
    let args = [
        "nodeforge", "run", "--profile", "dev", "--region", "us-west-2",
        "--cleanup", "--cleanup-vms-only",
    ];
    assert!(Cli::try_parse_from(args).is_err());
}

#[test]
fn test_test_image_and_s3_key_conflict() {
    let args = [
        "nodeforge", "test", "--image", "/tmp/node.qcow2", "--s3-key", "images/x.qcow2",
    ];
    assert!(Cli::try_parse_from(args).is_err());
}
