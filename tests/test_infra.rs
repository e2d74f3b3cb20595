use nodeforge::infra::{HostSelection, InfraOutputs, TerraformCli};
use std::path::Path;

fn cli() -> TerraformCli {
    TerraformCli::new(Path::new("infra"), "dev", "us-west-2")
}

#[test]
fn test_apply_binds_profile_region_and_host_flags() {
    let args = cli().apply_args(HostSelection::default());
    assert_eq!(args[0], "apply");
    assert!(args.contains(&"-auto-approve".to_string()));
    assert!(args.contains(&"profile=dev".to_string()));
    assert!(args.contains(&"region=us-west-2".to_string()));
    assert!(args.contains(&"enable_test_host=true".to_string()));
    assert!(args.contains(&"enable_build_host=false".to_string()));
}

#[test]
fn test_destroy_compute_is_a_converging_apply_not_a_destroy() {
    let args = cli().destroy_compute_args();
    // the bucket must survive compute-only teardown, so this is never
    // a `terraform destroy`
    assert_eq!(args[0], "apply");
    assert!(!args.iter().any(|a| a == "destroy"));
    assert!(args.contains(&"enable_test_host=false".to_string()));
    assert!(args.contains(&"enable_build_host=false".to_string()));
    assert!(args.contains(&"enable_pxe_server=false".to_string()));
}

#[test]
fn test_destroy_all_is_a_destroy() {
    let args = cli().destroy_all_args();
    assert_eq!(args[0], "destroy");
    assert!(args.contains(&"-auto-approve".to_string()));
}

#[test]
fn test_empty_outputs_reject_skip_infra_reuse() {
    let err = InfraOutputs::from_json("{}").unwrap_err();
    assert!(format!("{:#}", err).contains("--skip-infra"));
}

#[test]
fn test_outputs_parse_terraform_json() {
    let json = r#"{
        "test_host_public_ip": {"sensitive": false, "type": "string", "value": "203.0.113.9"},
        "image_bucket": {"sensitive": false, "type": "string", "value": "nodeforge-images"},
        "ssh_private_key_pem": {"sensitive": true, "type": "string", "value": "-----BEGIN KEY-----"}
    }"#;

    let outputs = InfraOutputs::from_json(json).unwrap();
    assert_eq!(outputs.require_test_host().unwrap(), "203.0.113.9");
    assert_eq!(outputs.require_bucket().unwrap(), "nodeforge-images");
    assert!(outputs.build_host_ip.is_none());
    assert!(outputs.ssh_private_key.is_some());
}

#[test]
fn test_missing_host_output_is_a_clear_error() {
    let json = r#"{"image_bucket": {"value": "nodeforge-images"}}"#;
    let outputs = InfraOutputs::from_json(json).unwrap();
    assert!(outputs.require_test_host().is_err());
}

#[tokio::test]
async fn test_private_key_written_with_owner_only_permissions() {
    let temp_dir = tempfile::tempdir().unwrap();
    let key_path = temp_dir.path().join("ssh-key.pem");

    let outputs = InfraOutputs {
        ssh_private_key: Some("-----BEGIN KEY-----\n".to_string()),
        ..Default::default()
    };
    assert!(outputs.write_private_key(&key_path).await.unwrap());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn test_absent_key_output_leaves_file_untouched() {
    let temp_dir = tempfile::tempdir().unwrap();
    let key_path = temp_dir.path().join("ssh-key.pem");

    let outputs = InfraOutputs::default();
    assert!(!outputs.write_private_key(&key_path).await.unwrap());
    assert!(!key_path.exists());
}
