use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "nodeforge",
    version,
    about = "Build and boot-test Kubernetes node images on transient EC2 capacity"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Full pipeline: provision, build, upload, boot-test, optional teardown
    Run(RunArgs),
    /// Manage the transient AWS topology
    Infra(InfraArgs),
    /// Run the remote image build on an already-provisioned host
    Build(BuildArgs),
    /// Upload built artifacts from the build host to object storage
    Upload(UploadArgs),
    /// Boot-test an image in a disposable local VM
    Test(TestArgs),
    /// Check local tool availability and show status
    Preflight,
}

/// AWS access options shared by every command that touches the cloud.
#[derive(Args, Debug, Clone)]
pub struct AwsOpts {
    /// AWS credentials profile
    #[arg(long)]
    pub profile: String,

    /// AWS region
    #[arg(long)]
    pub region: String,
}

/// Version overrides for the components baked into the image.
///
/// Anything left unset falls back to the matching environment variable,
/// then to the built-in default.
#[derive(Args, Debug, Clone, Default)]
pub struct VersionOpts {
    /// Kubernetes version to bake into the image
    #[arg(long)]
    pub k8s_version: Option<String>,

    /// containerd version
    #[arg(long)]
    pub containerd_version: Option<String>,

    /// CNI plugins version
    #[arg(long)]
    pub cni_version: Option<String>,

    /// crictl version
    #[arg(long)]
    pub crictl_version: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub aws: AwsOpts,

    #[command(flatten)]
    pub versions: VersionOpts,

    /// Terraform working directory
    #[arg(long, default_value = "infra")]
    pub infra_dir: PathBuf,

    /// S3 bucket for artifacts (default: the provisioned bucket output)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Pre-built image to validate instead of fetching one
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Reuse prior Terraform outputs instead of provisioning
    #[arg(long)]
    pub skip_infra: bool,

    /// Skip the remote build and upload stages
    #[arg(long)]
    pub skip_build: bool,

    /// Skip the boot-test stage
    #[arg(long)]
    pub skip_test: bool,

    /// Tear down everything after the run, including the bucket
    #[arg(long, conflicts_with = "cleanup_vms_only")]
    pub cleanup: bool,

    /// Tear down compute instances only; keep bucket and network resources
    #[arg(long)]
    pub cleanup_vms_only: bool,

    /// Also provision the x86 build host
    #[arg(long)]
    pub with_build_host: bool,

    /// Also provision the PXE server
    #[arg(long)]
    pub with_pxe: bool,
}

#[derive(Args, Debug)]
pub struct InfraArgs {
    #[command(flatten)]
    pub aws: AwsOpts,

    /// Terraform working directory
    #[arg(long, default_value = "infra")]
    pub infra_dir: PathBuf,

    #[command(subcommand)]
    pub cmd: InfraCommands,
}

#[derive(Subcommand, Debug)]
pub enum InfraCommands {
    /// Provision the topology (key pair, security groups, bucket, hosts)
    Up {
        /// Also provision the x86 build host
        #[arg(long)]
        with_build_host: bool,

        /// Also provision the PXE server
        #[arg(long)]
        with_pxe: bool,
    },
    /// Print the current Terraform outputs
    Outputs,
    /// Destroy the entire topology, including the bucket
    DestroyAll,
    /// Remove compute instances only; bucket and network stay
    DestroyCompute,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub versions: VersionOpts,

    /// Build host address (default: the provisioned test host output)
    #[arg(long)]
    pub host: Option<String>,

    /// Terraform working directory (used to resolve --host when unset)
    #[arg(long, default_value = "infra")]
    pub infra_dir: PathBuf,

    /// SSH private key (default: the key written by provisioning)
    #[arg(long)]
    pub key: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Build host address (default: the provisioned test host output)
    #[arg(long)]
    pub host: Option<String>,

    /// Terraform working directory (used to resolve defaults)
    #[arg(long, default_value = "infra")]
    pub infra_dir: PathBuf,

    /// S3 bucket (default: the provisioned bucket output)
    #[arg(long)]
    pub bucket: Option<String>,

    /// SSH private key (default: the key written by provisioning)
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Also copy each image to its <name>-latest alias
    #[arg(long)]
    pub latest: bool,
}

#[derive(Args, Debug)]
pub struct TestArgs {
    #[command(flatten)]
    pub versions: VersionOpts,

    /// Local image to boot
    #[arg(long, conflicts_with = "s3_key")]
    pub image: Option<PathBuf>,

    /// Fetch the image from object storage by key (requires profile/region)
    #[arg(long)]
    pub s3_key: Option<String>,

    /// AWS credentials profile (for --s3-key)
    #[arg(long)]
    pub profile: Option<String>,

    /// AWS region (for --s3-key)
    #[arg(long)]
    pub region: Option<String>,

    /// S3 bucket (for --s3-key; default: IMAGE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// vCPUs for the throwaway VM
    #[arg(long, default_value_t = 2)]
    pub cpu: u8,

    /// Memory (MiB) for the throwaway VM
    #[arg(long, default_value_t = 2048)]
    pub mem: u32,
}
