use anyhow::Result;

use crate::cli::{InfraArgs, InfraCommands};
use crate::infra::{read_outputs, HostSelection, InfraOutputs, Teardown, TerraformCli};
use crate::paths;

pub async fn cmd_infra(args: InfraArgs) -> Result<()> {
    let tf = TerraformCli::new(&args.infra_dir, &args.aws.profile, &args.aws.region);

    match args.cmd {
        InfraCommands::Up {
            with_build_host,
            with_pxe,
        } => {
            tf.apply(HostSelection {
                test_host: true,
                build_host: with_build_host,
                pxe_server: with_pxe,
            })
            .await?;
            let outputs = tf.outputs().await?;
            outputs.write_private_key(&paths::key_file()).await?;
            print_outputs(&outputs);
        }
        InfraCommands::Outputs => {
            print_outputs(&read_outputs(&args.infra_dir).await?);
        }
        InfraCommands::DestroyAll => {
            tf.destroy(Teardown::All).await?;
            println!("Topology destroyed (bucket included)");
        }
        InfraCommands::DestroyCompute => {
            tf.destroy(Teardown::ComputeOnly).await?;
            println!("Compute instances removed; bucket and network kept");
        }
    }

    Ok(())
}

fn print_outputs(outputs: &InfraOutputs) {
    let show = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
    println!("  test host    {}", show(&outputs.test_host_ip));
    println!("  build host   {}", show(&outputs.build_host_ip));
    println!("  pxe server   {}", show(&outputs.pxe_server_ip));
    println!("  bucket       {}", show(&outputs.bucket));
    // never print key material
    if outputs.ssh_private_key.is_some() {
        println!("  ssh key      (written to {})", paths::key_file().display());
    }
}
