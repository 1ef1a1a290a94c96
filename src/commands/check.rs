use anyhow::Result;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::{Api, Client};

use epp::crd::InferencePool;

use crate::cli::CheckArgs;

/// Cluster connectivity checks, extended from the teacher's
/// `commands::check::run` with a lookup of the configured `InferencePool`.
pub async fn run(args: CheckArgs) -> Result<()> {
    println!("Running cluster connectivity checks...\n");

    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    print!("  Cluster connection .......... ");
    let version = match client.apiserver_version().await {
        Ok(v) => {
            println!("OK (v{}.{})", v.major, v.minor);
            Some(v)
        }
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    };

    print!("  List nodes permission ........ ");
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(node_list) => println!("OK ({} nodes)", node_list.items.len()),
        Err(e) => println!("FAIL ({})", e),
    }

    if let Some(pool_name) = &args.pool_name {
        print!("  InferencePool '{pool_name}' .......... ");
        let pools: Api<InferencePool> = Api::namespaced(client.clone(), &args.pool_namespace);
        match pools.get(pool_name).await {
            Ok(_) => println!("OK"),
            Err(e) => println!("FAIL ({e})"),
        }
    }

    if let Some(v) = version {
        println!("\n  Kubernetes version: {}.{}", v.major, v.minor);
    }

    println!("\nAll checks completed.");
    Ok(())
}
