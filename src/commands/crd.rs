use anyhow::Result;
use kube::CustomResourceExt;

use epp::crd::{InferenceModel, InferencePool};

/// Print both CRDs' YAML to stdout for `kubectl apply -f`, in the teacher's
/// `commands::crd::generate` idiom.
pub fn generate() -> Result<()> {
    let pool_yaml = serde_yaml::to_string(&InferencePool::crd())?;
    let model_yaml = serde_yaml::to_string(&InferenceModel::crd())?;
    println!("{pool_yaml}---\n{model_yaml}");
    Ok(())
}

/// Apply both CRDs directly to the connected cluster.
pub async fn install() -> Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::{Api, Client};

    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    for crd in [InferencePool::crd(), InferenceModel::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match crds.create(&Default::default(), &crd).await {
            Ok(_) => println!("CRD '{name}' installed successfully"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                println!("CRD '{name}' already exists — skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
