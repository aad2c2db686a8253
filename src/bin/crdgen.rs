//! # CRD Generator
//!
//! Prints the `Jwker` CustomResourceDefinition as YAML.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/jwker.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use jwker_controller::crd::Jwker;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&Jwker::crd())?);
    Ok(())
}
