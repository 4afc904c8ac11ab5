//! Prints the Database CRD manifest for cluster installation:
//! `cargo run --bin crdgen | kubectl apply -f -`

use database_controller::Database;
use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&Database::crd()).expect("CRD serialization cannot fail")
    );
}
