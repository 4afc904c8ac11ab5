//! # Secret Materialization
//!
//! Publishes connection credentials as a namespaced secret.
//!
//! On first creation the secret receives the full field set; on later
//! provisioning runs only the composite `database-url` value is replaced.
//! The decomposed fields are populated at creation time only, so a secret
//! shared across re-provisioning keeps whatever extra keys it carries.

use crate::controller::store::SecretStore;
use anyhow::Result;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;
use tracing::debug;

/// Key holding the composite connection URL; present in every secret this
/// controller writes and the only key it ever overwrites
pub const DATABASE_URL_KEY: &str = "database-url";

/// Create or update the named secret with the given credential fields
///
/// Errors from the secret store propagate to the caller as a provisioning
/// failure.
pub async fn materialize(
    store: &dyn SecretStore,
    namespace: &str,
    name: &str,
    fields: BTreeMap<String, String>,
) -> Result<()> {
    match store.get(namespace, name).await? {
        None => {
            debug!(namespace = %namespace, secret = %name, "creating secret");
            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    ..ObjectMeta::default()
                },
                string_data: Some(fields),
                ..Secret::default()
            };
            store.create(namespace, &secret).await
        }
        Some(mut existing) => {
            debug!(namespace = %namespace, secret = %name, "updating secret connection URL");
            let url = fields.get(DATABASE_URL_KEY).cloned().unwrap_or_default();
            existing
                .data
                .get_or_insert_with(BTreeMap::new)
                .insert(DATABASE_URL_KEY.to_string(), ByteString(url.into_bytes()));
            store.update(namespace, &existing).await
        }
    }
}
