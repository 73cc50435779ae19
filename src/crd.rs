use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The distinguished pool consulted first when a service carries no pool
/// hints.
pub const DEFAULT_POOL_NAME: &str = "default";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(group = "keel.dev", version = "v1alpha1", kind = "ServiceGroup")]
#[kube(status = "ServiceGroupStatus")]
#[kube(
    printcolumn = r#"{"name":"POOLS", "type":"string", "description":"CIDR ranges of the group", "jsonPath":".spec.local.pools"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroupSpec {
    pub local: Option<ServiceGroupLocalSpec>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
pub struct ServiceGroupStatus {}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceGroupLocalSpec {
    pub pools: Vec<String>,
}
