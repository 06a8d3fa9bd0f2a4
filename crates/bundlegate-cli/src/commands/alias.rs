//! Alias commands: `candidate`, `promote`, `rollback`, `aliases`, `resolve`.

use serde_json::{Value, json};

use crate::client::{ClientError, ControlPlaneClient};

/// Point the candidate alias at `bundle_id`.
pub async fn candidate(client: &ControlPlaneClient, bundle_id: &str) -> Result<Value, ClientError> {
    client
        .post("/aliases/candidate", Some(&json!({ "bundle_id": bundle_id })))
        .await
}

/// Promote the gated candidate to current.
pub async fn promote(client: &ControlPlaneClient) -> Result<Value, ClientError> {
    client.post("/aliases/promote", None).await
}

/// Point current back at a previously gated bundle.
pub async fn rollback(client: &ControlPlaneClient, bundle_id: &str) -> Result<Value, ClientError> {
    client
        .post("/aliases/rollback", Some(&json!({ "bundle_id": bundle_id })))
        .await
}

/// Show both aliases.
pub async fn aliases(client: &ControlPlaneClient) -> Result<Value, ClientError> {
    client.get("/aliases").await
}

/// Show what a runtime would resolve right now.
pub async fn resolve(client: &ControlPlaneClient) -> Result<Value, ClientError> {
    client.get("/resolve/current").await
}
