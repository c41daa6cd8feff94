//! Startup provisioning of user and server records.
//!
//! Identity management is outside this system; the daemon only seeds
//! records from a YAML file so a deployment is usable without a
//! separate provisioning tool.

use std::path::Path;

use anyhow::Context;
use anyhow::Result;
use ledger::ReservationLedger;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ProvisionFile {
    #[serde(default)]
    pub users: Vec<UserSeed>,
    #[serde(default)]
    pub servers: Vec<ServerSeed>,
}

#[derive(Debug, Deserialize)]
pub struct UserSeed {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub credit: u64,
    #[serde(default)]
    pub server_list: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerSeed {
    pub server_id: String,
    pub password: String,
    #[serde(default)]
    pub gpu_ids: Vec<u32>,
}

/// Load `path` and write every seed record into the ledger.
pub async fn apply(ledger: &ReservationLedger, path: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read provisioning file {}", path.display()))?;
    let file: ProvisionFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse provisioning file {}", path.display()))?;

    for user in &file.users {
        ledger
            .provision_user(
                &user.username,
                &user.password,
                user.credit,
                user.server_list.clone(),
            )
            .await
            .map_err(|e| anyhow::anyhow!("failed to provision user {}: {e}", user.username))?;
    }
    for server in &file.servers {
        ledger
            .provision_server(&server.server_id, &server.password, server.gpu_ids.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to provision server {}: {e}", server.server_id))?;
    }

    info!(
        users = file.users.len(),
        servers = file.servers.len(),
        "provisioning applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use ledger::MemoryStore;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn seeds_users_and_servers_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        writeln!(
            file,
            r#"
users:
  - username: alice
    password: pw-a
    credit: 5
    server_list: [S1]
servers:
  - server_id: S1
    password: pw-s1
    gpu_ids: [0, 1]
"#
        )
        .expect("should write yaml");

        let ledger = ReservationLedger::new(Arc::new(MemoryStore::new()));
        apply(&ledger, file.path()).await.expect("should apply");

        let status = ledger.user_status("alice").await.expect("alice exists");
        assert_eq!(status.credit, 5);
        assert_eq!(status.server_list, vec!["S1".to_string()]);

        let detail = ledger
            .list_bookings("S1", 0)
            .await
            .expect("S1 exists");
        assert_eq!(detail.slots.len(), 2);
    }

    #[test(tokio::test)]
    async fn malformed_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("should create temp file");
        writeln!(file, "users: {{ not a list }}").expect("should write yaml");

        let ledger = ReservationLedger::new(Arc::new(MemoryStore::new()));

        assert!(apply(&ledger, file.path()).await.is_err());
    }
}
