/// Player identity handed to the launch pipeline by the account layer
use md5::{Digest, Md5};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchIdentity {
    pub player_name: String,
    /// Player UUID without hyphens
    pub player_id: String,
    pub access_token: String,
    /// "msa" or "legacy"
    pub user_type: String,
    /// Xbox User ID (MSA accounts only)
    pub xuid: Option<String>,
    pub client_id: Option<String>,
}

impl LaunchIdentity {
    pub fn new(
        player_name: impl Into<String>,
        player_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            player_name: player_name.into(),
            player_id: player_id.into(),
            access_token: access_token.into(),
            user_type: "msa".to_string(),
            xuid: None,
            client_id: None,
        }
    }

    /// Offline play: the UUID is derived from the name the same way the
    /// server derives it (`OfflinePlayer:<name>`, MD5 name-based UUID).
    pub fn offline(player_name: impl Into<String>) -> Self {
        let player_name = player_name.into();
        Self {
            player_id: offline_uuid(&player_name).simple().to_string(),
            player_name,
            access_token: "0".to_string(),
            user_type: "legacy".to_string(),
            xuid: None,
            client_id: None,
        }
    }

    pub fn with_xuid(mut self, xuid: impl Into<String>) -> Self {
        self.xuid = Some(xuid.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Value of `${auth_session}` for descriptors that still ask for it
    pub fn session(&self) -> String {
        format!("token:{}:{}", self.access_token, self.player_id)
    }
}

fn offline_uuid(name: &str) -> Uuid {
    // Name-based UUID with no namespace: MD5 of the raw bytes, version 3 bits set
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&Md5::digest(format!("OfflinePlayer:{}", name).as_bytes()));
    uuid::Builder::from_md5_bytes(digest).into_uuid()
}
