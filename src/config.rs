//! Process-wide, immutable-after-init endpoint configuration (spec.md §3, §6).

use std::path::PathBuf;

/// Which ICE candidate types the agent is permitted to gather, a bitmap over
/// `{host, srflx, relay}` as spec.md §3 describes ("NAT traversal policy
/// bitmap"). `All` is the union, not a fourth independent value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NatTraversalPolicy {
    HostOnly,
    ServerReflexive,
    Relay,
    All,
}

impl NatTraversalPolicy {
    pub fn allows_srflx(&self) -> bool {
        matches!(self, NatTraversalPolicy::ServerReflexive | NatTraversalPolicy::All)
    }

    pub fn allows_relay(&self) -> bool {
        matches!(self, NatTraversalPolicy::Relay | NatTraversalPolicy::All)
    }
}

/// How the endpoint obtains the credentials it presents to the signaling
/// control plane. Credential *provisioning policy* is out of scope
/// (spec.md §1 Non-goals); this only names the two shapes the endpoint
/// accepts.
#[derive(Debug, Clone)]
pub enum CredentialSource {
    StaticKeyPair { access_key: String, secret_key: String },
    RoleAlias { role_alias: String, credentials_endpoint: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
    H265,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    Opus,
    G711Mu,
    G711A,
}

/// Endpoint construction options (spec.md §6).
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub region: String,
    pub channel_name: String,
    pub credentials: CredentialSource,
    pub nat_traversal: NatTraversalPolicy,
    pub max_viewers: usize,
    pub enable_twcc: bool,
    pub enable_data_channel: bool,
    pub storage_session: bool,
    pub video_codec: VideoCodec,
    pub audio_codec: AudioCodec,
    /// Path to a PEM-encoded CA bundle, or an inline PEM string.
    pub root_ca: RootCa,
    pub device_certificate_path: Option<PathBuf>,
    pub device_private_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub enum RootCa {
    Path(PathBuf),
    Pem(String),
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            region: "us-east-1".to_owned(),
            channel_name: String::new(),
            credentials: CredentialSource::StaticKeyPair {
                access_key: String::new(),
                secret_key: String::new(),
            },
            nat_traversal: NatTraversalPolicy::All,
            max_viewers: 10,
            enable_twcc: true,
            enable_data_channel: false,
            storage_session: false,
            video_codec: VideoCodec::H264,
            audio_codec: AudioCodec::Opus,
            root_ca: RootCa::Pem(String::new()),
            device_certificate_path: None,
            device_private_key_path: None,
        }
    }
}
