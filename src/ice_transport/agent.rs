//! Thin wrapper over `ice::Agent` (spec.md §4.1 "ICE agent").
//!
//! Gathering, pairing, STUN/TURN and nomination are the published
//! `webrtc-ice` crate's job; this module only shapes the calls the
//! orchestrator needs and forwards the agent's callbacks the way the
//! teacher's `RTCIceTransport`/`RTCIceGatherer` pair does, collapsed into a
//! single type since this crate has no ORTC-style gatherer/transport split.

use std::sync::Arc;

use ice::agent::agent_config::AgentConfig;
use ice::agent::Agent;
use ice::candidate::candidate_base::unmarshal_candidate;
use ice::candidate::Candidate;
use ice::state::ConnectionState;
use ice::url::Url;
use tokio::sync::{mpsc, Mutex};
use util::Conn;

use crate::config::NatTraversalPolicy;
use crate::error::Result;
use crate::signaling::IceCandidateInit;

pub type OnLocalCandidateFn = Box<dyn Fn(String) + Send + Sync>;
pub type OnConnectionStateChangeFn = Box<dyn Fn(ConnectionState) + Send + Sync>;

fn candidate_types_for(policy: NatTraversalPolicy) -> Vec<ice::candidate::CandidateType> {
    let mut types = vec![ice::candidate::CandidateType::Host];
    if policy.allows_srflx() {
        types.push(ice::candidate::CandidateType::ServerReflexive);
    }
    if policy.allows_relay() {
        types.push(ice::candidate::CandidateType::Relay);
    }
    types
}

/// Owns one `ice::Agent` for the lifetime of a peer session, plus the
/// ufrag/pwd pair it was started with (spec.md §3 "ICE agent state").
pub struct IceTransport {
    agent: Arc<Agent>,
    pub local_ufrag: String,
    pub local_pwd: String,
    cancel_tx: Mutex<Option<mpsc::Sender<()>>>,
}

impl IceTransport {
    /// Creates the agent and starts candidate gathering (spec.md §4.1
    /// "Gathering"). `is_controlling` is the master/offer-accepting role.
    pub async fn new(
        policy: NatTraversalPolicy,
        ice_servers: Vec<Url>,
        local_ufrag: String,
        local_pwd: String,
        is_controlling: bool,
    ) -> Result<Self> {
        let config = AgentConfig {
            urls: ice_servers,
            candidate_types: candidate_types_for(policy),
            local_ufrag: local_ufrag.clone(),
            local_pwd: local_pwd.clone(),
            is_controlling,
            network_types: ice::network_type::supported_network_types(),
            ..Default::default()
        };

        let agent = Arc::new(Agent::new(config).await?);

        Ok(IceTransport {
            agent,
            local_ufrag,
            local_pwd,
            cancel_tx: Mutex::new(None),
        })
    }

    /// Registers the callback fired with each gathered local candidate's
    /// wire string, and once more with gathering complete signaled by no
    /// further calls (spec.md §4.1 "local_candidate_ready").
    pub fn on_local_candidate(&self, f: OnLocalCandidateFn) {
        self.agent.on_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                f(c.marshal());
            }
            Box::pin(async {})
        }));
    }

    pub fn on_connection_state_change(&self, f: OnConnectionStateChangeFn) {
        self.agent
            .on_connection_state_change(Box::new(move |state: ConnectionState| {
                f(state);
                Box::pin(async {})
            }));
    }

    /// Adds one trickled remote candidate (spec.md §4.1 `add_remote_candidate`).
    pub fn add_remote_candidate(&self, candidate: &IceCandidateInit) -> Result<()> {
        let raw = candidate
            .candidate
            .strip_prefix("candidate:")
            .unwrap_or(&candidate.candidate);
        let c: Arc<dyn Candidate + Send + Sync> = Arc::new(unmarshal_candidate(raw)?);
        self.agent.add_remote_candidate(&c)?;
        Ok(())
    }

    /// Drives connectivity checks to a nominated pair and returns the
    /// resulting transport, blocking until one pair succeeds (spec.md §4.1
    /// "Connectivity checks"). `is_controlling` selects `dial` vs `accept`,
    /// mirroring the offer-initiator/offer-acceptor split.
    pub async fn start(
        &self,
        is_controlling: bool,
        remote_ufrag: String,
        remote_pwd: String,
    ) -> Result<Arc<dyn Conn + Send + Sync>> {
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        *self.cancel_tx.lock().await = Some(cancel_tx);

        let conn: Arc<dyn Conn + Send + Sync> = if is_controlling {
            self.agent.dial(cancel_rx, remote_ufrag, remote_pwd).await?
        } else {
            self.agent
                .accept(cancel_rx, remote_ufrag, remote_pwd)
                .await?
        };
        Ok(conn)
    }

    /// Re-runs ICE with fresh credentials after connection loss (spec.md
    /// §4.1 "Failure semantics", ICE restart).
    pub async fn restart(&self, new_ufrag: String, new_pwd: String) -> Result<()> {
        self.agent.restart(new_ufrag, new_pwd).await?;
        Ok(())
    }

    pub async fn close(&self) -> Result<()> {
        if let Some(tx) = self.cancel_tx.lock().await.take() {
            let _ = tx.send(()).await;
        }
        self.agent.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_type_bitmap_expands_per_policy() {
        assert_eq!(
            candidate_types_for(NatTraversalPolicy::HostOnly),
            vec![ice::candidate::CandidateType::Host]
        );
        assert_eq!(
            candidate_types_for(NatTraversalPolicy::All),
            vec![
                ice::candidate::CandidateType::Host,
                ice::candidate::CandidateType::ServerReflexive,
                ice::candidate::CandidateType::Relay,
            ]
        );
    }
}
