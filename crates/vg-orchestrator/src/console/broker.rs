//! Single-use console credentials
//!
//! A session is a credential, not a connection. Its token moves from
//! `issued` to either `consumed` or `expired` exactly once, by compare-and-swap,
//! and never back.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use vg_core::api_token::generate_token;
use vg_core::config::OrchestratorConfig;
use vg_core::model::{ConsoleAuth, ConsoleTicket};
use vg_core::time::Clock;
use vg_core::{ClusterId, ConsoleKind, ConsoleTarget, NodeName, VgError};

use crate::node::{with_deadline, NodePool};

/// Lifecycle of a console token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TokenState {
    Issued = 0,
    Consumed = 1,
    Expired = 2,
}

impl TokenState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => TokenState::Issued,
            1 => TokenState::Consumed,
            _ => TokenState::Expired,
        }
    }
}

/// What a client asks a console for
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleRequest {
    pub cluster_id: ClusterId,
    pub node_name: NodeName,
    #[serde(flatten)]
    pub target: ConsoleTarget,
    pub kind: ConsoleKind,
    /// Caller's own ticket, required for terminal consoles
    #[serde(default)]
    pub auth: Option<ConsoleAuth>,
}

/// An issued console credential
#[derive(Debug)]
pub struct ConsoleSession {
    pub id: String,
    token: String,
    pub cluster_id: ClusterId,
    pub node_name: NodeName,
    pub target: ConsoleTarget,
    pub kind: ConsoleKind,
    /// Console port the node opened for this session
    pub upstream: ConsoleTicket,
    pub issued_at: u64,
    pub expires_at: u64,
    state: AtomicU8,
    /// When the token was consumed or expired
    terminal_at: AtomicU64,
}

impl ConsoleSession {
    /// Current token state
    pub fn state(&self) -> TokenState {
        TokenState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, to: TokenState, now: u64) -> bool {
        let won = self
            .state
            .compare_exchange(
                TokenState::Issued as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            self.terminal_at.store(now, Ordering::Relaxed);
        }
        won
    }

    /// Spend the token
    ///
    /// Exactly one caller ever gets `Ok`. A token past its expiry is moved to
    /// `expired` here if the sweeper has not done so yet.
    pub fn try_consume(&self, now: u64) -> Result<(), VgError> {
        loop {
            match self.state() {
                TokenState::Consumed => {
                    return Err(VgError::TokenConsumed {
                        session_id: self.id.clone(),
                    })
                }
                TokenState::Expired => {
                    return Err(VgError::TokenExpired {
                        session_id: self.id.clone(),
                    })
                }
                TokenState::Issued if now > self.expires_at => {
                    self.transition(TokenState::Expired, now);
                    // Re-read: a consume may have won the race
                }
                TokenState::Issued => {
                    if self.transition(TokenState::Consumed, now) {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Expire the token if it is still issued and past its expiry
    pub fn try_expire(&self, now: u64) -> bool {
        now > self.expires_at && self.transition(TokenState::Expired, now)
    }

    fn terminal_since(&self) -> Option<u64> {
        match self.state() {
            TokenState::Issued => None,
            _ => Some(self.terminal_at.load(Ordering::Relaxed)),
        }
    }
}

/// What a client receives from `create_session`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleGrant {
    pub session_id: String,
    /// Tunnel address to dial
    pub endpoint: String,
    /// Single-use token to present in the tunnel handshake
    pub token: String,
    /// Unix millis after which the token is rejected
    pub expires_at: u64,
    pub target: ConsoleTarget,
    pub kind: ConsoleKind,
    /// Console ticket for the protocol spoken inside the tunnel
    pub ticket: String,
    pub cert: Option<String>,
    pub user: String,
    pub port: u16,
}

/// Result of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub expired: usize,
    pub pruned: usize,
}

/// Issues console credentials and redeems them for tunnels
pub struct ConsoleBroker {
    nodes: Arc<NodePool>,
    /// Sessions by token
    sessions: DashMap<String, Arc<ConsoleSession>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retention: Duration,
    control_timeout: Duration,
    endpoint: String,
}

impl ConsoleBroker {
    /// Create a broker handing out `endpoint` as the tunnel address
    pub fn new(nodes: Arc<NodePool>, config: &OrchestratorConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            nodes,
            sessions: DashMap::new(),
            clock,
            ttl: config.console_token_ttl,
            retention: config.console_retention,
            control_timeout: config.control_timeout,
            endpoint: config.tunnel_address().to_string(),
        }
    }

    /// Open a console on the node and issue a token for it
    pub async fn create_session(&self, request: ConsoleRequest) -> Result<ConsoleGrant, VgError> {
        let auth = match request.kind {
            ConsoleKind::Terminal => match &request.auth {
                Some(auth) if !auth.ticket.is_empty() && !auth.csrf_token.is_empty() => Some(auth),
                _ => {
                    return Err(VgError::Validation(
                        "terminal consoles need the caller's ticket and CSRF token".into(),
                    ))
                }
            },
            ConsoleKind::Shell => None,
        };
        let client = self.nodes.get(request.cluster_id, &request.node_name)?;
        let upstream = with_deadline(
            "open console",
            self.control_timeout,
            client.open_console(&request.target, request.kind, auth),
        )
        .await?;

        let issued_at = self.clock.now_millis();
        let session = Arc::new(ConsoleSession {
            id: Uuid::new_v4().to_string(),
            token: generate_token(),
            cluster_id: request.cluster_id,
            node_name: request.node_name,
            target: request.target,
            kind: request.kind,
            upstream,
            issued_at,
            expires_at: issued_at + self.ttl.as_millis() as u64,
            state: AtomicU8::new(TokenState::Issued as u8),
            terminal_at: AtomicU64::new(0),
        });
        self.sessions
            .insert(session.token.clone(), Arc::clone(&session));

        tracing::info!(
            session_id = %session.id,
            cluster = %session.cluster_id,
            node = %session.node_name,
            target = %session.target,
            kind = %session.kind,
            "Console session issued"
        );

        Ok(ConsoleGrant {
            session_id: session.id.clone(),
            endpoint: self.endpoint.clone(),
            token: session.token.clone(),
            expires_at: session.expires_at,
            target: session.target.clone(),
            kind: session.kind,
            ticket: session.upstream.ticket.clone(),
            cert: session.upstream.cert.clone(),
            user: session.upstream.user.clone(),
            port: session.upstream.port,
        })
    }

    /// Redeem a token for its session
    pub fn consume(&self, token: &str) -> Result<Arc<ConsoleSession>, VgError> {
        let session = self
            .sessions
            .get(token)
            .map(|s| Arc::clone(&s))
            .ok_or(VgError::UnknownToken)?;
        session.try_consume(self.clock.now_millis())?;
        tracing::info!(session_id = %session.id, node = %session.node_name, "Console token consumed");
        Ok(session)
    }

    /// Expire overdue tokens and forget sessions past the retention window
    pub fn sweep(&self) -> SweepStats {
        let now = self.clock.now_millis();
        let retention = self.retention.as_millis() as u64;
        let mut stats = SweepStats::default();

        for entry in self.sessions.iter() {
            if entry.try_expire(now) {
                stats.expired += 1;
            }
        }
        self.sessions.retain(|_, session| match session.terminal_since() {
            Some(at) if now.saturating_sub(at) > retention => {
                stats.pruned += 1;
                false
            }
            _ => true,
        });

        if stats.expired > 0 || stats.pruned > 0 {
            tracing::debug!(expired = stats.expired, pruned = stats.pruned, "Console sweep");
        }
        stats
    }

    /// Number of remembered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is remembered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::InMemoryNode;
    use vg_core::config::ClusterProfile;
    use vg_core::time::ManualClock;

    fn setup() -> (ConsoleBroker, Arc<ManualClock>) {
        let pool = Arc::new(NodePool::new());
        pool.add_cluster(ClusterProfile::in_memory(1, "lab", &["pve1"]));
        let node = Arc::new(InMemoryNode::new("pve1"));
        node.set_console_upstream("127.0.0.1:5900".parse().unwrap());
        pool.register(ClusterId(1), node);

        let clock = Arc::new(ManualClock::new(1_000_000));
        let broker = ConsoleBroker::new(pool, &OrchestratorConfig::default(), clock.clone());
        (broker, clock)
    }

    fn shell() -> ConsoleRequest {
        ConsoleRequest {
            cluster_id: ClusterId(1),
            node_name: NodeName::new("pve1"),
            target: ConsoleTarget::Node,
            kind: ConsoleKind::Shell,
            auth: None,
        }
    }

    #[tokio::test]
    async fn test_token_consumed_once() {
        let (broker, _) = setup();
        let grant = broker.create_session(shell()).await.unwrap();
        assert_eq!(grant.expires_at, 1_000_000 + 120_000);
        assert_eq!(grant.token.len(), 64);

        assert!(broker.consume(&grant.token).is_ok());
        assert!(matches!(
            broker.consume(&grant.token),
            Err(VgError::TokenConsumed { .. })
        ));
    }

    #[tokio::test]
    async fn test_token_expires() {
        let (broker, clock) = setup();
        let grant = broker.create_session(shell()).await.unwrap();

        clock.advance(Duration::from_secs(180));
        assert!(matches!(
            broker.consume(&grant.token),
            Err(VgError::TokenExpired { .. })
        ));
        // Still expired, never consumable
        assert!(matches!(
            broker.consume(&grant.token),
            Err(VgError::TokenExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_terminal_requires_caller_ticket() {
        let (broker, _) = setup();
        let mut request = shell();
        request.kind = ConsoleKind::Terminal;
        assert!(matches!(
            broker.create_session(request.clone()).await,
            Err(VgError::Validation(_))
        ));

        request.auth = Some(ConsoleAuth {
            ticket: "PVE:root@pam:ABC".into(),
            csrf_token: "csrf".into(),
        });
        assert!(broker.create_session(request).await.is_ok());
    }

    #[tokio::test]
    async fn test_sweep_expires_then_prunes() {
        let (broker, clock) = setup();
        let grant = broker.create_session(shell()).await.unwrap();

        clock.advance(Duration::from_secs(121));
        assert_eq!(broker.sweep(), SweepStats { expired: 1, pruned: 0 });
        assert!(matches!(
            broker.consume(&grant.token),
            Err(VgError::TokenExpired { .. })
        ));

        clock.advance(Duration::from_secs(601));
        assert_eq!(broker.sweep(), SweepStats { expired: 0, pruned: 1 });
        assert!(matches!(broker.consume(&grant.token), Err(VgError::UnknownToken)));
    }

    #[tokio::test]
    async fn test_racing_consumers_single_winner() {
        let (broker, _) = setup();
        let grant = broker.create_session(shell()).await.unwrap();
        let broker = Arc::new(broker);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let broker = Arc::clone(&broker);
                let token = grant.token.clone();
                tokio::spawn(async move { broker.consume(&token).is_ok() })
            })
            .collect();
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
