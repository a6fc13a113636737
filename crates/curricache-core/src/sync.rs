//! Bridge to the background synchronization agent.
//!
//! Outbound, every cache invalidation is announced with a `CACHE_INVALIDATE`
//! message so other sessions can drop their copies. Inbound,
//! `SYNC_CURRICULUM_DATA` tells this session to throw away everything.
//!
//! The agent is optional. Without one every send is a no-op, and send
//! failures are logged and swallowed: cross-session sync is an optimization.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::CacheKind;
use crate::error::SyncError;
use crate::CurriculumCache;

/// Background sync tag registered when connectivity returns.
pub const BACKGROUND_SYNC_TAG: &str = "curriculum-sync";

/// Cache key announced for hard invalidations.
pub const ALL_CACHES_KEY: &str = "all";

/// Messages exchanged with the sync agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    CacheInvalidate {
        #[serde(rename = "cacheKey")]
        cache_key: String,
        #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
    SyncCurriculumData,
}

/// What a `CACHE_INVALIDATE` cache key refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationScope {
    All,
    Key { kind: CacheKind, key: String },
}

impl InvalidationScope {
    /// Wire form: `"all"` or `"<namespace>:<key>"`.
    pub fn cache_key(&self) -> String {
        match self {
            InvalidationScope::All => ALL_CACHES_KEY.to_string(),
            InvalidationScope::Key { kind, key } => format!("{}:{}", kind, key),
        }
    }

    pub fn parse(cache_key: &str) -> Option<Self> {
        if cache_key == ALL_CACHES_KEY {
            return Some(InvalidationScope::All);
        }
        let (kind, key) = cache_key.split_once(':')?;
        Some(InvalidationScope::Key {
            kind: CacheKind::parse(kind)?,
            key: key.to_string(),
        })
    }
}

/// A background synchronization agent reachable from this session.
pub trait SyncAgent: Send + Sync {
    /// Fire-and-forget delivery of a message.
    fn post_message(&self, message: SyncMessage) -> Result<(), SyncError>;

    /// Ask the agent to run a background sync under `tag`.
    fn register_sync(&self, tag: &str) -> Result<(), SyncError>;
}

/// Outbound side of the sync protocol, shared by the cache and the
/// connectivity monitor.
#[derive(Clone, Default)]
pub struct SyncBridge {
    agent: Option<Arc<dyn SyncAgent>>,
}

impl SyncBridge {
    pub fn new(agent: Arc<dyn SyncAgent>) -> Self {
        Self { agent: Some(agent) }
    }

    /// A bridge with no agent behind it.
    pub fn detached() -> Self {
        Self { agent: None }
    }

    pub fn is_attached(&self) -> bool {
        self.agent.is_some()
    }

    pub fn notify_invalidation(&self, scope: &InvalidationScope, user_id: Option<&str>) {
        let Some(ref agent) = self.agent else {
            return;
        };
        let message = SyncMessage::CacheInvalidate {
            cache_key: scope.cache_key(),
            user_id: user_id.map(str::to_string),
        };
        debug!(?message, "Posting invalidation to sync agent");
        if let Err(e) = agent.post_message(message) {
            warn!(error = %e, "Failed to notify sync agent of invalidation");
        }
    }

    /// Best-effort request for a background resync.
    pub fn request_background_sync(&self) {
        let Some(ref agent) = self.agent else {
            debug!("No sync agent, skipping background sync registration");
            return;
        };
        match agent.register_sync(BACKGROUND_SYNC_TAG) {
            Ok(()) => info!(tag = BACKGROUND_SYNC_TAG, "Background sync registered"),
            Err(e) => warn!(error = %e, "Background sync registration failed"),
        }
    }
}

// ============================================================================
// In-process agent
// ============================================================================

/// Sync agent backed by a tokio channel, for hosts that run the agent as a
/// task in the same process.
///
/// With [`with_resync`](Self::with_resync), a registered background sync is
/// answered by sending `SYNC_CURRICULUM_DATA` back to this session.
pub struct ChannelSyncAgent {
    tx: mpsc::UnboundedSender<SyncMessage>,
    resync: Option<mpsc::UnboundedSender<SyncMessage>>,
    registered: Mutex<Vec<String>>,
}

impl ChannelSyncAgent {
    /// Returns the agent and the receiving end of its outbound messages.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let agent = Self {
            tx,
            resync: None,
            registered: Mutex::new(Vec::new()),
        };
        (agent, rx)
    }

    /// Deliver `SYNC_CURRICULUM_DATA` on `inbound` whenever a background
    /// sync is registered.
    pub fn with_resync(mut self, inbound: mpsc::UnboundedSender<SyncMessage>) -> Self {
        self.resync = Some(inbound);
        self
    }

    pub fn registered_tags(&self) -> Vec<String> {
        self.registered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SyncAgent for ChannelSyncAgent {
    fn post_message(&self, message: SyncMessage) -> Result<(), SyncError> {
        self.tx.send(message).map_err(|_| SyncError::Disconnected)
    }

    fn register_sync(&self, tag: &str) -> Result<(), SyncError> {
        if self.tx.is_closed() {
            return Err(SyncError::Disconnected);
        }
        {
            let mut registered = self.registered.lock().unwrap_or_else(PoisonError::into_inner);
            if !registered.iter().any(|t| t == tag) {
                registered.push(tag.to_string());
            }
        }
        if let Some(ref inbound) = self.resync {
            inbound
                .send(SyncMessage::SyncCurriculumData)
                .map_err(|_| SyncError::Disconnected)?;
        }
        Ok(())
    }
}

/// Consume inbound agent messages until the sender side closes.
pub fn spawn_sync_listener(
    cache: Arc<CurriculumCache>,
    mut inbound: mpsc::UnboundedReceiver<SyncMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = inbound.recv().await {
            cache.handle_sync_message(message);
        }
        debug!("Sync listener stopped - agent channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenAgent;

    impl SyncAgent for BrokenAgent {
        fn post_message(&self, _message: SyncMessage) -> Result<(), SyncError> {
            Err(SyncError::Rejected("quota".to_string()))
        }

        fn register_sync(&self, _tag: &str) -> Result<(), SyncError> {
            Err(SyncError::Disconnected)
        }
    }

    #[test]
    fn test_invalidate_wire_format() {
        let msg = SyncMessage::CacheInvalidate {
            cache_key: "userCurricula:user1".to_string(),
            user_id: Some("user1".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({
                "type": "CACHE_INVALIDATE",
                "cacheKey": "userCurricula:user1",
                "userId": "user1"
            })
        );

        let all = SyncMessage::CacheInvalidate {
            cache_key: "all".to_string(),
            user_id: None,
        };
        assert_eq!(
            serde_json::to_string(&all).unwrap(),
            r#"{"type":"CACHE_INVALIDATE","cacheKey":"all"}"#
        );
    }

    #[test]
    fn test_inbound_sync_message_parses() {
        let msg: SyncMessage = serde_json::from_str(r#"{"type":"SYNC_CURRICULUM_DATA"}"#).unwrap();
        assert_eq!(msg, SyncMessage::SyncCurriculumData);
    }

    #[test]
    fn test_scope_round_trip() {
        let scope = InvalidationScope::Key {
            kind: CacheKind::IndividualCurriculum,
            key: "abc:def".to_string(),
        };
        assert_eq!(scope.cache_key(), "individualCurriculum:abc:def");
        assert_eq!(InvalidationScope::parse(&scope.cache_key()), Some(scope));
        assert_eq!(InvalidationScope::parse("all"), Some(InvalidationScope::All));
        assert_eq!(InvalidationScope::parse("bogus:1"), None);
        assert_eq!(InvalidationScope::parse("nocolon"), None);
    }

    #[test]
    fn test_detached_bridge_is_silent() {
        let bridge = SyncBridge::detached();
        assert!(!bridge.is_attached());
        bridge.notify_invalidation(&InvalidationScope::All, None);
        bridge.request_background_sync();
    }

    #[test]
    fn test_agent_failures_are_swallowed() {
        let bridge = SyncBridge::new(Arc::new(BrokenAgent));
        bridge.notify_invalidation(&InvalidationScope::All, Some("user1"));
        bridge.request_background_sync();
    }

    #[test]
    fn test_channel_agent_delivers_and_registers() {
        let (agent, mut rx) = ChannelSyncAgent::new();
        let agent = Arc::new(agent);
        let bridge = SyncBridge::new(agent.clone());

        bridge.notify_invalidation(
            &InvalidationScope::Key {
                kind: CacheKind::Dashboard,
                key: "user1".to_string(),
            },
            Some("user1"),
        );
        bridge.request_background_sync();
        bridge.request_background_sync();

        assert_eq!(
            rx.try_recv().unwrap(),
            SyncMessage::CacheInvalidate {
                cache_key: "dashboard:user1".to_string(),
                user_id: Some("user1".to_string()),
            }
        );
        assert_eq!(agent.registered_tags(), vec![BACKGROUND_SYNC_TAG.to_string()]);
    }

    #[test]
    fn test_channel_agent_resync_answers_registration() {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
        let (agent, _rx) = ChannelSyncAgent::new();
        let agent = agent.with_resync(inbound_tx);

        agent.register_sync(BACKGROUND_SYNC_TAG).unwrap();
        assert_eq!(inbound_rx.try_recv().unwrap(), SyncMessage::SyncCurriculumData);

        drop(inbound_rx);
        assert!(matches!(
            agent.register_sync(BACKGROUND_SYNC_TAG),
            Err(SyncError::Disconnected)
        ));
    }

    #[test]
    fn test_channel_agent_reports_disconnect() {
        let (agent, rx) = ChannelSyncAgent::new();
        drop(rx);
        assert!(matches!(
            agent.post_message(SyncMessage::SyncCurriculumData),
            Err(SyncError::Disconnected)
        ));
        assert!(agent.register_sync(BACKGROUND_SYNC_TAG).is_err());
    }
}
