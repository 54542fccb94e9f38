//! Shared fixtures for the cross-crate integration tests

use arbor_channels::{ChannelManager, ChannelManagerConfig, Keychain};
use arbor_identity::{IdentityRegistry, LocalIdentity};
use arbor_security::{Arbor, AutoApprovalService, SecurityConfig};
use std::sync::Arc;
use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Install a test subscriber once; `RUST_LOG` filters as usual.
pub fn setup_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "warn".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A fully wired substrate for one test.
pub struct TestEnv {
    /// The shared identity registry
    pub registry: Arc<IdentityRegistry>,
    /// The authorization facade
    pub arbor: Arbor,
    /// The channel manager, sharing the registry
    pub channels: Arc<ChannelManager>,
}

impl TestEnv {
    /// Build an environment with the given config; approvals auto-accept.
    pub async fn with_config(config: SecurityConfig) -> Self {
        setup_test_logging();
        let registry = Arc::new(IdentityRegistry::new());
        let arbor = Arbor::new(
            config.clone(),
            registry.clone(),
            Some(Arc::new(AutoApprovalService)),
        )
        .await
        .expect("facade construction");
        let channels = Arc::new(ChannelManager::new(
            registry.clone(),
            arbor.audit().clone(),
            ChannelManagerConfig {
                rotate_on_leave: config.channel_rotate_on_leave,
            },
        ));
        Self {
            registry,
            arbor,
            channels,
        }
    }

    /// Default-config environment.
    pub async fn new() -> Self {
        Self::with_config(SecurityConfig::default()).await
    }

    /// Generate and register a fresh identity.
    pub async fn agent(&self) -> LocalIdentity {
        let local = LocalIdentity::generate(None);
        self.arbor
            .register_identity(local.identity.clone())
            .await
            .expect("identity registration");
        local
    }

    /// A keychain for a registered identity.
    pub fn keychain(&self, local: &LocalIdentity) -> Keychain {
        Keychain::new(local.agent_id().clone(), local.encryption.clone())
    }
}
