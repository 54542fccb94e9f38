//! Error types for arbor-channels

use arbor_identity::AgentId;

/// Result type for channel operations
pub type Result<T> = std::result::Result<T, ChannelError>;

/// Channel and ratchet errors
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// No channel under this id
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// The agent is not a member of the channel
    #[error("{agent_id} is not a member of channel {channel_id}")]
    NotAMember {
        /// Agent that attempted the operation
        agent_id: AgentId,
        /// Channel involved
        channel_id: String,
    },

    /// Only the channel creator may perform this operation
    #[error("{0} is not the channel creator")]
    NotCreator(AgentId),

    /// A creator tried to revoke their own membership
    #[error("cannot revoke self; use leave")]
    CannotRevokeSelf,

    /// Envelope or invitation key version differs from the local one
    #[error("key version mismatch on channel {channel_id}: local {local}, envelope {envelope}")]
    KeyVersionMismatch {
        /// Channel involved
        channel_id: String,
        /// Version held locally
        local: u64,
        /// Version carried by the envelope or invitation
        envelope: u64,
    },

    /// The keychain holds no key for this channel
    #[error("no channel key for {0} in keychain")]
    NoChannelKey(String),

    /// Decrypting before the session has a receiving chain, or sending
    /// before it has a sending chain
    #[error("ratchet session not ready for this direction")]
    SessionNotReady,

    /// The gap to the message counter exceeds the skipped-key bound
    #[error("skipped-message window exceeded (max_skip {max_skip})")]
    MaxSkipExceeded {
        /// The configured bound
        max_skip: u32,
    },

    /// Serialized session state did not decode
    #[error("malformed session state: {0}")]
    MalformedSessionState(String),

    /// No scheduled rotation exists for the channel
    #[error("no scheduled rotation for channel {0}")]
    NoScheduledRotation(String),

    /// Identity registry failure (member lookup, gating)
    #[error(transparent)]
    Identity(#[from] arbor_identity::IdentityError),

    /// Underlying cryptographic failure; decryption failures always
    /// collapse to this single shape
    #[error(transparent)]
    Crypto(#[from] arbor_crypto::CryptoError),
}
