// Module declarations
pub mod event;
pub mod flag;
pub mod message;
pub mod monitor;
pub mod score;

// Re-exports
pub use event::{EventKind, EventStatus, WalletEvent};
pub use flag::{FlagOutcome, WalletFlag};
pub use message::{
    ErrorData, HeartbeatData, MessageType, ScoreUpdateData, SubscribeAck, SubscribeRequest,
    TransactionAlertData, UnsubscribeAck, WalletFlaggedData, WsEnvelope, PROTOCOL_VERSION,
};
pub use monitor::{IngestionConfig, WalletMonitor};
pub use score::{FeatureVector, RiskLevel, ScoringResult};
