// Daily partner settlement
pub mod aggregator;
pub mod models;
pub mod notifier;
pub mod repository;
pub mod scheduler;
pub mod writer;

pub use models::RunOutcome;
pub use notifier::{FailureNotifier, FanoutNotifier, LoggingNotifier, SettlementFailureLog, WebhookNotifier};
pub use repository::SettlementRepository;
pub use scheduler::SettlementScheduler;
pub use writer::SettlementWriter;
