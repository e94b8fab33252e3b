//! Action engine for Autopilot.
//!
//! Turns a fired automation rule into a side effect, gated by the rule's
//! autonomy level and a per-tenant rate limit. Executed actions stay
//! reversible for a configurable window, queued actions wait for a human,
//! and every decision lands in an append-only audit log.

pub mod approval;
pub mod audit;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod policy;
pub mod rate_limit;
pub mod record;
pub mod types;
pub mod undo;

mod guard;

pub use approval::ApprovalQueue;
pub use audit::AuditLog;
pub use error::{ExecutorError, HandlerError, RetryRefusal, TransitionError, UndoRefusal};
pub use handler::{ActionHandler, HandlerRegistry, LoggingHandler, UndoHandler};
pub use orchestrator::Executor;
pub use policy::AutonomyPolicy;
pub use rate_limit::{RateLimiter, RatePermit};
pub use types::{ActionOutcome, RetryOutcome, UndoOutcome};
pub use undo::UndoRegistry;
