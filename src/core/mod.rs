//! 核心层：错误类型与智能体编排

pub mod error;
pub mod orchestrator;

pub use error::{ClientError, StoreError, TimeoutKind};
pub use orchestrator::{AgentOrchestrator, RunOptions, RunOutcome};
