pub mod context;
pub mod engine;
pub mod kernel;
pub mod triage;

pub use context::ContextBuilder;
pub use engine::{SessionOutcome, ToolExecutionEngine};
pub use kernel::{AgentKernel, ArchivedConversation};
pub use triage::{Triage, TriageRouter};
