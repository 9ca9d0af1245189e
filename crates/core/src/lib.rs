pub mod config;
pub mod error;
pub mod message;
pub mod module;
pub mod paths;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use message::{AgentReply, AgentRequest, Location, ReplyStatus};
pub use module::{
    ComplexityTier, DeclaredTool, ModuleKind, ModuleManifest, ModuleStatus, ParamSpec, ParamType,
    ToolDefinition,
};
pub use paths::{escape_key, Paths};
