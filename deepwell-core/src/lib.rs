//! # Deepwell Core
//!
//! Resilient text-generation invocation across OpenAI, Anthropic and Google
//! models, plus a four-phase deep research pipeline built on top of it.
//! Provides the model capability registry, provider handlers, the
//! resilience layer (validation, retry, deadlines, circuit breaking), the
//! invocation factory, configuration and credentials.

pub mod config;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod providers;
pub mod redact;
pub mod registry;
pub mod research;
pub mod resilience;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{DeepwellConfig, ResearchConfig, RetryConfig, load_config};
pub use credentials::{ApiKey, Credentials};
pub use error::{DeepwellError, ErrorKind, LlmError, ResearchError, Result};
pub use factory::InvocationFactory;
pub use providers::{HandlerKey, MockHandler, ProviderHandler, RawResponse};
pub use registry::{HandlerFamily, ModelCapabilitySpec, ModelRegistry, ProviderFamily};
pub use research::{
    DepthTier, NoOpProgressCallback, ProgressCallback, ProgressUpdate, ResearchOrchestrator,
    ResearchReport, ResearchRequest,
};
pub use types::{
    Attachment, GroundingSource, InvocationRequest, InvocationResponse, Parameter, Prompt,
    ReasoningEffort, TokenUsage, Verbosity,
};
