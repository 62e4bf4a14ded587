//! Resilience layer: validation, retry, deadlines and circuit breaking.

pub mod breaker;
pub mod retry;
pub mod validation;
pub mod wrapper;

pub use breaker::{
    Admission, BreakerPermit, BreakerRegistry, BreakerSnapshot, CallOutcome, CircuitBreaker,
    CircuitState,
};
pub use retry::with_retry;
pub use validation::{MAX_PROMPT_CHARS, filter_parameters, validate_prompt, validate_ranges};
pub use wrapper::ResilientHandler;
