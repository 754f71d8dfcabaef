// src/lib.rs

pub mod config;
pub mod error;
pub mod grounding;
pub mod normalizer;
pub mod protocol;
pub mod session;
pub mod signer;
pub mod types;

pub use error::{Result, SparkError};
pub use session::{ChatSession, SessionHandle, SessionOutcome, SessionState};
pub use types::{ChatMessage, ChatParameters, DEFAULT_URL, Domain, Role, SessionCredentials};
