//! External LLM engines: subprocess adapters, prompt classification, and
//! the primary ⇄ consultant consensus dialogue.

pub mod adapter;
pub mod classifier;
pub mod consultant;
pub mod dialogue;
pub mod events;
pub mod head;
pub mod profile;

pub use adapter::{CallOptions, EngineAdapter, EngineStream};
pub use classifier::{classify, PromptClass};
pub use consultant::Consultant;
pub use dialogue::{DialogueLoop, DialogueResult, LiveInputSource, NoLiveInput};
pub use events::EngineEvent;
pub use head::{HeadResponse, PlanOutcome, PrimaryHead, ResponseSource};
pub use profile::{EngineKind, EngineProfile};
