pub mod event;
pub mod processor;

pub use event::{HookEnvelope, HookEvent, HookParseError, WebhookKind};
pub use processor::HookEventProcessor;
