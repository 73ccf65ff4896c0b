mod clarification;
mod crisis;
mod router;
mod validity;

pub use clarification::{
    ClarificationConfig, ClarificationManager, CLOSING_FALLBACK, ELABORATION_PROBE,
    EMOTION_PROBE, GENERIC_PROBE,
};
pub use crisis::{CrisisGate, CRISIS_TEMPLATE, DEFAULT_CRISIS_PHRASES};
pub use router::{IntentRouter, RouteOutcome, RouterConfig};
pub use validity::{TurnInsufficiency, TurnValidator};
