//! Turn pipeline for the support assistant.
//!
//! One turn: restore the user's state, short-circuit on crisis language,
//! fetch recent history, classify, route, dispatch to a handler, then log
//! the turn and persist the state. Turns for one user run one at a time.

pub mod adapters;
pub mod config;
pub mod external;
pub mod guidance;
pub mod session;

pub use adapters::{KeywordEmotionClassifier, NoopSelfCareSearch, TemplateContentGenerator};
pub use config::{CalmConfig, ConfigError, RuntimeConfig};
pub use external::ExternalCalls;
pub use session::{restore_snapshot, RestoredSession, SessionRegistry};

use calm_booking::{BookingFlow, STAGE_RESET_MESSAGE};
use calm_core::{
    AcknowledgeRequest, AdapterError, AdapterFailureKind, AppointmentStage, ContentGenerator,
    ContractError, ConversationState, EmotionClassifier, EmotionReading, NextAction, PortError,
    ResetResponse, RouteDecision, RouteReason, SelfCareRequest, SelfCareSearch,
    SessionRepository, TherapistDirectory, TurnMemory, TurnRecord, TurnRequest, TurnResponse,
    UserKey,
};
use calm_routing::{ClarificationManager, IntentRouter, RouteOutcome, CRISIS_TEMPLATE};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("turn memory error: {0}")]
    Memory(#[from] PortError),
}

/// Everything the pipeline talks to outside its own process state.
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn EmotionClassifier>,
    pub generator: Arc<dyn ContentGenerator>,
    pub search: Arc<dyn SelfCareSearch>,
    pub memory: Arc<dyn TurnMemory>,
    pub directory: Arc<dyn TherapistDirectory>,
    pub sessions: Option<Arc<dyn SessionRepository>>,
}

impl Collaborators {
    /// Keyword classifier, template replies and no article search.
    pub fn deterministic(memory: Arc<dyn TurnMemory>, directory: Arc<dyn TherapistDirectory>) -> Self {
        Self {
            classifier: Arc::new(KeywordEmotionClassifier),
            generator: Arc::new(TemplateContentGenerator),
            search: Arc::new(NoopSelfCareSearch),
            memory,
            directory,
            sessions: None,
        }
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionRepository>) -> Self {
        self.sessions = Some(sessions);
        self
    }
}

pub struct ConversationOrchestrator {
    config: CalmConfig,
    router: IntentRouter,
    clarification: ClarificationManager,
    booking: BookingFlow,
    external: ExternalCalls,
    collaborators: Collaborators,
    registry: SessionRegistry,
}

impl ConversationOrchestrator {
    pub fn new(config: CalmConfig, collaborators: Collaborators) -> Self {
        let registry = SessionRegistry::with_capacity(config.runtime.session_cache_limit);
        let router = IntentRouter::new(&config.router);
        let clarification = ClarificationManager::new(config.clarification);
        let booking = BookingFlow::new(config.booking.clone(), collaborators.directory.clone());
        let external = ExternalCalls::new(config.runtime.external_timeout());
        Self {
            config,
            router,
            clarification,
            booking,
            external,
            collaborators,
            registry,
        }
    }

    pub fn config(&self) -> &CalmConfig {
        &self.config
    }

    /// Users currently holding a slot in the in-process cache.
    pub fn cached_sessions(&self) -> usize {
        self.registry.len()
    }

    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResponse, OrchestratorError> {
        self.process_turn_at(request, Utc::now()).await
    }

    pub async fn process_turn_at(
        &self,
        request: TurnRequest,
        now: DateTime<Utc>,
    ) -> Result<TurnResponse, OrchestratorError> {
        let user_id = self.resolve_user_id(request.user_id.as_deref());
        let user = UserKey::parse(&user_id)?;
        let slot = self.registry.slot(&user);
        let mut cached = slot.lock().await;

        let (state, stage_reset) = match cached.take() {
            Some(state) => (state, None),
            None => self.load_state(&user, &user_id),
        };
        let (state, drifted) = self.reconcile(state);
        let stage_reset = stage_reset.or(drifted);

        let state = state.begin_turn(&request.user_input, self.config.runtime.raw_history_limit);
        let (decision, mut state) = match self.router.route_crisis(state.clone(), now) {
            Some((outcome, state)) => (outcome.decision, self.crisis(state)),
            None => self.route_and_dispatch(state, &user, now).await,
        };

        if stage_reset.is_some() && decision != RouteDecision::Crisis {
            state.agent_output = format!("{STAGE_RESET_MESSAGE}\n\n{}", state.agent_output);
        }
        state.bound_trace(self.config.runtime.raw_history_limit);

        let user_input = state.consume_input().unwrap_or_default();
        let response = TurnResponse::from_state(&state);
        let record = TurnRecord {
            timestamp: now,
            user_input,
            agent_output: state.agent_output.clone(),
            emotion: state.detected_emotion.clone(),
            details: state.emotion_details.clone(),
            suggestion: state.suggestion.clone(),
        };
        if let Err(err) = self.collaborators.memory.append(&user, &record) {
            error!(event = "memory_append_failed", user = %user, error = %err);
        }
        self.save_state(&user, &state);

        info!(
            event = "turn_processed",
            user = %user,
            turn = state.turn_index,
            decision = decision.as_str(),
            stage = state.appointment_stage.as_str(),
            next_action = state.next_action.as_str(),
        );
        *cached = Some(state);
        Ok(response)
    }

    /// Clears the user's turn log, snapshot and cached state.
    pub async fn reset_memory(&self, user_id: &str) -> Result<ResetResponse, OrchestratorError> {
        let user = UserKey::parse(user_id)?;
        let slot = self.registry.slot(&user);
        let mut cached = slot.lock().await;

        let existed = self.collaborators.memory.clear(&user)?;
        if let Some(sessions) = &self.collaborators.sessions {
            if let Err(err) = sessions.delete_session(&user) {
                warn!(event = "session_delete_failed", user = %user, error = %err);
            }
        }
        *cached = None;
        drop(cached);
        self.registry.forget(&user, &slot);
        info!(event = "memory_reset", user = %user, existed);
        Ok(ResetResponse { success: true })
    }

    /// Current state for a user, from cache or snapshot, without running a turn.
    pub async fn session_state(
        &self,
        user_id: &str,
    ) -> Result<Option<ConversationState>, OrchestratorError> {
        let user = UserKey::parse(user_id)?;
        let slot = self.registry.slot(&user);
        let cached = slot.lock().await;
        if let Some(state) = cached.as_ref() {
            return Ok(Some(state.clone()));
        }
        let Some(sessions) = &self.collaborators.sessions else {
            return Ok(None);
        };
        match sessions.load_session(&user)? {
            Some(json) => Ok(restore_snapshot(&json).ok().map(|restored| restored.state)),
            None => Ok(None),
        }
    }

    fn resolve_user_id(&self, requested: Option<&str>) -> String {
        requested
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.config.runtime.default_user_id)
            .to_string()
    }

    fn load_state(&self, user: &UserKey, user_id: &str) -> (ConversationState, Option<String>) {
        let fresh = || ConversationState::new(user_id);
        let Some(sessions) = &self.collaborators.sessions else {
            return (fresh(), None);
        };
        let json = match sessions.load_session(user) {
            Ok(Some(json)) => json,
            Ok(None) => return (fresh(), None),
            Err(err) => {
                warn!(event = "session_load_failed", user = %user, error = %err);
                return (fresh(), None);
            }
        };
        match restore_snapshot(&json) {
            Ok(restored) => {
                if let Some(stage) = &restored.stage_reset {
                    warn!(event = "unknown_stage", user = %user, stage = %stage);
                }
                (restored.state, restored.stage_reset)
            }
            Err(err) => {
                warn!(event = "session_snapshot_corrupt", user = %user, error = %err);
                (fresh(), None)
            }
        }
    }

    /// A mid-flow stage with no booking question outstanding cannot be
    /// resumed; drop it back to `Initial`.
    fn reconcile(&self, state: ConversationState) -> (ConversationState, Option<String>) {
        let stage = state.appointment_stage;
        if stage.is_terminal() || state.awaiting_booking_reply() {
            return (state, None);
        }
        warn!(
            event = "unknown_stage",
            stage = stage.as_str(),
            next_action = state.next_action.as_str(),
        );
        let state = self.booking.abandon(state).with_action(NextAction::Continue);
        (state, Some(stage.as_str().to_string()))
    }

    async fn route_and_dispatch(
        &self,
        state: ConversationState,
        user: &UserKey,
        now: DateTime<Utc>,
    ) -> (RouteDecision, ConversationState) {
        let history = match self
            .collaborators
            .memory
            .fetch(user, self.config.runtime.history_window)
        {
            Ok(history) => history,
            Err(err) => {
                warn!(event = "memory_fetch_degraded", user = %user, error = %err);
                Vec::new()
            }
        };

        let state = if self.should_classify(&state) {
            let reading = self.classify(state.input(), history).await;
            state.adopt_emotion(&reading, self.config.runtime.confidence_floor)
        } else {
            state
        };

        let (outcome, state) = self.router.route(state, now);
        let state = self.dispatch(&outcome, state, user, now).await;
        (outcome.decision, state)
    }

    fn should_classify(&self, state: &ConversationState) -> bool {
        !state.awaiting_booking_reply()
            && state.input().trim().chars().count() >= self.config.router.min_input_chars
    }

    async fn classify(&self, input: &str, history: Vec<TurnRecord>) -> EmotionReading {
        let classifier = self.collaborators.classifier.clone();
        let text = input.to_string();
        let fallback_text = text.clone();
        let fallback_history = history.clone();
        self.external
            .guarded(
                "emotion_classifier",
                move || {
                    let reading = classifier.classify(&text, &history)?;
                    if !reading.confidence.is_finite() || !(0.0..=1.0).contains(&reading.confidence) {
                        return Err(AdapterError::new(
                            AdapterFailureKind::InvalidOutput,
                            format!("confidence {} outside [0, 1]", reading.confidence),
                        ));
                    }
                    Ok(reading)
                },
                move || KeywordEmotionClassifier.read(&fallback_text, &fallback_history),
            )
            .await
    }

    async fn dispatch(
        &self,
        outcome: &RouteOutcome,
        state: ConversationState,
        user: &UserKey,
        now: DateTime<Utc>,
    ) -> ConversationState {
        match outcome.decision {
            RouteDecision::WaitForInput => match outcome.insufficiency {
                Some(insufficiency) => self.clarification.handle(state, insufficiency),
                None => state.with_action(NextAction::Continue),
            },
            RouteDecision::Crisis => self.crisis(state),
            // Directory slot times are compared as UTC wall-clock times.
            RouteDecision::ContinueBooking => self.booking.advance(state, user, now.naive_utc()),
            RouteDecision::Appointment => {
                let explicit = outcome.reason == RouteReason::ExplicitRequest;
                let state = self.booking.start(state, explicit);
                if state.appointment_stage == AppointmentStage::OfferPending
                    && state.awaiting_booking_reply()
                {
                    let ack = self
                        .acknowledge(RouteDecision::Appointment, &state)
                        .await;
                    let output = format!("{ack}\n\n{}", state.agent_output);
                    state.with_output(output)
                } else {
                    debug!(event = "appointment_not_offered", turn = state.turn_index);
                    self.self_care(state).await
                }
            }
            RouteDecision::SelfCare => self.self_care(state).await,
        }
    }

    fn crisis(&self, state: ConversationState) -> ConversationState {
        let mut state = self.booking.abandon(state);
        state.clarification_count = 0;
        state.crisis_response = Some(CRISIS_TEMPLATE.to_string());
        state
            .with_action(NextAction::Crisis)
            .with_output(CRISIS_TEMPLATE)
    }

    async fn acknowledge(&self, decision: RouteDecision, state: &ConversationState) -> String {
        let generator = self.collaborators.generator.clone();
        let request = AcknowledgeRequest {
            decision,
            emotion: state.primary_emotion(),
            user_input: state.input().to_string(),
        };
        let fallback_emotion = request.emotion.clone();
        self.external
            .guarded(
                "acknowledge",
                move || generator.acknowledge(&request),
                move || TemplateContentGenerator.acknowledgement(decision, fallback_emotion.as_deref()),
            )
            .await
    }

    async fn self_care(&self, state: ConversationState) -> ConversationState {
        let emotion = state
            .primary_emotion()
            .unwrap_or_else(|| "other".to_string());

        let search = self.collaborators.search.clone();
        let query = emotion.clone();
        let articles = self
            .external
            .guarded("self_care_search", move || search.search(&query), Vec::new)
            .await;

        let request = SelfCareRequest {
            emotion: emotion.clone(),
            user_input: state.input().to_string(),
            articles,
        };
        let generator = self.collaborators.generator.clone();
        let fallback = request.clone();
        let suggestion = self
            .external
            .guarded(
                "self_care_generator",
                move || generator.self_care(&request),
                move || TemplateContentGenerator.suggestion(&fallback),
            )
            .await;

        let ack = self.acknowledge(RouteDecision::SelfCare, &state).await;
        let mut state = state
            .with_action(NextAction::Continue)
            .with_output(format!("{ack}\n\n{suggestion}"));
        state.suggestion = Some(suggestion);
        state.tailored_prompt = Some(guidance::tailored_prompt(&emotion).to_string());
        state.forecast = Some(guidance::forecast(&emotion).to_string());
        state
    }

    fn save_state(&self, user: &UserKey, state: &ConversationState) {
        let Some(sessions) = &self.collaborators.sessions else {
            return;
        };
        let json = match serde_json::to_string(state) {
            Ok(json) => json,
            Err(err) => {
                warn!(event = "session_serialize_failed", user = %user, error = %err);
                return;
            }
        };
        if let Err(err) = sessions.save_session(user, &json) {
            warn!(event = "session_save_failed", user = %user, error = %err);
        }
    }
}
