//! Conversation orchestrator
//!
//! Sequences the assistant one turn at a time:
//! capture -> transcript -> gateway -> speech output -> idle.
//!
//! Handle commands, recognizer callbacks, gateway events and speech
//! completions all land on the orchestrator thread, which is the only
//! writer of [`SharedAppState`]. Gateway events and speech completions
//! carry the id of the turn they belong to, and recognizer callbacks the id
//! of their capture session; anything from a turn or session that is no
//! longer current is dropped.

use crate::integration::config::AssistantConfig;
use crate::llm::{GatewayCommand, GatewayConfig, GatewayEvent, GatewayWorker, StreamingGateway};
use crate::speech::{
    CaptureEvent, CaptureSink, ConsoleSpeaker, SpeechCapture, SpeechCompletion, SpeechOutput,
    TypedCapture,
};
use crate::state::{AppCommand, AppEvent, AppStateSnapshot, ConversationState, SharedAppState};
use crate::{MurmurError, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything the conversation state machine reacts to
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Command(AppCommand),
    Capture { session: Uuid, event: CaptureEvent },
    Gateway(GatewayEvent),
    SpeechFinished { turn: Uuid },
}

/// The turn whose reply is currently streaming
#[derive(Debug, Clone, Copy)]
struct ActiveTurn {
    turn: Uuid,
    message_id: Uuid,
}

/// Conversation state machine, driven synchronously by the orchestrator loop
struct Conversation {
    state: SharedAppState,
    capture: Arc<dyn SpeechCapture>,
    output: Arc<dyn SpeechOutput>,
    gateway_tx: Sender<GatewayCommand>,
    inbox_tx: Sender<ConversationEvent>,
    event_tx: Sender<AppEvent>,
    error_display: Duration,
    active_turn: Option<ActiveTurn>,
    speaking_turn: Option<Uuid>,
    capture_session: Option<Uuid>,
    error_deadline: Option<Instant>,
}

impl Conversation {
    fn handle(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::Command(command) => self.handle_command(command),
            ConversationEvent::Capture { session, event } => self.handle_capture(session, event),
            ConversationEvent::Gateway(event) => self.handle_gateway(event),
            ConversationEvent::SpeechFinished { turn } => self.speech_finished(turn),
        }
    }

    fn handle_command(&mut self, command: AppCommand) {
        match command {
            AppCommand::StartListening => self.start_listening(),
            AppCommand::StopListening => self.stop_listening(),
            AppCommand::SubmitText(text) => self.submit(&text),
            AppCommand::ClearError => self.clear_error(),
            AppCommand::Shutdown => self.begin_shutdown(),
        }
    }

    /// Expire the advisory error once its display time is over
    fn tick(&mut self, now: Instant) {
        if self.error_deadline.is_some_and(|deadline| now >= deadline) {
            debug!("Error display time elapsed");
            self.clear_error();
        }
    }

    // === Listening ===

    fn start_listening(&mut self) {
        let current = self.state.conversation_state();
        if current == ConversationState::Listening || self.state.is_listening() {
            debug!("Already listening");
            return;
        }
        match current {
            ConversationState::Idle => {}
            ConversationState::Speaking => self.interrupt_speech(),
            ConversationState::ProcessingSpeech => {
                info!("Abandoning unfinished recognition for a new session");
                self.end_capture_session();
            }
            busy => {
                warn!("Cannot start listening while {}", busy);
                return;
            }
        }

        let session = Uuid::new_v4();
        self.capture_session = Some(session);
        self.set_listening(true);
        self.set_state(ConversationState::Listening);

        if let Err(e) = self.capture.start_listening(self.capture_sink(session)) {
            error!("Failed to start speech capture: {}", e);
            self.capture_session = None;
            self.set_listening(false);
            self.set_state(ConversationState::Idle);
            self.set_error(format!("Failed to start listening: {}", e));
        }
    }

    fn stop_listening(&mut self) {
        let current = self.state.conversation_state();
        if !self.state.is_listening() && !current.is_capturing() {
            debug!("Not listening, nothing to stop");
            return;
        }

        self.end_capture_session();
        self.set_listening(false);
        if current.is_capturing() {
            self.set_state(ConversationState::Idle);
        }
    }

    /// Cancel the adapter's active session, if any
    fn end_capture_session(&mut self) {
        if let Some(session) = self.capture_session.take() {
            debug!("Ending capture session {}", session);
            self.capture.stop_listening();
        }
    }

    fn handle_capture(&mut self, session: Uuid, event: CaptureEvent) {
        if self.capture_session != Some(session) {
            debug!("Dropping {:?} from stale capture session {}", event, session);
            return;
        }
        let current = self.state.conversation_state();
        if !current.is_capturing() {
            debug!("Ignoring {:?} outside a capture session ({})", event, current);
            return;
        }

        match event {
            CaptureEvent::Ready => debug!("Recognizer ready"),
            CaptureEvent::BeginningOfSpeech => debug!("Speech started"),
            CaptureEvent::EndOfSpeech => {
                if current == ConversationState::Listening {
                    self.set_listening(false);
                    self.set_state(ConversationState::ProcessingSpeech);
                }
            }
            CaptureEvent::Partial(text) => {
                self.state.write().partial_transcript = Some(text.clone());
                self.emit(AppEvent::PartialTranscript(text));
            }
            CaptureEvent::Final(text) => {
                self.capture_session = None;
                self.set_listening(false);
                if text.trim().is_empty() {
                    debug!("Empty transcription, back to idle");
                    self.set_state(ConversationState::Idle);
                    return;
                }
                info!("Transcribed: {}", text);
                self.submit(&text);
            }
            CaptureEvent::Error(e) => {
                warn!("Speech capture failed: {}", e);
                self.capture_session = None;
                self.set_listening(false);
                self.set_state(ConversationState::Idle);
                self.set_error(e.user_message());
            }
        }
    }

    fn capture_sink(&self, session: Uuid) -> CaptureSink {
        let inbox = self.inbox_tx.clone();
        CaptureSink::new(move |event| {
            if inbox
                .send(ConversationEvent::Capture { session, event })
                .is_err()
            {
                debug!("Capture event after shutdown");
            }
        })
    }

    // === Turns ===

    fn submit(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            debug!("Ignoring blank submission");
            return;
        }
        if let Some(active) = self.active_turn {
            warn!("Turn {} is still streaming, ignoring submission", active.turn);
            return;
        }

        if self.speaking_turn.is_some() {
            self.interrupt_speech();
        }
        self.end_capture_session();
        self.set_listening(false);

        let begun = {
            let mut state = self.state.write();
            state.transcript.push_user(text);
            let history = state.transcript.history();
            state.transcript.begin_assistant().map(|id| (history, id))
        };
        self.emit(AppEvent::TranscriptChanged);
        self.set_state(ConversationState::WaitingForLLM);

        let (history, message_id) = match begun {
            Ok(begun) => begun,
            Err(e) => {
                self.fail(&e.to_string());
                return;
            }
        };

        let turn = Uuid::new_v4();
        self.active_turn = Some(ActiveTurn { turn, message_id });
        debug!("Starting turn {} with {} history entries", turn, history.len());

        if let Err(e) = self.gateway_tx.send(GatewayCommand::Stream { turn, history }) {
            self.fail_active_turn(&format!("gateway unavailable: {}", e));
        }
    }

    /// The active turn matching `turn`, or `None` for a stale event
    fn current_turn(&self, turn: Uuid) -> Option<ActiveTurn> {
        let active = self.active_turn.filter(|active| active.turn == turn);
        if active.is_none() {
            debug!("Dropping gateway event for stale turn {}", turn);
        }
        active
    }

    fn handle_gateway(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::ProviderSelected { turn, provider } => {
                if self.current_turn(turn).is_none() {
                    return;
                }
                self.state.write().provider = Some(provider);
                self.emit(AppEvent::ProviderChanged(provider));
            }
            GatewayEvent::Chunk { turn, text } => {
                let Some(active) = self.current_turn(turn) else {
                    return;
                };
                let appended = self
                    .state
                    .write()
                    .transcript
                    .append_chunk(active.message_id, &text);
                match appended {
                    Ok(()) => self.emit(AppEvent::MessageChunk {
                        id: active.message_id,
                        text,
                    }),
                    Err(e) => warn!("Dropping chunk: {}", e),
                }
            }
            GatewayEvent::Finished { turn, result } => {
                let Some(active) = self.current_turn(turn) else {
                    return;
                };
                self.active_turn = None;
                let finalized = self.state.write().transcript.finalize(active.message_id);
                self.emit(AppEvent::TranscriptChanged);

                match (result, finalized) {
                    (Ok(provider), Ok(reply)) => {
                        info!("Turn {} served by {} ({} chars)", turn, provider, reply.len());
                        self.speak(turn, &reply);
                    }
                    (Err(reason), _) => self.fail(&reason),
                    (Ok(_), Err(e)) => self.fail(&e.to_string()),
                }
            }
            GatewayEvent::Shutdown => debug!("Gateway worker stopped"),
        }
    }

    /// Finalize the streaming message with whatever arrived, then fail
    fn fail_active_turn(&mut self, reason: &str) {
        if let Some(active) = self.active_turn.take() {
            if let Err(e) = self.state.write().transcript.finalize(active.message_id) {
                warn!("Could not finalize failed turn: {}", e);
            }
            self.emit(AppEvent::TranscriptChanged);
        }
        self.fail(reason);
    }

    fn fail(&mut self, reason: &str) {
        error!("LLM turn failed: {}", reason);
        self.set_error(format!("LLM error: {}", reason));
        self.set_state(ConversationState::Idle);
    }

    // === Speech output ===

    fn speak(&mut self, turn: Uuid, reply: &str) {
        if reply.trim().is_empty() {
            debug!("Empty reply, nothing to speak");
            self.set_state(ConversationState::Idle);
            return;
        }

        self.speaking_turn = Some(turn);
        self.set_state(ConversationState::Speaking);

        let inbox = self.inbox_tx.clone();
        let completion = SpeechCompletion::new(move || {
            if inbox.send(ConversationEvent::SpeechFinished { turn }).is_err() {
                debug!("Speech finished after shutdown");
            }
        });
        self.output.speak(reply, completion);
    }

    fn speech_finished(&mut self, turn: Uuid) {
        if self.speaking_turn != Some(turn) {
            debug!("Ignoring speech completion for turn {}", turn);
            return;
        }
        self.speaking_turn = None;
        self.set_state(ConversationState::Idle);
    }

    fn interrupt_speech(&mut self) {
        if let Some(turn) = self.speaking_turn.take() {
            info!("Interrupting speech for turn {}", turn);
            self.output.stop();
        }
    }

    // === Observable state ===

    fn set_state(&self, next: ConversationState) {
        let previous = std::mem::replace(&mut self.state.write().conversation, next);
        if previous != next {
            info!("Conversation: {} -> {}", previous, next);
            self.emit(AppEvent::StateChanged(next));
        }
    }

    fn set_listening(&self, listening: bool) {
        let changed = {
            let mut state = self.state.write();
            let changed = state.is_listening != listening;
            state.is_listening = listening;
            if !listening {
                state.partial_transcript = None;
            }
            changed
        };
        if changed {
            self.emit(AppEvent::ListeningChanged(listening));
        }
    }

    fn set_error(&mut self, message: String) {
        self.state.write().error = Some(message.clone());
        self.error_deadline = Some(Instant::now() + self.error_display);
        self.emit(AppEvent::ErrorChanged(Some(message)));
    }

    fn clear_error(&mut self) {
        self.error_deadline = None;
        if self.state.write().error.take().is_some() {
            self.emit(AppEvent::ErrorChanged(None));
        }
    }

    fn emit(&self, event: AppEvent) {
        if let Err(TrySendError::Full(event)) = self.event_tx.try_send(event) {
            debug!("Event buffer full, dropping {:?}", event);
        }
    }

    // === Shutdown ===

    fn begin_shutdown(&mut self) {
        info!("Shutting down conversation");
        self.end_capture_session();
        self.set_listening(false);
        self.interrupt_speech();
        if let Err(e) = self.gateway_tx.try_send(GatewayCommand::Shutdown) {
            warn!("Could not signal gateway shutdown: {}", e);
        }
    }

    fn announce_shutdown(&self, timeout: Duration) {
        if self.event_tx.send_timeout(AppEvent::Shutdown, timeout).is_err() {
            debug!("Nobody received the shutdown event");
        }
    }
}

/// Handle for driving the orchestrator from a front end or tests
pub struct OrchestratorHandle {
    command_tx: Sender<AppCommand>,
    event_rx: Receiver<AppEvent>,
    state: SharedAppState,
}

impl OrchestratorHandle {
    pub fn send_command(&self, command: AppCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|e| MurmurError::ChannelError(format!("Failed to send command: {}", e)))
    }

    pub fn start_listening(&self) -> Result<()> {
        self.send_command(AppCommand::StartListening)
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.send_command(AppCommand::StopListening)
    }

    /// Submit already-finalized user text
    pub fn submit_text(&self, text: impl Into<String>) -> Result<()> {
        self.send_command(AppCommand::SubmitText(text.into()))
    }

    pub fn clear_error(&self) -> Result<()> {
        self.send_command(AppCommand::ClearError)
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send_command(AppCommand::Shutdown)
    }

    /// Try to receive an event (non-blocking)
    pub fn try_recv_event(&self) -> Option<AppEvent> {
        self.event_rx.try_recv().ok()
    }

    pub fn recv_event(&self) -> Result<AppEvent> {
        self.event_rx
            .recv()
            .map_err(|e| MurmurError::ChannelError(format!("Failed to receive event: {}", e)))
    }

    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<AppEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    pub fn state(&self) -> &SharedAppState {
        &self.state
    }

    pub fn snapshot(&self) -> AppStateSnapshot {
        self.state.snapshot()
    }

    pub fn conversation_state(&self) -> ConversationState {
        self.state.conversation_state()
    }
}

/// Owns the pieces of a conversation until `start` puts them on threads
pub struct Orchestrator {
    config: AssistantConfig,
    state: SharedAppState,
    command_rx: Receiver<AppCommand>,
    event_tx: Sender<AppEvent>,
    inbox_tx: Sender<ConversationEvent>,
    inbox_rx: Receiver<ConversationEvent>,
    capture: Arc<dyn SpeechCapture>,
    output: Arc<dyn SpeechOutput>,
    worker: GatewayWorker,
}

impl Orchestrator {
    /// Create an orchestrator and the handle that controls it.
    ///
    /// Nothing runs until [`Orchestrator::start`].
    pub fn new(
        config: AssistantConfig,
        capture: Arc<dyn SpeechCapture>,
        output: Arc<dyn SpeechOutput>,
        gateway: StreamingGateway,
    ) -> Result<(Self, OrchestratorHandle)> {
        config.validate()?;

        let (command_tx, command_rx) = bounded(config.event_buffer_size);
        let (event_tx, event_rx) = bounded(config.event_buffer_size);
        let (inbox_tx, inbox_rx) = unbounded();
        let state = SharedAppState::new();

        let handle = OrchestratorHandle {
            command_tx,
            event_rx,
            state: state.clone(),
        };

        let orchestrator = Self {
            config,
            state,
            command_rx,
            event_tx,
            inbox_tx,
            inbox_rx,
            capture,
            output,
            worker: GatewayWorker::new(gateway),
        };

        Ok((orchestrator, handle))
    }

    /// Start the gateway worker and the orchestrator loop.
    ///
    /// Returns join handles for both threads; they exit after `Shutdown`
    /// or once every handle is dropped.
    pub fn start(self) -> Result<Vec<JoinHandle<()>>> {
        let gateway_tx = self.worker.command_sender();
        let gateway_inbox = self.inbox_tx.clone();
        let gateway_handle = self.worker.start(Box::new(move |event| {
            gateway_inbox.send(ConversationEvent::Gateway(event)).is_ok()
        }))?;
        info!("Gateway worker started");

        let tick = self.config.tick();
        let shutdown_timeout = self.config.shutdown_timeout();
        let command_rx = self.command_rx;
        let inbox_rx = self.inbox_rx;
        let mut conversation = Conversation {
            state: self.state,
            capture: self.capture,
            output: self.output,
            gateway_tx,
            inbox_tx: self.inbox_tx,
            event_tx: self.event_tx,
            error_display: self.config.error_display(),
            active_turn: None,
            speaking_turn: None,
            capture_session: None,
            error_deadline: None,
        };

        let loop_handle = thread::Builder::new()
            .name("murmur-orchestrator".to_string())
            .spawn(move || {
                info!("Orchestrator loop started");

                loop {
                    select! {
                        recv(command_rx) -> command => match command {
                            Ok(AppCommand::Shutdown) => break,
                            Ok(command) => conversation.handle(ConversationEvent::Command(command)),
                            Err(_) => {
                                info!("All handles dropped");
                                break;
                            }
                        },
                        recv(inbox_rx) -> event => {
                            if let Ok(event) = event {
                                conversation.handle(event);
                            }
                        },
                        default(tick) => {},
                    }
                    conversation.tick(Instant::now());
                }

                conversation.begin_shutdown();
                let deadline = Instant::now() + shutdown_timeout;
                loop {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match inbox_rx.recv_timeout(remaining) {
                        Ok(ConversationEvent::Gateway(GatewayEvent::Shutdown)) => {
                            debug!("Gateway shutdown confirmed");
                            break;
                        }
                        Ok(_) => continue,
                        Err(_) => {
                            warn!("Shutdown timeout reached, not waiting for gateway");
                            break;
                        }
                    }
                }

                conversation.announce_shutdown(shutdown_timeout);
                info!("Orchestrator shutdown complete");
            })?;

        Ok(vec![gateway_handle, loop_handle])
    }
}

/// Builder for an orchestrator with terminal adapters by default
pub struct OrchestratorBuilder {
    config: AssistantConfig,
    capture: Option<Arc<dyn SpeechCapture>>,
    output: Option<Arc<dyn SpeechOutput>>,
    gateway: Option<StreamingGateway>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: AssistantConfig::default(),
            capture: None,
            output: None,
            gateway: None,
        }
    }

    pub fn with_config(mut self, config: AssistantConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the gateway section of the configuration
    pub fn with_gateway_config(mut self, gateway: GatewayConfig) -> Self {
        self.config.gateway = gateway;
        self
    }

    pub fn with_capture(mut self, capture: Arc<dyn SpeechCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    pub fn with_output(mut self, output: Arc<dyn SpeechOutput>) -> Self {
        self.output = Some(output);
        self
    }

    /// Use a prebuilt gateway instead of one built from the configuration
    pub fn with_gateway(mut self, gateway: StreamingGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn build(self) -> Result<(Orchestrator, OrchestratorHandle)> {
        let gateway = match self.gateway {
            Some(gateway) => gateway,
            None => StreamingGateway::new(self.config.gateway.clone())?,
        };
        let capture = self
            .capture
            .unwrap_or_else(|| Arc::new(TypedCapture::new()));
        let output = self
            .output
            .unwrap_or_else(|| Arc::new(ConsoleSpeaker::new()));
        Orchestrator::new(self.config, capture, output, gateway)
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
