//! Docent Desktop — egui app state and UI.
//!
//! The UI thread reads controller snapshots each frame; sends, clears, and
//! reloads run on worker threads that report back over an mpsc channel and
//! request a repaint.

use eframe::egui;
use lib::backend::{BackendClient, QueryBackend};
use lib::controller::SessionController;
use lib::session::{ChatMessage, Role, Session};
use lib::store::SessionStore;
use lib::voice::{
    self, CommandRecorder, CommandSpeaker, Recorder, RecordingHandle, SpeakHandle, Speaker,
    Voice, VoiceCatalog,
};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

const SIDEBAR_WIDTH: f32 = 260.0;
const MESSAGE_SPACING: f32 = 10.0;

/// Completion notices from worker threads.
enum UiEvent {
    SendFinished { error: Option<String> },
    ClearFinished { error: Option<String> },
    ReloadFinished { error: Option<String> },
    VoicesLoaded(Arc<Vec<Voice>>),
}

pub struct DocentApp {
    runtime: Arc<tokio::runtime::Runtime>,
    controller: Arc<SessionController>,
    backend: Arc<BackendClient>,

    chat_input: String,
    chat_error: Option<String>,
    clear_error: Option<String>,
    reload_notice: Option<String>,

    voice_enabled: bool,
    speaker: Option<CommandSpeaker>,
    catalog: Arc<VoiceCatalog>,
    voices: Option<Arc<Vec<Voice>>>,
    /// Message waiting for the voice catalog before it can be spoken.
    pending_speak: Option<ChatMessage>,
    /// (message id, running utterance).
    speaking: Option<(String, SpeakHandle)>,
    recorder: CommandRecorder,
    recording: Option<RecordingHandle>,
    voice_error: Option<String>,
    voice_notice: Option<String>,

    events_tx: mpsc::Sender<UiEvent>,
    events_rx: mpsc::Receiver<UiEvent>,
}

impl DocentApp {
    pub fn new(_cc: &eframe::CreationContext<'_>) -> Self {
        let runtime = Arc::new(
            tokio::runtime::Runtime::new().expect("tokio runtime for docent-desktop"),
        );

        let (config, config_path) = lib::config::load_config(None).unwrap_or_else(|e| {
            log::warn!("loading config: {}; using defaults", e);
            (lib::config::Config::default(), lib::config::default_config_path())
        });
        let backend = Arc::new(BackendClient::new(Some(lib::config::resolve_backend_url(
            &config,
        ))));
        let store = SessionStore::new(lib::config::resolve_sessions_path(&config, &config_path));
        let controller = Arc::new(SessionController::new(backend.clone(), store));
        runtime.block_on(controller.start());

        let speaker = match CommandSpeaker::detect(config.voice.synthesizer.as_deref()) {
            Ok(speaker) => Some(speaker),
            Err(e) => {
                log::info!("speech output unavailable: {}", e);
                None
            }
        };
        let recorder = CommandRecorder::detect(config.voice.recorder.as_deref());
        let voice_error = recorder.availability().err().map(|e| e.to_string());
        let catalog = Arc::new(VoiceCatalog::system(config.voice.synthesizer.clone()));

        let (events_tx, events_rx) = mpsc::channel();
        Self {
            runtime,
            controller,
            backend,
            chat_input: String::new(),
            chat_error: None,
            clear_error: None,
            reload_notice: None,
            voice_enabled: config.voice.enabled,
            speaker,
            catalog,
            voices: None,
            pending_speak: None,
            speaking: None,
            recorder,
            recording: None,
            voice_error,
            voice_notice: None,
            events_tx,
            events_rx,
        }
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::SendFinished { error } => {
                self.chat_error = error;
            }
            UiEvent::ClearFinished { error } => {
                self.clear_error = error.map(|e| {
                    log::warn!("clear failed: {}", e);
                    "Failed to clear session".to_string()
                });
            }
            UiEvent::ReloadFinished { error } => {
                self.reload_notice = Some(match error {
                    None => "Documents reloaded successfully".to_string(),
                    Some(e) => {
                        log::warn!("reload failed: {}", e);
                        "Failed to reload documents".to_string()
                    }
                });
            }
            UiEvent::VoicesLoaded(voices) => {
                self.voices = Some(voices);
                if let Some(message) = self.pending_speak.take() {
                    self.start_speaking(&message);
                }
            }
        }
    }

    fn start_send(&mut self, ctx: &egui::Context) {
        let content = self.chat_input.trim().to_string();
        if content.is_empty() || self.controller.is_loading() || self.recording.is_some() {
            return;
        }
        self.chat_input.clear();
        self.chat_error = None;

        let controller = self.controller.clone();
        let runtime = self.runtime.clone();
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = runtime.block_on(controller.send_message(&content));
            let error = result.err().map(|e| e.to_string());
            let _ = tx.send(UiEvent::SendFinished { error });
            ctx.request_repaint();
        });
    }

    fn start_clear(&mut self, ctx: &egui::Context, id: String) {
        self.clear_error = None;
        let controller = self.controller.clone();
        let runtime = self.runtime.clone();
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = runtime.block_on(controller.clear_session(&id));
            let error = result.err().map(|e| e.to_string());
            let _ = tx.send(UiEvent::ClearFinished { error });
            ctx.request_repaint();
        });
    }

    fn start_reload(&mut self, ctx: &egui::Context) {
        self.reload_notice = Some("Reloading documents...".to_string());
        let backend = self.backend.clone();
        let runtime = self.runtime.clone();
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let result = runtime.block_on(backend.reload_documents());
            let error = result.err().map(|e| e.to_string());
            let _ = tx.send(UiEvent::ReloadFinished { error });
            ctx.request_repaint();
        });
    }

    /// Speak the message, or stop it if it is the one currently playing.
    /// The first use loads the voice catalog on a worker and speaks when it
    /// arrives.
    fn toggle_speaking(&mut self, ctx: &egui::Context, message: &ChatMessage) {
        if let Some((id, handle)) = self.speaking.take() {
            handle.stop();
            if id == message.id {
                return;
            }
        }
        if self.speaker.is_none() {
            self.voice_error = Some("No speech synthesizer is installed".to_string());
            return;
        }
        if self.voices.is_some() {
            self.start_speaking(message);
            return;
        }

        self.pending_speak = Some(message.clone());
        let catalog = self.catalog.clone();
        let runtime = self.runtime.clone();
        let tx = self.events_tx.clone();
        let ctx = ctx.clone();
        std::thread::spawn(move || {
            let voices = runtime.block_on(catalog.voices(voice::CATALOG_WAIT));
            let _ = tx.send(UiEvent::VoicesLoaded(voices));
            ctx.request_repaint();
        });
    }

    fn start_speaking(&mut self, message: &ChatMessage) {
        let Some(speaker) = &self.speaker else {
            return;
        };
        let voices = self.voices.clone().unwrap_or_default();
        let voice = voice::pick_voice(&voices, message.role);
        match speaker.speak(&message.content, voice) {
            Ok(handle) => self.speaking = Some((message.id.clone(), handle)),
            Err(e) => {
                log::warn!("speech failed: {}", e);
                self.voice_error = Some(e.to_string());
            }
        }
    }

    fn toggle_recording(&mut self) {
        if let Some(handle) = self.recording.take() {
            let path = handle.stop();
            // No transcription: the recording is kept and the input is freed
            // for typing, like the reference client.
            self.voice_notice = Some(format!("Recording saved to {}", path.display()));
            return;
        }
        match self.recorder.start(&voice::temp_recording_path()) {
            Ok(handle) => {
                self.chat_input.clear();
                self.voice_error = None;
                self.voice_notice = None;
                self.recording = Some(handle);
            }
            Err(e) => {
                log::warn!("recording failed: {}", e);
                self.voice_error = Some(e.to_string());
            }
        }
    }

    fn ui_header(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("header").show(ctx, |ui| {
            ui.add_space(6.0);
            ui.horizontal(|ui| {
                ui.heading("Docent");
                ui.label("document chat with cited sources");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Reload documents").clicked() {
                        self.start_reload(ui.ctx());
                    }
                    if let Some(ref notice) = self.reload_notice {
                        ui.label(notice);
                    }
                });
            });
            ui.add_space(6.0);
        });
    }

    fn ui_sessions_sidebar(
        &mut self,
        ctx: &egui::Context,
        sessions: &[Session],
        current_id: Option<&str>,
    ) {
        egui::SidePanel::left("sessions")
            .default_width(SIDEBAR_WIDTH)
            .show(ctx, |ui| {
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    ui.label(egui::RichText::new("Sessions").strong());
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        if ui.button("New session").clicked() {
                            self.runtime.block_on(self.controller.create_session());
                        }
                    });
                });
                if let Some(ref err) = self.clear_error {
                    ui.colored_label(egui::Color32::RED, err);
                }
                ui.separator();

                let mut selected: Option<String> = None;
                let mut clear_requested: Option<String> = None;
                egui::ScrollArea::vertical().show(ui, |ui| {
                    for session in sessions {
                        let is_current = Some(session.id()) == current_id;
                        ui.horizontal(|ui| {
                            let label = format!(
                                "{} ({} messages)",
                                session.title,
                                session.messages.len()
                            );
                            if ui.selectable_label(is_current, label).clicked() {
                                selected = Some(session.id().to_string());
                            }
                            ui.with_layout(
                                egui::Layout::right_to_left(egui::Align::Center),
                                |ui| {
                                    if ui.small_button("Clear").clicked() {
                                        clear_requested = Some(session.id().to_string());
                                    }
                                },
                            );
                        });
                    }
                });

                if let Some(id) = selected {
                    self.runtime.block_on(self.controller.select_session(&id));
                }
                if let Some(id) = clear_requested {
                    self.start_clear(ui.ctx(), id);
                }
            });
    }

    fn ui_input_row(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("input").show(ctx, |ui| {
            ui.add_space(6.0);
            if let Some(ref err) = self.chat_error {
                ui.colored_label(egui::Color32::RED, err);
            }
            if let Some(ref err) = self.voice_error {
                ui.colored_label(egui::Color32::RED, err);
            }
            if let Some(ref notice) = self.voice_notice {
                ui.label(notice);
            }

            let loading = self.controller.is_loading();
            let recording = self.recording.is_some();
            let mut send_now = false;

            ui.horizontal(|ui| {
                if self.voice_enabled {
                    let mic_label = match &self.recording {
                        Some(handle) => format!("⏹ {}", format_elapsed(handle.elapsed())),
                        None => "🎤".to_string(),
                    };
                    if ui
                        .add_enabled(!loading, egui::Button::new(mic_label))
                        .clicked()
                    {
                        self.toggle_recording();
                    }
                }

                let hint = if recording {
                    "Recording audio..."
                } else {
                    "Type your message here..."
                };
                let input = ui.add_enabled(
                    !loading && !recording,
                    egui::TextEdit::singleline(&mut self.chat_input)
                        .hint_text(hint)
                        .desired_width(ui.available_width() - 90.0),
                );
                if input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    send_now = true;
                }

                let can_send =
                    !loading && !recording && !self.chat_input.trim().is_empty();
                if ui
                    .add_enabled(can_send, egui::Button::new("Send"))
                    .clicked()
                {
                    send_now = true;
                }
                if loading {
                    ui.spinner();
                }
            });
            ui.add_space(6.0);

            if send_now {
                self.start_send(ui.ctx());
            }
        });
    }

    fn ui_messages(&mut self, ctx: &egui::Context, messages: &[ChatMessage]) {
        egui::CentralPanel::default().show(ctx, |ui| {
            let mut speak_requested: Option<ChatMessage> = None;
            egui::ScrollArea::vertical()
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    for message in messages {
                        ui.add_space(MESSAGE_SPACING);
                        let author = match message.role {
                            Role::User => "You",
                            Role::Assistant => "AI",
                        };
                        ui.label(egui::RichText::new(author).strong());
                        ui.label(&message.content);

                        if let Some(sources) = &message.sources {
                            if !sources.is_empty() {
                                ui.add_space(2.0);
                                ui.label(egui::RichText::new("Sources:").italics());
                                for (i, source) in sources.iter().enumerate() {
                                    ui.label(format!(
                                        "{}. {} (Article {}) ({}% match)",
                                        i + 1,
                                        source.title,
                                        source.article_number,
                                        (source.relevance_score * 100.0).round() as i32
                                    ));
                                }
                            }
                        }

                        if self.voice_enabled {
                            let speaking_this = self
                                .speaking
                                .as_ref()
                                .map(|(id, _)| *id == message.id)
                                .unwrap_or(false);
                            let label = if speaking_this { "⏹ Stop" } else { "🔊 Listen" };
                            if ui.small_button(label).clicked() {
                                speak_requested = Some(message.clone());
                            }
                        }
                    }
                    ui.add_space(MESSAGE_SPACING);
                });

            if let Some(message) = speak_requested {
                self.toggle_speaking(ui.ctx(), &message);
            }
        });
    }
}

impl eframe::App for DocentApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }

        // Drop the handle once the utterance has finished on its own.
        let utterance_done = self
            .speaking
            .as_ref()
            .map(|(_, handle)| handle.is_finished())
            .unwrap_or(false);
        if utterance_done {
            self.speaking = None;
        }
        // Keep the elapsed-time label and the spinner moving.
        if self.recording.is_some() || self.controller.is_loading() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        let sessions = self.runtime.block_on(self.controller.sessions());
        let current_id = self.runtime.block_on(self.controller.current_session_id());
        let messages = current_id
            .as_deref()
            .and_then(|id| sessions.iter().find(|s| s.id() == id))
            .map(|s| s.messages.clone())
            .unwrap_or_default();

        self.ui_header(ctx);
        self.ui_sessions_sidebar(ctx, &sessions, current_id.as_deref());
        self.ui_input_row(ctx);
        self.ui_messages(ctx, &messages);
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if let Some((_, handle)) = self.speaking.take() {
            handle.stop();
        }
        if let Some(handle) = self.recording.take() {
            handle.stop();
        }
        self.runtime.block_on(self.controller.shutdown());
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
