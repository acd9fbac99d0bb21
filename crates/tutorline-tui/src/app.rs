use std::path::Path;

use tokio::task::JoinHandle;
use tracing::{info, warn};
use tutorline_core::transport::{TransportError, WebhookReply};
use tutorline_core::{Attachment, Conversation, SettingsStore, SiteGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlay {
    None,
    /// Webhook URL editor
    Settings,
    /// Site password prompt; nothing else is reachable until it passes
    Unlock,
}

/// Single-line text field with a char-indexed cursor.
#[derive(Debug, Clone, Default)]
pub struct TextInput {
    pub text: String,
    pub cursor: usize,
}

impl TextInput {
    pub fn with_text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            cursor: text.chars().count(),
        }
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }

    pub fn insert(&mut self, c: char) {
        let byte_pos = self.byte_index(self.cursor);
        self.text.insert(byte_pos, c);
        self.cursor += 1;
    }

    pub fn backspace(&mut self) {
        if self.cursor > 0 {
            self.cursor -= 1;
            let byte_pos = self.byte_index(self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn delete(&mut self) {
        if self.cursor < self.text.chars().count() {
            let byte_pos = self.byte_index(self.cursor);
            self.text.remove(byte_pos);
        }
    }

    pub fn left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.text.chars().count());
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.chars().count();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,
    pub overlay: Overlay,
    pub status: Option<String>,

    // Chat state
    pub conversation: Conversation,
    pub input: TextInput,
    pub attachment: Option<Attachment>,
    pub send_task: Option<JoinHandle<Result<WebhookReply, TransportError>>>,
    pub chat_scroll: u16,
    pub chat_height: u16, // Inner height of chat area for scroll calculations
    pub chat_width: u16,  // Inner width of chat area for wrap calculations

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Settings overlay
    pub settings: SettingsStore,
    pub settings_input: TextInput,

    // Site gate
    pub gate: SiteGate,
    pub unlock_input: TextInput,
}

impl App {
    pub fn new(settings: SettingsStore, gate: SiteGate, conversation: Conversation) -> Self {
        let overlay = if gate.is_authenticated() {
            Overlay::None
        } else {
            Overlay::Unlock
        };

        Self {
            should_quit: false,
            input_mode: if overlay == Overlay::None {
                InputMode::Editing
            } else {
                InputMode::Normal
            },
            overlay,
            status: None,
            conversation,
            input: TextInput::default(),
            attachment: None,
            send_task: None,
            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            animation_frame: 0,
            settings,
            settings_input: TextInput::default(),
            gate,
            unlock_input: TextInput::default(),
        }
    }

    pub fn is_sending(&self) -> bool {
        self.conversation.session().is_awaiting_reply()
    }

    /// Handle the chat input box's Enter. Slash commands are handled locally;
    /// anything else goes to the webhook on a background task.
    pub fn submit_input(&mut self) {
        let text = self.input.text.trim().to_string();

        if let Some(rest) = text.strip_prefix("/attach ") {
            self.attach(Path::new(rest.trim()));
            self.input.clear();
            return;
        }
        match text.as_str() {
            "/attach" => {
                self.status = Some("Usage: /attach <path>".to_string());
                self.input.clear();
                return;
            }
            "/detach" => {
                self.attachment = None;
                self.status = Some("Attachment removed".to_string());
                self.input.clear();
                return;
            }
            "/new" => {
                if self.conversation.reset() {
                    self.attachment = None;
                    self.chat_scroll = 0;
                    self.status = Some("Started a new conversation".to_string());
                } else {
                    self.status = Some("Wait for the tutor to answer first".to_string());
                }
                self.input.clear();
                return;
            }
            _ => {}
        }

        let Some(pending) = self
            .conversation
            .begin_send(&self.input.text, self.attachment.as_ref())
        else {
            return;
        };

        self.input.clear();
        self.attachment = None;
        self.status = None;
        self.scroll_chat_to_bottom();

        // Spawn background task so the UI keeps animating while we wait
        self.send_task = Some(tokio::spawn(pending.dispatch()));
    }

    fn attach(&mut self, path: &Path) {
        match Attachment::from_path(path) {
            Ok(file) => {
                info!(file = %file.name, "attached file");
                self.status = Some(format!("Attached {}", file.name));
                self.attachment = Some(file);
            }
            Err(e) => {
                warn!(error = %e, "could not attach file");
                self.status = Some(format!("Could not attach file: {}", e));
            }
        }
    }

    /// Apply the background send's outcome once it has finished.
    pub async fn poll_send_task(&mut self) {
        let finished = self
            .send_task
            .as_ref()
            .map(|task| task.is_finished())
            .unwrap_or(false);
        if !finished {
            return;
        }

        if let Some(task) = self.send_task.take() {
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(TransportError::Interrupted(e.to_string())),
            };
            self.conversation.complete(outcome);
            self.scroll_chat_to_bottom();
        }
    }

    pub fn open_settings(&mut self) {
        let current = self.conversation.endpoint().primary_url.clone();
        self.settings_input = TextInput::with_text(&current);
        self.overlay = Overlay::Settings;
    }

    pub fn save_settings(&mut self) {
        let url = self.settings_input.text.trim().to_string();
        if url.is_empty() {
            self.status = Some("Webhook URL cannot be empty".to_string());
            return;
        }

        match self.settings.save(&url) {
            Ok(()) => self.status = Some("Webhook URL saved".to_string()),
            Err(e) => {
                warn!(error = %e, "could not save webhook URL");
                self.status = Some(format!("Could not save settings: {}", e));
            }
        }
        self.conversation.set_endpoint(self.settings.load());
        self.overlay = Overlay::None;
    }

    pub fn restore_default_settings(&mut self) {
        match self.settings.reset() {
            Ok(()) => self.status = Some("Webhook URL restored to default".to_string()),
            Err(e) => {
                warn!(error = %e, "could not reset webhook URL");
                self.status = Some(format!("Could not reset settings: {}", e));
            }
        }
        self.conversation.set_endpoint(self.settings.load());
        self.overlay = Overlay::None;
    }

    pub fn submit_unlock(&mut self) {
        if self.gate.unlock(&self.unlock_input.text) {
            self.overlay = Overlay::None;
            self.input_mode = InputMode::Editing;
            self.status = None;
        } else {
            self.status = Some("Incorrect password".to_string());
        }
        self.unlock_input.clear();
    }

    pub fn tick_animation(&mut self) {
        if self.is_sending() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    pub fn scroll_down(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_add(1);
    }

    pub fn scroll_up(&mut self) {
        self.chat_scroll = self.chat_scroll.saturating_sub(1);
    }

    /// Scroll chat to bottom so the newest turn (or "Thinking...") is visible
    pub fn scroll_chat_to_bottom(&mut self) {
        // Use actual chat width for wrap calculation, default to 50 if not set
        let wrap_width = if self.chat_width > 0 {
            self.chat_width as usize
        } else {
            50
        };

        // Label line + wrapped text + blank separator per turn
        let mut total_lines: usize = 0;
        for turn in self.conversation.session().turns() {
            total_lines += 1;
            for line in turn.text.lines() {
                let chars = line.chars().count();
                total_lines += chars.div_ceil(wrap_width).max(1);
            }
            total_lines += 1;
        }
        if self.is_sending() {
            total_lines += 2;
        }
        if self.conversation.session().last_error().is_some() {
            total_lines += 2;
        }

        let visible_height = if self.chat_height > 0 {
            self.chat_height as usize
        } else {
            20
        };
        self.chat_scroll = total_lines.saturating_sub(visible_height) as u16;
    }
}
