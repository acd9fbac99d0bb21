use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tutorline_core::{
    Attachment, BetaSignup, Config, Conversation, HttpSignupSink, KeyValueStore, SettingsStore,
    SignupOutcome, SignupService, SiteGate, WebhookTransport,
};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;

#[derive(Parser)]
#[command(name = "tutorline")]
#[command(about = "Chat with an AI tutor from the terminal", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the chat screen (default)
    Chat,
    /// Send a single message and print the reply
    Send {
        /// Your question
        message: String,
        /// File to attach to the message
        #[arg(short, long)]
        attach: Option<PathBuf>,
    },
    /// Show or change the chat webhook
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Unlock the beta with the site password
    Unlock { password: String },
    /// Forget a previous unlock
    Lock,
    /// Sign up for the beta
    Signup {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
        /// One of: elementary, middle-school, high-school, college, adult
        #[arg(long)]
        grade: Option<String>,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Resubmit signups that were saved locally after a failed submission
    FlushSignups,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print the current webhook and the URLs tried for it
    Show,
    /// Use a custom webhook URL
    Set { url: String },
    /// Go back to the default webhook
    Reset,
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// The chat screen owns the terminal, so its logs go to a file instead.
fn init_file_logging() -> Result<()> {
    let dir = dirs::data_dir()
        .ok_or_else(|| anyhow!("Could not find data directory"))?
        .join("tutorline");
    fs::create_dir_all(&dir)?;
    let path = dir.join("tutorline.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("opening log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

fn init_stderr_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    if matches!(command, Commands::Chat) {
        init_file_logging()?;
    } else {
        init_stderr_logging();
    }

    let config = Config::load()?;
    let storage: Arc<dyn KeyValueStore> = Arc::new(config.open_storage()?);
    let settings = SettingsStore::new(storage.clone());
    let gate = SiteGate::new(storage.clone(), config.site_password.clone());

    match command {
        Commands::Chat => run_chat(settings, gate).await,
        Commands::Send { message, attach } => send_once(settings, gate, &message, attach).await,
        Commands::Settings { action } => {
            manage_settings(&settings, action.unwrap_or(SettingsAction::Show))
        }
        Commands::Unlock { password } => {
            if gate.unlock(&password) {
                println!("Unlocked.");
                Ok(())
            } else {
                Err(anyhow!("Incorrect password"))
            }
        }
        Commands::Lock => {
            gate.lock();
            println!("Locked.");
            Ok(())
        }
        Commands::Signup {
            name,
            email,
            phone,
            grade,
            subject,
            notes,
        } => {
            let signup = BetaSignup {
                name,
                email,
                phone,
                grade_level: grade,
                subject,
                notes,
            };
            submit_signup(&config, storage, &signup).await
        }
        Commands::FlushSignups => {
            let service = signup_service(&config, storage);
            let pending = service.pending_backups().len();
            if pending == 0 {
                println!("No saved signups to resubmit.");
                return Ok(());
            }
            let delivered = service.flush_backups().await;
            println!("Resubmitted {} of {} saved signups.", delivered, pending);
            Ok(())
        }
    }
}

fn require_unlocked(gate: &SiteGate) -> Result<()> {
    if gate.is_authenticated() {
        Ok(())
    } else {
        Err(anyhow!("Tutorline is locked. Run `tutorline unlock <password>` first."))
    }
}

async fn run_chat(settings: SettingsStore, gate: SiteGate) -> Result<()> {
    let conversation = Conversation::new(Arc::new(WebhookTransport::new()), settings.load());
    let mut app = App::new(settings, gate, conversation);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;
            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event).await?,
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    result
}

async fn send_once(
    settings: SettingsStore,
    gate: SiteGate,
    message: &str,
    attach: Option<PathBuf>,
) -> Result<()> {
    require_unlocked(&gate)?;

    let attachment = attach.as_deref().map(Attachment::from_path).transpose()?;
    let mut conversation = Conversation::new(Arc::new(WebhookTransport::new()), settings.load());
    conversation.send_message(message, attachment.as_ref()).await;

    let session = conversation.session();
    if let Some(error) = session.last_error() {
        return Err(anyhow!("{}", error));
    }
    match session.turns().last() {
        Some(turn) => {
            println!("{}", turn.text);
            Ok(())
        }
        None => Err(anyhow!("Message was empty")),
    }
}

fn manage_settings(settings: &SettingsStore, action: SettingsAction) -> Result<()> {
    match action {
        SettingsAction::Show => {
            let endpoint = settings.load();
            let label = if endpoint.is_default() { " (default)" } else { "" };
            println!("Webhook: {}{}", endpoint.primary_url, label);
            println!("Tried in order:");
            for (idx, url) in endpoint.candidate_urls().iter().enumerate() {
                println!("  {}. {}", idx + 1, url);
            }
        }
        SettingsAction::Set { url } => {
            settings.save(&url)?;
            println!("Webhook set to {}", url);
        }
        SettingsAction::Reset => {
            settings.reset()?;
            println!("Webhook restored to the default.");
        }
    }
    Ok(())
}

fn signup_service(config: &Config, storage: Arc<dyn KeyValueStore>) -> SignupService {
    let sink = HttpSignupSink::new(config.signup_url.clone(), config.signup_api_key.clone());
    SignupService::new(Arc::new(sink), storage)
}

async fn submit_signup(
    config: &Config,
    storage: Arc<dyn KeyValueStore>,
    signup: &BetaSignup,
) -> Result<()> {
    let service = signup_service(config, storage);
    match service.submit(signup).await {
        Ok(SignupOutcome::Submitted) => {
            println!("Thanks {}! You're on the beta list.", signup.name);
            Ok(())
        }
        Ok(SignupOutcome::BackedUp { error, .. }) => {
            println!("Couldn't reach the signup service ({}).", error);
            println!("Your signup was saved and can be resubmitted with `tutorline flush-signups`.");
            Ok(())
        }
        Ok(SignupOutcome::NotSaved { error }) => {
            Err(anyhow!("Signup failed and could not be saved locally: {}", error))
        }
        Err(errors) => {
            for field in &errors.0 {
                eprintln!("  {}: {}", field.field, field.message);
            }
            Err(anyhow!("Please fix the signup form and try again"))
        }
    }
}
