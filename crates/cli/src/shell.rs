use std::io::Write;
use std::num::ParseIntError;
use std::path::PathBuf;

use parley_client::DocumentUpload;
use parley_session::{
    ChatCoordinator, CoordinatorUpdate, Notice, NoticeLevel, Role, SessionError, SessionId,
    SessionStore,
};
use snafu::{ResultExt, Snafu};

use crate::settings::SettingsStore;

pub const HELP: &str = "\
commands:
  /new [title]        start a new chat
  /list               list chats, most recent first
  /open <id>          switch to a chat
  /delete <id>        delete a chat
  /refresh [id]       reload the chat list, or one transcript
  /upload <path>      upload a PDF and ground replies on it
  /grounding on|off   toggle document grounding
  /search             toggle web search
  /token [value]      set or clear the credential
  /help               show this help
  /quit               exit
anything else is sent as a message";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    New(Option<String>),
    List,
    Open(SessionId),
    Delete(SessionId),
    Refresh(Option<SessionId>),
    Upload(PathBuf),
    Grounding(bool),
    Search,
    Token(Option<String>),
    Help,
    Quit,
    Send(String),
    Empty,
}

#[derive(Debug, PartialEq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CommandError {
    #[snafu(display("`/{command}` needs an argument"))]
    MissingArgument {
        stage: &'static str,
        command: &'static str,
    },
    #[snafu(display("'{raw}' is not a chat id: {source}"))]
    InvalidId {
        stage: &'static str,
        raw: String,
        source: ParseIntError,
    },
    #[snafu(display("expected on or off, got '{raw}'"))]
    InvalidToggle { stage: &'static str, raw: String },
    #[snafu(display("unknown command `/{name}`, try /help"))]
    UnknownCommand { stage: &'static str, name: String },
}

pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let stage = "parse-command";
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, argument) = match rest.split_once(char::is_whitespace) {
        Some((name, argument)) => (name, Some(argument.trim()).filter(|arg| !arg.is_empty())),
        None => (rest, None),
    };

    let parse_id = |command: &'static str| -> Result<SessionId, CommandError> {
        let raw = argument.ok_or_else(|| MissingArgumentSnafu { stage, command }.build())?;
        raw.parse().context(InvalidIdSnafu { stage, raw })
    };

    let command = match name {
        "new" => Command::New(argument.map(ToString::to_string)),
        "list" => Command::List,
        "open" => Command::Open(parse_id("open")?),
        "delete" => Command::Delete(parse_id("delete")?),
        "refresh" => match argument {
            Some(_) => Command::Refresh(Some(parse_id("refresh")?)),
            None => Command::Refresh(None),
        },
        "upload" => {
            let path = argument.ok_or_else(|| {
                MissingArgumentSnafu {
                    stage,
                    command: "upload",
                }
                .build()
            })?;
            Command::Upload(PathBuf::from(path))
        }
        "grounding" => match argument {
            Some("on") => Command::Grounding(true),
            Some("off") => Command::Grounding(false),
            Some(raw) => return InvalidToggleSnafu { stage, raw }.fail(),
            None => {
                return MissingArgumentSnafu {
                    stage,
                    command: "grounding",
                }
                .fail();
            }
        },
        "search" => Command::Search,
        "token" => Command::Token(argument.map(ToString::to_string)),
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return UnknownCommandSnafu { stage, name: other }.fail(),
    };

    Ok(command)
}

pub fn render_sessions(store: &SessionStore) -> String {
    let active = store.active_session_id();
    let lines = store
        .list_sessions()
        .into_iter()
        .map(|session| {
            let marker = if Some(session.id) == active { '*' } else { ' ' };
            let loading = if store.is_loading(session.id) { " (replying)" } else { "" };
            format!(
                "{marker} {:>5}  {}  {}{loading}",
                session.id.0,
                session.updated_at.format("%Y-%m-%d %H:%M"),
                session.title
            )
        })
        .collect::<Vec<_>>();

    if lines.is_empty() {
        "no chats yet, use /new".to_string()
    } else {
        lines.join("\n")
    }
}

pub fn render_transcript(coordinator: &ChatCoordinator) -> String {
    let Some(session) = coordinator.active_session() else {
        return "no active chat".to_string();
    };

    let mut out = format!("== {} ({}) ==", session.title, session.id);
    for message in &session.messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        out.push_str(&format!("\n{speaker}: {}", message.content));
    }
    out
}

pub fn render_notice(notice: &Notice) -> String {
    let level = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warning",
        NoticeLevel::Error => "error",
    };
    format!("[{level}] {}: {}", notice.title, notice.description)
}

/// Line-oriented front end over a [`ChatCoordinator`].
pub struct Shell {
    coordinator: ChatCoordinator,
    settings: SettingsStore,
}

impl Shell {
    pub fn new(coordinator: ChatCoordinator, settings: SettingsStore) -> Self {
        Self {
            coordinator,
            settings,
        }
    }

    pub fn coordinator_mut(&mut self) -> &mut ChatCoordinator {
        &mut self.coordinator
    }

    pub fn is_streaming(&self) -> bool {
        self.coordinator.is_streaming()
    }

    pub async fn start(&mut self) {
        match self.coordinator.refresh_sessions().await {
            Ok(count) => {
                println!("{count} chat(s) loaded, /help for commands");
                if self.coordinator.active_session().is_some() {
                    println!("{}", render_transcript(&self.coordinator));
                }
            }
            Err(error) => self.report(&error),
        }
    }

    /// Runs one input line. Returns false when the shell should exit.
    pub async fn handle_line(&mut self, line: &str) -> bool {
        let command = match parse_command(line) {
            Ok(command) => command,
            Err(error) => {
                println!("{error}");
                return true;
            }
        };

        match command {
            Command::Quit => return false,
            Command::Empty => {}
            Command::Help => println!("{HELP}"),
            Command::List => println!("{}", render_sessions(self.coordinator.store())),
            Command::New(title) => match self.coordinator.create_session(title).await {
                Ok(session_id) => println!("started chat {session_id}"),
                Err(error) => self.report(&error),
            },
            Command::Open(session_id) => match self.coordinator.select_session(session_id).await {
                Ok(()) => println!("{}", render_transcript(&self.coordinator)),
                Err(error) => self.report(&error),
            },
            Command::Delete(session_id) => match self.coordinator.delete_session(session_id).await {
                Ok(next) => {
                    println!("deleted chat {session_id}");
                    if next.is_some() {
                        println!("{}", render_transcript(&self.coordinator));
                    }
                }
                Err(error) => self.report(&error),
            },
            Command::Refresh(None) => match self.coordinator.refresh_sessions().await {
                Ok(_) => println!("{}", render_sessions(self.coordinator.store())),
                Err(error) => self.report(&error),
            },
            Command::Refresh(Some(session_id)) => {
                match self.coordinator.refresh_session(session_id).await {
                    Ok(()) => println!("{}", render_transcript(&self.coordinator)),
                    Err(error) => self.report(&error),
                }
            }
            Command::Upload(path) => self.upload(path).await,
            Command::Grounding(enabled) => {
                self.coordinator.set_document_grounding(enabled);
                println!("document grounding {}", on_off(enabled));
            }
            Command::Search => {
                let enabled = self.coordinator.toggle_web_search();
                println!("web search {}", on_off(enabled));
            }
            Command::Token(token) => {
                self.coordinator.set_credential(token.clone());
                match self.settings.set_token(token) {
                    Ok(()) => println!("credential updated"),
                    Err(error) => {
                        tracing::warn!(error = %error, "failed to persist credential");
                        println!("credential updated for this run only: {error}");
                    }
                }
            }
            Command::Send(text) => match self.coordinator.send(&text).await {
                Ok(_) => print!("assistant: "),
                Err(error) => self.report(&error),
            },
        }

        flush_stdout();
        true
    }

    pub fn render_update(&self, update: CoordinatorUpdate) {
        match update {
            CoordinatorUpdate::Opened { .. } | CoordinatorUpdate::Dropped { .. } => {}
            CoordinatorUpdate::Delta { text, .. } => print!("{text}"),
            CoordinatorUpdate::SearchResults { results, .. } => {
                println!();
                for result in results {
                    println!("  [web] {} <{}>", result.title, result.url);
                }
                print!("assistant: ");
            }
            CoordinatorUpdate::Reconciled { .. } => println!(),
            CoordinatorUpdate::ReconcileFailed { notice, .. } => {
                println!();
                println!("{}", render_notice(&notice));
            }
            CoordinatorUpdate::StreamFailed { message, notice, .. } => {
                println!();
                tracing::debug!(error = %message, "reply failed");
                println!("{}", render_notice(&notice));
            }
        }
        flush_stdout();
    }

    async fn upload(&mut self, path: PathBuf) {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) => {
                println!("cannot read {}: {error}", path.display());
                return;
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());

        match self
            .coordinator
            .upload_document(DocumentUpload::new(file_name, bytes))
            .await
        {
            Ok(document) => println!(
                "uploaded {} ({}), grounding on document {}",
                document.filename, document.status, document.id
            ),
            Err(error) => self.report(&error),
        }
    }

    fn report(&self, error: &SessionError) {
        tracing::debug!(error = ?error, "command failed");
        if error.is_unauthorized() {
            println!("{error}\nset a credential with /token <value>");
        } else {
            println!("{error}");
        }
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}
