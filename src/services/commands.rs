use std::io;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::FilesystemService;
use crate::bridge::SaveDialogOptions;

const OK_BODY: &str = "ok";

/// The fixed command vocabulary accepted on `POST /@vueRunner/`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    IsAvailable,
    HomeDir,
    Join {
        dir_path: String,
        file: String,
    },
    Mkdir {
        path: String,
        #[serde(default)]
        options: Option<MkdirOptions>,
    },
    Exists {
        path: String,
    },
    Create {
        path: String,
    },
    Rename {
        old_path: String,
        new_path: String,
    },
    Remove {
        path: String,
    },
    ReadTextFile {
        path: String,
    },
    WriteTextFile {
        path: String,
        text: String,
    },
    ReadDir {
        path: String,
    },
    SaveDialog {
        #[serde(default)]
        options: Option<SaveDialogOptions>,
    },
    Terminate,
    /// Any name outside the vocabulary. Answered with an empty 200 body.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MkdirOptions {
    #[serde(default)]
    pub recursive: Option<bool>,
}

impl Command {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::IsAvailable => "isAvailable",
            Self::HomeDir => "homeDir",
            Self::Join { .. } => "join",
            Self::Mkdir { .. } => "mkdir",
            Self::Exists { .. } => "exists",
            Self::Create { .. } => "create",
            Self::Rename { .. } => "rename",
            Self::Remove { .. } => "remove",
            Self::ReadTextFile { .. } => "readTextFile",
            Self::WriteTextFile { .. } => "writeTextFile",
            Self::ReadDir { .. } => "readDir",
            Self::SaveDialog { .. } => "saveDialog",
            Self::Terminate => "terminate",
            Self::Unknown => "unknown",
        }
    }
}

/// Success flag for commands whose wire form is `"ok"` or an empty body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    fn from_io<T>(command: &'static str, result: io::Result<T>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(error) => {
                debug!(command, %error, "filesystem command failed");
                Self::Failed
            }
        }
    }

    pub fn into_body(self) -> String {
        match self {
            Self::Succeeded => OK_BODY.to_string(),
            Self::Failed => String::new(),
        }
    }
}

/// What the gateway should do with a parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Answer now with a `200 text/plain` body.
    Reply(String),
    /// Needs the UI thread; answered later over an event stream.
    SaveDialog(SaveDialogOptions),
    /// The page asked the whole application to quit.
    Terminate,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct CommandService {
    fs: FilesystemService,
}

impl CommandService {
    pub(crate) fn new() -> Self {
        Self {
            fs: FilesystemService::new(),
        }
    }

    pub(crate) async fn dispatch(&self, command: Command) -> Dispatch {
        let name = command.name();
        let body = match command {
            Command::IsAvailable => OK_BODY.to_string(),
            Command::HomeDir => self
                .fs
                .home_dir()
                .map(|path| path.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Command::Join { dir_path, file } => self.fs.join(&dir_path, &file),
            Command::Mkdir { path, options } => {
                let recursive = options.and_then(|o| o.recursive).unwrap_or(false);
                Outcome::from_io(name, self.fs.mkdir(Path::new(&path), recursive).await)
                    .into_body()
            }
            Command::Exists { path } => {
                let exists = matches!(self.fs.exists(Path::new(&path)).await, Ok(true));
                if exists {
                    Outcome::Succeeded.into_body()
                } else {
                    Outcome::Failed.into_body()
                }
            }
            Command::Create { path } => {
                Outcome::from_io(name, self.fs.create(Path::new(&path)).await).into_body()
            }
            Command::Rename { old_path, new_path } => Outcome::from_io(
                name,
                self.fs
                    .rename(Path::new(&old_path), Path::new(&new_path))
                    .await,
            )
            .into_body(),
            Command::Remove { path } => {
                Outcome::from_io(name, self.fs.remove(Path::new(&path)).await).into_body()
            }
            // An unreadable file and an empty file look the same on the wire.
            Command::ReadTextFile { path } => match self.fs.read_text(Path::new(&path)).await {
                Ok(text) => text,
                Err(error) => {
                    debug!(command = name, %error, "filesystem command failed");
                    String::new()
                }
            },
            Command::WriteTextFile { path, text } => {
                Outcome::from_io(name, self.fs.write_text(Path::new(&path), &text).await)
                    .into_body()
            }
            Command::ReadDir { path } => match self.fs.list_names(Path::new(&path)).await {
                Ok(names) => serde_json::to_string(&names).unwrap_or_else(|_| "[]".to_string()),
                Err(error) => {
                    debug!(command = name, %error, "filesystem command failed");
                    "[]".to_string()
                }
            },
            Command::SaveDialog { options } => {
                return Dispatch::SaveDialog(options.unwrap_or_default());
            }
            Command::Terminate => return Dispatch::Terminate,
            Command::Unknown => {
                warn!("unknown command; answering with an empty body");
                String::new()
            }
        };
        Dispatch::Reply(body)
    }
}
