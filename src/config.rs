use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::warn;

pub const DEFAULT_BASE_PORT: u16 = 8081;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(15);

/// How the front-end is hosted by the UI shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// An external browser tab that must be told to close on shutdown.
    #[default]
    Browser,
    /// An in-process web view; the `/event` channel is not offered.
    EmbeddedView,
}

impl UiMode {
    pub fn is_embedded(self) -> bool {
        matches!(self, Self::EmbeddedView)
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub base_port: u16,
    pub doc_root: PathBuf,
    pub ui_mode: UiMode,
    pub poll_interval: Duration,
    pub keep_alive: Duration,
}

impl RunnerConfig {
    pub fn new(doc_root: impl Into<PathBuf>) -> Self {
        Self {
            base_port: DEFAULT_BASE_PORT,
            doc_root: doc_root.into(),
            ui_mode: UiMode::Browser,
            poll_interval: DEFAULT_POLL_INTERVAL,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }

    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    pub fn with_ui_mode(mut self, ui_mode: UiMode) -> Self {
        self.ui_mode = ui_mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_keep_alive(mut self, interval: Duration) -> Self {
        self.keep_alive = interval;
        self
    }

    pub fn from_env() -> Result<Self> {
        let base_port = match env::var("VUERUNNER_PORT") {
            Ok(raw) => raw.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(value = %raw, "ignoring invalid VUERUNNER_PORT");
                DEFAULT_BASE_PORT
            }),
            Err(_) => DEFAULT_BASE_PORT,
        };

        let doc_root = env::var("VUERUNNER_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_doc_root());
        if !doc_root.is_dir() {
            bail!("document root {} is not a directory", doc_root.display());
        }

        let ui_mode = if parse_bool_env("VUERUNNER_WEBVIEW") {
            UiMode::EmbeddedView
        } else {
            UiMode::Browser
        };

        let poll_interval = match env::var("VUERUNNER_POLL_MS") {
            Ok(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) => Duration::from_millis(ms.clamp(10, 5_000)),
                Err(_) => {
                    warn!(value = %raw, "ignoring invalid VUERUNNER_POLL_MS");
                    DEFAULT_POLL_INTERVAL
                }
            },
            Err(_) => DEFAULT_POLL_INTERVAL,
        };

        Ok(Self {
            base_port,
            doc_root,
            ui_mode,
            poll_interval,
            keep_alive: DEFAULT_KEEP_ALIVE,
        })
    }
}

/// `dist` beside the executable, or `./dist` when that does not exist.
fn default_doc_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join("dist")))
        .filter(|path| path.is_dir())
        .unwrap_or_else(|| PathBuf::from("dist"))
}

fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        })
        .unwrap_or(false)
}
