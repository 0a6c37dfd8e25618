use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{domain::ChatId, errors::Error, pulse::WaitRequest, Result};

/// Typed configuration for the bridge.
///
/// Loaded once at startup; credentials and destination are immutable afterwards.
#[derive(Clone, Debug)]
pub struct Config {
    // Credentials / destination
    pub telegram_bot_token: String,
    pub telegram_chat_id: ChatId,

    // Durable state
    pub state_file: PathBuf,

    // Pulsing
    pub pulse_interval: Duration,
    pub pulse_pause: Duration,
    pub error_budget: u32,
    pub default_wait: Duration,
    pub max_wait: Duration,
    pub fetch_grace: Duration,

    // Telegram limits
    pub message_limit: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let telegram_chat_id = parse_chat_id(env_str("TELEGRAM_CHAT_ID"))?;

        let state_file = env_path("TGPULSE_STATE_FILE").unwrap_or_else(default_state_file);

        let pulse_interval =
            Duration::from_secs(env_u64("TGPULSE_PULSE_INTERVAL_SECS").unwrap_or(10).max(1));
        let pulse_pause = Duration::from_millis(env_u64("TGPULSE_PULSE_PAUSE_MS").unwrap_or(250));
        let error_budget = env_u32("TGPULSE_ERROR_BUDGET").unwrap_or(10);
        let max_wait = Duration::from_secs(env_u64("TGPULSE_MAX_WAIT_SECS").unwrap_or(120).max(1));
        let default_wait = Duration::from_secs(env_u64("TGPULSE_DEFAULT_WAIT_SECS").unwrap_or(100))
            .clamp(Duration::from_secs(1), max_wait);
        let fetch_grace = Duration::from_secs(env_u64("TGPULSE_FETCH_GRACE_SECS").unwrap_or(10));

        // 4096 is the Bot API hard cap for sendMessage.
        let message_limit = env_usize("TGPULSE_MESSAGE_LIMIT")
            .unwrap_or(4096)
            .clamp(1, 4096);

        Ok(Self {
            telegram_bot_token,
            telegram_chat_id,
            state_file,
            pulse_interval,
            pulse_pause,
            error_budget,
            default_wait,
            max_wait,
            fetch_grace,
            message_limit,
        })
    }

    /// Build the wait request for a caller-supplied budget.
    ///
    /// `None` means the configured default; anything else is clamped into
    /// `[1s, max_wait]`.
    pub fn wait_request(&self, max_wait: Option<Duration>) -> WaitRequest {
        let deadline = max_wait
            .unwrap_or(self.default_wait)
            .clamp(Duration::from_secs(1), self.max_wait);
        WaitRequest {
            deadline,
            pulse_interval: self.pulse_interval,
            pulse_pause: self.pulse_pause,
            error_budget: self.error_budget,
        }
    }
}

fn parse_chat_id(raw: Option<String>) -> Result<ChatId> {
    let raw = raw.unwrap_or_default();
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::Config(
            "TELEGRAM_CHAT_ID environment variable is required".to_string(),
        ));
    }
    trimmed
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| Error::Config(format!("TELEGRAM_CHAT_ID must be an integer, got {trimmed:?}")))
}

fn default_state_file() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".tgpulse").join("tg_state.json"),
        None => PathBuf::from("/tmp/tgpulse-state.json"),
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}
