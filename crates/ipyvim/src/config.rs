//! User settings for prompts, colours and kernel timings.
//!
//! Settings are stored in a JSON file in the user's config directory:
//! - macOS: ~/Library/Application Support/ipyvim/settings.json
//! - Linux: ~/.config/ipyvim/settings.json
//! - Windows: C:\Users\<User>\AppData\Roaming\ipyvim\settings.json
//!
//! Every field has a default, so partial files are fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

/// A console/GUI colour pair for one prompt category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptColor {
    pub console: String,
    pub gui: String,
}

impl PromptColor {
    fn named(name: &str) -> Self {
        Self {
            console: name.to_string(),
            gui: name.to_string(),
        }
    }
}

/// Colours for the input, output and continuation prompts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptColors {
    pub input: PromptColor,
    pub output: PromptColor,
    pub continuation: PromptColor,
}

impl Default for PromptColors {
    fn default() -> Self {
        Self {
            input: PromptColor::named("Green"),
            output: PromptColor::named("Red"),
            continuation: PromptColor::named("Gray"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input prompt template, `%(line)d` is replaced by the execution count
    pub status_prompt_in: String,

    /// Output prompt template
    pub status_prompt_out: String,

    pub prompt_colors: PromptColors,

    /// Keep a trailing blank line at the end of the log
    pub status_blank_lines: bool,

    /// Wait for the execute reply to report `In[n]:` after sending code
    pub show_execution_count: bool,

    /// Render pending kernel output after every command
    pub monitor_subchannel: bool,

    /// Flags passed to the `%run` magic when running a whole file
    pub run_flags: String,

    /// Kernelspec used when starting a new kernel
    pub kernel_name: String,

    pub poll_timeout_ms: u64,
    pub reply_timeout_ms: u64,
    pub complete_timeout_ms: u64,
    pub startup_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            status_prompt_in: "In [%(line)d]: ".to_string(),
            status_prompt_out: "Out[%(line)d]: ".to_string(),
            prompt_colors: PromptColors::default(),
            status_blank_lines: true,
            show_execution_count: true,
            monitor_subchannel: true,
            run_flags: "-i".to_string(),
            kernel_name: "python3".to_string(),
            poll_timeout_ms: 200,
            reply_timeout_ms: 1000,
            complete_timeout_ms: 1000,
            startup_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn complete_timeout(&self) -> Duration {
        Duration::from_millis(self.complete_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    /// Load settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
        {
            Ok(config) => config,
            Err(e) => {
                warn!("[config] Ignoring invalid settings at {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load settings from the default location.
    pub fn load() -> Self {
        Self::load_from(&settings_path())
    }

    /// Overlay the keys present in `overrides` onto this config.
    ///
    /// Keys not recognised are ignored. A value of the wrong type rejects the
    /// whole overlay and leaves the config untouched.
    pub fn merge(&mut self, overrides: &serde_json::Value) -> Result<(), serde_json::Error> {
        let mut current = serde_json::to_value(&*self)?;
        merge_json(&mut current, overrides);
        *self = serde_json::from_value(current)?;
        Ok(())
    }
}

fn merge_json(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ipyvim")
        .join("settings.json")
}
