use quire_blocks::RenderOptions;
use quire_editor::EditorConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "quire.config.json";

/// Quire configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Workspace snapshot the commands read and write
    #[serde(default = "default_snapshot")]
    pub snapshot: String,

    #[serde(default)]
    pub editor: EditorConfig,

    #[serde(default)]
    pub render: RenderConfig,
}

fn default_snapshot() -> String {
    "quire.snapshot.json".to_string()
}

/// HTML output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderConfig {
    pub pretty: bool,
    pub indent: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            indent: "  ".to_string(),
        }
    }
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    /// Snapshot path, unless one was given on the command line
    pub fn snapshot_path(&self, cwd: &str, explicit: Option<&Path>) -> PathBuf {
        match explicit {
            Some(path) => PathBuf::from(cwd).join(path),
            None => PathBuf::from(cwd).join(&self.snapshot),
        }
    }

    pub fn render_options(&self, editable: bool) -> RenderOptions {
        RenderOptions {
            editable,
            pretty: self.render.pretty,
            indent: self.render.indent.clone(),
            temp_id_prefix: self.editor.temp_id_prefix.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            snapshot: default_snapshot(),
            editor: EditorConfig::default(),
            render: RenderConfig::default(),
        }
    }
}
