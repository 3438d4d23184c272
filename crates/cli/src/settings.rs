use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use parley_client::ClientConfig;
use parley_session::DEFAULT_CHAT_TITLE;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "PARLEY_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_chat_title")]
    pub default_chat_title: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: None,
            default_chat_title: default_chat_title(),
        }
    }
}

impl ClientSettings {
    pub fn normalized(mut self) -> Self {
        self.base_url = match self.base_url.trim().trim_end_matches('/') {
            "" => default_base_url(),
            base_url => base_url.to_string(),
        };
        self.token = self
            .token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        self.default_chat_title = match self.default_chat_title.trim() {
            "" => default_chat_title(),
            title => title.to_string(),
        };
        self
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url, self.token.clone())
    }
}

/// Values given on the command line. Unset fields leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<ClientSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Layers defaults, the JSON file, `PARLEY_*` variables and `overrides`, in that order.
    pub fn new(config_path: PathBuf, overrides: &SettingsOverrides) -> Self {
        let settings = Self::load_layers(&config_path, overrides);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<ClientSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: ClientSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    pub fn set_token(&self, token: Option<String>) -> Result<(), SettingsError> {
        let mut settings = ClientSettings::clone(&self.settings());
        settings.token = token;
        self.update(settings)
    }

    fn load_layers(path: &Path, overrides: &SettingsOverrides) -> ClientSettings {
        if !path.exists() {
            tracing::info!(path = ?path, "settings file not found, using defaults");
        }

        let figment = Figment::from(Serialized::defaults(ClientSettings::default()))
            .merge(Json::file(path))
            .merge(Env::prefixed(ENV_PREFIX).only(&["base_url", "token", "default_chat_title"]))
            .merge(Serialized::defaults(overrides));

        match figment.extract::<ClientSettings>() {
            Ok(settings) => settings.normalized(),
            Err(error) => {
                tracing::warn!(path = ?path, error = %error, "failed to parse settings, using defaults");
                ClientSettings::default()
            }
        }
    }

    fn persist(&self, settings: &ClientSettings) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let content = serde_json::to_string_pretty(settings).context(SerializeConfigSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = self.config_path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.config_path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: self.config_path.clone(),
        })?;

        tracing::info!(path = ?self.config_path, "saved settings");
        Ok(())
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    SerializeConfig {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "failed to replace settings file from {from:?} to {to:?} on `{stage}`: {source}"
    ))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_chat_title() -> String {
    DEFAULT_CHAT_TITLE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"), &SettingsOverrides::default());

        let settings = store.settings();
        assert_eq!(settings.default_chat_title, "New Chat");
        assert!(!settings.base_url.is_empty());
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone(), &SettingsOverrides::default());

        store
            .update(ClientSettings {
                base_url: " https://chat.example.com/ ".to_string(),
                token: Some(" abc ".to_string()),
                default_chat_title: "  ".to_string(),
            })
            .unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let reloaded = SettingsStore::new(path, &SettingsOverrides::default()).settings();
        assert_eq!(reloaded.base_url, "https://chat.example.com");
        assert_eq!(reloaded.token.as_deref(), Some("abc"));
        assert_eq!(reloaded.default_chat_title, "New Chat");
    }

    #[test]
    fn overrides_win_over_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"base_url":"https://file.example.com","token":"from-file"}"#,
        )
        .unwrap();

        let overrides = SettingsOverrides {
            base_url: None,
            token: Some("from-flag".to_string()),
        };
        let settings = SettingsStore::new(path, &overrides).settings();

        assert_eq!(settings.base_url, "https://file.example.com");
        assert_eq!(settings.token.as_deref(), Some("from-flag"));
    }

    #[test]
    fn set_token_can_clear_the_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let store = SettingsStore::new(path.clone(), &SettingsOverrides::default());

        store.set_token(Some("abc".to_string())).unwrap();
        store.set_token(None).unwrap();

        let reloaded = SettingsStore::new(path, &SettingsOverrides::default()).settings();
        assert_eq!(reloaded.token, None);
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let settings = SettingsStore::new(path, &SettingsOverrides::default()).settings();
        assert_eq!(*settings, ClientSettings::default());
    }
}
