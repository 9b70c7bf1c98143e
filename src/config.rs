use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_LANGUAGE: &str = "português do Brasil";
pub const DEFAULT_CONFIG_FILE: &str = "pdf-chat.toml";

#[derive(Debug)]
pub struct Config {
    pub api_key: Option<SecretString>,
    pub model: String,
    pub ocr_model: String,
    pub base_url: String,
    /// Language the assistant is told to answer in.
    pub language: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            ocr_model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
        }
    }
}

/// Shape of `pdf-chat.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub ocr_model: Option<String>,
    pub base_url: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Gemini API key not configured (set GEMINI_API_KEY or api_key in the config file)")]
    MissingApiKey,
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl Config {
    /// Build the configuration from defaults, an optional TOML file and the
    /// process environment, in that order of priority.
    ///
    /// An explicit `path` must exist. Without one, `PDF_CHAT_CONFIG` is tried,
    /// then `pdf-chat.toml` in the working directory if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("PDF_CHAT_CONFIG").map(PathBuf::from));

        let file = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                Some(read_file(&path)?)
            }
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Some(read_file(path)?)
                } else {
                    None
                }
            }
        };

        if let Some(file) = file {
            config.merge_file(file);
        }
        config.merge_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn merge_file(&mut self, file: FileConfig) {
        if let Some(key) = file.api_key.filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(SecretString::from(key));
        }
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(model) = file.ocr_model {
            self.ocr_model = model;
        }
        if let Some(url) = file.base_url {
            self.base_url = url;
        }
        if let Some(language) = file.language {
            self.language = language;
        }
    }

    /// Overlay values from an environment lookup. Taking the lookup as a
    /// closure keeps this testable without touching the real process env.
    pub fn merge_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.api_key = Some(SecretString::from(key));
        }
        if let Some(model) = var("PDF_CHAT_MODEL") {
            self.model = model;
        }
        if let Some(model) = var("PDF_CHAT_OCR_MODEL") {
            self.ocr_model = model;
        }
        if let Some(language) = var("PDF_CHAT_LANGUAGE") {
            self.language = language;
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.api_key = if key.trim().is_empty() {
            None
        } else {
            Some(SecretString::from(key))
        };
        self
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    pub fn api_key(&self) -> Result<&SecretString, ConfigError> {
        match &self.api_key {
            Some(key) if !key.expose_secret().trim().is_empty() => Ok(key),
            _ => Err(ConfigError::MissingApiKey),
        }
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}
