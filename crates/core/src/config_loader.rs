use crate::config::AppConfig;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads application configuration by merging TOML, environment variables, and JSON.
    ///
    /// Values load on top of `AppConfig::default()`, so a partial file is enough.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or if
    /// the merged configuration fails validation.
    pub fn load() -> Result<AppConfig> {
        Self::load_from("config/Hedgebot.toml")
    }

    /// Loads application configuration from an explicit TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration files cannot be read or parsed, or if
    /// the merged configuration fails validation.
    pub fn load_from(path: &str) -> Result<AppConfig> {
        let config: AppConfig = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HEDGEBOT_").split("__"))
            .join(Json::file("config/Hedgebot.json"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }
}
