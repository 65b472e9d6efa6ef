use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::fs;
use url::Url;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct ConfigFile {
    pub server_url: Option<Url>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    upchunk_server_url: Option<Url>,
}

pub struct Config {
    pub server_url: Url,
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let server_url = override_config
        .upchunk_server_url
        .or(base.server_url)
        .ok_or(anyhow!(
            "No upload server URL provided; run `upchunk config` or set UPCHUNK_SERVER_URL"
        ))?;

    Ok(Config { server_url })
}

fn config_path() -> Result<std::path::PathBuf> {
    let project_dirs = directories::ProjectDirs::from("dev", "upchunk", "upchunk")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    Ok(project_dirs.config_dir().join("config.toml"))
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    let config_file = config_path()?;
    let file_config = if let Ok(config) = fs::read_to_string(config_file) {
        toml::from_str(&config)?
    } else {
        ConfigFile::default()
    };

    merge_config(file_config, env_config)
}

pub fn write_config(config: ConfigFile) -> Result<()> {
    let config_file = config_path()?;
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent).context("Unable to create configuration directory")?;
    }
    let contents = toml::to_string_pretty(&config)?;
    fs::write(&config_file, contents)
        .with_context(|| format!("Unable to write {}", config_file.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_config_file() {
        let file = ConfigFile {
            server_url: Some(Url::parse("http://from-file:8000").unwrap()),
        };
        let env = ConfigEnv {
            upchunk_server_url: Some(Url::parse("http://from-env:9000").unwrap()),
        };
        let merged = merge_config(file, env).unwrap();
        assert_eq!(merged.server_url.as_str(), "http://from-env:9000/");
    }

    #[test]
    fn file_value_used_when_env_is_absent() {
        let file = ConfigFile {
            server_url: Some(Url::parse("http://from-file:8000").unwrap()),
        };
        let merged = merge_config(file, ConfigEnv::default()).unwrap();
        assert_eq!(merged.server_url.as_str(), "http://from-file:8000/");
    }

    #[test]
    fn missing_server_url_is_an_error() {
        assert!(merge_config(ConfigFile::default(), ConfigEnv::default()).is_err());
    }
}
