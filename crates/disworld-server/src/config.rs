use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};

use disworld_api::geocode::DEFAULT_GEOCODER_URL;

const DEFAULT_MAP_WIDTH: u32 = 1024;
const DEFAULT_MAP_HEIGHT: u32 = 512;

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub application_id: String,
    pub guild_id: Option<String>,
    pub db_path: PathBuf,
    pub geocoder_url: String,
    pub geocoder_key: Option<String>,
    pub base_map: Option<PathBuf>,
    pub map_width: u32,
    pub map_height: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Blank values count as unset.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| get(key).ok_or_else(|| anyhow!("{} must be set", key));
        let dimension = |key: &str, default: u32| -> Result<u32> {
            match get(key) {
                None => Ok(default),
                Some(raw) => {
                    let value: u32 = raw
                        .parse()
                        .with_context(|| format!("{} is not a number: {}", key, raw))?;
                    if value < 16 {
                        return Err(anyhow!("{} must be at least 16", key));
                    }
                    Ok(value)
                }
            }
        };

        Ok(Self {
            token: required("DISWORLD_TOKEN")?,
            application_id: required("DISWORLD_APPLICATION_ID")?,
            guild_id: get("DISWORLD_GUILD_ID"),
            db_path: PathBuf::from(get("DISWORLD_DB_PATH").unwrap_or_else(|| "disworld.db".into())),
            geocoder_url: get("DISWORLD_GEOCODER_URL").unwrap_or_else(|| DEFAULT_GEOCODER_URL.into()),
            geocoder_key: get("DISWORLD_GEOCODER_KEY"),
            base_map: get("DISWORLD_BASE_MAP").map(PathBuf::from),
            map_width: dimension("DISWORLD_MAP_WIDTH", DEFAULT_MAP_WIDTH)?,
            map_height: dimension("DISWORLD_MAP_HEIGHT", DEFAULT_MAP_HEIGHT)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let config = load(&[("DISWORLD_TOKEN", "t"), ("DISWORLD_APPLICATION_ID", "1")]).unwrap();
        assert_eq!(config.db_path, PathBuf::from("disworld.db"));
        assert_eq!(config.geocoder_url, DEFAULT_GEOCODER_URL);
        assert_eq!((config.map_width, config.map_height), (1024, 512));
        assert!(config.guild_id.is_none());
        assert!(config.base_map.is_none());
    }

    #[test]
    fn token_is_required() {
        let err = load(&[("DISWORLD_APPLICATION_ID", "1")]).unwrap_err();
        assert!(err.to_string().contains("DISWORLD_TOKEN"));

        let err = load(&[("DISWORLD_TOKEN", "  "), ("DISWORLD_APPLICATION_ID", "1")]).unwrap_err();
        assert!(err.to_string().contains("DISWORLD_TOKEN"));
    }

    #[test]
    fn bad_dimensions_are_rejected() {
        let err = load(&[
            ("DISWORLD_TOKEN", "t"),
            ("DISWORLD_APPLICATION_ID", "1"),
            ("DISWORLD_MAP_WIDTH", "wide"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("DISWORLD_MAP_WIDTH"));

        assert!(
            load(&[
                ("DISWORLD_TOKEN", "t"),
                ("DISWORLD_APPLICATION_ID", "1"),
                ("DISWORLD_MAP_HEIGHT", "8"),
            ])
            .is_err()
        );
    }
}
