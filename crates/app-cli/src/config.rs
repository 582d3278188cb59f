use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use harvest_google::OAuthConfig;
use harvest_sync::SyncConfig;

pub fn load_oauth_config() -> Result<OAuthConfig, String> {
    let client_id = env::var("GOOGLE_CLIENT_ID")
        .map_err(|_| "GOOGLE_CLIENT_ID env var not set".to_string())?;
    let client_secret = env::var("GOOGLE_CLIENT_SECRET")
        .map_err(|_| "GOOGLE_CLIENT_SECRET env var not set".to_string())?;
    Ok(OAuthConfig {
        client_id,
        client_secret,
    })
}

pub fn load_data_dir() -> Result<PathBuf, String> {
    let data_dir = env::var("HARVEST_DATA_DIR").unwrap_or_else(|_| {
        let home = env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        format!("{home}/.harvest")
    });
    std::fs::create_dir_all(&data_dir)
        .map_err(|e| format!("failed to create {data_dir}: {e}"))?;
    Ok(PathBuf::from(data_dir))
}

pub fn load_sync_config() -> Result<SyncConfig, String> {
    sync_config_from(|name| env::var(name).ok())
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("invalid {name}: {e}")),
    }
}

/// Overlay the `HARVEST_*` tunables on [`SyncConfig::default`].
pub fn sync_config_from(lookup: impl Fn(&str) -> Option<String>) -> Result<SyncConfig, String> {
    let mut config = SyncConfig::default();
    if let Some(size) = parse_var::<usize>(&lookup, "HARVEST_BATCH_SIZE")? {
        if size == 0 {
            return Err("invalid HARVEST_BATCH_SIZE: must be at least 1".to_string());
        }
        config.batch_size = size;
    }
    if let Some(ms) = parse_var::<u64>(&lookup, "HARVEST_BATCH_DELAY_MS")? {
        config.batch_delay = Duration::from_millis(ms);
    }
    if let Some(minutes) = parse_var::<u64>(&lookup, "HARVEST_SWEEP_MINUTES")? {
        if minutes == 0 {
            return Err("invalid HARVEST_SWEEP_MINUTES: must be at least 1".to_string());
        }
        config.sweep_interval = Duration::from_secs(minutes * 60);
    }
    Ok(config)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn defaults_when_unset() {
        assert_eq!(sync_config_from(lookup(&[])).unwrap(), SyncConfig::default());
    }

    #[test]
    fn overrides_apply() {
        let config = sync_config_from(lookup(&[
            ("HARVEST_BATCH_SIZE", "50"),
            ("HARVEST_BATCH_DELAY_MS", " 1000 "),
            ("HARVEST_SWEEP_MINUTES", "5"),
        ]))
        .unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.batch_delay, Duration::from_secs(1));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
    }

    #[test]
    fn bad_values_are_reported() {
        let err = sync_config_from(lookup(&[("HARVEST_BATCH_SIZE", "lots")])).unwrap_err();
        assert!(err.starts_with("invalid HARVEST_BATCH_SIZE"));
        assert!(sync_config_from(lookup(&[("HARVEST_BATCH_SIZE", "0")])).is_err());
    }
}
