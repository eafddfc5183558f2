//! Config file commands.

use anyhow::bail;
use std::path::Path;

use crate::config::{self, Config};

/// Placeholder for secrets in `config show`.
const REDACTED: &str = "********";

/// Write a default config file
pub fn cmd_config_init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    config::save(&Config::default(), path)?;
    println!("Wrote default config to {}", path.display());
    println!("Fill in [source], [spotify], [tagger], [lidarr] and [plex], then run `music-curator check`.");
    Ok(())
}

/// Copy of `config` with secrets masked.
fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    for secret in [
        &mut shown.spotify.client_secret,
        &mut shown.tagger.acoustid_api_key,
        &mut shown.lidarr.api_key,
        &mut shown.plex.token,
    ] {
        if secret.is_some() {
            *secret = Some(REDACTED.to_string());
        }
    }
    shown
}

/// Print the effective configuration
pub fn cmd_config_show(path: &Path, config: &Config) -> anyhow::Result<()> {
    println!("# {}", path.display());
    println!("# state store: {}", config.database_path().display());
    println!();
    print!("{}", toml::to_string_pretty(&redacted(config))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        cmd_config_init(&path, false).unwrap();
        assert!(config::load(&path).is_ok());
        assert!(cmd_config_init(&path, false).is_err());
        assert!(cmd_config_init(&path, true).is_ok());
    }

    #[test]
    fn test_secrets_are_masked() {
        let mut config = Config::default();
        config.plex.token = Some("abc".into());
        let shown = redacted(&config);
        assert_eq!(shown.plex.token.as_deref(), Some(REDACTED));
        assert_eq!(shown.lidarr.api_key, None);
    }
}
