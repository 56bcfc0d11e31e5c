//! SIGHUP hot-reload (section 4.O, "hot" config). The reload file holds
//! `KEY=VALUE` lines for the fields listeners are allowed to change without
//! a restart: `advertise-routes` (comma-separated) and `log-level`. A
//! missing file is a no-op; only a warning is logged.

use std::path::Path;

use tracing::warn;

use crate::config::HotConfig;

/// Parses `path` and returns the new hot config, or `None` if the file does
/// not exist. Unrecognized keys are ignored so forward-incompatible reload
/// files don't fail a reload outright.
pub fn parse_reload_file(path: &Path, current: &HotConfig) -> Option<HotConfig> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "reload requested but no reload file present");
            return None;
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read reload file");
            return None;
        }
    };

    let mut next = current.clone();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line, "ignoring malformed reload line");
            continue;
        };
        match key.trim() {
            "advertise-routes" => {
                next.advertise_routes = value
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            "log-level" => {
                next.log_level = value.trim().to_string();
            }
            other => warn!(key = other, "unrecognized reload key, ignoring"),
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> std::path::PathBuf {
        let suffix = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("wgmeshd-reload-{name}-{suffix}.reload"));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_returns_none() {
        let path = std::env::temp_dir().join("wgmeshd-reload-does-not-exist.reload");
        let current = HotConfig::default();
        assert!(parse_reload_file(&path, &current).is_none());
    }

    #[test]
    fn parses_advertise_routes_and_log_level() {
        let path = scratch_file("basic", "advertise-routes=10.1.0.0/24, 10.2.0.0/24\nlog-level=debug\n");
        let current = HotConfig::default();
        let next = parse_reload_file(&path, &current).unwrap();
        assert_eq!(next.advertise_routes, vec!["10.1.0.0/24".to_string(), "10.2.0.0/24".to_string()]);
        assert_eq!(next.log_level, "debug");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn ignores_unknown_keys_and_comments() {
        let path = scratch_file("unknown", "# comment\nunknown-key=value\nlog-level=warn\n");
        let current = HotConfig::default();
        let next = parse_reload_file(&path, &current).unwrap();
        assert_eq!(next.log_level, "warn");
        assert_eq!(next.advertise_routes, current.advertise_routes);
        std::fs::remove_file(&path).unwrap();
    }
}
