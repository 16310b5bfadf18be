//! JSON connection profiles.
//!
//! A profile is a serialized `ConnectionSpec`. Passwords are accepted when
//! reading but never written back.

use crate::error::{DbCommError, DbCommResult};
use crate::models::ConnectionSpec;

use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a profile to load.
pub const CONFIG_ENV: &str = "DBCOMM_CONFIG";

/// `<config dir>/dbcomm/connection.json`, when the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("dbcomm").join("connection.json"))
}

/// Parse and validate a profile from JSON text.
pub fn parse_spec(json: &str) -> DbCommResult<ConnectionSpec> {
    let spec: ConnectionSpec = serde_json::from_str(json)?;
    spec.validate()?;
    Ok(spec)
}

/// Load and validate a profile.
pub fn load_spec(path: &Path) -> DbCommResult<ConnectionSpec> {
    let contents = fs::read_to_string(path).map_err(|e| {
        DbCommError::config(format!("Failed to read profile {}: {e}", path.display()))
    })?;
    let spec = parse_spec(&contents).map_err(|e| match e {
        DbCommError::Config { message } => {
            DbCommError::config(format!("{}: {message}", path.display()))
        }
        other => other,
    })?;
    tracing::debug!(path = %path.display(), target = %spec.display_target(), "Profile loaded");
    Ok(spec)
}

/// Write a profile, creating parent directories as needed.
pub fn save_spec(path: &Path, spec: &ConnectionSpec) -> DbCommResult<()> {
    spec.validate()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(spec)?)?;
    tracing::debug!(path = %path.display(), "Profile saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuthMode, SshTunnelSpec};
    use tempfile::tempdir;

    #[test]
    fn test_save_then_load_keeps_settings_but_not_password() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("profiles").join("lab.json");
        let spec = ConnectionSpec::new("db.example.com")
            .with_ldap()
            .with_username("jdoe")
            .with_password("hunter2")
            .with_replica_set("rs0")
            .with_ssh(SshTunnelSpec::new("bastion").with_password("ssh-secret"));

        save_spec(&path, &spec).unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(!raw.contains("ssh-secret"));

        let loaded = load_spec(&path).unwrap();
        assert_eq!(loaded.authentication, AuthMode::Ldap);
        assert_eq!(loaded.replica_set.as_deref(), Some("rs0"));
        assert!(loaded.password.is_none());
        assert_eq!(loaded.ssh.unwrap().host, "bastion");
    }

    #[test]
    fn test_load_rejects_invalid_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "host": "db", "timeout_ms": 0 }"#).unwrap();

        let err = load_spec(&path).unwrap_err();
        assert!(matches!(err, DbCommError::Config { .. }));
        assert!(err.to_string().contains("bad.json"));
    }

    #[test]
    fn test_parse_rejects_unknown_auth_mode() {
        assert!(parse_spec(r#"{ "host": "db", "authentication": "kerberos" }"#).is_err());
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = load_spec(Path::new("/nonexistent/dbcomm.json")).unwrap_err();
        assert_eq!(err.category(), "Config");
    }
}
