//! Exported login state and the rules for choosing where a run gets its session from.
//!
//! The on-disk shape follows the "storage state" layout (`cookies` + `origins`)
//! so exports stay interchangeable with other browser tooling. Fields this
//! crate does not use are carried through untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Environment variable carrying the auth state JSON for remote runs.
pub const AUTH_ENV: &str = "NOTE_AUTH_JSON";

/// Where `auth` and `convert-cookies` write the exported state, relative to the working directory.
pub const DEFAULT_AUTH_FILE: &str = "note_auth.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Unix seconds; `-1` marks a session cookie.
    #[serde(default = "session_expiry")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_same_site")]
    pub same_site: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

fn session_expiry() -> f64 {
    -1.0
}

fn default_same_site() -> String {
    "Lax".to_string()
}

impl StateCookie {
    pub fn is_session(&self) -> bool {
        self.expires < 0.0
    }

    /// Whether this cookie would be sent to `host`.
    pub fn matches_host(&self, host: &str) -> bool {
        let domain = self.domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{}", domain))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginState {
    pub origin: String,
    #[serde(default, rename = "localStorage")]
    pub local_storage: Vec<StorageEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageState {
    #[serde(default)]
    pub cookies: Vec<StateCookie>,
    #[serde(default)]
    pub origins: Vec<OriginState>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StorageState {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Write the state as pretty JSON. On unix the file is readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path)?;
        file.write_all(content.as_bytes())?;
        // mode only applies on create; tighten a pre-existing file too
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn cookies_for(&self, host: &str) -> Vec<&StateCookie> {
        self.cookies.iter().filter(|c| c.matches_host(host)).collect()
    }

    pub fn origin(&self, origin: &str) -> Option<&OriginState> {
        let origin = origin.trim_end_matches('/');
        self.origins
            .iter()
            .find(|o| o.origin.trim_end_matches('/') == origin)
    }
}

/// Cookie as exported by browser cookie-manager extensions.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCookie {
    name: String,
    value: String,
    domain: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    expiration_date: Option<f64>,
    #[serde(default)]
    session: Option<bool>,
    #[serde(default)]
    http_only: bool,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    same_site: Option<String>,
}

fn normalize_same_site(raw: Option<&str>) -> String {
    match raw.map(|s| s.to_ascii_lowercase()).as_deref() {
        Some("no_restriction") | Some("none") => "None".to_string(),
        Some("strict") => "Strict".to_string(),
        _ => "Lax".to_string(),
    }
}

impl From<RawCookie> for StateCookie {
    fn from(raw: RawCookie) -> Self {
        let expires = match (raw.session, raw.expiration_date) {
            (Some(true), _) | (_, None) => session_expiry(),
            (_, Some(ts)) => ts,
        };
        StateCookie {
            name: raw.name,
            value: raw.value,
            domain: raw.domain,
            path: raw
                .path
                .filter(|p| !p.is_empty())
                .unwrap_or_else(default_cookie_path),
            expires,
            http_only: raw.http_only,
            secure: raw.secure,
            same_site: normalize_same_site(raw.same_site.as_deref()),
            extra: Map::new(),
        }
    }
}

/// Turn a raw cookie export into a storage state.
///
/// Accepts either a bare cookie array or a document that already is a
/// storage state, which is returned as-is.
pub fn convert_raw_cookies(raw: &str) -> Result<StorageState> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_array() {
        let cookies: Vec<RawCookie> = serde_json::from_value(value)?;
        return Ok(StorageState {
            cookies: cookies.into_iter().map(StateCookie::from).collect(),
            origins: Vec::new(),
            extra: Map::new(),
        });
    }
    if value.get("cookies").is_some() {
        return Ok(serde_json::from_value(value)?);
    }
    Err(Error::Validation(
        "expected a cookie array or a storage state object".to_string(),
    ))
}

/// Where the browser session for a run comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthSource {
    /// Exported auth state on disk.
    StateFile(PathBuf),
    /// Auth state passed through the environment.
    Inline(StorageState),
    /// Persistent browser profile directory.
    Profile(PathBuf),
}

impl AuthSource {
    pub fn describe(&self) -> String {
        match self {
            Self::StateFile(path) => format!("auth file {}", path.display()),
            Self::Inline(_) => format!("{} environment variable", AUTH_ENV),
            Self::Profile(dir) => format!("persistent profile {}", dir.display()),
        }
    }

    /// The state to seed a fresh browser with, or `None` for a persistent profile.
    pub fn storage_state(&self) -> Result<Option<StorageState>> {
        match self {
            Self::StateFile(path) => StorageState::load(path)
                .map(Some)
                .map_err(|e| Error::Auth(format!("cannot read {}: {}", path.display(), e))),
            Self::Inline(state) => Ok(Some(state.clone())),
            Self::Profile(_) => Ok(None),
        }
    }
}

/// Pick the session source: explicit auth file, then the environment, then the profile.
pub fn resolve_auth_source(
    auth_file: Option<&Path>,
    env_value: Option<&str>,
    profile_dir: &Path,
) -> AuthSource {
    if let Some(path) = auth_file {
        if path.exists() {
            info!(path = %path.display(), "Using auth file");
            return AuthSource::StateFile(path.to_path_buf());
        }
        warn!(path = %path.display(), "Auth file not found, ignoring");
    }

    if let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) {
        match StorageState::from_json_str(raw) {
            Ok(state) => {
                info!(cookies = state.cookies.len(), "Using auth from environment variable");
                return AuthSource::Inline(state);
            }
            Err(e) => warn!(error = %e, "{} is not valid auth JSON", AUTH_ENV),
        }
    }

    info!(dir = %profile_dir.display(), "Using persistent profile");
    AuthSource::Profile(profile_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW_EXPORT: &str = r#"[
        {"domain": ".note.com", "expirationDate": 1893456000.5, "hostOnly": false,
         "httpOnly": true, "name": "_note_session_v5", "path": "/", "sameSite": "no_restriction",
         "secure": true, "session": false, "storeId": "0", "value": "abc"},
        {"domain": "note.com", "hostOnly": true, "httpOnly": false, "name": "pref",
         "sameSite": "unspecified", "secure": false, "session": true, "value": "1"}
    ]"#;

    #[test]
    fn test_convert_extension_export() {
        let state = convert_raw_cookies(RAW_EXPORT).unwrap();
        assert!(state.origins.is_empty());
        assert_eq!(state.cookies.len(), 2);

        let session = &state.cookies[0];
        assert_eq!(session.name, "_note_session_v5");
        assert_eq!(session.expires, 1893456000.5);
        assert_eq!(session.same_site, "None");
        assert!(session.http_only && session.secure);

        let pref = &state.cookies[1];
        assert!(pref.is_session());
        assert_eq!(pref.path, "/");
        assert_eq!(pref.same_site, "Lax");
    }

    #[test]
    fn test_convert_passes_storage_state_through() {
        let raw = r#"{"cookies": [{"name": "a", "value": "b", "domain": "note.com"}],
                      "origins": [{"origin": "https://note.com", "localStorage": [{"name": "k", "value": "v"}]}]}"#;
        let state = convert_raw_cookies(raw).unwrap();
        assert_eq!(state.cookies.len(), 1);
        assert_eq!(state.origin("https://note.com/").unwrap().local_storage[0].value, "v");
    }

    #[test]
    fn test_convert_rejects_other_shapes() {
        assert!(matches!(convert_raw_cookies(r#"{"foo": 1}"#), Err(Error::Validation(_))));
        assert!(matches!(convert_raw_cookies("nope"), Err(Error::Json(_))));
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let raw = r#"{"cookies": [{"name": "a", "value": "b", "domain": "note.com", "partitionKey": "x"}],
                      "origins": [], "savedBy": "someone"}"#;
        let state = StorageState::from_json_str(raw).unwrap();
        let out = serde_json::to_value(&state).unwrap();
        assert_eq!(out["savedBy"], "someone");
        assert_eq!(out["cookies"][0]["partitionKey"], "x");
        assert_eq!(out["cookies"][0]["sameSite"], "Lax");
        assert_eq!(out["cookies"][0]["httpOnly"], false);
    }

    #[test]
    fn test_cookies_for_host() {
        let state = convert_raw_cookies(RAW_EXPORT).unwrap();
        assert_eq!(state.cookies_for("note.com").len(), 2);
        assert_eq!(state.cookies_for("assets.note.com").len(), 2);
        assert!(state.cookies_for("example.com").is_empty());
        assert!(state.cookies_for("notnote.com").is_empty());
    }

    #[test]
    fn test_save_restricts_permissions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("auth").join("note_auth.json");
        convert_raw_cookies(RAW_EXPORT).unwrap().save(&path).unwrap();
        let loaded = StorageState::load(&path).unwrap();
        assert_eq!(loaded.cookies.len(), 2);
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_save_tightens_existing_file() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("note_auth.json");
        std::fs::write(&path, "stale contents that are longer than the new state file").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        StorageState::default().save(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(StorageState::load(&path).unwrap(), StorageState::default());
    }

    #[test]
    fn test_resolve_prefers_existing_auth_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("note_auth.json");
        std::fs::write(&file, r#"{"cookies": [], "origins": []}"#).unwrap();
        let source = resolve_auth_source(Some(&file), Some(r#"{"cookies": []}"#), tmp.path());
        assert_eq!(source, AuthSource::StateFile(file));
    }

    #[test]
    fn test_resolve_missing_file_falls_back_to_env() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.json");
        let env = r#"{"cookies": [{"name": "a", "value": "b", "domain": "note.com"}]}"#;
        match resolve_auth_source(Some(&missing), Some(env), tmp.path()) {
            AuthSource::Inline(state) => assert_eq!(state.cookies.len(), 1),
            other => panic!("unexpected source: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_invalid_env_falls_back_to_profile() {
        let profile = PathBuf::from("/tmp/profile");
        assert_eq!(
            resolve_auth_source(None, Some("not json"), &profile),
            AuthSource::Profile(profile.clone())
        );
        assert_eq!(
            resolve_auth_source(None, Some("   "), &profile),
            AuthSource::Profile(profile.clone())
        );
        assert_eq!(resolve_auth_source(None, None, &profile), AuthSource::Profile(profile));
    }

    #[test]
    fn test_storage_state_from_source() {
        let profile = AuthSource::Profile(PathBuf::from("/p"));
        assert!(profile.storage_state().unwrap().is_none());

        let missing = AuthSource::StateFile(PathBuf::from("/definitely/missing.json"));
        assert!(matches!(missing.storage_state(), Err(Error::Auth(_))));
    }
}
