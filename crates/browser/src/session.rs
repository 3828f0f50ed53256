//! Browser process lifecycle.
//!
//! Launches a Chromium-family browser with remote debugging, connects a CDP
//! client to its first page target, and moves login state in and out of it.

use notedraft_core::auth::{OriginState, StateCookie, StorageEntry, StorageState};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use super::cdp::CdpClient;

/// Supported browser engines. Both speak CDP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserEngine {
    Chrome,
    Edge,
}

impl BrowserEngine {
    pub fn from_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Edge => "edge",
        }
    }

    fn all() -> [BrowserEngine; 2] {
        [Self::Chrome, Self::Edge]
    }
}

/// Where the browser keeps its user data for this run.
#[derive(Debug)]
pub enum ProfileDir {
    /// Survives the run; carries the login across invocations.
    Persistent(PathBuf),
    /// Removed when the session is dropped.
    Temporary(TempDir),
}

impl ProfileDir {
    pub fn temporary() -> Result<Self, String> {
        tempfile::Builder::new()
            .prefix("notedraft-profile-")
            .tempdir()
            .map(Self::Temporary)
            .map_err(|e| format!("Failed to create temporary profile: {}", e))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Persistent(path) => path,
            Self::Temporary(dir) => dir.path(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Explicit binary; tried before any discovered browser.
    pub browser_path: Option<String>,
    pub engine: BrowserEngine,
    pub headed: bool,
    pub window_width: u32,
    pub window_height: u32,
}

/// A running browser with its CDP connection.
pub struct BrowserSession {
    pub cdp: CdpClient,
    pub debug_port: u16,
    pub headed: bool,
    pub binary: String,
    process: Child,
    profile: ProfileDir,
}

impl BrowserSession {
    /// Launch using the first browser that starts: the configured binary, the
    /// preferred engine, then any other installed engine.
    pub async fn launch(opts: &LaunchOptions, profile: ProfileDir) -> Result<Self, String> {
        let candidates = browser_candidates(opts);
        if candidates.is_empty() {
            return Err(format!(
                "{} not found. Please install it or set browser.path in config.json",
                opts.engine.name()
            ));
        }

        std::fs::create_dir_all(profile.path())
            .map_err(|e| format!("Failed to create user data dir: {}", e))?;

        let mut errors = Vec::new();
        for binary in candidates {
            match launch_binary(&binary, opts, profile.path()).await {
                Ok((process, debug_port, cdp)) => {
                    return Ok(Self {
                        cdp,
                        debug_port,
                        headed: opts.headed,
                        binary,
                        process,
                        profile,
                    });
                }
                Err(e) => {
                    warn!(binary = %binary, error = %e, "Launch failed, trying next browser");
                    errors.push(format!("{}: {}", binary, e));
                }
            }
        }
        Err(format!("No browser could be launched ({})", errors.join("; ")))
    }

    pub fn profile_path(&self) -> &Path {
        self.profile.path()
    }

    /// Seed the browser with exported cookies and per-origin localStorage.
    pub async fn apply_storage_state(&self, state: &StorageState) -> Result<(), String> {
        apply_storage_state(&self.cdp, state).await
    }

    /// Snapshot cookies plus the current page's localStorage.
    pub async fn export_storage_state(&self) -> Result<StorageState, String> {
        export_storage_state(&self.cdp).await
    }

    /// Close the browser. A temporary profile is removed afterwards.
    pub async fn close(mut self) {
        if let Err(e) = self.cdp.send_command("Browser.close", json!({})).await {
            debug!("CDP Browser.close failed (may already be closed): {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.process.wait()).await;
        let _ = self.process.kill().await;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
    }
}

/// Set every cookie, then visit each origin that has localStorage and write its entries.
pub async fn apply_storage_state(cdp: &CdpClient, state: &StorageState) -> Result<(), String> {
    let params: Vec<Value> = state.cookies.iter().map(cookie_param).collect();
    if !params.is_empty() {
        cdp.set_cookies(params).await?;
    }
    for origin in &state.origins {
        if origin.local_storage.is_empty() {
            continue;
        }
        let mut loaded = cdp.subscribe_event("Page.loadEventFired").await;
        cdp.navigate(&origin.origin).await?;
        let _ = tokio::time::timeout(Duration::from_secs(15), loaded.recv()).await;
        cdp.evaluate_js(&local_storage_script(&origin.local_storage)?)
            .await?;
    }
    info!(
        cookies = state.cookies.len(),
        origins = state.origins.len(),
        "Storage state applied"
    );
    Ok(())
}

/// Script writing `entries` into the current origin's localStorage.
fn local_storage_script(entries: &[StorageEntry]) -> Result<String, String> {
    let pairs: Vec<[&str; 2]> = entries
        .iter()
        .map(|e| [e.name.as_str(), e.value.as_str()])
        .collect();
    Ok(format!(
        "(() => {{ for (const [k, v] of {}) localStorage.setItem(k, v); return true; }})()",
        serde_json::to_string(&pairs).map_err(|e| e.to_string())?
    ))
}

/// All cookies, plus localStorage of whatever http(s) origin the page is on.
pub async fn export_storage_state(cdp: &CdpClient) -> Result<StorageState, String> {
    let cookies = cdp
        .get_all_cookies()
        .await?
        .iter()
        .filter_map(state_cookie_from_cdp)
        .collect();

    let snapshot = cdp
        .evaluate_js("({ origin: location.origin, entries: Object.entries(localStorage) })")
        .await?;

    Ok(StorageState {
        cookies,
        origins: origin_from_snapshot(&snapshot).into_iter().collect(),
        extra: Map::new(),
    })
}

fn origin_from_snapshot(snapshot: &Value) -> Option<OriginState> {
    let origin = snapshot.get("origin")?.as_str()?;
    if !origin.starts_with("http") {
        return None;
    }
    let local_storage = snapshot
        .get("entries")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|pair| {
                    Some(StorageEntry {
                        name: pair.get(0)?.as_str()?.to_string(),
                        value: pair.get(1)?.as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    Some(OriginState {
        origin: origin.to_string(),
        local_storage,
        extra: Map::new(),
    })
}

async fn launch_binary(
    binary: &str,
    opts: &LaunchOptions,
    user_data_dir: &Path,
) -> Result<(Child, u16, CdpClient), String> {
    let debug_port = find_free_port().await?;
    let args = build_browser_args(debug_port, user_data_dir, opts);

    info!(
        binary = binary,
        port = debug_port,
        headed = opts.headed,
        profile = %user_data_dir.display(),
        "Launching browser"
    );

    let mut child = Command::new(binary)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("Failed to launch {}: {}", binary, e))?;

    let connected = async {
        wait_for_cdp_ready(debug_port, 15).await?;
        let page_ws_url = get_page_ws_url(debug_port).await?;
        let cdp = CdpClient::connect(&page_ws_url).await?;
        for domain in ["Page", "Runtime", "DOM", "Network"] {
            cdp.enable_domain(domain).await?;
        }
        cdp.set_viewport(opts.window_width, opts.window_height).await?;
        info!(ws_url = %page_ws_url, "CDP connection established (page target)");
        Ok::<_, String>(cdp)
    }
    .await;

    match connected {
        Ok(cdp) => Ok((child, debug_port, cdp)),
        Err(e) => {
            let _ = child.kill().await;
            Err(e)
        }
    }
}

fn build_browser_args(debug_port: u16, user_data_dir: &Path, opts: &LaunchOptions) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !opts.headed {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        opts.window_width, opts.window_height
    ));
    args.push("about:blank".to_string());
    args
}

/// Binaries to try, in order, without duplicates.
fn browser_candidates(opts: &LaunchOptions) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(path) = opts.browser_path.as_deref().filter(|p| !p.trim().is_empty()) {
        out.push(path.to_string());
    }
    let mut engines = vec![opts.engine];
    engines.extend(BrowserEngine::all().into_iter().filter(|e| *e != opts.engine));
    for engine in engines {
        if let Some(path) = find_browser_binary(engine) {
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
    out
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates = match engine {
        BrowserEngine::Chrome => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                ]
            } else if cfg!(target_os = "linux") {
                vec![
                    "google-chrome", "google-chrome-stable",
                    "chromium", "chromium-browser",
                    "/usr/bin/google-chrome", "/usr/bin/chromium",
                ]
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') {
            if let Ok(path) = which::which(candidate) {
                return Some(path.display().to_string());
            }
        }
    }
    None
}

/// All engines installed on this machine.
pub fn list_available_browsers() -> Vec<(BrowserEngine, String)> {
    BrowserEngine::all()
        .into_iter()
        .filter_map(|engine| find_browser_binary(engine).map(|path| (engine, path)))
        .collect()
}

/// Storage-state cookie to a `Network.CookieParam`.
pub fn cookie_param(cookie: &StateCookie) -> Value {
    let mut param = json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "secure": cookie.secure,
        "httpOnly": cookie.http_only,
        "sameSite": cookie.same_site,
    });
    if !cookie.is_session() {
        param["expires"] = json!(cookie.expires);
    }
    param
}

/// `Network.Cookie` to a storage-state cookie. Returns `None` for malformed entries.
pub fn state_cookie_from_cdp(raw: &Value) -> Option<StateCookie> {
    let session = raw.get("session").and_then(|v| v.as_bool()).unwrap_or(false);
    let expires = raw.get("expires").and_then(|v| v.as_f64()).unwrap_or(-1.0);
    Some(StateCookie {
        name: raw.get("name")?.as_str()?.to_string(),
        value: raw.get("value")?.as_str()?.to_string(),
        domain: raw.get("domain")?.as_str()?.to_string(),
        path: raw
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("/")
            .to_string(),
        expires: if session { -1.0 } else { expires },
        http_only: raw.get("httpOnly").and_then(|v| v.as_bool()).unwrap_or(false),
        secure: raw.get("secure").and_then(|v| v.as_bool()).unwrap_or(false),
        same_site: raw
            .get("sameSite")
            .and_then(|v| v.as_str())
            .unwrap_or("Lax")
            .to_string(),
        extra: Map::new(),
    })
}

async fn find_free_port() -> Result<u16, String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| format!("Failed to bind to find free port: {}", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local addr: {}", e))?
        .port();
    drop(listener);
    Ok(port)
}

/// Polls /json/version until it responds, up to `timeout_secs`.
async fn wait_for_cdp_ready(port: u16, timeout_secs: u64) -> Result<String, String> {
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_secs);
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if start.elapsed() > timeout {
            return Err(format!(
                "Browser CDP not ready after {}s on port {}",
                timeout_secs, port
            ));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// WebSocket URL of the first page target listed by /json/list.
async fn get_page_ws_url(port: u16) -> Result<String, String> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        let Ok(resp) = reqwest::get(&url).await else {
            continue;
        };
        let Ok(targets) = resp.json::<Vec<Value>>().await else {
            continue;
        };
        if let Some(ws_url) = first_page_ws_url(&targets) {
            return Ok(ws_url);
        }
    }

    Err("No page target found after retries".to_string())
}

fn first_page_ws_url(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(|v| v.as_str()))
        .map(|s| s.to_string())
}
