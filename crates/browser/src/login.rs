//! Interactive login capture: the user signs in by hand, the session is exported.

use notedraft_core::{Config, Error, Result};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use crate::page::{CdpPage, NotePage};
use crate::session::{BrowserEngine, BrowserSession, LaunchOptions, ProfileDir};

#[derive(Debug, Clone)]
pub struct CaptureSummary {
    pub path: PathBuf,
    pub cookie_count: usize,
}

/// Open the login page in a visible browser, wait for Enter on stdin, then
/// save cookies and localStorage to `output`.
pub async fn capture_auth_state(config: &Config, output: &Path) -> Result<CaptureSummary> {
    let launch = LaunchOptions {
        browser_path: config.browser.path.clone(),
        engine: BrowserEngine::from_name(&config.browser.engine),
        headed: true,
        window_width: config.browser.window_width,
        window_height: config.browser.window_height,
    };

    println!("Launching browser for login...");
    let profile = ProfileDir::temporary().map_err(Error::Browser)?;
    let session = BrowserSession::launch(&launch, profile)
        .await
        .map_err(Error::Browser)?;

    let result = async {
        CdpPage::new(&session.cdp).goto(&config.login_url()).await?;

        let rule = "=".repeat(60);
        println!("\n{}", rule);
        println!("PLEASE LOG IN TO NOTE.COM IN THE BROWSER WINDOW.");
        println!("Once you are successfully logged in (and see your dashboard/icon),");
        println!("press Enter in this terminal to save the authentication state.");
        println!("{}\n", rule);
        println!("Press Enter after you have logged in...");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        let state = session
            .export_storage_state()
            .await
            .map_err(Error::Browser)?;
        state.save(output)?;

        let path = std::fs::canonicalize(output).unwrap_or_else(|_| output.to_path_buf());
        info!(path = %path.display(), cookies = state.cookies.len(), "Authentication state saved");
        Ok::<_, Error>(CaptureSummary {
            path,
            cookie_count: state.cookies.len(),
        })
    }
    .await;

    session.close().await;
    result
}
