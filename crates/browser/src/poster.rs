//! Creates a note.com draft from a [`DraftPayload`].

use notedraft_core::config::TimeoutConfig;
use notedraft_core::{AuthSource, BodyBlock, Config, DraftPayload, Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::page::{CdpPage, Key, NotePage};
use crate::session::{BrowserEngine, BrowserSession, LaunchOptions, ProfileDir};

pub const TITLE_SELECTOR: &str = "textarea[placeholder='記事タイトル']";
pub const EDITOR_SELECTOR: &str = "div[contenteditable='true']";
pub const FILE_INPUT_SELECTOR: &str = "input[type='file']";
/// Texts only shown to logged-out visitors.
pub const LOGGED_OUT_MARKERS: [&str; 2] = ["ログイン", "会員登録"];
/// Text of the post button shown once logged in.
pub const POST_BUTTON_TEXT: &str = "投稿";

#[derive(Debug, Clone)]
pub struct PostOptions {
    pub headless: bool,
    pub home_url: String,
    pub new_note_url: String,
    pub timeouts: TimeoutConfig,
    /// Written when a headless run finds itself logged out.
    pub failure_screenshot: PathBuf,
}

impl PostOptions {
    pub fn from_config(config: &Config, headless: bool) -> Self {
        Self {
            headless,
            home_url: format!("{}/", config.base_url()),
            new_note_url: config.new_note_url(),
            timeouts: config.timeouts.clone(),
            failure_screenshot: PathBuf::from("login_failed.png"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostOutcome {
    pub images_uploaded: usize,
    pub images_skipped: usize,
}

/// Run the draft flow on an already open page.
pub async fn post_draft<P: NotePage>(
    page: &P,
    draft: &DraftPayload,
    opts: &PostOptions,
) -> Result<PostOutcome> {
    let blocks = draft.blocks()?;

    println!("Navigating to note.com...");
    page.goto(&opts.home_url).await?;
    ensure_logged_in(page, opts).await?;

    println!("Creating new post...");
    page.goto(&opts.new_note_url).await?;
    open_editor(page, opts).await?;

    println!("Setting Title: {}", draft.title);
    page.focus(TITLE_SELECTOR).await?;
    page.insert_text(&draft.title).await?;

    println!("Setting Body...");
    if page.exists(EDITOR_SELECTOR).await? {
        page.click(EDITOR_SELECTOR).await?;
    } else {
        page.focus(TITLE_SELECTOR).await?;
        page.press_key(Key::Tab).await?;
    }
    let outcome = write_body(page, draft, &blocks, opts).await?;

    println!("Draft content inserted. Waiting for auto-save...");
    page.pause(secs(opts.timeouts.autosave_wait_secs)).await;
    println!("\nSUCCESS: Draft created.");

    if !opts.headless {
        println!("Browser open for {}s...", opts.timeouts.headed_linger_secs);
        page.pause(secs(opts.timeouts.headed_linger_secs)).await;
    }
    Ok(outcome)
}

async fn ensure_logged_in<P: NotePage>(page: &P, opts: &PostOptions) -> Result<()> {
    let mut logged_out = false;
    for marker in LOGGED_OUT_MARKERS {
        if page.has_exact_text(marker).await? {
            logged_out = true;
            break;
        }
    }
    if !logged_out {
        return Ok(());
    }

    println!("Not logged in.");
    if opts.headless {
        if let Err(e) = page.screenshot(&opts.failure_screenshot).await {
            warn!(error = %e, "Could not save login failure screenshot");
        }
        return Err(Error::Auth(format!(
            "login required in headless mode; check the auth file or the {} secret (screenshot: {})",
            notedraft_core::AUTH_ENV,
            opts.failure_screenshot.display()
        )));
    }

    println!("PLEASE LOGIN MANUALLY.");
    let wait = secs(opts.timeouts.login_wait_secs);
    if page.wait_for_button_text(POST_BUTTON_TEXT, wait).await? {
        info!("Manual login detected");
        Ok(())
    } else {
        Err(Error::Timeout(format!(
            "login not completed within {}s",
            opts.timeouts.login_wait_secs
        )))
    }
}

/// Wait for the title field, reloading once if the editor is slow to appear.
async fn open_editor<P: NotePage>(page: &P, opts: &PostOptions) -> Result<()> {
    let wait = secs(opts.timeouts.editor_wait_secs);
    if page.wait_for_selector(TITLE_SELECTOR, wait).await? {
        return Ok(());
    }
    println!("Editor did not load. Retrying...");
    page.reload().await?;
    if page.wait_for_selector(TITLE_SELECTOR, wait).await? {
        return Ok(());
    }
    Err(Error::Timeout(format!(
        "editor did not load within {}s after reload",
        opts.timeouts.editor_wait_secs
    )))
}

/// Editor text for a heading. The editor has two heading sizes.
pub fn heading_text(level: u8, text: &str) -> String {
    let marks = if level <= 2 { "##" } else { "###" };
    format!("{} {}", marks, text)
}

async fn write_body<P: NotePage>(
    page: &P,
    draft: &DraftPayload,
    blocks: &[BodyBlock],
    opts: &PostOptions,
) -> Result<PostOutcome> {
    let mut outcome = PostOutcome::default();

    for (i, block) in blocks.iter().enumerate() {
        if i > 0 {
            page.press_key(Key::Enter).await?;
        }
        match block {
            BodyBlock::Heading { level, text } => {
                page.insert_text(&heading_text(*level, text)).await?;
            }
            BodyBlock::Paragraph(text) => {
                for (j, line) in text.lines().enumerate() {
                    if j > 0 {
                        page.press_key(Key::Enter).await?;
                    }
                    page.insert_text(line).await?;
                }
            }
            BodyBlock::Image(idx) => {
                let Some(path) = draft.images.get(*idx) else {
                    continue;
                };
                if page
                    .set_input_files(FILE_INPUT_SELECTOR, std::slice::from_ref(path))
                    .await?
                {
                    info!(image = %path.display(), "Image uploaded");
                    page.pause(secs(opts.timeouts.upload_wait_secs)).await;
                    outcome.images_uploaded += 1;
                } else {
                    warn!(image = %path.display(), "Editor exposes no file input, skipping image");
                    outcome.images_skipped += 1;
                }
            }
        }
    }
    if outcome.images_skipped > 0 {
        println!("Note: {} image(s) could not be uploaded.", outcome.images_skipped);
    }
    Ok(outcome)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Launch a browser for `source`, run the draft flow, close the browser.
pub async fn run_post(
    config: &Config,
    draft: &DraftPayload,
    source: &AuthSource,
    headless: bool,
) -> Result<PostOutcome> {
    draft.validate()?;
    let state = source.storage_state()?;

    let profile = match source {
        AuthSource::Profile(dir) => ProfileDir::Persistent(dir.clone()),
        _ => ProfileDir::temporary().map_err(Error::Browser)?,
    };
    let launch = LaunchOptions {
        browser_path: config.browser.path.clone(),
        engine: BrowserEngine::from_name(&config.browser.engine),
        headed: !headless,
        window_width: config.browser.window_width,
        window_height: config.browser.window_height,
    };

    println!("Starting Browser...");
    info!(source = %source.describe(), headless, "Starting draft run");
    let session = BrowserSession::launch(&launch, profile)
        .await
        .map_err(Error::Browser)?;

    let result = async {
        if let Some(state) = &state {
            session
                .apply_storage_state(state)
                .await
                .map_err(Error::Browser)?;
        }
        let page = CdpPage::new(&session.cdp);
        post_draft(&page, draft, &PostOptions::from_config(config, headless)).await
    }
    .await;

    session.close().await;
    result
}
