//! The page operations the draft flow needs, and their CDP implementation.

use async_trait::async_trait;
use base64::Engine;
use notedraft_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::cdp::CdpClient;

const POLL_INTERVAL: Duration = Duration::from_millis(200);
const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Enter,
    Tab,
}

/// Browser page as seen by the posting flow.
#[async_trait]
pub trait NotePage: Send + Sync {
    /// Navigate and wait for the load event.
    async fn goto(&self, url: &str) -> Result<()>;
    async fn reload(&self) -> Result<()>;
    /// `Ok(false)` when the selector did not appear in time.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool>;
    async fn exists(&self, selector: &str) -> Result<bool>;
    /// Whether a rendered element's trimmed text equals `text` exactly.
    async fn has_exact_text(&self, text: &str) -> Result<bool>;
    /// Waits for a button whose text contains `text`.
    async fn wait_for_button_text(&self, text: &str, timeout: Duration) -> Result<bool>;
    async fn click(&self, selector: &str) -> Result<()>;
    async fn focus(&self, selector: &str) -> Result<()>;
    async fn insert_text(&self, text: &str) -> Result<()>;
    async fn press_key(&self, key: Key) -> Result<()>;
    /// `Ok(false)` when no element matches the selector.
    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool>;
    async fn screenshot(&self, path: &Path) -> Result<()>;
    async fn pause(&self, duration: Duration);
}

fn js_string(s: &str) -> String {
    // A JSON string literal is a valid JS string literal.
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn browser_err(e: String) -> Error {
    Error::Browser(e)
}

/// [`NotePage`] over a live CDP connection.
pub struct CdpPage<'a> {
    cdp: &'a CdpClient,
}

impl<'a> CdpPage<'a> {
    pub fn new(cdp: &'a CdpClient) -> Self {
        Self { cdp }
    }

    async fn eval_bool(&self, expression: &str) -> Result<bool> {
        let value = self.cdp.evaluate_js(expression).await.map_err(browser_err)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn poll(&self, expression: &str, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            // Evaluation can fail transiently while a navigation swaps the document.
            match self.cdp.evaluate_js(expression).await {
                Ok(Value::Bool(true)) => return Ok(true),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "Poll evaluation failed"),
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_loaded(&self, mut loaded: tokio::sync::mpsc::Receiver<Value>) {
        if tokio::time::timeout(LOAD_TIMEOUT, loaded.recv()).await.is_err() {
            debug!("Load event not seen within {}s", LOAD_TIMEOUT.as_secs());
        }
    }
}

#[async_trait]
impl NotePage for CdpPage<'_> {
    async fn goto(&self, url: &str) -> Result<()> {
        let loaded = self.cdp.subscribe_event("Page.loadEventFired").await;
        self.cdp.navigate(url).await.map_err(browser_err)?;
        self.wait_loaded(loaded).await;
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let loaded = self.cdp.subscribe_event("Page.loadEventFired").await;
        self.cdp.reload().await.map_err(browser_err)?;
        self.wait_loaded(loaded).await;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<bool> {
        let expr = format!("document.querySelector({}) !== null", js_string(selector));
        self.poll(&expr, timeout).await
    }

    async fn exists(&self, selector: &str) -> Result<bool> {
        let expr = format!("document.querySelector({}) !== null", js_string(selector));
        self.eval_bool(&expr).await
    }

    async fn has_exact_text(&self, text: &str) -> Result<bool> {
        let expr = format!(
            "(() => {{ const t = {}; return Array.from(document.querySelectorAll('body *')).some(el => \
             el.getClientRects().length > 0 && (el.innerText || '').trim() === t); }})()",
            js_string(text)
        );
        self.eval_bool(&expr).await
    }

    async fn wait_for_button_text(&self, text: &str, timeout: Duration) -> Result<bool> {
        let expr = format!(
            "(() => {{ const t = {}; return Array.from(document.querySelectorAll('button')).some(b => \
             (b.innerText || '').includes(t)); }})()",
            js_string(text)
        );
        self.poll(&expr, timeout).await
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return null; \
             el.scrollIntoView({{block: 'center'}}); const r = el.getBoundingClientRect(); \
             return {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }}; }})()",
            js_string(selector)
        );
        let point = self.cdp.evaluate_js(&expr).await.map_err(browser_err)?;
        let (Some(x), Some(y)) = (
            point.get("x").and_then(|v| v.as_f64()),
            point.get("y").and_then(|v| v.as_f64()),
        ) else {
            return Err(Error::Browser(format!("element not found: {}", selector)));
        };
        for event in ["mousePressed", "mouseReleased"] {
            self.cdp
                .dispatch_mouse_event(event, x, y, 1)
                .await
                .map_err(browser_err)?;
        }
        Ok(())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        let expr = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); return true; }})()",
            js_string(selector)
        );
        if self.eval_bool(&expr).await? {
            Ok(())
        } else {
            Err(Error::Browser(format!("element not found: {}", selector)))
        }
    }

    async fn insert_text(&self, text: &str) -> Result<()> {
        self.cdp.insert_text(text).await.map_err(browser_err)
    }

    async fn press_key(&self, key: Key) -> Result<()> {
        let (name, code, text) = match key {
            Key::Enter => ("Enter", 13, Some("\r")),
            Key::Tab => ("Tab", 9, None),
        };
        self.cdp
            .dispatch_key_event("keyDown", name, name, code, text)
            .await
            .map_err(browser_err)?;
        self.cdp
            .dispatch_key_event("keyUp", name, name, code, None)
            .await
            .map_err(browser_err)
    }

    async fn set_input_files(&self, selector: &str, files: &[PathBuf]) -> Result<bool> {
        let expr = format!("document.querySelector({})", js_string(selector));
        let Some(object_id) = self.cdp.evaluate_handle(&expr).await.map_err(browser_err)? else {
            return Ok(false);
        };
        let files = files.iter().map(|p| p.display().to_string()).collect();
        self.cdp
            .set_file_input_files_by_object(files, &object_id)
            .await
            .map_err(browser_err)?;
        Ok(true)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let data = self.cdp.screenshot().await.map_err(browser_err)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Browser(format!("invalid screenshot data: {}", e)))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    async fn pause(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(
            js_string("textarea[placeholder='記事タイトル']"),
            "\"textarea[placeholder='記事タイトル']\""
        );
        assert_eq!(js_string("a\"b\n"), r#""a\"b\n""#);
    }
}
