//! Draft payload handed from the writing agent to the posting automation.
//!
//! The payload is a small JSON document (`title`, `body`, `images`) written to a
//! temporary file, consumed once by `notedraft post`, then discarded.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

static HEADING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*$").expect("valid heading regex"));

static IMAGE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[image:(\d+)\]$").expect("valid image marker regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftPayload {
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Absolute paths, in the order they appear in the article.
    #[serde(default)]
    pub images: Vec<PathBuf>,
}

/// One unit of body content, typed into the editor in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyBlock {
    Heading { level: u8, text: String },
    Paragraph(String),
    /// Zero-based index into [`DraftPayload::images`].
    Image(usize),
}

impl DraftPayload {
    pub fn new(title: impl Into<String>, body: impl Into<String>, images: Vec<PathBuf>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            images,
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Interpret a `--content` argument: a path to an existing JSON file, or
    /// the JSON document itself.
    pub fn from_content_arg(arg: &str) -> Result<Self> {
        let path = Path::new(arg);
        if path.is_file() {
            return Self::load(path);
        }
        Self::from_json_str(arg).map_err(|_| {
            Error::Validation(format!("content invalid or file not found: {}", arg))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Checks everything that must hold before a browser is launched.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation(
                "title is missing in the content JSON".to_string(),
            ));
        }
        for image in &self.images {
            if !image.is_absolute() {
                return Err(Error::Validation(format!(
                    "image path must be absolute: {}",
                    image.display()
                )));
            }
            if !image.is_file() {
                return Err(Error::NotFound(format!("image {}", image.display())));
            }
        }
        self.blocks()?;
        Ok(())
    }

    /// Split the body into headings, paragraphs and image slots.
    ///
    /// A line that is exactly `[image:N]` places the N-th image (1-based) at
    /// that point. Images no marker refers to are appended at the end.
    pub fn blocks(&self) -> Result<Vec<BodyBlock>> {
        let mut blocks = Vec::new();
        let mut paragraph: Vec<&str> = Vec::new();
        let mut placed = HashSet::new();

        fn flush(paragraph: &mut Vec<&str>, blocks: &mut Vec<BodyBlock>) {
            if !paragraph.is_empty() {
                blocks.push(BodyBlock::Paragraph(paragraph.join("\n")));
                paragraph.clear();
            }
        }

        for line in self.body.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                flush(&mut paragraph, &mut blocks);
                continue;
            }
            if let Some(caps) = IMAGE_MARKER_RE.captures(trimmed) {
                flush(&mut paragraph, &mut blocks);
                let n: usize = caps[1].parse().unwrap_or(0);
                if n == 0 || n > self.images.len() {
                    return Err(Error::Validation(format!(
                        "body references [image:{}] but {} image(s) were supplied",
                        &caps[1],
                        self.images.len()
                    )));
                }
                placed.insert(n - 1);
                blocks.push(BodyBlock::Image(n - 1));
                continue;
            }
            if let Some(caps) = HEADING_RE.captures(trimmed) {
                flush(&mut paragraph, &mut blocks);
                blocks.push(BodyBlock::Heading {
                    level: caps[1].len() as u8,
                    text: caps[2].to_string(),
                });
                continue;
            }
            paragraph.push(line.trim_end());
        }
        flush(&mut paragraph, &mut blocks);

        for idx in 0..self.images.len() {
            if !placed.contains(&idx) {
                blocks.push(BodyBlock::Image(idx));
            }
        }
        Ok(blocks)
    }
}
