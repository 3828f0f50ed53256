use notedraft_browser::run_post;
use notedraft_core::{resolve_auth_source, Config, DraftPayload, Paths, AUTH_ENV};
use std::path::PathBuf;

/// Create a draft from `content` (a payload path or inline JSON).
pub async fn run(content: &str, auth_file: Option<PathBuf>, headless: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let draft = DraftPayload::from_content_arg(content)?;
    draft.validate()?;

    let env_auth = std::env::var(AUTH_ENV).ok();
    let source = resolve_auth_source(
        auth_file.as_deref(),
        env_auth.as_deref(),
        &config.profile_dir(&paths),
    );
    println!("Using {}", source.describe());

    let outcome = run_post(&config, &draft, &source, headless).await?;
    if outcome.images_uploaded > 0 {
        println!("Uploaded {} image(s).", outcome.images_uploaded);
    }
    Ok(())
}
