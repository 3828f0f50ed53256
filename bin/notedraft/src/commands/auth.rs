use notedraft_browser::capture_auth_state;
use notedraft_core::{Config, Paths};
use std::path::Path;

pub async fn run(output: &Path) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    let summary = capture_auth_state(&config, output).await?;
    println!("Authentication state saved to: {}", summary.path.display());
    println!("Captured {} cookies.", summary.cookie_count);
    Ok(())
}
