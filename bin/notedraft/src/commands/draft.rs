use notedraft_core::DraftPayload;
use std::path::PathBuf;

/// Write a payload file and print its path on stdout.
pub fn new(
    title: String,
    body: String,
    images: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    let payload = DraftPayload::new(title, body, images);
    payload.validate()?;

    let path = output.unwrap_or_else(|| {
        std::env::temp_dir().join(format!("note_draft_{}.json", uuid::Uuid::new_v4()))
    });
    payload.save(&path)?;
    println!("{}", path.display());
    Ok(path)
}
