use anyhow::Context;
use notedraft_core::convert_raw_cookies;
use std::path::Path;

/// Convert a raw cookie export at `input` into an auth state at `output`.
pub fn run(input: &Path, output: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("{} not found", input.display()))?;
    let state = convert_raw_cookies(&raw)?;
    state.save(output)?;
    println!(
        "Successfully converted {} to {} ({} cookies)",
        input.display(),
        output.display(),
        state.cookies.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notedraft_core::StorageState;

    #[test]
    fn test_converts_file() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("cookies_raw.json");
        let output = tmp.path().join("note_auth.json");
        std::fs::write(
            &input,
            r#"[{"name": "a", "value": "b", "domain": ".note.com", "session": true}]"#,
        )
        .unwrap();

        run(&input, &output).unwrap();
        let state = StorageState::load(&output).unwrap();
        assert_eq!(state.cookies.len(), 1);
        assert!(state.origins.is_empty());
    }

    #[test]
    fn test_missing_input_names_file() {
        let tmp = tempfile::tempdir().unwrap();
        let err = run(&tmp.path().join("cookies_raw.json"), &tmp.path().join("out.json")).unwrap_err();
        assert!(err.to_string().contains("cookies_raw.json"));
    }
}
