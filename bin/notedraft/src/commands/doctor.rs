use notedraft_browser::list_available_browsers;
use notedraft_core::{Config, Paths, StorageState, AUTH_ENV, DEFAULT_AUTH_FILE};
use std::path::PathBuf;

/// Report whether a draft run has what it needs.
pub fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!();
    println!("notedraft doctor");
    println!("================");
    println!();

    let mut err_count = 0u32;

    println!("Configuration");
    if paths.config_file().exists() {
        print_ok("Config file", &paths.config_file().display().to_string());
    } else {
        print_warn("No config file", "defaults are used");
    }
    let config = Config::load_or_default(&paths)?;
    println!("  Base URL: {}", config.base_url());
    println!();

    println!("Browser");
    if let Some(path) = config.browser.path.as_deref() {
        if std::path::Path::new(path).exists() {
            print_ok("Configured browser", path);
        } else {
            print_err("Configured browser missing", path);
            err_count += 1;
        }
    }
    let browsers = list_available_browsers();
    if browsers.is_empty() && config.browser.path.is_none() {
        print_err("No Chrome or Edge found", "install one or set browser.path");
        err_count += 1;
    }
    for (engine, path) in &browsers {
        print_ok(engine.name(), path);
    }
    println!();

    println!("Session");
    let profile = config.profile_dir(&paths);
    if profile.is_dir() {
        print_ok("Persistent profile", &profile.display().to_string());
    } else {
        print_warn("No persistent profile yet", "first headed `post` run will ask you to log in");
    }
    let auth_file = auth_file_path();
    report_state(
        &format!("Auth file {}", auth_file.display()),
        auth_file
            .exists()
            .then(|| std::fs::read_to_string(&auth_file).unwrap_or_default()),
        &mut err_count,
    );
    report_state(AUTH_ENV, std::env::var(AUTH_ENV).ok(), &mut err_count);
    println!();

    if err_count == 0 {
        println!("  All good!");
    } else {
        println!("  {} problem(s) found.", err_count);
    }
    println!();
    Ok(())
}

/// The file `auth` and `convert-cookies` write when no `--output` is given.
pub fn auth_file_path() -> PathBuf {
    PathBuf::from(DEFAULT_AUTH_FILE)
}

fn report_state(label: &str, raw: Option<String>, err_count: &mut u32) {
    let Some(raw) = raw else {
        print_warn(&format!("{} not set", label), "");
        return;
    };
    match StorageState::from_json_str(&raw) {
        Ok(state) => {
            let note = state.cookies_for("note.com").len();
            print_ok(label, &format!("{} cookies ({} for note.com)", state.cookies.len(), note));
        }
        Err(e) => {
            print_err(&format!("{} is not valid auth JSON", label), &e.to_string());
            *err_count += 1;
        }
    }
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
