mod commands;

use clap::{Parser, Subcommand};
use notedraft_core::DEFAULT_AUTH_FILE;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "notedraft")]
#[command(about = "Create note.com drafts from structured article JSON", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a draft from a JSON payload (title, body, images)
    Post {
        /// Path to the JSON file, or the JSON document itself
        #[arg(long)]
        content: String,

        /// Exported auth state to use instead of the persistent profile
        #[arg(long, alias = "auth_file")]
        auth_file: Option<PathBuf>,

        /// Run without a visible browser window
        #[arg(long)]
        headless: bool,
    },

    /// Log in interactively and export the session for headless runs
    Auth {
        /// Where to write the auth state
        #[arg(short, long, default_value = DEFAULT_AUTH_FILE)]
        output: PathBuf,
    },

    /// Convert a browser-extension cookie export into an auth state file
    ConvertCookies {
        #[arg(short, long, default_value = "cookies_raw.json")]
        input: PathBuf,
        #[arg(short, long, default_value = DEFAULT_AUTH_FILE)]
        output: PathBuf,
    },

    /// Manage draft payload files
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },

    /// Check browser, profile and auth setup
    Doctor,
}

#[derive(Subcommand, Debug)]
enum DraftCommands {
    /// Write a payload file and print its path
    New {
        #[arg(long)]
        title: String,
        /// Body text; `## ` lines become headings
        #[arg(long, default_value = "")]
        body: String,
        /// Image to attach (repeatable, in article order)
        #[arg(long = "image")]
        images: Vec<PathBuf>,
        /// Output path (defaults to a new file in the temp dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Post {
            content,
            auth_file,
            headless,
        } => {
            commands::post::run(&content, auth_file, headless).await?;
        }
        Commands::Auth { output } => {
            commands::auth::run(&output).await?;
        }
        Commands::ConvertCookies { input, output } => {
            commands::convert_cookies::run(&input, &output)?;
        }
        Commands::Draft { command } => match command {
            DraftCommands::New {
                title,
                body,
                images,
                output,
            } => {
                commands::draft::new(title, body, images, output)?;
            }
        },
        Commands::Doctor => {
            commands::doctor::run()?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_args() {
        let cli = Cli::try_parse_from([
            "notedraft", "post", "--content", "/tmp/d.json", "--auth_file", "a.json", "--headless",
        ])
        .unwrap();
        match cli.command {
            Commands::Post {
                content,
                auth_file,
                headless,
            } => {
                assert_eq!(content, "/tmp/d.json");
                assert_eq!(auth_file, Some(PathBuf::from("a.json")));
                assert!(headless);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_post_requires_content() {
        assert!(Cli::try_parse_from(["notedraft", "post"]).is_err());
    }

    #[test]
    fn test_draft_new_repeated_images() {
        let cli = Cli::try_parse_from([
            "notedraft", "draft", "new", "--title", "T", "--image", "/a.png", "--image", "/b.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Draft {
                command: DraftCommands::New { title, body, images, output },
            } => {
                assert_eq!(title, "T");
                assert!(body.is_empty());
                assert_eq!(images, vec![PathBuf::from("/a.png"), PathBuf::from("/b.png")]);
                assert!(output.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_convert_cookies_defaults() {
        let cli = Cli::try_parse_from(["notedraft", "-v", "convert-cookies"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::ConvertCookies { input, output } => {
                assert_eq!(input, PathBuf::from("cookies_raw.json"));
                assert_eq!(output, PathBuf::from("note_auth.json"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_doctor_checks_where_auth_writes() {
        let cli = Cli::try_parse_from(["notedraft", "auth"]).unwrap();
        match cli.command {
            Commands::Auth { output } => assert_eq!(output, commands::doctor::auth_file_path()),
            other => panic!("unexpected command: {:?}", other),
        }
        let cli = Cli::try_parse_from(["notedraft", "convert-cookies"]).unwrap();
        match cli.command {
            Commands::ConvertCookies { output, .. } => {
                assert_eq!(output, commands::doctor::auth_file_path())
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
