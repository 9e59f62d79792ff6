//! Command-line interface definitions.
//!
//! Nearly everything lives in the YAML settings file; the CLI only points at
//! it, carries the API key, and toggles optional steps.

use clap::Parser;
use std::path::PathBuf;

/// Weekly topic digest: scrape, summarize, draw, email.
///
/// # Examples
///
/// ```sh
/// # Full run with the key from the environment
/// OPENAI_API_KEY=sk-... weekly_digest --config config.yaml
///
/// # Only the economy section, keep the final texts, do not send mail
/// weekly_digest -c config.yaml --topic gazdasag --save-summaries --no-email
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to the YAML settings file
    #[arg(short, long, default_value = "config.yaml")]
    pub config: PathBuf,

    /// OpenAI API key (falls back to generation.credentials_path)
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Only process these topic ids (repeatable)
    #[arg(short, long = "topic")]
    pub topics: Vec<String>,

    /// Render images but skip authentication and delivery
    #[arg(long)]
    pub no_email: bool,

    /// Also write each final summary to a text file next to its image
    #[arg(long)]
    pub save_summaries: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["weekly_digest"]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(cli.topics.is_empty());
        assert!(!cli.no_email);
        assert!(!cli.save_summaries);
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "weekly_digest",
            "-c",
            "/etc/digest.yaml",
            "--topic",
            "kulfold",
            "-t",
            "gazdasag",
            "--no-email",
            "--save-summaries",
            "--openai-api-key",
            "sk-test",
        ]);
        assert_eq!(cli.config, PathBuf::from("/etc/digest.yaml"));
        assert_eq!(cli.topics, vec!["kulfold", "gazdasag"]);
        assert!(cli.no_email);
        assert!(cli.save_summaries);
        assert_eq!(cli.openai_api_key.as_deref(), Some("sk-test"));
    }
}
