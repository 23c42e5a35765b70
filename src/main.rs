use anyhow::Result;
use clap::{Parser, Subcommand};
use selfheal::config::{Credentials, Settings};
use selfheal::git_ops::{self, GitCli};
use selfheal::github::GitHubClient;
use selfheal::ledger::AttemptLedger;
use selfheal::logging;
use selfheal::orchestrator::{Orchestrator, Outcome};
use selfheal::patch::PatchApplier;
use selfheal::remediation::OpenAiClient;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "selfheal",
    about = "Repair the latest failed CI run with an automated patch",
    version
)]
struct Args {
    /// Path inside the repository to heal (defaults to current directory)
    #[arg(long, default_value = ".", global = true)]
    repo: PathBuf,

    /// Settings file (defaults to .selfheal.toml at the repository root)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the latest failure and try to heal it (default)
    Run {
        /// Write the patch but do not apply, commit, push, or count the attempt
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recorded attempts without contacting any service
    Status {
        /// Only show this commit
        sha: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let repo_root = git_ops::discover_root(&args.repo)?;
    let settings = Settings::load(&repo_root, args.config.as_deref())?;

    match args.command.unwrap_or(Command::Run { dry_run: false }) {
        Command::Run { dry_run } => {
            run(&repo_root, settings, dry_run).await?;
        }
        Command::Status { sha } => {
            let ledger =
                AttemptLedger::load(repo_root.join(&settings.state_file), settings.max_attempts)?;
            for line in status_lines(&ledger, sha.as_deref()) {
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn run(repo_root: &Path, settings: Settings, dry_run: bool) -> Result<Outcome> {
    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(missing) => {
            let outcome = Outcome::MissingConfiguration { missing };
            info!("{}", outcome.reason());
            return Ok(outcome);
        }
    };

    let github = GitHubClient::new(
        &settings.github_api_url,
        &credentials.repository,
        &credentials.github_token,
    )?;
    let generator = OpenAiClient::new(
        &settings.remediation_api_url,
        &credentials.remediation_api_key,
        &settings.model,
    )?;
    let applier = PatchApplier::new(
        GitCli::new(repo_root),
        repo_root,
        &settings.patch_file,
        &settings.commit_message,
        &settings.remote,
        &settings.branch,
    )
    .with_rollback(settings.rollback_on_failure);
    let ledger = AttemptLedger::load(repo_root.join(&settings.state_file), settings.max_attempts)?;

    Orchestrator::new(
        settings,
        credentials.repository,
        github,
        generator,
        applier,
        ledger,
    )
    .dry_run(dry_run)
    .run()
    .await
}

fn status_lines(ledger: &AttemptLedger, sha: Option<&str>) -> Vec<String> {
    let ceiling = ledger.ceiling();
    if let Some(sha) = sha {
        return vec![format!(
            "{}: {}/{} attempts, {} remaining",
            sha,
            ledger.attempts(sha),
            ceiling,
            ledger.remaining(sha)
        )];
    }

    let state = ledger.state();
    if state.is_empty() {
        return vec![format!("No attempts recorded in {}", ledger.path().display())];
    }

    let mut lines = vec![format!(
        "{} commit(s) in {} (ceiling {})",
        state.len(),
        ledger.path().display(),
        ceiling
    )];
    for (sha, count) in state.iter() {
        let marker = if count >= ceiling { "  exhausted" } else { "" };
        lines.push(format!("  {}  {}/{}{}", sha, count, ceiling, marker));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn ledger_with(content: &str) -> (tempfile::TempDir, AttemptLedger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, content).unwrap();
        let ledger = AttemptLedger::load(&path, 3).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_args_default_to_run() {
        let args = Args::parse_from(["selfheal"]);
        assert!(args.command.is_none());
        assert_eq!(args.repo, PathBuf::from("."));
    }

    #[test]
    fn test_args_dry_run_and_globals() {
        let args = Args::parse_from(["selfheal", "run", "--dry-run", "-v", "--repo", "/tmp/x"]);
        assert!(matches!(args.command, Some(Command::Run { dry_run: true })));
        assert!(args.verbose);
        assert_eq!(args.repo, PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_status_single_sha() {
        let (_dir, ledger) = ledger_with(r#"{"abc": 2}"#);
        assert_eq!(
            status_lines(&ledger, Some("abc")),
            vec!["abc: 2/3 attempts, 1 remaining"]
        );
        assert_eq!(
            status_lines(&ledger, Some("zzz")),
            vec!["zzz: 0/3 attempts, 3 remaining"]
        );
    }

    #[test]
    fn test_status_lists_entries_and_marks_exhausted() {
        let (_dir, ledger) = ledger_with(r#"{"aaa": 3, "bbb": 1}"#);
        let lines = status_lines(&ledger, None);
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("2 commit(s)"));
        assert_eq!(lines[1], "  aaa  3/3  exhausted");
        assert_eq!(lines[2], "  bbb  1/3");
    }

    #[test]
    fn test_status_empty_ledger() {
        let (_dir, ledger) = ledger_with("");
        let lines = status_lines(&ledger, None);
        assert!(lines[0].starts_with("No attempts recorded"));
    }
}
