mod config;
mod error;
mod models;
mod poll;
mod utils;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use anyhow::{Context, Result};
use dotenv::dotenv;
use log::{error, info};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use crate::config::{log_level, Settings};
use crate::models::Credentials;
use crate::utils::mail::SmtpNotifier;
use crate::utils::portal::PortalFetcher;

// Single-threaded runtime: one poll cycle at a time, every step awaited in order.
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Loads environment variables from a `.env` file, if present.
    dotenv().ok();

    // Initializes logging with simplelog to the terminal with mixed output (both stdout and stderr) and automatic color support.
    if let Err(e) = TermLogger::init(log_level(), Config::default(), TerminalMode::Mixed, ColorChoice::Auto) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match watch().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

// Prints a label and reads one trimmed line from stdin.
fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

// Loads settings, prompts for secrets and term, then polls until a fatal error.
async fn watch() -> Result<()> {
    let settings = Settings::from_env()?;

    // Secrets are prompted every run and never written anywhere.
    let credentials = Credentials {
        username: prompt("Username: ")?,
        password: rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };
    let term = prompt("Semester: ")?;

    // The mail relay gets its own secret, separate from the portal account.
    let notifier = match &settings.mail {
        Some(mail) => {
            let password = rpassword::prompt_password(format!("Mail password for {}: ", mail.source_email))
                .context("Failed to read mail password")?;
            Some(SmtpNotifier::new(mail.clone(), password)?)
        }
        None => {
            info!("Email notification disabled, running a single check");
            None
        }
    };

    let options = settings.options.clone();
    let fetcher = PortalFetcher { settings, credentials, term };

    poll::run(&fetcher, notifier.as_ref(), &options).await?;
    Ok(())
}
