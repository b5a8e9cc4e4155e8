use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use lantern_client::CommandClient;
use lantern_config::LanternConfig;
use lantern_session::Session;
use lantern_types::{CheckStatus, Settings, ToolSettings};
use serde::Serialize;

use crate::{Cli, Command, IntentAction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Ok,
    Findings,
    Error,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => ExitCode::SUCCESS,
            Status::Findings => ExitCode::from(1),
            Status::Error => ExitCode::from(2),
        }
    }
}

fn findings_if(condition: bool) -> Status {
    if condition { Status::Findings } else { Status::Ok }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let cwd = match &cli.cwd {
        Some(cwd) => std::path::absolute(cwd)
            .with_context(|| format!("invalid --cwd {}", cwd.display()))?,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let config = match &cli.config {
        Some(path) => LanternConfig::load_from(path)?,
        None => LanternConfig::load()?.unwrap_or_default(),
    };
    let mut settings = config.resolve(&cwd)?;
    if cli.cwd.is_some() || cli.executable.is_some() {
        let executable = cli
            .executable
            .clone()
            .unwrap_or_else(|| settings.tool.executable().to_path_buf());
        let cwd = if cli.cwd.is_some() {
            cwd
        } else {
            settings.tool.cwd().to_path_buf()
        };
        let timeouts = settings.tool.timeouts();
        settings.tool = ToolSettings::new(executable, cwd)?.with_timeouts(timeouts);
    }
    tracing::debug!(
        executable = %settings.tool.executable().display(),
        cwd = %settings.tool.cwd().display(),
        "settings resolved"
    );
    Ok(settings)
}

pub(crate) async fn run(cli: Cli) -> Result<Status> {
    let settings = load_settings(&cli)?;
    let session = Session::new(settings);
    let client = session.client();

    let status = match cli.command {
        Command::Check {
            path,
            stdin,
            filepath,
        } => check(client, path, stdin, filepath).await?,
        Command::State => {
            print_json(&client.state().await?)?;
            Status::Ok
        }
        Command::Caps => {
            print_json(&client.capabilities().await)?;
            Status::Ok
        }
        Command::Doctor => {
            let report = client.doctor().await?;
            print_json(&report)?;
            findings_if(!report.healthy)
        }
        Command::Preflight { paths } => {
            let paths: Vec<&Path> = paths.iter().map(PathBuf::as_path).collect();
            let report = client.preflight(&paths).await?;
            tracing::debug!(
                status = report.status.as_str(),
                blocked = report.blocked,
                "preflight finished"
            );
            print_json(&report)?;
            findings_if(report.blocked || report.status == CheckStatus::Fail)
        }
        Command::Intent { action } => intent(client, action.unwrap_or(IntentAction::Show)).await?,
        Command::Watch => watch(&session).await?,
    };
    session.dispose();
    Ok(status)
}

async fn check(
    client: &CommandClient,
    path: Option<PathBuf>,
    stdin: bool,
    filepath: Option<PathBuf>,
) -> Result<Status> {
    let report = if stdin {
        let Some(filepath) = filepath else {
            bail!("--stdin requires --filepath");
        };
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("failed to read stdin")?;
        client.check_buffer(&content, &filepath).await?
    } else {
        let Some(path) = path else {
            bail!("check needs a path or --stdin");
        };
        client.check_file(&path).await?
    };
    tracing::debug!(
        status = report.status.as_str(),
        findings = report.findings.len(),
        "check finished"
    );
    print_json(&report)?;
    Ok(findings_if(
        report.has_findings() || report.status == CheckStatus::Fail,
    ))
}

async fn intent(client: &CommandClient, action: IntentAction) -> Result<Status> {
    match action {
        IntentAction::Show => print_json(&client.intent().await?)?,
        IntentAction::Set { text } => {
            client.set_intent(&text).await?;
            print_json(&client.intent().await?)?;
        }
        IntentAction::Clear => {
            client.clear_intent().await?;
            print_json(&serde_json::json!({ "cleared": true }))?;
        }
    }
    Ok(Status::Ok)
}

/// Resolves on Ctrl-C. The handler is installed before this returns.
fn interrupt() -> Result<Pin<Box<dyn Future<Output = ()> + Send>>> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).context("failed to listen for Ctrl-C")?;
        Ok(Box::pin(async move {
            sigint.recv().await;
        }))
    }
    #[cfg(not(unix))]
    {
        Ok(Box::pin(async {
            let _ = tokio::signal::ctrl_c().await;
        }))
    }
}

async fn watch(session: &Session) -> Result<Status> {
    let mut interrupted = interrupt()?;
    session.set_workspace_trusted(true);
    session.activate().await;
    if !session.is_polling() {
        bail!("correlator polling unavailable: {:?}", session.gates());
    }

    let mut alerts = session.subscribe_alerts();
    print_json(&serde_json::json!({ "alerted": *alerts.borrow_and_update() }))?;
    loop {
        tokio::select! {
            changed = alerts.changed() => {
                if changed.is_err() {
                    break;
                }
                let alerted = *alerts.borrow_and_update();
                print_json(&serde_json::json!({ "alerted": alerted }))?;
            }
            () = &mut interrupted => {
                tracing::info!("interrupted");
                break;
            }
        }
    }
    Ok(Status::Ok)
}
