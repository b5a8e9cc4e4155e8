//! Argument arrays for every governed-tool operation.
//!
//! Each builder is a pure mapping from typed parameters to a [`CommandSpec`].
//! Nothing here spawns, so argument shapes can be asserted directly.

use std::path::Path;
use std::time::Duration;

use lantern_transport::CancelToken;
use lantern_types::{Feature, ReceiptQuery, Timeouts};

/// Appended to every read operation.
const FORMAT_JSON: [&str; 2] = ["--format", "json"];

/// Which configured timeout a command runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutClass {
    Default,
    /// Operations the tool documents as slow.
    Slow,
    Probe,
    Fixed(Duration),
}

impl TimeoutClass {
    #[must_use]
    pub fn resolve(self, timeouts: &Timeouts) -> Duration {
        match self {
            Self::Default => timeouts.default_timeout(),
            Self::Slow => timeouts.slow(),
            Self::Probe => timeouts.probe(),
            Self::Fixed(d) => d,
        }
    }
}

/// One invocation: the argument tokens plus how to run them.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub timeout: TimeoutClass,
    pub cancel: Option<CancelToken>,
}

impl CommandSpec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
            timeout: TimeoutClass::Default,
            cancel: None,
        }
    }

    /// Subcommand name; keys the exit-code policy.
    #[must_use]
    pub fn command(&self) -> &str {
        self.args.first().map_or("", String::as_str)
    }

    #[must_use]
    pub fn with_stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: TimeoutClass) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn json(mut self) -> Self {
        self.args.extend(FORMAT_JSON.iter().map(ToString::to_string));
        self
    }

    fn slow(self) -> Self {
        self.with_timeout(TimeoutClass::Slow)
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Positional path token. A relative path that starts with `-` gets a `./`
/// prefix so the tool cannot read it as an option.
fn positional_path(path: &Path) -> String {
    let arg = path_arg(path);
    if arg.starts_with('-') {
        format!(".{}{arg}", std::path::MAIN_SEPARATOR)
    } else {
        arg
    }
}

#[must_use]
pub fn check_file(path: &Path) -> CommandSpec {
    CommandSpec::new(["check".to_string(), positional_path(path)]).json()
}

/// Check unsaved editor content. The buffer travels on stdin, never as an argument.
#[must_use]
pub fn check_buffer(content: &str, filepath: &Path) -> CommandSpec {
    let payload = serde_json::json!({
        "content": content,
        "filepath": path_arg(filepath),
    });
    CommandSpec::new(["check", "--stdin"])
        .json()
        .with_stdin(payload.to_string())
}

#[must_use]
pub fn state() -> CommandSpec {
    CommandSpec::new(["state"]).json()
}

#[must_use]
pub fn intent() -> CommandSpec {
    CommandSpec::new(["intent", "show"]).json()
}

/// `text` travels as a single positional token. Not every tool build accepts
/// a `--` terminator here, so text that looks like an option (for example
/// `--help`) is read by the tool as that option.
#[must_use]
pub fn set_intent(text: &str) -> CommandSpec {
    CommandSpec::new(["intent", "set", text])
}

#[must_use]
pub fn clear_intent() -> CommandSpec {
    CommandSpec::new(["intent", "clear"])
}

#[must_use]
pub fn list_overrides() -> CommandSpec {
    CommandSpec::new(["override", "list"]).json()
}

#[must_use]
pub fn compare(base: &str, head: &str) -> CommandSpec {
    CommandSpec::new(["compare", base, head]).json().slow()
}

#[must_use]
pub fn doctor() -> CommandSpec {
    CommandSpec::new(["doctor"]).json().slow()
}

#[must_use]
pub fn list_receipts(limit: Option<u32>) -> CommandSpec {
    let mut args = vec!["receipt".to_string(), "list".to_string()];
    if let Some(limit) = limit {
        args.push("--limit".to_string());
        args.push(limit.to_string());
    }
    CommandSpec::new(args).json()
}

#[must_use]
pub fn query_receipts(query: &ReceiptQuery) -> CommandSpec {
    let mut args = vec!["receipt".to_string(), "query".to_string()];
    for (flag, value) in [
        ("--path", &query.path),
        ("--kind", &query.kind),
        ("--since", &query.since),
    ] {
        if let Some(value) = value {
            args.push(flag.to_string());
            args.push(value.clone());
        }
    }
    CommandSpec::new(args).json()
}

#[must_use]
pub fn preflight(paths: &[&Path]) -> CommandSpec {
    let mut args = vec!["preflight".to_string()];
    args.extend(paths.iter().map(|p| positional_path(p)));
    CommandSpec::new(args).json().slow()
}

#[must_use]
pub fn correlator_status() -> CommandSpec {
    CommandSpec::new(["correlator", "status"]).json()
}

#[must_use]
pub fn scope_status() -> CommandSpec {
    CommandSpec::new(["scope", "status"]).json()
}

#[must_use]
pub fn scope_grants() -> CommandSpec {
    CommandSpec::new(["scope", "grants"]).json()
}

#[must_use]
pub fn list_scars() -> CommandSpec {
    CommandSpec::new(["scar", "list"]).json()
}

#[must_use]
pub fn list_shields() -> CommandSpec {
    CommandSpec::new(["shield", "list"]).json()
}

#[must_use]
pub fn scar_history(limit: Option<u32>) -> CommandSpec {
    let mut args = vec!["scar".to_string(), "history".to_string()];
    if let Some(limit) = limit {
        args.push("--limit".to_string());
        args.push(limit.to_string());
    }
    CommandSpec::new(args).json()
}

#[must_use]
pub fn kernel_status() -> CommandSpec {
    CommandSpec::new(["kernel", "status"]).json()
}

#[must_use]
pub fn oracle_status() -> CommandSpec {
    CommandSpec::new(["oracle", "status"]).json()
}

#[must_use]
pub fn drift_report() -> CommandSpec {
    CommandSpec::new(["drift"]).json().slow()
}

#[must_use]
pub fn probe(feature: Feature) -> CommandSpec {
    CommandSpec::new(feature.probe_args()).with_timeout(TimeoutClass::Probe)
}
