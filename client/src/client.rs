use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lantern_transport::{ExecOptions, ExecRequest, ProcessTransport, RawOutput, TokioTransport};
use lantern_types::{
    CapabilitySet, CheckReport, ComparisonReport, CorrelatorStatus, DoctorReport, DriftReport,
    Feature, GovernanceState, Intent, KernelStatus, OracleStatus, OverrideEntry, PREVIEW_CHARS,
    PreflightReport, Receipt, ReceiptQuery, Scar, ScarHistoryEntry, ScopeGrant, ScopeStatus,
    Shield, ToolSettings, failure_message, output_preview,
};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::capabilities::{self, CapabilityCache, Lookup};
use crate::commands::{self, CommandSpec};
use crate::error::ClientError;
use crate::exit_policy::ExitPolicy;
use crate::in_flight::InFlightRegistry;

pub(crate) fn build_request(config: &ToolSettings, spec: CommandSpec) -> ExecRequest {
    let timeout = spec.timeout.resolve(&config.timeouts());
    ExecRequest {
        program: config.executable().to_path_buf(),
        args: spec.args,
        cwd: config.cwd().to_path_buf(),
        options: ExecOptions {
            stdin: spec.stdin,
            timeout,
            cancel: spec.cancel,
        },
    }
}

struct ClientState {
    config: ToolSettings,
    exit_policy: ExitPolicy,
    caps: CapabilityCache,
}

/// Typed access to the governed tool.
///
/// Cheap to share behind an `Arc`. Configuration may be swapped at any time;
/// calls already running keep the configuration they started with.
pub struct CommandClient {
    transport: Arc<dyn ProcessTransport>,
    state: Mutex<ClientState>,
    in_flight: InFlightRegistry,
}

impl std::fmt::Debug for CommandClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandClient")
            .field("config", &self.config())
            .finish_non_exhaustive()
    }
}

impl CommandClient {
    /// Client over real processes with the built-in exit-code policy.
    #[must_use]
    pub fn new(config: ToolSettings) -> Self {
        Self::with_transport(Arc::new(TokioTransport::new()), config, ExitPolicy::default())
    }

    #[must_use]
    pub fn with_transport(
        transport: Arc<dyn ProcessTransport>,
        config: ToolSettings,
        exit_policy: ExitPolicy,
    ) -> Self {
        Self {
            transport,
            state: Mutex::new(ClientState {
                config,
                exit_policy,
                caps: CapabilityCache::default(),
            }),
            in_flight: InFlightRegistry::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn config(&self) -> ToolSettings {
        self.lock().config.clone()
    }

    /// Replace the configuration. A different executable drops cached
    /// capabilities and any probe still running against the old one.
    pub fn set_config(&self, config: ToolSettings) {
        let mut state = self.lock();
        if state.config.executable() != config.executable() {
            info!(
                executable = %config.executable().display(),
                "executable changed; capabilities invalidated"
            );
            state.caps.invalidate();
        }
        state.config = config;
    }

    pub fn set_exit_policy(&self, exit_policy: ExitPolicy) {
        self.lock().exit_policy = exit_policy;
    }

    /// Keys for recurring operations that must not overlap.
    #[must_use]
    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    async fn run(&self, spec: CommandSpec) -> Result<(String, RawOutput), ClientError> {
        let command = spec.command().to_string();
        let (request, policy) = {
            let state = self.lock();
            (build_request(&state.config, spec), state.exit_policy.clone())
        };
        debug!(command = %command, args = ?request.args, "running tool");

        let output = self
            .transport
            .execute(request)
            .await
            .map_err(|err| ClientError::from_transport(&command, err))?;

        if !policy.is_success(&command, output.exit_code) {
            let message = failure_message(&output.stderr, &output.stdout);
            warn!(command = %command, exit_code = output.exit_code, %message, "tool command failed");
            return Err(ClientError::CommandFailed {
                command,
                exit_code: output.exit_code,
                message,
            });
        }
        Ok((command, output))
    }

    /// Run `spec` and decode stdout as `T`.
    pub async fn exec_json<T: DeserializeOwned>(&self, spec: CommandSpec) -> Result<T, ClientError> {
        let (command, output) = self.run(spec).await?;
        serde_json::from_str(&output.stdout).map_err(|source| {
            let preview = output_preview(&output.stdout, PREVIEW_CHARS);
            warn!(command = %command, %preview, "tool printed malformed JSON");
            ClientError::ParseFailed {
                command,
                preview,
                source,
            }
        })
    }

    /// Run `spec` for its side effect; stdout is ignored.
    pub async fn exec_void(&self, spec: CommandSpec) -> Result<(), ClientError> {
        self.run(spec).await.map(|_| ())
    }

    /// Probe once per executable; concurrent callers share one probe.
    pub async fn capabilities(&self) -> CapabilitySet {
        let lookup = {
            let mut state = self.lock();
            let config = state.config.clone();
            let transport = Arc::clone(&self.transport);
            state
                .caps
                .lookup(move || capabilities::spawn_probe(transport, config))
        };
        match lookup {
            Lookup::Ready(caps) => caps,
            Lookup::Await { probe, generation } => {
                let caps = probe.await;
                self.lock().caps.settle(generation, &caps);
                caps
            }
        }
    }

    /// Last probed set, without probing.
    #[must_use]
    pub fn cached_capabilities(&self) -> Option<CapabilitySet> {
        self.lock().caps.cached().cloned()
    }

    /// `false` until a probe has completed and found `feature`.
    #[must_use]
    pub fn has_capability(&self, feature: Feature) -> bool {
        self.lock()
            .caps
            .cached()
            .is_some_and(|caps| caps.has(feature))
    }

    /// Cancel keyed work and kill every child process, including those of a
    /// capability probe nobody awaits any more. Further calls fail with
    /// `Aborted`.
    pub fn dispose(&self) {
        let keyed = self.in_flight.cancel_all();
        self.lock().caps.invalidate();
        let killed = self.transport.terminate_all();
        debug!(keyed, killed, "command client disposed");
    }

    pub async fn check_file(&self, path: &Path) -> Result<CheckReport, ClientError> {
        self.exec_json(commands::check_file(path)).await
    }

    pub async fn check_buffer(&self, content: &str, filepath: &Path) -> Result<CheckReport, ClientError> {
        self.exec_json(commands::check_buffer(content, filepath)).await
    }

    pub async fn state(&self) -> Result<GovernanceState, ClientError> {
        self.exec_json(commands::state()).await
    }

    pub async fn intent(&self) -> Result<Intent, ClientError> {
        self.exec_json(commands::intent()).await
    }

    pub async fn set_intent(&self, text: &str) -> Result<(), ClientError> {
        self.exec_void(commands::set_intent(text)).await
    }

    pub async fn clear_intent(&self) -> Result<(), ClientError> {
        self.exec_void(commands::clear_intent()).await
    }

    pub async fn list_overrides(&self) -> Result<Vec<OverrideEntry>, ClientError> {
        self.exec_json(commands::list_overrides()).await
    }

    pub async fn compare(&self, base: &str, head: &str) -> Result<ComparisonReport, ClientError> {
        self.exec_json(commands::compare(base, head)).await
    }

    pub async fn doctor(&self) -> Result<DoctorReport, ClientError> {
        self.exec_json(commands::doctor()).await
    }

    pub async fn list_receipts(&self, limit: Option<u32>) -> Result<Vec<Receipt>, ClientError> {
        self.exec_json(commands::list_receipts(limit)).await
    }

    pub async fn query_receipts(&self, query: &ReceiptQuery) -> Result<Vec<Receipt>, ClientError> {
        self.exec_json(commands::query_receipts(query)).await
    }

    pub async fn preflight(&self, paths: &[&Path]) -> Result<PreflightReport, ClientError> {
        self.exec_json(commands::preflight(paths)).await
    }

    pub async fn correlator_status(&self) -> Result<CorrelatorStatus, ClientError> {
        self.exec_json(commands::correlator_status()).await
    }

    pub async fn scope_status(&self) -> Result<ScopeStatus, ClientError> {
        self.exec_json(commands::scope_status()).await
    }

    pub async fn scope_grants(&self) -> Result<Vec<ScopeGrant>, ClientError> {
        self.exec_json(commands::scope_grants()).await
    }

    pub async fn list_scars(&self) -> Result<Vec<Scar>, ClientError> {
        self.exec_json(commands::list_scars()).await
    }

    pub async fn list_shields(&self) -> Result<Vec<Shield>, ClientError> {
        self.exec_json(commands::list_shields()).await
    }

    pub async fn scar_history(&self, limit: Option<u32>) -> Result<Vec<ScarHistoryEntry>, ClientError> {
        self.exec_json(commands::scar_history(limit)).await
    }

    pub async fn kernel_status(&self) -> Result<KernelStatus, ClientError> {
        self.exec_json(commands::kernel_status()).await
    }

    pub async fn oracle_status(&self) -> Result<OracleStatus, ClientError> {
        self.exec_json(commands::oracle_status()).await
    }

    pub async fn drift_report(&self) -> Result<DriftReport, ClientError> {
        self.exec_json(commands::drift_report()).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use lantern_transport::mock::{MockReply, MockTransport};
    use lantern_transport::{AbortReason, CancelToken};
    use lantern_types::CheckStatus;

    use super::*;
    use crate::error::ErrorKind;

    fn config(executable: &str) -> ToolSettings {
        ToolSettings::new(executable, root()).unwrap()
    }

    #[cfg(windows)]
    fn root() -> PathBuf {
        PathBuf::from(r"C:\work")
    }

    #[cfg(not(windows))]
    fn root() -> PathBuf {
        PathBuf::from("/work")
    }

    fn client(mock: &Arc<MockTransport>) -> CommandClient {
        CommandClient::with_transport(
            Arc::clone(mock) as Arc<dyn ProcessTransport>,
            config("warden"),
            ExitPolicy::default(),
        )
    }

    #[tokio::test]
    async fn check_file_decodes_report() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(
            0,
            r#"{"status":"pass","findings":[]}"#,
        )));
        let client = client(&mock);

        let report = client.check_file(Path::new("/f.ts")).await.unwrap();
        assert_eq!(report.status, CheckStatus::Pass);
        assert!(report.findings.is_empty());

        let calls = mock.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].args, ["check", "/f.ts", "--format", "json"]);
        assert_eq!(calls[0].program, PathBuf::from("warden"));
        assert_eq!(calls[0].cwd, root());
        assert_eq!(calls[0].options.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn check_buffer_passes_stdin_payload() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "{}")));
        let client = client(&mock);
        client
            .check_buffer("fn main() {}", Path::new("/src/main.rs"))
            .await
            .unwrap();
        let stdin = mock.calls()[0].options.stdin.clone().unwrap();
        assert!(stdin.contains("fn main() {}"));
    }

    #[tokio::test]
    async fn malformed_json_is_parse_failed_with_preview() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "not json")));
        let err = client(&mock).state().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
        let ClientError::ParseFailed { command, preview, .. } = err else {
            unreachable!()
        };
        assert_eq!(command, "state");
        assert_eq!(preview, "not json");
    }

    #[tokio::test]
    async fn preview_is_bounded() {
        let noise = "x".repeat(5_000);
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, noise)));
        let err = client(&mock).doctor().await.unwrap_err();
        let ClientError::ParseFailed { preview, .. } = err else {
            panic!("expected ParseFailed, got {err:?}");
        };
        assert!(preview.chars().count() <= PREVIEW_CHARS + 1);
    }

    #[tokio::test]
    async fn missing_executable_is_spawn_error() {
        let mock = Arc::new(MockTransport::always(MockReply::SpawnFailure));
        let err = client(&mock).state().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Spawn);
        assert!(err.is_user_actionable());
    }

    #[tokio::test]
    async fn check_exit_one_with_report_is_success() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(
            1,
            r#"{"status":"fail","findings":[{"rule":"no-todo","message":"m"}]}"#,
        )));
        let report = client(&mock).check_file(Path::new("/a.rs")).await.unwrap();
        assert_eq!(report.status, CheckStatus::Fail);
        assert_eq!(report.findings.len(), 1);
    }

    #[tokio::test]
    async fn check_exit_one_with_garbage_is_parse_failed() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(1, "boom")));
        let err = client(&mock).check_file(Path::new("/a.rs")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseFailed);
    }

    #[tokio::test]
    async fn check_exit_two_is_command_failed() {
        let mock = Arc::new(MockTransport::always(MockReply::stderr(2, "  config missing \n")));
        let err = client(&mock).check_file(Path::new("/a.rs")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert_eq!(err.exit_code(), Some(2));
        let ClientError::CommandFailed { message, .. } = err else {
            unreachable!()
        };
        assert_eq!(message, "config missing");
    }

    #[tokio::test]
    async fn check_exit_two_fails_even_with_valid_report() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(
            2,
            r#"{"status":"pass","findings":[]}"#,
        )));
        let err = client(&mock).check_file(Path::new("/a.rs")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
        assert_eq!(err.exit_code(), Some(2));
    }

    #[tokio::test]
    async fn state_exit_one_is_command_failed() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(1, "{}")));
        let err = client(&mock).state().await.unwrap_err();
        assert_eq!(err.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn failure_message_falls_back_to_stdout() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(3, "denied by policy")));
        let err = client(&mock).set_intent("x").await.unwrap_err();
        let ClientError::CommandFailed { message, .. } = err else {
            panic!("expected CommandFailed, got {err:?}");
        };
        assert_eq!(message, "denied by policy");
    }

    #[tokio::test]
    async fn void_commands_ignore_stdout() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "intent cleared")));
        client(&mock).clear_intent().await.unwrap();
        assert_eq!(mock.args_log(), [vec!["intent", "clear"]]);
    }

    #[tokio::test]
    async fn configured_exit_codes_extend_policy() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(4, "[]")));
        let client = client(&mock);
        assert!(client.list_scars().await.is_err());
        client.set_exit_policy(ExitPolicy::default().with("scar", [0, 4]));
        assert!(client.list_scars().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_commands_get_slow_timeout() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "{}")));
        client(&mock).drift_report().await.unwrap();
        assert_eq!(mock.calls()[0].options.timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn cancel_token_aborts_held_call() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "{}").held()));
        let client = client(&mock);
        let token = CancelToken::new();
        token.cancel();
        let err = client
            .exec_json::<CorrelatorStatus>(commands::correlator_status().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::Aborted {
                reason: AbortReason::Cancelled,
                ..
            }
        ));
    }

    fn probe_responder(
        present: &'static [&'static str],
    ) -> impl Fn(&ExecRequest) -> MockReply + Send + Sync + 'static {
        move |req| {
            if req.args.get(1).map(String::as_str) == Some("--help")
                && present.contains(&req.command())
            {
                MockReply::stdout(0, "usage")
            } else {
                MockReply::stderr(2, "unknown command")
            }
        }
    }

    #[tokio::test]
    async fn capabilities_reflect_probe_exit_codes() {
        let mock = Arc::new(MockTransport::new(probe_responder(&["scope", "drift"])));
        let client = client(&mock);
        assert!(!client.has_capability(Feature::Scope));

        let caps = client.capabilities().await;
        assert!(caps.has(Feature::Scope));
        assert!(caps.has(Feature::Drift));
        assert!(!caps.has(Feature::Correlator));
        assert!(client.has_capability(Feature::Scope));
        assert_eq!(mock.call_count(), Feature::ALL.len());
        assert!(
            mock.calls()
                .iter()
                .all(|c| c.options.timeout == Duration::from_secs(5))
        );

        client.capabilities().await;
        assert_eq!(mock.call_count(), Feature::ALL.len());
    }

    #[tokio::test]
    async fn spawn_failure_probes_as_absent() {
        let mock = Arc::new(MockTransport::always(MockReply::SpawnFailure));
        let client = client(&mock);
        let caps = client.capabilities().await;
        assert!(caps.present().next().is_none());
        assert!(!client.has_capability(Feature::Kernel));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_callers_share_one_probe() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "usage").held()));
        let client = Arc::new(client(&mock));

        let waiters: Vec<_> = (0..5)
            .map(|_| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.capabilities().await })
            })
            .collect();

        while mock.in_flight() < Feature::ALL.len() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(mock.call_count(), Feature::ALL.len());
        mock.release(Feature::ALL.len());

        for waiter in waiters {
            let caps = waiter.await.unwrap();
            assert!(caps.has(Feature::Oracle));
        }
        assert_eq!(mock.call_count(), Feature::ALL.len());
    }

    #[tokio::test]
    async fn executable_change_reprobes() {
        let mock = Arc::new(MockTransport::new(|req| {
            if req.program == Path::new("warden-next") && req.command() == "kernel" {
                MockReply::stdout(0, "usage")
            } else {
                MockReply::stderr(1, "no")
            }
        }));
        let client = client(&mock);
        assert!(!client.capabilities().await.has(Feature::Kernel));

        client.set_config(config("warden-next"));
        assert!(client.cached_capabilities().is_none());
        assert!(!client.has_capability(Feature::Kernel));
        assert!(client.capabilities().await.has(Feature::Kernel));
        assert_eq!(mock.call_count(), 2 * Feature::ALL.len());
    }

    #[tokio::test]
    async fn cwd_change_keeps_capabilities() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "usage")));
        let client = client(&mock);
        client.capabilities().await;
        let moved = ToolSettings::new("warden", root().join("nested")).unwrap();
        client.set_config(moved);
        assert!(client.has_capability(Feature::Scar));
        client.capabilities().await;
        assert_eq!(mock.call_count(), Feature::ALL.len());
    }

    #[tokio::test]
    async fn dispose_aborts_running_and_later_calls() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "{}").held()));
        let client = Arc::new(client(&mock));
        let running = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.state().await })
        };
        while mock.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        client.dispose();

        let err = running.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Aborted);
        let err = client.state().await.unwrap_err();
        assert!(matches!(
            err,
            ClientError::Aborted {
                reason: AbortReason::Disposed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dispose_reaps_probe_nobody_awaits() {
        let mock = Arc::new(MockTransport::always(MockReply::stdout(0, "usage").held()));
        let client = client(&mock);
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), client.capabilities()).await;
        assert!(abandoned.is_err());
        assert_eq!(mock.in_flight(), Feature::ALL.len());

        client.dispose();
        tokio::time::timeout(Duration::from_secs(5), async {
            while mock.in_flight() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(client.cached_capabilities().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dispose_kills_children_of_abandoned_probe() {
        // `/bin/sh <feature> --help` runs the script named after the feature.
        let dir = tempfile::tempdir().unwrap();
        for feature in Feature::ALL {
            std::fs::write(dir.path().join(feature.as_str()), "sleep 2\ntouch alive\n").unwrap();
        }
        let client = CommandClient::new(ToolSettings::new("/bin/sh", dir.path()).unwrap());
        let abandoned =
            tokio::time::timeout(Duration::from_millis(300), client.capabilities()).await;
        assert!(abandoned.is_err());

        client.dispose();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!dir.path().join("alive").exists());
    }
}
