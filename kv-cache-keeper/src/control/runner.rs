//! The control loop.
//!
//! `Starting` resolves the session, `AwaitingServer` polls health on a fixed
//! retry budget, `Running` ticks on a fixed cadence and `Draining` performs
//! one final save. A second shutdown request abandons whatever work is in
//! flight, the final save included, and stops.

use crate::config::Config;
use crate::context::Context;
use crate::control::commands::{parse_command, Command, HELP};
use crate::control::console::{Console, PromptReply};
use crate::control::session::resolve_session;
use crate::coordinator::{BackupOutcome, BackupRequest, SaveOutcome, SnapshotCoordinator};
use crate::daemon::ShutdownHandle;
use crate::naming::Session;
use crate::restore::{describe, parse_selection, RestoreSelector};
use crate::utils::errors::{KeeperError, Result};
use crate::utils::format::format_duration;
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    AwaitingServer,
    Running,
    Draining,
    Stopped,
}

impl LoopState {
    /// State after a shutdown request.
    pub fn on_cancel(self) -> Self {
        match self {
            LoopState::Running => LoopState::Draining,
            _ => LoopState::Stopped,
        }
    }
}

pub struct Runner {
    config: Config,
    coordinator: SnapshotCoordinator,
    console: Console,
    shutdown: ShutdownHandle,
    ctx: Context,
    state: LoopState,
}

impl Runner {
    pub fn new(
        config: Config,
        coordinator: SnapshotCoordinator,
        console: Console,
        shutdown: ShutdownHandle,
    ) -> Self {
        let ctx = Context::new(Session::default(), config.slots.default_slot);
        Self {
            config,
            coordinator,
            console,
            shutdown,
            ctx,
            state: LoopState::Starting,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Run until shutdown. Fails when the session cannot be resolved or the
    /// server never becomes healthy.
    pub async fn run(&mut self) -> Result<()> {
        self.state = LoopState::Starting;
        self.ctx.session = resolve_session(&self.config, &mut self.console).await?;
        self.log_banner();

        self.state = LoopState::AwaitingServer;
        if !self.await_server().await? {
            info!("Shutdown requested while waiting for the server");
            self.state = self.state.on_cancel();
            return Ok(());
        }

        if self.config.session.restore_on_start {
            self.startup_restore().await;
        }

        self.state = LoopState::Running;
        info!("Running; type 'help' for commands");
        self.run_loop().await;

        self.drain().await;
        info!("Stopped");
        Ok(())
    }

    fn log_banner(&self) {
        info!("Server: {}", self.coordinator.client().base_url());
        info!("Storage: {}", self.coordinator.storage_dir().display());
        info!(
            "Save every {}, backup every {}",
            format_duration(self.config.schedule.save_interval_secs),
            format_duration(self.config.schedule.backup_interval_secs)
        );
        info!(
            "Keeping {} snapshot(s) and {} backup(s) per label",
            self.config.retention.max_snapshots, self.config.retention.max_backups
        );
        info!(
            "Session: '{}' ({}), default slot {}",
            self.ctx.session,
            self.ctx.session.pattern(),
            self.ctx.default_slot
        );
    }

    /// Poll health until it answers. `Ok(false)` when shutdown interrupts the wait.
    async fn await_server(&self) -> Result<bool> {
        let retries = self.config.server.health_retries.max(1);
        let delay = Duration::from_secs(self.config.server.health_retry_delay_secs);
        let client = self.coordinator.client();

        for attempt in 1..=retries {
            if self.shutdown.is_draining() {
                return Ok(false);
            }
            let healthy = tokio::select! {
                result = client.health() => result,
                _ = self.shutdown.drained() => return Ok(false),
            };
            match healthy {
                Ok(()) => {
                    info!("Server is ready at {}", client.base_url());
                    return Ok(true);
                }
                Err(e) => {
                    info!("Waiting for server (attempt {}/{}): {}", attempt, retries, e);
                }
            }
            if attempt < retries {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.shutdown.drained() => return Ok(false),
                }
            }
        }

        error!("Server at {} did not become ready", client.base_url());
        Err(KeeperError::ServerUnavailable { attempts: retries })
    }

    async fn startup_restore(&self) {
        let selector =
            RestoreSelector::new(self.coordinator.client(), self.coordinator.storage_dir());
        match unless_forced(&self.shutdown, selector.restore_automatic(&self.ctx)).await {
            Some(Ok(Some(report))) if !report.is_success() => {
                warn!("Startup restore failed for every file");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => warn!("Startup restore skipped: {}", e),
            None => warn!("Forced stop, startup restore abandoned"),
        }
    }

    async fn run_loop(&mut self) {
        let mut ticker = tokio::time::interval(self.config.tick());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let save_interval = self.config.save_interval();
        let backup_interval = self.config.backup_interval();
        let mut last_save = Instant::now();
        let mut last_backup = Instant::now();

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.drained() => break,
            }

            if let Some(line) = self.console.try_next() {
                self.handle_line(&line).await;
            }
            if self.shutdown.is_draining() {
                break;
            }

            if last_save.elapsed() >= save_interval {
                self.save_cycle().await;
                last_save = Instant::now();
                if self.shutdown.is_draining() {
                    break;
                }
            }
            if last_backup.elapsed() >= backup_interval {
                self.backup_cycle(BackupRequest::Scheduled).await;
                last_backup = Instant::now();
            }
        }

        self.state = self.state.on_cancel();
    }

    /// Final save, unless a second request already arrived or arrives meanwhile.
    pub async fn drain(&mut self) {
        if self.state == LoopState::Running {
            self.state = self.state.on_cancel();
        }

        if self.shutdown.is_forced() {
            warn!("Forced stop, skipping final save");
        } else {
            info!("Shutting down, saving slots one last time (interrupt again to skip)");
            match unless_forced(&self.shutdown, self.coordinator.save(&self.ctx)).await {
                Some(outcome) => log_save(&outcome),
                None => warn!("Forced stop, final save abandoned"),
            }
        }

        self.state = self.state.on_cancel();
    }

    async fn save_cycle(&self) {
        match unless_forced(&self.shutdown, self.coordinator.save(&self.ctx)).await {
            Some(outcome) => log_save(&outcome),
            None => warn!("Forced stop, save cycle abandoned"),
        }
    }

    async fn backup_cycle(&self, request: BackupRequest) {
        let backup = self.coordinator.backup(&self.ctx, request);
        let outcome = match unless_forced(&self.shutdown, backup).await {
            Some(outcome) => outcome,
            None => {
                warn!("Forced stop, backup cycle abandoned");
                return;
            }
        };
        match outcome {
            Ok(BackupOutcome::Created(report)) if !report.failed.is_empty() => {
                warn!(
                    "Backup '{}' incomplete: {} of {} file(s) failed",
                    report.label,
                    report.failed.len(),
                    report.copied.len() + report.failed.len()
                );
            }
            Ok(outcome) => debug!("Backup cycle: {:?}", outcome),
            Err(e) => error!("Backup cycle failed: {}", e),
        }
    }

    /// Handle one console line. Bad input is rejected without a state change.
    pub async fn handle_line(&mut self, line: &str) {
        let command = match parse_command(line) {
            None => return,
            Some(Ok(command)) => command,
            Some(Err(e)) => {
                println!("{e}");
                warn!("Rejected command: {}", e);
                return;
            }
        };

        match command {
            Command::Backup(label) => {
                info!("Named backup '{}' requested", label);
                self.backup_cycle(BackupRequest::Named(label)).await;
            }
            Command::Load => self.interactive_restore().await,
            Command::Slot(slot) => {
                info!("Default slot changed from {} to {}", self.ctx.default_slot, slot);
                self.ctx.default_slot = slot;
            }
            Command::Help => println!("{HELP}"),
        }
    }

    async fn interactive_restore(&mut self) {
        // Field borrows only: the prompt below needs the console mutably.
        let selector =
            RestoreSelector::new(self.coordinator.client(), self.coordinator.storage_dir());
        let candidates = match selector.candidates(&self.ctx) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Cannot list restore points: {}", e);
                return;
            }
        };
        if candidates.is_empty() {
            println!("No restore points for session '{}'", self.ctx.session);
            return;
        }

        println!("{}", candidates.render(&self.ctx));
        let reply = tokio::select! {
            reply = self.console.prompt(self.config.selection_timeout()) => reply,
            _ = self.shutdown.drained() => return,
        };
        let selection = match reply {
            PromptReply::Line(line) => parse_selection(&line, candidates.len()),
            PromptReply::TimedOut | PromptReply::Closed => {
                info!("No restore point chosen, skipping restore");
                return;
            }
        };

        match candidates.resolve(selection) {
            Some(group) => {
                let restore = selector.restore(&self.ctx, group);
                match unless_forced(&self.shutdown, restore).await {
                    Some(report) if !report.is_success() => {
                        warn!("Restore of {} failed for every file", describe(group, &self.ctx));
                    }
                    Some(_) => {}
                    None => warn!("Forced stop, restore abandoned"),
                }
            }
            None => info!("Restore skipped"),
        }
    }
}

/// Run `work` unless a forced stop comes first; `None` when it does.
///
/// The in-flight future is dropped, not awaited, so a hung server call cannot
/// hold the process after the second shutdown request.
async fn unless_forced<F: Future>(shutdown: &ShutdownHandle, work: F) -> Option<F::Output> {
    if shutdown.is_forced() {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown.forced() => None,
        output = work => Some(output),
    }
}

fn log_save(outcome: &SaveOutcome) {
    match outcome {
        SaveOutcome::NothingToSave => debug!("Save cycle: nothing to save"),
        SaveOutcome::Completed(report) if !report.failed.is_empty() => warn!(
            "Save {} incomplete: slots {:?} failed",
            report.timestamp, report.failed
        ),
        SaveOutcome::Completed(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::LlamaClient;
    use crate::config::ServerConfig;
    use crate::daemon::ShutdownCoordinator;
    use crate::testing::{bin_names, mount_health, mount_save, mount_slots, write_file_at};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        runner: Runner,
        shutdown: ShutdownHandle,
        input: mpsc::UnboundedSender<String>,
    }

    fn fixture(server: &MockServer, dir: &TempDir) -> Fixture {
        fixture_with(server, dir, |_| {})
    }

    fn fixture_with(
        server: &MockServer,
        dir: &TempDir,
        tweak: impl FnOnce(&mut Config),
    ) -> Fixture {
        let mut config = Config::default();
        config.server = ServerConfig {
            url: server.uri(),
            health_retries: 2,
            health_retry_delay_secs: 0,
            ..ServerConfig::default()
        };
        config.storage.dir = dir.path().to_path_buf();
        config.session.name = Some("chat".into());
        config.session.restore_on_start = false;
        config.schedule.tick_millis = 10;
        tweak(&mut config);

        let client = LlamaClient::new(&config.server).unwrap();
        let coordinator = SnapshotCoordinator::new(client, &config);
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = ShutdownCoordinator::new().handle();
        let runner = Runner::new(config, coordinator, Console::from_receiver(rx), shutdown.clone());
        Fixture {
            runner,
            shutdown,
            input: tx,
        }
    }

    async fn expect_restore(server: &MockServer, slot: u32, filename: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/slots/{slot}")))
            .and(query_param("action", "restore"))
            .and(body_json(serde_json::json!({ "filename": filename })))
            .respond_with(ResponseTemplate::new(200))
            .expect(times)
            .mount(server)
            .await;
    }

    fn request_shutdown_after(handle: &ShutdownHandle, delay: Duration, times: usize) {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for _ in 0..times {
                handle.request();
            }
        });
    }

    #[test]
    fn test_cancel_transitions() {
        assert_eq!(LoopState::Running.on_cancel(), LoopState::Draining);
        assert_eq!(LoopState::Draining.on_cancel(), LoopState::Stopped);
        assert_eq!(LoopState::AwaitingServer.on_cancel(), LoopState::Stopped);
        assert_eq!(LoopState::Starting.on_cancel(), LoopState::Stopped);
        assert_eq!(LoopState::Stopped.on_cancel(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_single_request_drains_with_final_save() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_slots(&server, &[(0, 42)]).await;
        mount_save(&server, 0, dir.path(), b"kv").await;

        let mut fx = fixture(&server, &dir);
        fx.runner.state = LoopState::Running;
        fx.shutdown.request();
        fx.runner.drain().await;

        assert_eq!(fx.runner.state(), LoopState::Stopped);
        let names = bin_names(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("session_slot0_"));
    }

    #[tokio::test]
    async fn test_double_request_skips_final_save() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_slots(&server, &[(0, 42)]).await;
        Mock::given(method("POST"))
            .and(path("/slots/0"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let mut fx = fixture(&server, &dir);
        fx.runner.state = LoopState::Running;
        fx.shutdown.request();
        fx.shutdown.request();
        fx.runner.drain().await;

        assert_eq!(fx.runner.state(), LoopState::Stopped);
        assert!(bin_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_slot_command() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let mut fx = fixture(&server, &dir);
        let before = fx.runner.context().default_slot;

        fx.runner.handle_line("slot abc").await;
        assert_eq!(fx.runner.context().default_slot, before);

        fx.runner.handle_line("slot 4").await;
        assert_eq!(fx.runner.context().default_slot, 4);

        fx.runner.handle_line("bogus").await;
        assert_eq!(fx.runner.context().default_slot, 4);
    }

    #[tokio::test]
    async fn test_unhealthy_server_is_fatal() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut fx = fixture(&server, &dir);
        let err = fx.runner.run().await.unwrap_err();
        assert!(matches!(err, KeeperError::ServerUnavailable { attempts: 2 }));
        assert_eq!(fx.runner.state(), LoopState::AwaitingServer);
    }

    #[tokio::test]
    async fn test_shutdown_while_awaiting_server_stops() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_health(&server).await;

        let mut fx = fixture(&server, &dir);
        fx.shutdown.request();
        fx.runner.run().await.unwrap();

        assert_eq!(fx.runner.state(), LoopState::Stopped);
        assert!(bin_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_run_until_shutdown_saves_once_on_exit() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_health(&server).await;
        mount_slots(&server, &[(0, 5), (1, 0)]).await;
        mount_save(&server, 0, dir.path(), b"state").await;

        let mut fx = fixture(&server, &dir);
        request_shutdown_after(&fx.shutdown, Duration::from_millis(100), 1);

        fx.runner.run().await.unwrap();

        assert_eq!(fx.runner.state(), LoopState::Stopped);
        assert_eq!(fx.runner.context().session.as_str(), "chat");
        let names = bin_names(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("chat_slot0_"));
    }

    #[tokio::test]
    async fn test_second_request_abandons_running_save() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        mount_health(&server).await;
        mount_slots(&server, &[(0, 5)]).await;
        Mock::given(method("POST"))
            .and(path("/slots/0"))
            .and(query_param("action", "save"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(6)))
            .mount(&server)
            .await;

        let mut fx = fixture_with(&server, &dir, |config| {
            config.schedule.save_interval_secs = 1;
        });
        request_shutdown_after(&fx.shutdown, Duration::from_millis(1500), 2);

        let started = std::time::Instant::now();
        fx.runner.run().await.unwrap();

        assert!(
            started.elapsed() < Duration::from_secs(3),
            "forced stop took {:?}",
            started.elapsed()
        );
        assert_eq!(fx.runner.state(), LoopState::Stopped);
        assert!(bin_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_startup_restores_newest_group() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        write_file_at(dir.path(), "chat_slot0_20250101120000.bin", b"t0", 10).unwrap();
        write_file_at(dir.path(), "chat_slot0_20250101120100.bin", b"t1", 20).unwrap();
        write_file_at(dir.path(), "chat_slot1_20250101120100.bin", b"t1", 20).unwrap();

        mount_health(&server).await;
        mount_slots(&server, &[]).await;
        expect_restore(&server, 0, "chat_slot0_20250101120100.bin", 1).await;
        expect_restore(&server, 1, "chat_slot1_20250101120100.bin", 1).await;
        expect_restore(&server, 0, "chat_slot0_20250101120000.bin", 0).await;

        let mut fx = fixture_with(&server, &dir, |config| {
            config.session.restore_on_start = true;
        });
        request_shutdown_after(&fx.shutdown, Duration::from_millis(100), 1);

        fx.runner.run().await.unwrap();
        assert_eq!(fx.runner.state(), LoopState::Stopped);
    }

    #[tokio::test]
    async fn test_load_command_automatic_indexed_and_skip() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        write_file_at(dir.path(), "chat_slot0_20250101120000.bin", b"t0", 10).unwrap();
        write_file_at(dir.path(), "chat_slot1_20250101120000.bin", b"t0", 10).unwrap();
        write_file_at(dir.path(), "chat_slot0_20250101120100.bin", b"t1", 20).unwrap();

        // Menu: 1 = newest group (slot 0), 2 = older group (slots 0 and 1), 3 = skip
        expect_restore(&server, 0, "chat_slot0_20250101120100.bin", 1).await;
        expect_restore(&server, 0, "chat_slot0_20250101120000.bin", 1).await;
        expect_restore(&server, 1, "chat_slot1_20250101120000.bin", 1).await;

        let mut fx = fixture(&server, &dir);
        fx.runner.ctx.session = Session::new("chat").unwrap();
        for answer in ["", "2", "9"] {
            fx.input.send(answer.to_string()).unwrap();
            fx.runner.handle_line("load").await;
        }

        let requests = server.received_requests().await.unwrap();
        let restores = requests
            .iter()
            .filter(|r| r.url.query() == Some("action=restore"))
            .count();
        assert_eq!(restores, 3);
    }
}
