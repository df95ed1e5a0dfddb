use super::*;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::config::ChannelConfig;
use crate::session::{PromptPattern, Session, SessionFactory};
use crate::timekeeper::{Backoff, DelayOutcome, Timekeeper};

/// Lifecycle of a prompt-aware channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliState {
    Uninitialized,
    Connecting,
    ResolvingPrompt,
    Ready,
    Executing,
    Closed,
}

/// Timing knobs for [`PromptAwareCli`].
#[derive(Debug, Clone)]
pub struct PromptOptions {
    pub command_timeout: Duration,
    pub prompt_attempts: usize,
    pub prompt_idle: Duration,
    pub backoff: Backoff,
}

impl From<&ChannelConfig> for PromptOptions {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            prompt_attempts: config.prompt_attempts.max(1),
            prompt_idle: config.prompt_idle(),
            backoff: config.backoff(),
        }
    }
}

enum Job {
    Execute {
        command: Command,
        responder: oneshot::Sender<Result<String, CliError>>,
    },
    Destroy {
        responder: oneshot::Sender<Result<(), CliError>>,
    },
}

#[derive(Debug)]
struct Status {
    state: CliState,
    prompt: Option<String>,
}

/// Drives one session through a FIFO job queue.
///
/// A single worker task owns the session: it connects on first use,
/// resolves the prompt, executes queued commands one at a time and
/// reconnects after connection-class failures.
pub struct PromptAwareCli {
    jobs: mpsc::Sender<Job>,
    status: Arc<Mutex<Status>>,
    closing: Arc<AtomicBool>,
    timekeeper: Timekeeper,
    target: String,
}

impl PromptAwareCli {
    pub fn new(factory: Arc<dyn SessionFactory>, options: PromptOptions) -> Self {
        let target = factory.target();
        let status = Arc::new(Mutex::new(Status {
            state: CliState::Uninitialized,
            prompt: None,
        }));
        let closing = Arc::new(AtomicBool::new(false));
        let timekeeper = Timekeeper::new();
        let (jobs, rx) = mpsc::channel::<Job>(32);

        let worker = Worker {
            backoff: options.backoff.clone(),
            factory,
            options,
            session: None,
            prompt: None,
            pending_backoff: None,
            status: status.clone(),
            closing: closing.clone(),
            timekeeper: timekeeper.clone(),
            target: target.clone(),
        };
        tokio::spawn(worker.run(rx));

        Self {
            jobs,
            status,
            closing,
            timekeeper,
            target,
        }
    }

    pub fn state(&self) -> CliState {
        lock_status(&self.status).state
    }

    /// The prompt resolved on the current session, if any.
    pub fn prompt(&self) -> Option<String> {
        lock_status(&self.status).prompt.clone()
    }

    async fn submit(&self, command: &Command) -> Result<String, CliError> {
        if self.state() == CliState::Closed {
            return Err(CliError::Closed);
        }
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(Job::Execute {
                command: command.clone(),
                responder: tx,
            })
            .await
            .map_err(|_| CliError::Closed)?;
        rx.await.map_err(|_| CliError::Closed)?
    }
}

#[async_trait]
impl Cli for PromptAwareCli {
    async fn execute_read(&self, command: &Command) -> Result<String, CliError> {
        self.submit(command).await
    }

    async fn execute_write(&self, command: &Command) -> Result<String, CliError> {
        self.submit(command).await
    }

    async fn destroy(&self) -> Result<(), CliError> {
        self.closing.store(true, Ordering::SeqCst);
        self.timekeeper.cancel_all();

        let (tx, rx) = oneshot::channel();
        if self.jobs.send(Job::Destroy { responder: tx }).await.is_err() {
            debug!("{} already destroyed", self.target);
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }
}

fn lock_status(status: &Mutex<Status>) -> std::sync::MutexGuard<'_, Status> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Worker {
    factory: Arc<dyn SessionFactory>,
    options: PromptOptions,
    session: Option<Box<dyn Session>>,
    prompt: Option<PromptPattern>,
    backoff: Backoff,
    pending_backoff: Option<Duration>,
    status: Arc<Mutex<Status>>,
    closing: Arc<AtomicBool>,
    timekeeper: Timekeeper,
    target: String,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        while let Some(job) = rx.recv().await {
            match job {
                Job::Execute { command, responder } => {
                    let result = self.execute(&command).await;
                    let _ = responder.send(result);
                }
                Job::Destroy { responder } => {
                    let result = self.shutdown().await;
                    let _ = responder.send(result);
                    break;
                }
            }
        }
        if self.state() != CliState::Closed {
            debug!("{} job queue dropped, closing session", self.target);
            let _ = self.shutdown().await;
        }
        debug!("{} cli worker stopped", self.target);
    }

    fn state(&self) -> CliState {
        lock_status(&self.status).state
    }

    fn set_state(&self, state: CliState) {
        lock_status(&self.status).state = state;
    }

    fn set_prompt(&mut self, prompt: Option<PromptPattern>) {
        lock_status(&self.status).prompt = prompt.as_ref().map(|p| p.prompt().to_string());
        self.prompt = prompt;
    }

    async fn execute(&mut self, command: &Command) -> Result<String, CliError> {
        match self.try_execute(command).await {
            Ok(output) => {
                self.set_state(CliState::Ready);
                Ok(output)
            }
            Err(CliError::Closed) => Err(CliError::Closed),
            Err(err @ CliError::PromptResolution { .. }) => {
                self.set_prompt(None);
                self.set_state(CliState::Uninitialized);
                Err(err)
            }
            Err(err) => {
                self.set_prompt(None);
                if err.is_connection_error() {
                    warn!(
                        "{} connection lost during '{}': {}",
                        self.target, command, err
                    );
                    self.drop_session().await;
                    self.set_state(CliState::Uninitialized);
                } else {
                    self.set_state(CliState::Ready);
                }
                Err(CliError::CommandExecution {
                    command: command.raw().to_string(),
                    source: Box::new(err),
                })
            }
        }
    }

    async fn try_execute(&mut self, command: &Command) -> Result<String, CliError> {
        let prompt = self.ensure_ready().await?;
        self.set_state(CliState::Executing);

        let timeout = self.options.command_timeout;
        let session = self.session_mut()?;
        let mut outputs = Vec::new();
        for part in command.split_multi_command() {
            session.write(part.raw()).await?;
            let raw = session.read_until_prompt(&prompt, timeout).await?;
            let output = strip_echo(&raw, part.raw());
            if !output.is_empty() {
                outputs.push(output);
            }
        }
        Ok(outputs.join("\n"))
    }

    fn session_mut(&mut self) -> Result<&mut Box<dyn Session>, CliError> {
        self.session
            .as_mut()
            .ok_or_else(|| CliError::Io("no open session".to_string()))
    }

    /// Opens a session and resolves its prompt when needed.
    async fn ensure_ready(&mut self) -> Result<PromptPattern, CliError> {
        if self.session.as_ref().is_some_and(|s| !s.is_connected()) {
            debug!("{} session went away, reconnecting", self.target);
            self.drop_session().await;
        }

        if self.session.is_none() {
            self.set_prompt(None);
            self.open_session().await?;
        }

        if let Some(prompt) = self.prompt.clone() {
            return Ok(prompt);
        }
        self.set_state(CliState::ResolvingPrompt);
        let resolved = self.resolve_prompt().await?;
        let prompt = PromptPattern::new(&resolved).map_err(|err| {
            warn!("{} cannot match prompt {:?}: {}", self.target, resolved, err);
            CliError::PromptResolution {
                attempts: self.options.prompt_attempts,
                last_output: resolved.clone(),
            }
        })?;
        self.set_prompt(Some(prompt.clone()));
        self.set_state(CliState::Ready);
        Ok(prompt)
    }

    async fn open_session(&mut self) -> Result<(), CliError> {
        if let Some(wait) = self.pending_backoff.take() {
            let delay = self.timekeeper.sleep(wait);
            if self.closing.load(Ordering::SeqCst) {
                return Err(CliError::Closed);
            }
            debug!("{} waiting {:?} before reconnecting", self.target, wait);
            if delay.await == DelayOutcome::Cancelled {
                return Err(CliError::Closed);
            }
        }

        self.set_state(CliState::Connecting);
        match self.factory.open().await {
            Ok(session) => {
                debug!("{} session opened", self.target);
                self.backoff.reset();
                self.session = Some(session);
                Ok(())
            }
            Err(err) => {
                let wait = self.backoff.next_delay();
                warn!(
                    "{} connect attempt {} failed, next attempt in {:?}: {}",
                    self.target,
                    self.backoff.attempts(),
                    wait,
                    err
                );
                self.pending_backoff = Some(wait);
                self.set_state(CliState::Uninitialized);
                Err(err)
            }
        }
    }

    /// Presses enter twice and accepts the trailing line once both replies
    /// end with the same one.
    async fn resolve_prompt(&mut self) -> Result<String, CliError> {
        let attempts = self.options.prompt_attempts;
        let idle = self.options.prompt_idle;
        let timeout = self.options.command_timeout;
        let target = self.target.clone();
        let session = self.session_mut()?;

        let mut last_output = String::new();
        for attempt in 1..=attempts {
            session.write("").await?;
            let first = session.read_idle(idle, timeout).await?;
            session.write("").await?;
            let second = session.read_idle(idle, timeout).await?;

            match (trailing_line(&first), trailing_line(&second)) {
                (Some(a), Some(b)) if a == b => {
                    debug!("{} resolved prompt {:?}", target, b);
                    return Ok(b.to_string());
                }
                _ => {
                    debug!(
                        "{} prompt attempt {} unstable: {:?} vs {:?}",
                        target, attempt, first, second
                    );
                    last_output = second;
                }
            }
        }
        Err(CliError::PromptResolution {
            attempts,
            last_output,
        })
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take()
            && let Err(err) = session.close().await
        {
            debug!("{} error closing session: {}", self.target, err);
        }
        self.set_prompt(None);
    }

    async fn shutdown(&mut self) -> Result<(), CliError> {
        self.pending_backoff = None;
        let result = match self.session.take() {
            Some(mut session) => session.close().await,
            None => Ok(()),
        };
        self.set_prompt(None);
        self.set_state(CliState::Closed);
        debug!("{} cli closed", self.target);
        result
    }
}

/// The last line of `output` when it is not terminated, trimmed.
fn trailing_line(output: &str) -> Option<&str> {
    let last = output.rsplit('\n').next()?.trim_end();
    (!last.trim().is_empty()).then_some(last)
}

/// Drops the echoed command line and trailing blank lines.
fn strip_echo(raw: &str, command: &str) -> String {
    let mut content = raw;
    if !command.is_empty() {
        let (first, rest) = content.split_once('\n').unwrap_or((content, ""));
        if first.trim_end() == command.trim_end() {
            content = rest;
        }
    } else if let Some(rest) = content.strip_prefix('\n') {
        content = rest;
    }

    let mut lines: Vec<&str> = content.lines().collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{ReplayScript, ReplaySessionFactory, SessionEvent};

    fn options() -> PromptOptions {
        PromptOptions {
            command_timeout: Duration::from_secs(2),
            prompt_attempts: 3,
            prompt_idle: Duration::from_millis(50),
            backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        }
    }

    fn script() -> ReplayScript {
        let mut script = ReplayScript::new("(UBNT) #")
            .with_response("show version", "Software Version 1.8.2")
            .with_response("show clock", "12:00:00 UTC");
        script.banner = "Welcome".to_string();
        script
    }

    #[test]
    fn echo_and_blank_tail_are_removed() {
        assert_eq!(
            strip_echo("show clock\n12:00:00\n\n", "show clock"),
            "12:00:00"
        );
        assert_eq!(strip_echo("12:00:00\n", "show clock"), "12:00:00");
        assert_eq!(strip_echo("\n", ""), "");
    }

    #[test]
    fn trailing_line_ignores_terminated_output() {
        assert_eq!(trailing_line("banner\n(UBNT) # "), Some("(UBNT) #"));
        assert_eq!(trailing_line("banner\n"), None);
    }

    #[tokio::test]
    async fn resolves_prompt_and_strips_output() {
        let factory = Arc::new(ReplaySessionFactory::new(script()));
        let cli = PromptAwareCli::new(factory.clone(), options());
        assert_eq!(cli.state(), CliState::Uninitialized);

        let output = cli
            .execute_read(&Command::read("show version"))
            .await
            .expect("read");
        assert_eq!(output, "Software Version 1.8.2");
        assert_eq!(cli.prompt().as_deref(), Some("(UBNT) #"));
        assert_eq!(cli.state(), CliState::Ready);

        cli.destroy().await.expect("destroy");
        assert_eq!(cli.state(), CliState::Closed);
        assert!(matches!(
            cli.execute_read(&Command::read("show version")).await,
            Err(CliError::Closed)
        ));
        cli.destroy().await.expect("destroy twice");
    }

    #[tokio::test]
    async fn multi_command_runs_each_statement() {
        let factory = Arc::new(ReplaySessionFactory::new(script()));
        let cli = PromptAwareCli::new(factory.clone(), options());

        let output = cli
            .execute_read(&Command::read("show version\nshow clock"))
            .await
            .expect("read");
        assert_eq!(output, "Software Version 1.8.2\n12:00:00 UTC");

        let written = factory.recorder().written();
        assert_eq!(&written[written.len() - 2..], ["show version", "show clock"]);
    }

    #[tokio::test]
    async fn configuration_mode_prompts_end_each_statement() {
        let script = script()
            .with_mode_prompt("configure", "(UBNT) (Config)#")
            .with_mode_prompt("interface", "(UBNT) (Interface {args})#")
            .with_response("configure", "")
            .with_response("interface 0/1", "")
            .with_response("no shutdown", "")
            .with_response("end", "");
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let cli = PromptAwareCli::new(factory.clone(), options());

        let output = cli
            .execute_write(&Command::write("configure\ninterface 0/1\nno shutdown\nend"))
            .await
            .expect("write through config modes");
        assert_eq!(output, "");
        assert_eq!(cli.state(), CliState::Ready);
        assert_eq!(cli.prompt().as_deref(), Some("(UBNT) #"));

        // the session survived the mode changes
        cli.execute_read(&Command::read("show version"))
            .await
            .expect("read");
        assert_eq!(factory.connection_attempts(), 1);
    }

    #[tokio::test]
    async fn concurrent_reads_are_serialized() {
        let mut script = script();
        script.latency_ms = 20;
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let cli = Arc::new(PromptAwareCli::new(factory.clone(), options()));
        cli.execute_read(&Command::read("show clock"))
            .await
            .expect("warm up");
        factory.recorder().clear();

        let first = cli.clone();
        let second = cli.clone();
        let (a, b) = tokio::join!(
            async move { first.execute_read(&Command::read("show version")).await },
            async move { second.execute_read(&Command::read("show clock")).await },
        );
        assert_eq!(a.expect("first"), "Software Version 1.8.2");
        assert_eq!(b.expect("second"), "12:00:00 UTC");

        let events = factory.recorder().events();
        let order: Vec<&str> = events
            .iter()
            .map(|event| match event {
                SessionEvent::Written { .. } => "write",
                SessionEvent::Output { .. } => "read",
                _ => "other",
            })
            .collect();
        assert_eq!(order, vec!["write", "read", "write", "read"]);
    }

    #[tokio::test]
    async fn reconnects_after_connection_error() {
        let mut script = script();
        script.disconnect_on.push("reload".to_string());
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let cli = PromptAwareCli::new(factory.clone(), options());

        let err = cli
            .execute_write(&Command::write("reload"))
            .await
            .expect_err("disconnect");
        assert!(matches!(err, CliError::CommandExecution { .. }));
        assert!(err.is_connection_error());
        assert_eq!(cli.prompt(), None);

        let output = cli
            .execute_read(&Command::read("show version"))
            .await
            .expect("read after reconnect");
        assert_eq!(output, "Software Version 1.8.2");
        assert_eq!(factory.recorder().opened_sessions(), 2);
    }

    #[tokio::test]
    async fn failed_connect_backs_off_then_recovers() {
        let mut script = script();
        script.refuse_connections = 2;
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let cli = PromptAwareCli::new(factory.clone(), options());
        let command = Command::read("show version");

        for _ in 0..2 {
            let err = cli.execute_read(&command).await.expect_err("refused");
            assert!(matches!(
                err,
                CliError::CommandExecution { ref source, .. }
                    if matches!(**source, CliError::Connect { .. })
            ));
        }
        assert_eq!(
            cli.execute_read(&command).await.expect("third attempt"),
            "Software Version 1.8.2"
        );
        assert_eq!(factory.connection_attempts(), 3);
    }

    #[tokio::test]
    async fn destroy_cancels_pending_backoff() {
        let mut script = script();
        script.refuse_connections = 1;
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let mut options = options();
        options.backoff = Backoff::new(Duration::from_secs(3600), Duration::from_secs(3600));
        let cli = Arc::new(PromptAwareCli::new(factory.clone(), options));
        let command = Command::read("show version");

        cli.execute_read(&command).await.expect_err("refused");

        let waiting = {
            let cli = cli.clone();
            let command = command.clone();
            tokio::spawn(async move { cli.execute_read(&command).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        cli.destroy().await.expect("destroy");

        let result = tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .expect("backoff was cancelled")
            .expect("join");
        assert!(matches!(result, Err(CliError::Closed)));
        assert_eq!(factory.connection_attempts(), 1);
    }

    #[tokio::test]
    async fn unstable_prompt_fails_resolution() {
        let mut script = script();
        script.prompt = String::new();
        script.echo = false;
        let factory = Arc::new(ReplaySessionFactory::new(script));
        let mut options = options();
        options.prompt_attempts = 2;
        let cli = PromptAwareCli::new(factory, options);

        let err = cli
            .execute_read(&Command::read("show version"))
            .await
            .expect_err("no prompt");
        assert!(matches!(err, CliError::PromptResolution { attempts: 2, .. }));
    }
}
