use super::*;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use log::debug;

/// Scripted device behavior for offline sessions.
///
/// Loaded from JSON fixtures and shared by every session the factory opens,
/// so tests can change the device's answers between commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ReplayScript {
    /// Prompt printed after the banner and after every response outside a
    /// configuration mode.
    pub prompt: String,
    /// Text printed once when a session opens.
    pub banner: String,
    /// Command text to output, without echo or prompt.
    pub responses: BTreeMap<String, String>,
    /// Output for commands missing from `responses`.
    pub unknown_command_response: String,
    /// Whether the shell echoes each command back.
    pub echo: bool,
    /// Commands after which the device drops the connection.
    pub disconnect_on: Vec<String>,
    /// Number of initial connection attempts that are refused.
    pub refuse_connections: u32,
    /// Delay before each response is delivered.
    pub latency_ms: u64,
    /// Prompts shown inside configuration modes, keyed by the first word of
    /// the command entering the mode. `{args}` expands to the rest of it.
    pub mode_prompts: BTreeMap<String, String>,
    /// Commands leaving the innermost mode.
    pub exit_commands: Vec<String>,
    /// Commands leaving every mode.
    pub end_commands: Vec<String>,
}

impl Default for ReplayScript {
    fn default() -> Self {
        Self {
            prompt: "switch#".to_string(),
            banner: String::new(),
            responses: BTreeMap::new(),
            unknown_command_response: "% Invalid input detected".to_string(),
            echo: true,
            disconnect_on: Vec::new(),
            refuse_connections: 0,
            latency_ms: 0,
            mode_prompts: BTreeMap::new(),
            exit_commands: vec!["exit".to_string()],
            end_commands: vec!["end".to_string()],
        }
    }
}

impl ReplayScript {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn with_response(mut self, command: impl Into<String>, output: impl Into<String>) -> Self {
        self.responses.insert(command.into(), output.into());
        self
    }

    pub fn with_mode_prompt(mut self, keyword: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.mode_prompts.insert(keyword.into(), prompt.into());
        self
    }

    /// Moves `modes` through the mode change `command` causes. Commands
    /// the script does not know leave the mode unchanged.
    fn track_mode(&self, command: &str, modes: &mut Vec<Mode>) {
        let command = command.trim();
        if self.end_commands.iter().any(|c| c == command) {
            modes.clear();
            return;
        }
        if self.exit_commands.iter().any(|c| c == command) {
            modes.pop();
            return;
        }
        if !self.responses.contains_key(command) {
            return;
        }
        let (keyword, args) = command.split_once(' ').unwrap_or((command, ""));
        let Some(template) = self.mode_prompts.get(keyword) else {
            return;
        };
        // entering a sibling replaces it
        if modes.last().is_some_and(|mode| mode.keyword == keyword) {
            modes.pop();
        }
        modes.push(Mode {
            keyword: keyword.to_string(),
            prompt: template.replace("{args}", args.trim()),
        });
    }

    fn render(&self, command: &str, prompt: &str) -> String {
        let mut reply = String::new();
        if self.echo {
            reply.push_str(command);
            reply.push_str("\r\n");
        }
        if !command.trim().is_empty() {
            let output = self
                .responses
                .get(command.trim())
                .unwrap_or(&self.unknown_command_response);
            reply.push_str(&output.replace('\n', "\r\n"));
            if !output.is_empty() && !output.ends_with('\n') {
                reply.push_str("\r\n");
            }
        }
        reply.push_str(prompt);
        reply.push(' ');
        reply
    }
}

/// A configuration mode a replay shell has entered.
#[derive(Debug, Clone)]
struct Mode {
    keyword: String,
    prompt: String,
}

/// Opens [`ReplaySession`]s driven by a shared [`ReplayScript`].
#[derive(Clone)]
pub struct ReplaySessionFactory {
    script: Arc<RwLock<ReplayScript>>,
    attempts: Arc<AtomicU32>,
    recorder: SessionRecorder,
    target: String,
}

impl ReplaySessionFactory {
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Arc::new(RwLock::new(script)),
            attempts: Arc::new(AtomicU32::new(0)),
            recorder: SessionRecorder::new(SessionRecordLevel::KeyEventsOnly),
            target: "replay".to_string(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Recorder capturing every event of every session opened so far.
    pub fn recorder(&self) -> SessionRecorder {
        self.recorder.clone()
    }

    /// Changes the scripted output of `command` for current and future sessions.
    pub fn set_response(&self, command: impl Into<String>, output: impl Into<String>) {
        self.update_script(|script| {
            script.responses.insert(command.into(), output.into());
        });
    }

    pub fn update_script(&self, update: impl FnOnce(&mut ReplayScript)) {
        let mut script = self
            .script
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        update(&mut script);
    }

    /// Number of `open` calls, refused ones included.
    pub fn connection_attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for ReplaySessionFactory {
    async fn open(&self) -> Result<Box<dyn Session>, CliError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let (banner, prompt, refused) = {
            let script = self
                .script
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            (
                script.banner.clone(),
                script.prompt.clone(),
                attempt <= script.refuse_connections,
            )
        };
        if refused {
            debug!("{} replay refuses connection attempt {}", self.target, attempt);
            return Err(CliError::Connect {
                target: self.target.clone(),
                reason: "connection refused".to_string(),
            });
        }

        let (feed, stream) =
            ShellStream::channel(self.target.clone(), Some(self.recorder.clone()));
        let mut greeting = banner.replace('\n', "\r\n");
        if !greeting.is_empty() && !greeting.ends_with('\n') {
            greeting.push_str("\r\n");
        }
        greeting.push_str(&prompt);
        greeting.push(' ');
        feed.send(greeting).await?;

        self.recorder.record_event(SessionEvent::Opened {
            target: self.target.clone(),
        });
        Ok(Box::new(ReplaySession {
            script: self.script.clone(),
            feed: Some(feed),
            stream,
            modes: Vec::new(),
            recorder: self.recorder.clone(),
            target: self.target.clone(),
        }))
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// An offline shell answering from a [`ReplayScript`].
pub struct ReplaySession {
    script: Arc<RwLock<ReplayScript>>,
    feed: Option<Sender<String>>,
    stream: ShellStream,
    modes: Vec<Mode>,
    recorder: SessionRecorder,
    target: String,
}

#[async_trait]
impl Session for ReplaySession {
    async fn write(&mut self, text: &str) -> Result<(), CliError> {
        let Some(feed) = self.feed.as_ref() else {
            return Err(CliError::Io(format!("{} session is closed", self.target)));
        };
        self.recorder.record_event(SessionEvent::Written {
            data: text.to_string(),
        });

        let (reply, disconnect, latency) = {
            let script = self
                .script
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            script.track_mode(text, &mut self.modes);
            let prompt = self
                .modes
                .last()
                .map_or(script.prompt.as_str(), |mode| mode.prompt.as_str());
            (
                script.render(text, prompt),
                script.disconnect_on.iter().any(|c| c == text.trim()),
                Duration::from_millis(script.latency_ms),
            )
        };

        if disconnect {
            debug!("{} replay drops the connection after {:?}", self.target, text);
            self.feed = None;
            return Ok(());
        }

        if latency.is_zero() {
            feed.send(reply).await?;
        } else {
            let feed = feed.clone();
            tokio::spawn(async move {
                tokio::time::sleep(latency).await;
                let _ = feed.send(reply).await;
            });
        }
        Ok(())
    }

    async fn read_until_prompt(
        &mut self,
        prompt: &PromptPattern,
        timeout: Duration,
    ) -> Result<String, CliError> {
        self.stream.read_until_prompt(prompt, timeout).await
    }

    async fn read_idle(&mut self, idle: Duration, timeout: Duration) -> Result<String, CliError> {
        self.stream.read_idle(idle, timeout).await
    }

    async fn close(&mut self) -> Result<(), CliError> {
        if self.feed.take().is_some() {
            self.stream.close();
            self.recorder.record_event(SessionEvent::Closed {
                reason: "close".to_string(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.feed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_echoes_output_and_prompt() {
        let factory = ReplaySessionFactory::new(
            ReplayScript::new("switch#").with_response("show version", "Version 1.0"),
        );
        let switch = PromptPattern::new("switch#").expect("prompt");
        let mut session = factory.open().await.expect("open");
        let greeting = session
            .read_until_prompt(&switch, Duration::from_secs(1))
            .await
            .expect("greeting");
        assert_eq!(greeting, "");

        session.write("show version").await.expect("write");
        let output = session
            .read_until_prompt(&switch, Duration::from_secs(1))
            .await
            .expect("read");
        assert_eq!(output, "show version\nVersion 1.0\n");

        session.close().await.expect("close");
        session.close().await.expect("close twice");
        assert!(!session.is_connected());
        assert!(matches!(
            session.write("show version").await,
            Err(CliError::Io(_))
        ));
    }

    #[tokio::test]
    async fn refused_connections_then_success() {
        let mut script = ReplayScript::new("switch#");
        script.refuse_connections = 1;
        let factory = ReplaySessionFactory::new(script);

        assert!(matches!(
            factory.open().await.err(),
            Some(CliError::Connect { .. })
        ));
        assert!(factory.open().await.is_ok());
        assert_eq!(factory.connection_attempts(), 2);
        assert_eq!(factory.recorder().opened_sessions(), 1);
    }

    #[tokio::test]
    async fn disconnect_command_closes_the_stream() {
        let mut script = ReplayScript::new("switch#");
        script.disconnect_on.push("reload".to_string());
        let factory = ReplaySessionFactory::new(script);
        let switch = PromptPattern::new("switch#").expect("prompt");
        let mut session = factory.open().await.expect("open");
        session
            .read_until_prompt(&switch, Duration::from_secs(1))
            .await
            .expect("greeting");

        session.write("reload").await.expect("write");
        let err = session
            .read_until_prompt(&switch, Duration::from_secs(1))
            .await
            .expect_err("dropped");
        assert!(err.is_connection_error());
    }

    #[tokio::test]
    async fn configuration_modes_change_the_prompt() {
        let script = ReplayScript::new("(UBNT) #")
            .with_mode_prompt("configure", "(UBNT) (Config)#")
            .with_mode_prompt("interface", "(UBNT) (Interface {args})#")
            .with_response("configure", "")
            .with_response("interface 0/1", "")
            .with_response("interface 0/2", "")
            .with_response("exit", "")
            .with_response("end", "");
        let factory = ReplaySessionFactory::new(script);
        let ubnt = PromptPattern::new("(UBNT) #").expect("prompt");
        let mut session = factory.open().await.expect("open");
        session
            .read_until_prompt(&ubnt, Duration::from_secs(1))
            .await
            .expect("greeting");

        for command in [
            "configure",
            "interface 0/1",
            "interface 0/2",
            "bogus",
            "exit",
            "interface 0/1",
            "end",
        ] {
            session.write(command).await.expect("write");
            session
                .read_until_prompt(&ubnt, Duration::from_secs(1))
                .await
                .expect("mode prompt");
        }

        let prompts: Vec<String> = factory
            .recorder()
            .events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Output { prompt, .. } => Some(prompt),
                _ => None,
            })
            .collect();
        assert_eq!(
            prompts,
            vec![
                "(UBNT) #",
                "(UBNT) (Config)#",
                "(UBNT) (Interface 0/1)#",
                "(UBNT) (Interface 0/2)#",
                "(UBNT) (Interface 0/2)#",
                "(UBNT) (Config)#",
                "(UBNT) (Interface 0/1)#",
                "(UBNT) #",
            ]
        );
    }

    #[test]
    fn script_from_json_uses_defaults() {
        let script = ReplayScript::from_json(
            r#"{"prompt":"(UBNT) #","responses":{"show version":"1.0"}}"#,
        )
        .expect("parse");
        assert!(script.echo);
        assert_eq!(script.responses.len(), 1);
        assert_eq!(script.unknown_command_response, "% Invalid input detected");
        assert!(script.mode_prompts.is_empty());
        assert_eq!(script.end_commands, vec!["end".to_string()]);
    }
}
