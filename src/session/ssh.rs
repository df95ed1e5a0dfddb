use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_ssh2_tokio::Config;
use async_ssh2_tokio::client::{AuthMethod, Client};
use log::debug;
use russh::ChannelMsg;

/// Opens password-authenticated SSH shells to one device.
pub struct SshSessionFactory {
    config: ChannelConfig,
    recorder: Option<SessionRecorder>,
    timekeeper: Timekeeper,
}

impl SshSessionFactory {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            recorder: None,
            timekeeper: Timekeeper::new(),
        }
    }

    /// Records every session opened by this factory.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn open(&self) -> Result<Box<dyn Session>, CliError> {
        let session = self
            .timekeeper
            .timeout(
                self.config.connect_timeout(),
                &format!("connecting to {}", self.config.target()),
                SshSession::connect(&self.config, self.recorder.clone()),
            )
            .await?;
        Ok(Box::new(session))
    }

    fn target(&self) -> String {
        self.config.target()
    }
}

/// A shell channel on an SSH connection.
///
/// A background task bridges the russh channel to the mpsc queues; the
/// session itself only sees text.
pub struct SshSession {
    client: Option<Client>,
    sender: Sender<String>,
    stream: ShellStream,
    io_alive: Arc<AtomicBool>,
    target: String,
    recorder: Option<SessionRecorder>,
}

impl SshSession {
    pub async fn connect(
        config: &ChannelConfig,
        recorder: Option<SessionRecorder>,
    ) -> Result<SshSession, CliError> {
        let target = config.target();

        let ssh_config = Config {
            preferred: config.security_level.preferred(),
            inactivity_timeout: Some(config.command_timeout() * 2),
            ..Default::default()
        };

        let client = Client::connect_with_config(
            (config.host.clone(), config.port),
            &config.username,
            AuthMethod::with_password(&config.password),
            config.server_check(),
            ssh_config,
        )
        .await
        .map_err(|e| CliError::Connect {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        debug!("{} TCP connection successful", target);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", target);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, stream) = ShellStream::channel(target.clone(), recorder.clone());
        let io_alive = Arc::new(AtomicBool::new(true));

        let io_task_target = target.clone();
        let io_task_alive = io_alive.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => {
                        let Some(data) = data else {
                            debug!("{} Session dropped its writer. Closing task.", io_task_target);
                            let _ = channel.eof().await;
                            break;
                        };
                        if let Err(e) = channel.data(data.as_bytes()).await {
                            debug!("{} Failed to send data to shell: {:?}", io_task_target, e);
                            break;
                        }
                    },
                    msg = channel.wait() => {
                        match msg {
                            Some(ChannelMsg::Data { ref data }) => {
                                let text = String::from_utf8_lossy(data).into_owned();
                                if sender_to_user.send(text).await.is_err() {
                                    debug!("{} Shell output receiver dropped. Closing task.", io_task_target);
                                    break;
                                }
                            }
                            Some(ChannelMsg::ExitStatus { exit_status }) => {
                                debug!("{} Shell exited with status code: {}", io_task_target, exit_status);
                                let _ = channel.eof().await;
                                break;
                            }
                            Some(ChannelMsg::Eof) | None => {
                                debug!("{} Shell sent EOF.", io_task_target);
                                break;
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
            io_task_alive.store(false, Ordering::SeqCst);
            debug!("{} SSH I/O task ended.", io_task_target);
        });

        if let Some(recorder) = recorder.as_ref() {
            recorder.record_event(SessionEvent::Opened {
                target: target.clone(),
            });
        }

        Ok(Self {
            client: Some(client),
            sender: sender_to_shell,
            stream,
            io_alive,
            target,
            recorder,
        })
    }
}

#[async_trait]
impl Session for SshSession {
    async fn write(&mut self, text: &str) -> Result<(), CliError> {
        if !self.is_connected() {
            return Err(CliError::Io(format!("{} session is closed", self.target)));
        }
        self.stream.discard_pending();
        if let Some(recorder) = self.recorder.as_ref() {
            recorder.record_event(SessionEvent::Written {
                data: text.to_string(),
            });
        }
        self.sender.send(format!("{text}\n")).await?;
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
        let Some(client) = self.client.take() else {
            return Ok(());
        };
        debug!("{} Closing SSH session", self.target);

        if !client.is_closed() && self.io_alive.load(Ordering::SeqCst) {
            if let Err(e) = self.sender.send("exit\n".to_string()).await {
                debug!("{} Failed to send exit command: {:?}", self.target, e);
            }
        }
        self.stream.close();
        // async-ssh2-tokio tears the connection down when the client is dropped
        drop(client);

        if let Some(recorder) = self.recorder.as_ref() {
            recorder.record_event(SessionEvent::Closed {
                reason: "close".to_string(),
            });
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.client
            .as_ref()
            .is_some_and(|client| !client.is_closed())
            && self.io_alive.load(Ordering::SeqCst)
    }
}
