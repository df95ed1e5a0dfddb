use std::sync::Arc;

use devgate::channel::{Channel, ChannelBuilder};
use devgate::cli::{Cli, CliState};
use devgate::command::Command;
use devgate::config::ChannelConfig;
use devgate::session::{ReplayScript, ReplaySessionFactory, SessionEvent};
use futures_util::future::join_all;

const RUNNING_CONFIG: &str = "!Current Configuration:
!
hostname \"sw1\"
interface 0/1
description 'uplink'
mtu 9000
exit
interface 0/2
shutdown
exit
";

fn script() -> ReplayScript {
    ReplayScript::new("(UBNT) #")
        .with_mode_prompt("configure", "(UBNT) (Config)#")
        .with_mode_prompt("interface", "(UBNT) (Interface {args})#")
        .with_response("show version", "Software Version 1.8.2")
        .with_response("show clock", "12:00:00 UTC Oct 19 2026")
        .with_response("show hostname", "sw1")
        .with_response("show running-config", RUNNING_CONFIG)
        .with_response("show running-config interface 0/1", "interface 0/1\nmtu 1500\nexit")
        .with_response("configure", "")
        .with_response("interface 0/1", "")
        .with_response("mtu 1500", "")
        .with_response("end", "")
}

fn channel(factory: Arc<ReplaySessionFactory>) -> Channel {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut config = ChannelConfig::new("10.0.0.1", "admin", "secret");
    config.prompt_idle_ms = 50;
    config.command_timeout_secs = 2;
    config.backoff_initial_ms = 20;
    config.backoff_max_ms = 100;
    ChannelBuilder::new(config.target(), config)
        .session_factory(factory)
        .build()
}

fn prompts_seen(factory: &ReplaySessionFactory) -> Vec<String> {
    factory
        .recorder()
        .events()
        .into_iter()
        .filter_map(|event| match event {
            SessionEvent::Output { prompt, .. } => Some(prompt),
            _ => None,
        })
        .collect()
}

fn sent(factory: &ReplaySessionFactory, command: &str) -> usize {
    factory
        .recorder()
        .written()
        .iter()
        .filter(|written| written.as_str() == command)
        .count()
}

#[tokio::test]
async fn any_write_invalidates_cached_reads() {
    let factory = Arc::new(ReplaySessionFactory::new(script()));
    let channel = channel(factory.clone());
    let version = Command::read("show version");

    channel.execute_read(&version).await.expect("read");
    channel.execute_read(&version).await.expect("read");
    assert_eq!(sent(&factory, "show version"), 1);

    factory.set_response("show version", "Software Version 1.8.3");
    channel
        .execute_write(&Command::write("configure\ninterface 0/1\nmtu 1500\nend"))
        .await
        .expect("write");
    assert_eq!(
        channel.execute_read(&version).await.expect("read"),
        "Software Version 1.8.3"
    );
    assert_eq!(sent(&factory, "show version"), 2);
}

#[tokio::test]
async fn config_writes_only_drop_the_sections_they_touch() {
    let factory = Arc::new(ReplaySessionFactory::new(script()));
    let channel = channel(factory.clone());

    channel
        .execute_read(&Command::read("show running-config"))
        .await
        .expect("running config");
    let before = channel
        .execute_read(&Command::read("show running-config interface 0/2"))
        .await
        .expect("synthesized");
    assert_eq!(before, "interface 0/2\nshutdown\nexit");
    assert_eq!(sent(&factory, "show running-config interface 0/2"), 0);

    channel
        .execute_write(&Command::write("configure\ninterface 0/1\nmtu 1500\nend"))
        .await
        .expect("write");
    let prompts = prompts_seen(&factory);
    assert!(prompts.contains(&"(UBNT) (Config)#".to_string()));
    assert!(prompts.contains(&"(UBNT) (Interface 0/1)#".to_string()));
    assert_eq!(channel.prompt().as_deref(), Some("(UBNT) #"));

    // sibling section survives the write
    let after = channel
        .execute_read(&Command::read("show running-config interface 0/2"))
        .await
        .expect("cached");
    assert_eq!(after, before);
    assert_eq!(sent(&factory, "show running-config interface 0/2"), 0);

    // touched section and the full config are fetched again
    let touched = channel
        .execute_read(&Command::read("show running-config interface 0/1"))
        .await
        .expect("refetched");
    assert_eq!(touched, "interface 0/1\nmtu 1500\nexit");
    assert_eq!(sent(&factory, "show running-config interface 0/1"), 1);

    channel
        .execute_read(&Command::read("show running-config"))
        .await
        .expect("running config");
    assert_eq!(sent(&factory, "show running-config"), 2);
}

#[tokio::test]
async fn concurrent_commands_run_one_at_a_time() {
    let mut script = script();
    script.latency_ms = 10;
    let factory = Arc::new(ReplaySessionFactory::new(script));
    let channel = Arc::new(channel(factory.clone()));

    let commands = ["show version", "show clock", "show hostname"];
    let outputs = join_all(commands.iter().map(|command| {
        let channel = channel.clone();
        async move { channel.execute_read(&Command::read(*command)).await }
    }))
    .await;

    let outputs: Vec<String> = outputs
        .into_iter()
        .map(|output| output.expect("read"))
        .collect();
    assert_eq!(
        outputs,
        vec![
            "Software Version 1.8.2".to_string(),
            "12:00:00 UTC Oct 19 2026".to_string(),
            "sw1".to_string(),
        ]
    );
    assert_eq!(factory.connection_attempts(), 1);
}

#[tokio::test]
async fn dropped_connection_is_reopened_on_next_command() {
    let mut script = script();
    script.disconnect_on.push("show clock".to_string());
    let factory = Arc::new(ReplaySessionFactory::new(script));
    let channel = channel(factory.clone());

    channel
        .execute_read(&Command::read("show version"))
        .await
        .expect("read");
    let err = channel
        .execute_read(&Command::read("show clock"))
        .await
        .expect_err("connection dropped");
    assert!(err.is_connection_error());
    assert_eq!(channel.state(), CliState::Uninitialized);

    factory.update_script(|script| script.disconnect_on.clear());
    assert_eq!(
        channel
            .execute_read(&Command::read("show clock"))
            .await
            .expect("reconnected"),
        "12:00:00 UTC Oct 19 2026"
    );
    assert_eq!(factory.connection_attempts(), 2);
    assert_eq!(channel.prompt().as_deref(), Some("(UBNT) #"));
}

#[tokio::test]
async fn refused_connection_is_retried_after_backoff() {
    let mut script = script();
    script.refuse_connections = 1;
    let factory = Arc::new(ReplaySessionFactory::new(script));
    let channel = channel(factory.clone());
    let version = Command::read("show version");

    let err = channel.execute_read(&version).await.expect_err("refused");
    assert!(err.is_connection_error());

    assert_eq!(
        channel.execute_read(&version).await.expect("second attempt"),
        "Software Version 1.8.2"
    );
    assert_eq!(factory.connection_attempts(), 2);

    channel.destroy().await.expect("destroy");
    assert_eq!(channel.state(), CliState::Closed);
}
