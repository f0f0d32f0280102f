//! End-to-end daemon tests: JSON lines in, processed JSON lines out.

use std::env;
use std::io::Write;
use std::time::Duration;

use serial_test::serial;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};

use logforge_core::config::LogforgeConfig;
use logforge_daemon::orchestrator::{Orchestrator, RunSummary, load_processor_config};

const CONFIG: &str = r#"
[general]
host = "test-host"

[input]
batch_size = 2
flush_interval_ms = 50

[processor]
routines = 3
script = '''
if (event.level == "error") {
    add_tag tag="sev_high";
}
'''

[stream.fields]
type = "app"
"#;

fn config_file(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}

#[tokio::test]
async fn test_processes_stdin_lines_in_order() {
    let file = config_file(CONFIG);
    let config = LogforgeConfig::parse(CONFIG).expect("config should parse");
    let orchestrator = Orchestrator::new(file.path(), config);

    let input: &'static [u8] = b"{\"n\":0,\"level\":\"info\"}\n\
{\"n\":1,\"level\":\"error\"}\n\
this is not json\n\
{\"n\":2,\"level\":\"warn\"}\n\
{\"n\":3,\"level\":\"error\"}\n";
    let (writer, mut reader) = tokio::io::duplex(64 * 1024);
    let collector = tokio::spawn(async move {
        let mut text = String::new();
        reader.read_to_string(&mut text).await.map(|_| text)
    });

    let summary = orchestrator
        .run(input, writer)
        .await
        .expect("daemon should run");
    assert_eq!(
        summary,
        RunSummary {
            events_in: 4,
            events_out: 4
        }
    );

    let text = collector.await.unwrap().unwrap();
    let events: Vec<serde_json::Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).expect("output line is JSON"))
        .collect();
    assert_eq!(events.len(), 4);
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event["n"], index as i64);
        assert_eq!(event["host"], "test-host");
        assert_eq!(event["type"], "app");
        assert!(event.get("@timestamp").is_some());
        let tagged = event
            .get("tags")
            .and_then(|tags| tags.as_array())
            .is_some_and(|tags| tags.iter().any(|t| t == "sev_high"));
        assert_eq!(tagged, event["level"] == "error");
    }
}

#[tokio::test]
async fn test_shutdown_token_drains_and_stops() {
    let file = config_file(CONFIG);
    let config = LogforgeConfig::parse(CONFIG).expect("config should parse");
    let orchestrator = Orchestrator::new(file.path(), config);
    let token = orchestrator.shutdown_token();

    let (mut client, server) = tokio::io::duplex(1024);
    let (writer, reader) = tokio::io::duplex(64 * 1024);
    let daemon = tokio::spawn(orchestrator.run(BufReader::new(server), writer));

    client
        .write_all(b"{\"level\":\"error\"}\n")
        .await
        .unwrap();

    let mut lines = BufReader::new(reader).lines();
    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("event should be flushed by the interval")
        .unwrap()
        .expect("output should stay open");
    assert!(line.contains("sev_high"));

    token.cancel();
    let summary = tokio::time::timeout(Duration::from_secs(5), daemon)
        .await
        .expect("daemon should stop after cancellation")
        .unwrap()
        .unwrap();
    assert_eq!(summary.events_in, 1);
    assert_eq!(summary.events_out, 1);
    drop(client);
}

#[tokio::test]
async fn test_invalid_program_fails_startup() {
    let config = LogforgeConfig::parse("[processor]\nscript = 'nope x=1'\n").unwrap();
    let orchestrator = Orchestrator::new("unused.toml", config);
    let (writer, _reader) = tokio::io::duplex(1024);
    let err = orchestrator
        .run(b"".as_slice(), writer)
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("unknown action: nope"));
}

#[tokio::test]
#[serial]
async fn test_load_processor_config_from_file() {
    let file = config_file(CONFIG);
    let config = load_processor_config(file.path()).await.unwrap();
    assert_eq!(config.routines, 3);
    assert!(!config.program.is_empty());
}

#[tokio::test]
#[serial]
async fn test_load_processor_config_reports_bad_file() {
    let file = config_file("[processor]\nroutines = 0\n");
    let err = load_processor_config(file.path()).await.unwrap_err();
    assert!(format!("{err:#}").contains("routines"));

    let err = load_processor_config(std::path::Path::new("/nonexistent/logforge.toml"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to load"));
}

#[tokio::test]
#[serial]
async fn test_env_override_applies_on_reload_path() {
    let file = config_file(CONFIG);
    unsafe {
        env::set_var("LOGFORGE_PROCESSOR_ROUTINES", "7");
    }
    let result = load_processor_config(file.path()).await;
    unsafe {
        env::remove_var("LOGFORGE_PROCESSOR_ROUTINES");
    }
    assert_eq!(result.unwrap().routines, 7);
}
