use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Duration};
use wikibridge_agentd::adapters::config::cipher;
use wikibridge_agentd::domain::config::ChangeOrigin;
use wikibridge_agentd::{open_config, Bridge, ConfigPatch, ServerState, Settings, WatchMode};

async fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn wait_for_port(port: u16) {
    let mut attempts = 0;
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => {
                drop(stream);
                return;
            }
            Err(err) => {
                attempts += 1;
                assert!(attempts < 40, "port {port} never opened: {err}");
                sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

async fn healthz(port: u16) -> Value {
    reqwest::get(format!("http://127.0.0.1:{port}/healthz"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn decrypt_file(path: &Path) -> Value {
    let blob = std::fs::read_to_string(path).unwrap();
    serde_json::from_str(&cipher::decrypt(&blob).unwrap()).unwrap()
}

fn settings(temp: &TempDir, watch: WatchMode) -> Settings {
    Settings {
        config_path: temp.path().join("config.enc"),
        watch,
        poll_interval: Duration::from_millis(50),
        watch_debounce: Duration::from_millis(20),
        watch_retry_delay: Duration::from_millis(100),
        shutdown_timeout: Duration::from_secs(2),
        ..Settings::default()
    }
}

#[tokio::test]
async fn set_config_port_change_moves_server_and_persists() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp, WatchMode::Off);
    let first_port = find_free_port().await;
    open_config(&settings)
        .await
        .set_config(ConfigPatch::port(first_port))
        .await
        .unwrap();

    let bridge = Bridge::start(&settings).await.unwrap();
    wait_for_port(first_port).await;
    assert_eq!(healthz(first_port).await["status"], "ok");

    let config = bridge.config();
    let mut changes = config.subscribe();
    let second_port = find_free_port().await;
    let outcome = config
        .set_config(ConfigPatch::port(second_port))
        .await
        .unwrap();
    assert!(outcome.persisted);
    assert_eq!(config.get_config().await.port, second_port);

    let change = changes.recv().await.unwrap();
    assert_eq!(change.origin, ChangeOrigin::Programmatic);
    assert_eq!(change.record.port, second_port);
    assert!(changes.try_recv().is_err());

    assert_eq!(
        decrypt_file(&settings.config_path)["port"],
        Value::from(second_port)
    );

    let lifecycle = bridge.lifecycle();
    let mut attempts = 0;
    while lifecycle.state().running_port() != Some(second_port) {
        attempts += 1;
        assert!(attempts < 40, "server stuck in {}", lifecycle.state());
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(healthz(second_port).await["status"], "ok");
    assert!(TcpStream::connect(("127.0.0.1", first_port)).await.is_err());

    bridge.shutdown().await;
    assert_eq!(lifecycle.state(), ServerState::Stopped);
}

#[tokio::test]
async fn external_edit_is_picked_up_by_watcher() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp, WatchMode::Poll);
    let first_port = find_free_port().await;
    open_config(&settings)
        .await
        .set_config(ConfigPatch::port(first_port))
        .await
        .unwrap();

    let bridge = Bridge::start(&settings).await.unwrap();
    wait_for_port(first_port).await;
    let mut changes = bridge.config().subscribe();

    let second_port = find_free_port().await;
    let edited = serde_json::json!({
        "host": "https://edited.example.com",
        "username": "carol",
        "password": "pw",
        "port": second_port,
    })
    .to_string();
    tokio::fs::write(&settings.config_path, cipher::encrypt(&edited))
        .await
        .unwrap();

    let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
        .await
        .expect("external change observed")
        .unwrap();
    assert_eq!(change.origin, ChangeOrigin::External);
    assert_eq!(change.record.host, "https://edited.example.com");

    wait_for_port(second_port).await;
    let mut attempts = 0;
    while !bridge.gateway().has_client().await {
        attempts += 1;
        assert!(attempts < 10, "gateway did not pick up the new host");
        sleep(Duration::from_millis(50)).await;
    }

    bridge.shutdown().await;
}

#[tokio::test]
async fn start_fails_cleanly_when_port_is_taken() {
    let temp = TempDir::new().unwrap();
    let settings = settings(&temp, WatchMode::Off);
    let blocker = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = blocker.local_addr().unwrap().port();
    open_config(&settings)
        .await
        .set_config(ConfigPatch::port(port))
        .await
        .unwrap();

    let err = match Bridge::start(&settings).await {
        Ok(_) => panic!("start should fail while port {port} is taken"),
        Err(err) => err,
    };
    assert!(format!("{err:#}").contains("already in use"), "{err:#}");
    drop(blocker);
}

#[tokio::test]
async fn missing_config_file_is_created_from_template() {
    let temp = TempDir::new().unwrap();
    let settings = Settings {
        config_path: temp.path().join("nested").join("config.enc"),
        ..settings(&temp, WatchMode::Off)
    };
    let config = open_config(&settings).await;
    assert!(settings.config_path.exists());
    let record = config.get_config().await;
    assert_eq!(record.port, 1984);
    assert!(record.host.is_empty());
    assert_eq!(decrypt_file(&settings.config_path)["port"], 1984);
}
