use std::fs;
use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub const TEST_SECRET: &str = "integration-test-secret";

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    #[allow(dead_code)]
    child: Child,
    #[allow(dead_code)]
    config_dir: tempfile::TempDir,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        // One user pointed at a database that is not there: authorization
        // and routing behavior is observable without a live Postgres.
        let config_dir = tempfile::tempdir()?;
        let config_path = config_dir.path().join("config.json");
        fs::write(
            &config_path,
            serde_json::to_string_pretty(&serde_json::json!({
                "users": {
                    "alice": {
                        "type": "postgres",
                        "auth": { "secret": TEST_SECRET },
                        "options": {
                            "host": "127.0.0.1",
                            "port": 1,
                            "database": "features_test",
                            "user": "alice",
                            "password": "unused",
                            "connectTimeout": 2
                        }
                    }
                }
            }))?,
        )?;

        // Spawn the already-built binary to keep start fast during tests
        let mut cmd = Command::new("target/debug/features-api");
        cmd.env("FEATURES_CONFIG", &config_path)
            .env("FEATURES_PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self {
            port,
            base_url,
            child,
            config_dir,
        })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            // The root route answers without touching the database
            let url = format!("{}/", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!(
            "server did not become ready on {} within {:?}",
            self.base_url,
            timeout
        )
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(10)).await?;
    Ok(server)
}

/// A token signed with the test secret, accepted for the named user.
pub fn token_for(user: &str) -> String {
    use features_api::auth::{generate_jwt, Claims};
    use features_api::config::AuthSettings;

    let auth = AuthSettings {
        secret: TEST_SECRET.to_string(),
        issuer: None,
        audience: None,
    };
    generate_jwt(&Claims::new(user, 3600, &auth), &auth).expect("sign test token")
}
