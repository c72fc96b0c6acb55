#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::process::Stdio;
    use std::sync::OnceLock;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::{Context, Result, bail};
    use client_sdk::StatusClient;
    use common::{ClientStatus, Health, StatusSample};
    use reqwest::StatusCode;
    use tokio::process::{Child, Command};
    use tokio::time::sleep;

    #[tokio::test]
    async fn sdk_report_then_query_against_live_server() -> Result<()> {
        let bind = "127.0.0.1:19180";
        let mut server = start_server(bind, &[]).await?;

        let result = async {
            let client = StatusClient::new(format!("http://{bind}"));
            let now = unix_ts();

            let ack = client
                .report("node-A", &StatusSample::new(now, ClientStatus::Listening))
                .await?;
            assert!(ack.created);

            let response = client.query("node-A").await?;
            assert!(response.known);
            let window = response.window.context("node-A should have a window")?;
            assert_eq!(window.samples.len(), 1);
            assert_eq!(window.health, Health::Healthy);

            let unknown = client.query("node-never").await?;
            assert!(!unknown.known);
            assert!(unknown.window.is_none());

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    #[tokio::test]
    async fn bad_nodes_are_listed_and_window_is_bounded() -> Result<()> {
        let bind = "127.0.0.1:19181";
        let mut server = start_server(bind, &[("BADNODE_WINDOW_MAX_SAMPLES", "2")]).await?;

        let result = async {
            let client = StatusClient::new(format!("http://{bind}"));
            let now = unix_ts();

            client
                .report("node-A", &StatusSample::new(now, ClientStatus::Listening))
                .await?;
            client
                .report("node-B", &StatusSample::new(now, ClientStatus::Stopped))
                .await?;
            for offset in 0..3 {
                client
                    .report(
                        "node-C",
                        &StatusSample::new(now + offset, ClientStatus::Syncing),
                    )
                    .await?;
            }

            let bad = client.list(Some(Health::Bad)).await?;
            let bad_ids: Vec<_> = bad.iter().map(|node| node.node_id.as_str()).collect();
            assert_eq!(bad_ids, vec!["node-B"]);

            let window = client
                .query("node-C")
                .await?
                .window
                .context("node-C should have a window")?;
            let stamps: Vec<u64> = window
                .samples
                .iter()
                .map(|observed| observed.sample.timestamp_unix)
                .collect();
            assert_eq!(stamps, vec![now + 1, now + 2]);

            let health = client.health().await?;
            assert_eq!(health.total_nodes, 3);
            assert_eq!(health.bad_nodes, 1);

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    #[tokio::test]
    async fn invalid_node_id_is_rejected_over_http() -> Result<()> {
        let bind = "127.0.0.1:19182";
        let mut server = start_server(bind, &[]).await?;

        let result = async {
            let http = reqwest::Client::new();
            let response = http
                .post(format!("http://{bind}/nodes/bad%20id/status"))
                .json(&serde_json::json!({ "timestamp_unix": unix_ts(), "status": "ok" }))
                .send()
                .await?;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json().await?;
            assert!(
                body["error"]
                    .as_str()
                    .unwrap_or_default()
                    .contains("invalid node id")
            );

            let nodes = StatusClient::new(format!("http://{bind}")).list(None).await?;
            assert!(nodes.is_empty());

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    #[tokio::test]
    async fn cli_report_list_and_purge_against_live_server() -> Result<()> {
        let bind = "127.0.0.1:19183";
        let base_url = format!("http://{bind}");
        let mut server = start_server(bind, &[]).await?;

        let result = async {
            let stale_ts = (unix_ts() - 7_200).to_string();
            let output = run_cli(&[
                "--server-url",
                &base_url,
                "report",
                "node-D",
                "down",
                "--timestamp",
                &stale_ts,
            ])
            .await?;
            assert!(output.contains("node-D"));
            assert!(output.contains("out of order: true"));

            let listed = run_cli(&["--server-url", &base_url, "list", "--health", "bad"]).await?;
            assert!(listed.contains("node-D"));

            let got = run_cli(&["--server-url", &base_url, "get", "node-X"]).await?;
            assert!(got.contains("never been observed"));

            // node-D arrived just now, so a one-hour ceiling keeps it.
            let purged = run_cli(&[
                "--server-url",
                &base_url,
                "purge",
                "--unseen-for-secs",
                "3600",
            ])
            .await?;
            assert!(purged.contains("removed 0 node(s)"));

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        result
    }

    #[tokio::test]
    async fn dashboard_and_openapi_are_served() -> Result<()> {
        let bind = "127.0.0.1:19184";
        let website_dir = fresh_website_dir("dashboard");
        fs::write(website_dir.join("favicon.ico"), b"ico")?;
        fs::create_dir_all(website_dir.join("assets"))?;
        fs::write(website_dir.join("assets").join("app.js"), b"console.log('ok');")?;

        let website = website_dir.display().to_string();
        let mut server = start_server(bind, &[("BADNODE_WEBSITE_DIR", website.as_str())]).await?;

        let result = async {
            let http = reqwest::Client::new();

            let page = http
                .get(format!("http://{bind}/"))
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            assert!(page.contains("BadNode Service"));

            let openapi: serde_json::Value = http
                .get(format!("http://{bind}/openapi.json"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            assert_eq!(openapi["info"]["title"], "BadNode Service");

            let asset = http
                .get(format!("http://{bind}/assets/app.js"))
                .send()
                .await?
                .error_for_status()?
                .text()
                .await?;
            assert!(asset.contains("console.log"));

            let favicon = http.get(format!("http://{bind}/favicon.ico")).send().await?;
            assert_eq!(favicon.status(), StatusCode::OK);

            Ok::<(), anyhow::Error>(())
        }
        .await;

        stop_server(&mut server).await;
        let _ = fs::remove_dir_all(&website_dir);
        result
    }

    async fn start_server(bind: &str, envs: &[(&str, &str)]) -> Result<Child> {
        let server_bin = binary_path("server-node")?;

        let mut command = Command::new(server_bin);
        command
            .env("BADNODE_SERVER_BIND", bind)
            .env("BADNODE_POLL_TARGETS", "")
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in envs {
            command.env(key, value);
        }

        let child = command.spawn().context("failed to spawn server-node")?;

        wait_for_server(bind, 40).await?;
        Ok(child)
    }

    async fn run_cli(args: &[&str]) -> Result<String> {
        let cli_bin = binary_path("cli-client")?;
        let output = Command::new(cli_bin)
            .args(args)
            .output()
            .await
            .context("failed to execute cli-client")?;

        if !output.status.success() {
            bail!(
                "cli-client failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn wait_for_server(bind: &str, retries: usize) -> Result<()> {
        let health_url = format!("http://{bind}/health");
        wait_for_url_status(&health_url, StatusCode::OK, retries).await
    }

    async fn wait_for_url_status(url: &str, expected: StatusCode, retries: usize) -> Result<()> {
        let http = reqwest::Client::new();

        for _ in 0..retries {
            if let Ok(resp) = http.get(url).send().await
                && resp.status() == expected
            {
                return Ok(());
            }
            sleep(Duration::from_millis(100)).await;
        }

        bail!("service did not return {expected} at {url}");
    }

    async fn stop_server(child: &mut Child) {
        let _ = child.kill().await;
        let _ = child.wait().await;
    }

    fn binary_path(name: &str) -> Result<PathBuf> {
        let workspace_root = workspace_root()?;
        ensure_binaries_built(&workspace_root)?;
        let mut path = workspace_root.join("target").join("debug").join(name);

        if let Some(suffix) = std::env::consts::EXE_SUFFIX.strip_prefix('.') {
            let mut filename = OsString::from(name);
            filename.push(".");
            filename.push(suffix);
            path = workspace_root.join("target").join("debug").join(filename);
        }

        if !path.exists() {
            bail!("expected binary does not exist: {}", path.display());
        }

        Ok(path)
    }

    fn workspace_root() -> Result<PathBuf> {
        let crate_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        crate_dir
            .parent()
            .and_then(|p| p.parent())
            .map(PathBuf::from)
            .context("failed to resolve workspace root")
    }

    fn build_required_binaries(workspace_root: &Path) -> Result<()> {
        let status = std::process::Command::new("cargo")
            .arg("build")
            .arg("-p")
            .arg("server-node")
            .arg("-p")
            .arg("cli-client")
            .current_dir(workspace_root)
            .status()
            .context("failed to run cargo build for system test binaries")?;

        if !status.success() {
            bail!("cargo build for system test binaries failed");
        }

        Ok(())
    }

    fn ensure_binaries_built(workspace_root: &Path) -> Result<()> {
        static BUILD_RESULT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

        let result = BUILD_RESULT.get_or_init(|| {
            build_required_binaries(workspace_root).map_err(|err| err.to_string())
        });

        if let Err(message) = result {
            bail!("failed to build required binaries: {message}");
        }

        Ok(())
    }

    fn fresh_website_dir(name: &str) -> PathBuf {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let path = std::env::temp_dir().join(format!("badnode-{name}-{unique}"));
        let _ = fs::remove_dir_all(&path);
        let _ = fs::create_dir_all(&path);
        path
    }

    fn unix_ts() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}
