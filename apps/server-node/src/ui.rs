use super::*;
use axum::response::Html;
use common::chain::format_with_commas;

pub(crate) async fn index(State(state): State<ServerState>) -> Html<String> {
    let counts = state.service.counts();
    let registry = state.service.registry();
    let policy = *registry.policy();
    let now = registry.now_unix();

    let mut rows = String::new();
    // Each row comes from a single snapshot so health and details agree.
    for window in registry
        .list(None)
        .filter_map(|summary| registry.get(&summary.node_id))
    {
        let Some(latest) = window.latest() else {
            continue;
        };
        let block = latest
            .sample
            .block_number
            .map(format_with_commas)
            .unwrap_or_else(|| "-".to_string());

        rows.push_str(&format!(
            "<tr><td><code>{}</code></td><td class=\"{}\">{}</td><td><span style=\"color: {}\">{}</span></td><td>{}</td><td>{}</td><td>{}</td><td>{}s ago</td></tr>\n",
            escape_html(window.node_id.as_str()),
            window.health,
            window.health,
            status_color(latest.sample.status),
            latest.sample.status,
            escape_html(window.chain.as_deref().unwrap_or("-")),
            escape_html(window.client.as_deref().unwrap_or("-")),
            block,
            now.saturating_sub(window.last_seen_unix),
        ));
    }
    if rows.is_empty() {
        rows.push_str("<tr><td colspan=\"7\">no nodes observed yet</td></tr>\n");
    }

    let body = format!(
        "<!doctype html>
<html lang=\"en\">
<head>
  <meta charset=\"utf-8\" />
  <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\" />
  <title>BadNode Service</title>
  <link rel=\"icon\" href=\"/favicon.ico\" />
  <style>
    body {{ font-family: system-ui, sans-serif; margin: 2rem; }}
    main {{ max-width: 960px; margin: 0 auto; }}
    code {{ background: #f4f4f4; padding: 0.2rem 0.4rem; border-radius: 0.2rem; }}
    table {{ border-collapse: collapse; width: 100%; }}
    th, td {{ text-align: left; padding: 0.35rem 0.5rem; border-bottom: 1px solid #ddd; }}
    td.bad {{ color: #E84E40; font-weight: 600; }}
    td.healthy {{ color: #86C956; font-weight: 600; }}
    ul {{ line-height: 1.6; }}
  </style>
</head>
<body>
  <main>
    <h1>BadNode Service</h1>
    <p>Evm node status website services.</p>
    <p>Nodes healthy/bad/total: <code>{}/{}/{}</code></p>
    <p>Window: <code>{} samples</code>, <code>{}s</code> max age; liveness timeout <code>{}s</code>; retention ceiling <code>{}s</code></p>
    <h2>Nodes</h2>
    <table>
      <thead><tr><th>Node</th><th>Health</th><th>Status</th><th>Chain</th><th>Client</th><th>Block</th><th>Last seen</th></tr></thead>
      <tbody>
{}      </tbody>
    </table>
    <h2>Available routes</h2>
    <ul>
      <li><code>GET /</code> — this dashboard</li>
      <li><code>GET /health</code> — service health JSON</li>
      <li><code>GET /openapi.json</code> — API description</li>
      <li><code>POST /nodes/{{node_id}}/status</code> — report one status sample</li>
      <li><code>GET /nodes/{{node_id}}/status</code> — current window for a node</li>
      <li><code>GET /nodes?health=healthy|bad</code> — node summaries</li>
      <li><code>POST /admin/purge?unseen_for_secs=&lt;n&gt;</code> — drop nodes unseen for n seconds</li>
      <li><code>POST /admin/purge?older_than_unix=&lt;t&gt;</code> — drop nodes last seen before t</li>
    </ul>
  </main>
</body>
</html>\n",
        counts.healthy,
        counts.bad,
        counts.total,
        policy.max_samples,
        policy.max_age_secs,
        policy.liveness_timeout_secs,
        state.retention_ceiling_secs,
        rows,
    );

    Html(body)
}

pub(crate) async fn openapi() -> Json<serde_json::Value> {
    let node_id_param = serde_json::json!({
        "name": "node_id",
        "in": "path",
        "required": true,
        "schema": { "type": "string", "maxLength": common::MAX_NODE_ID_LEN }
    });

    Json(serde_json::json!({
        "openapi": "3.0.3",
        "info": {
            "title": "BadNode Service",
            "description": "Evm node status website services",
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": {
            "/health": {
                "get": { "summary": "Service health", "responses": { "200": { "description": "HealthStatus" } } }
            },
            "/nodes": {
                "get": {
                    "summary": "List node summaries",
                    "parameters": [{
                        "name": "health",
                        "in": "query",
                        "required": false,
                        "schema": { "type": "string", "enum": ["healthy", "bad"] }
                    }],
                    "responses": {
                        "200": { "description": "NodeSummary list" },
                        "400": { "description": "Unknown health filter" }
                    }
                }
            },
            "/nodes/{node_id}/status": {
                "get": {
                    "summary": "Current status window of a node",
                    "parameters": [node_id_param.clone()],
                    "responses": {
                        "200": { "description": "NodeStatusResponse; known=false for never observed nodes" },
                        "400": { "description": "Invalid node id" }
                    }
                },
                "post": {
                    "summary": "Report a status sample",
                    "parameters": [node_id_param],
                    "requestBody": { "required": true, "content": { "application/json": {} } },
                    "responses": {
                        "202": { "description": "ReportAck" },
                        "400": { "description": "Invalid node id" }
                    }
                }
            },
            "/admin/purge": {
                "post": {
                    "summary": "Remove nodes not seen since a cutoff",
                    "parameters": [
                        { "name": "older_than_unix", "in": "query", "schema": { "type": "integer" } },
                        { "name": "unseen_for_secs", "in": "query", "schema": { "type": "integer" } }
                    ],
                    "responses": {
                        "200": { "description": "PurgeReport" },
                        "400": { "description": "Missing or conflicting cutoff" }
                    }
                }
            }
        }
    }))
}

fn status_color(status: ClientStatus) -> &'static str {
    match status {
        ClientStatus::Syncing => "#86C956",
        ClientStatus::Listening => "#FFB800",
        ClientStatus::Stopped => "#E84E40",
        ClientStatus::Unreachable => "#1A130F",
    }
}

fn escape_html(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
