use assert_cmd::Command;
use httpmock::{Method::GET, MockServer};
use std::io::Write;

fn run_with_env(req: &serde_json::Value, envs: &[(&str, &str)]) -> anyhow::Result<String> {
    let mut cmd = Command::cargo_bin("monitor-mcp")?;
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let input = serde_json::to_string(req)?;
    let assert = cmd
        .arg("--log-level")
        .arg("warn")
        .write_stdin({
            let mut b = Vec::new();
            writeln!(b, "{}", input).unwrap();
            b
        })
        .assert();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    Ok(output)
}

#[test]
fn version_flag_prints_version() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("monitor-mcp")?;
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicates::str::contains("monitor-mcp"));
    Ok(())
}

#[test]
fn tools_list_covers_resources() -> anyhow::Result<()> {
    let req = serde_json::json!({"jsonrpc":"2.0","method":"tools/list","id":1});
    let out = run_with_env(&req, &[("MONITOR_TOKEN", "t")])?;
    for tool in [
        "list_devices",
        "create_devices",
        "update_device_groups",
        "delete_websites",
        "ack_alerts",
    ] {
        assert!(out.contains(tool), "tools/list missing {tool}: {out}");
    }
    Ok(())
}

#[test]
fn initialize_reports_server_info() -> anyhow::Result<()> {
    let req = serde_json::json!({"jsonrpc":"2.0","method":"initialize","id":1,"params":{}});
    let out = run_with_env(&req, &[("MONITOR_TOKEN", "t")])?;
    assert!(out.contains("\"serverInfo\""));
    assert!(out.contains("monitor-mcp"));
    Ok(())
}

#[test]
fn envelope_success_and_error_shapes() -> anyhow::Result<()> {
    let server_ok = MockServer::start();
    let _m_ok = server_ok.mock(|when, then| {
        when.method(GET).path("/device/devices");
        then.status(200)
            .header("Content-Type", "application/json")
            .json_body(serde_json::json!({"items": [{"id": 1, "displayName": "web-01"}], "total": 1}));
    });
    let ok_req = serde_json::json!({
        "jsonrpc":"2.0","method":"tools/call","id":1,
        "params":{"name":"list_devices","arguments":{}}
    });
    let out_ok = run_with_env(
        &ok_req,
        &[
            ("MONITOR_TOKEN", "t"),
            ("MONITOR_API_URL", server_ok.base_url().as_str()),
        ],
    )?;
    assert!(out_ok.contains("\"content\""));
    assert!(out_ok.contains("\"structuredContent\""));
    assert!(out_ok.contains("web-01"));
    assert!(!out_ok.contains("\"isError\":true"));

    let server_err = MockServer::start();
    let _m_err = server_err.mock(|when, then| {
        when.method(GET).path("/device/devices");
        then.status(404).body("no devices here");
    });
    let err_req = serde_json::json!({
        "jsonrpc":"2.0","method":"tools/call","id":2,
        "params":{"name":"list_devices","arguments":{}}
    });
    let out_err = run_with_env(
        &err_req,
        &[
            ("MONITOR_TOKEN", "t"),
            ("MONITOR_API_URL", server_err.base_url().as_str()),
        ],
    )?;
    assert!(out_err.contains("\"isError\":true"));
    assert!(out_err.contains("\"not_found\""));
    Ok(())
}

#[test]
fn unknown_tool_is_method_not_found() -> anyhow::Result<()> {
    let req = serde_json::json!({
        "jsonrpc":"2.0","method":"tools/call","id":3,
        "params":{"name":"reboot_datacenter","arguments":{}}
    });
    let out = run_with_env(&req, &[("MONITOR_TOKEN", "t")])?;
    assert!(out.contains("-32601"));
    Ok(())
}

#[test]
fn missing_token_is_internal_error() -> anyhow::Result<()> {
    let req = serde_json::json!({
        "jsonrpc":"2.0","method":"tools/call","id":4,
        "params":{"name":"list_devices","arguments":{}}
    });
    let mut cmd = Command::cargo_bin("monitor-mcp")?;
    cmd.env_remove("MONITOR_TOKEN").env_remove("MONITOR_API_TOKEN");
    let input = serde_json::to_string(&req)?;
    let assert = cmd
        .arg("--log-level")
        .arg("warn")
        .write_stdin(format!("{}\n", input))
        .assert();
    let out = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(out.contains("-32603"));
    assert!(out.contains("MONITOR_TOKEN"));
    Ok(())
}
