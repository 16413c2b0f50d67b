use crate::batch::{process_batch, ToolRequest};
use crate::config::Config;
use crate::error::ApiError;
use crate::filter;
use crate::http::{self, ApiClient, PageCursor, Paged, RateMeta};
use crate::limiter::{RateLimiter, RetryOptions, API_REQUEST_KEY};
use crate::mcp::mcp_wrap;
use crate::tools::*;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

// Upstream collection endpoints, relative to the configured API base.
const DEVICES: &str = "device/devices";
const DEVICE_GROUPS: &str = "device/groups";
const WEBSITES: &str = "website/websites";
const ALERTS: &str = "alert/alerts";

// Minimal JSON-RPC 2.0 types
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Id {
    Str(String),
    Num(i64),
    Null,
}

#[derive(Debug, Serialize, Deserialize)]
struct Request {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: Value,
    id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Response {
    jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: Option<Id>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

fn rpc_error(id: Option<Id>, code: i64, message: &str, data: Option<Value>) -> Response {
    Response {
        jsonrpc: "2.0".into(),
        result: None,
        error: Some(RpcError {
            code,
            message: message.into(),
            data,
        }),
        id,
    }
}

fn rpc_ok(id: Option<Id>, result: Value) -> Response {
    Response {
        jsonrpc: "2.0".into(),
        result: Some(result),
        error: None,
        id,
    }
}

/// Line-delimited JSON-RPC loop over stdio. The rate limiter lives for the
/// whole process so observations persist across tool calls.
pub async fn run_stdio_server() -> anyhow::Result<()> {
    info!(
        "Starting monitor-mcp stdio server; protocol={}",
        PROTOCOL_VERSION
    );
    let limiter = RateLimiter::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let req: Request = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                let resp = rpc_error(None, -32700, &format!("Parse error: {}", e), None);
                write_response(&mut stdout, &resp).await?;
                continue;
            }
        };
        if req.id.is_none() && req.method.starts_with("notifications/") {
            continue;
        }
        debug!("Received method={}", req.method);
        let resp = dispatch(req, &limiter).await;
        write_response(&mut stdout, &resp).await?;
    }
    Ok(())
}

async fn write_response(
    stdout: &mut tokio::io::Stdout,
    resp: &Response,
) -> anyhow::Result<()> {
    let mut payload = serde_json::to_string(resp)?;
    payload.push('\n');
    stdout.write_all(payload.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

async fn dispatch(req: Request, limiter: &RateLimiter) -> Response {
    match req.method.as_str() {
        "initialize" => handle_initialize(req.id),
        "tools/list" => handle_tools_list(req.id),
        "tools/call" => handle_tools_call(req.id, req.params, limiter).await,
        "ping" => handle_ping(req.id, req.params),
        other => rpc_error(req.id, -32601, &format!("Method not found: {}", other), None),
    }
}

fn handle_initialize(id: Option<Id>) -> Response {
    rpc_ok(
        id,
        serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": "monitor-mcp",
                "version": env!("CARGO_PKG_VERSION"),
            }
        }),
    )
}

fn handle_tools_list(id: Option<Id>) -> Response {
    let tools = tool_descriptors();
    rpc_ok(id, serde_json::json!({ "tools": tools }))
}

fn handle_ping(id: Option<Id>, params: Value) -> Response {
    let input: PingInput = match serde_json::from_value(params) {
        Ok(v) => v,
        Err(_) => PingInput { message: None },
    };
    let message = input.message.unwrap_or_else(|| "pong".to_string());
    rpc_ok(
        id,
        serde_json::to_value(PingOutput { message }).unwrap_or(Value::Null),
    )
}

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

// Tool-level failures that map to JSON-RPC error responses rather than an
// error envelope in the result.
enum ToolError {
    InvalidParams(String),
}

async fn handle_tools_call(id: Option<Id>, params: Value, limiter: &RateLimiter) -> Response {
    let parsed: Result<ToolCallParams, _> = serde_json::from_value(params);
    let Ok(call) = parsed else {
        return rpc_error(id, -32602, "Invalid params", None);
    };
    if call.name == "ping" {
        return handle_ping(id, call.arguments);
    }
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => return rpc_error(id, -32603, &e, None),
    };
    let client = match ApiClient::new(&cfg) {
        Ok(c) => c,
        Err(e) => return rpc_error(id, -32603, &e.to_string(), None),
    };
    let ctx = ToolCtx {
        client: &client,
        limiter,
    };
    let out = match call.name.as_str() {
        "list_devices" => ctx.list(DEVICES, call.arguments, false).await,
        "get_device" => ctx.get(DEVICES, call.arguments).await,
        "create_devices" => ctx.mutate(DEVICES, call.arguments, Verb::Create).await,
        "update_devices" => ctx.mutate(DEVICES, call.arguments, Verb::Update).await,
        "delete_devices" => ctx.mutate(DEVICES, call.arguments, Verb::Delete).await,
        "list_device_groups" => ctx.list(DEVICE_GROUPS, call.arguments, false).await,
        "get_device_group" => ctx.get(DEVICE_GROUPS, call.arguments).await,
        "create_device_groups" => ctx.mutate(DEVICE_GROUPS, call.arguments, Verb::Create).await,
        "update_device_groups" => ctx.mutate(DEVICE_GROUPS, call.arguments, Verb::Update).await,
        "delete_device_groups" => ctx.mutate(DEVICE_GROUPS, call.arguments, Verb::Delete).await,
        "list_websites" => ctx.list(WEBSITES, call.arguments, false).await,
        "get_website" => ctx.get(WEBSITES, call.arguments).await,
        "create_websites" => ctx.mutate(WEBSITES, call.arguments, Verb::Create).await,
        "update_websites" => ctx.mutate(WEBSITES, call.arguments, Verb::Update).await,
        "delete_websites" => ctx.mutate(WEBSITES, call.arguments, Verb::Delete).await,
        // Alert totals use the sign-flipped "at least |total|" convention.
        "list_alerts" => ctx.list(ALERTS, call.arguments, true).await,
        "get_alert" => ctx.get(ALERTS, call.arguments).await,
        "ack_alerts" => ctx.mutate(ALERTS, call.arguments, Verb::Ack).await,
        _ => return rpc_error(id, -32601, &format!("Tool not found: {}", call.name), None),
    };
    match out {
        Ok(wrapped) => rpc_ok(id, wrapped),
        Err(ToolError::InvalidParams(msg)) => rpc_error(id, -32602, &msg, None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Create,
    Update,
    Delete,
    Ack,
}

struct ToolCtx<'a> {
    client: &'a ApiClient,
    limiter: &'a RateLimiter,
}

impl ToolCtx<'_> {
    async fn list(
        &self,
        path: &str,
        args: Value,
        at_least_total: bool,
    ) -> Result<Value, ToolError> {
        let input: ListInput = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParams(format!("Invalid params: {e}")))?;
        let include_rate = input.include_rate.unwrap_or(false);
        let size = input.size.unwrap_or(50);
        if size == 0 || size > 1000 {
            return Err(ToolError::InvalidParams("size must be 1..=1000".into()));
        }
        let offset = match input.cursor.as_deref() {
            Some(c) => {
                http::decode_cursor(c)
                    .ok_or_else(|| ToolError::InvalidParams("invalid cursor".into()))?
                    .offset
            }
            None => 0,
        };
        let translated = match input.filter.as_deref() {
            Some(expr) => filter::translate(expr)
                .map_err(|e| ToolError::InvalidParams(format!("Invalid filter: {e}")))?,
            None => String::new(),
        };
        let mut query = format!("{path}?offset={offset}&size={size}");
        if !translated.is_empty() {
            query.push_str("&filter=");
            query.push_str(&urlencoding::encode(&translated));
        }

        let fetched = self
            .limiter
            .execute_with_retry(API_REQUEST_KEY, &RetryOptions::default(), || {
                self.client.get_json::<Paged<Value>>(&query)
            })
            .await;
        let resp = match fetched {
            Ok(r) => r,
            Err(err) => {
                warn!("list {} failed: {}", path, err);
                return Ok(list_error(&err, include_rate));
            }
        };
        self.limiter.record_observation(API_REQUEST_KEY, resp.rate);

        let len = resp.value.items.len() as u32;
        let total = resp.value.total;
        let next_offset = offset + len;
        let has_more = if at_least_total && total < 0 {
            // Sign-flipped totals mean "at least |total|": a full page
            // implies more may exist.
            len == size
        } else {
            i64::from(next_offset) < total
        };
        let items: Vec<Value> = resp
            .value
            .items
            .into_iter()
            .map(|item| project_fields(item, input.fields.as_deref()))
            .collect();
        let out = ListOutput {
            items: Some(items),
            meta: Meta {
                next_cursor: has_more.then(|| {
                    http::encode_cursor(PageCursor {
                        offset: next_offset,
                        size,
                    })
                }),
                has_more,
                rate: RateMeta::from_signal(resp.rate),
            },
            error: None,
        };
        Ok(mcp_wrap(to_value(&out), None, false, include_rate))
    }

    async fn get(&self, path: &str, args: Value) -> Result<Value, ToolError> {
        let input: GetInput = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParams(format!("Invalid params: {e}")))?;
        let include_rate = input.include_rate.unwrap_or(false);
        let query = format!("{path}/{}", input.id);
        let fetched = self
            .limiter
            .execute_with_retry(API_REQUEST_KEY, &RetryOptions::default(), || {
                self.client.get_json::<Value>(&query)
            })
            .await;
        let resp = match fetched {
            Ok(r) => r,
            Err(err) => return Ok(item_error(&err, include_rate)),
        };
        self.limiter.record_observation(API_REQUEST_KEY, resp.rate);
        let out = ItemOutput {
            item: Some(project_fields(resp.value, input.fields.as_deref())),
            meta: Meta {
                rate: RateMeta::from_signal(resp.rate),
                ..Meta::default()
            },
            error: None,
        };
        Ok(mcp_wrap(to_value(&out), None, false, include_rate))
    }

    /// Single-or-batch mutation funnel. The input shape decides once at the
    /// boundary; the executor only ever sees an ordered list.
    async fn mutate(&self, path: &str, args: Value, verb: Verb) -> Result<Value, ToolError> {
        let request: ToolRequest<Value> = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidParams(format!("Invalid params: {e}")))?;
        let (items, options, single) = request.into_parts();
        let client = self.client;
        let limiter = self.limiter;
        let outcome = process_batch(items, &options, Some(limiter), |item, _| async move {
            apply_mutation(client, limiter, path, verb, item).await
        })
        .await;
        Ok(match outcome {
            Ok(batch) if single => match batch.into_single() {
                Ok(value) => mcp_wrap(
                    serde_json::json!({ "item": value }),
                    None,
                    false,
                    false,
                ),
                Err(err) => item_error(&err, false),
            },
            Ok(batch) => {
                let out = BatchOutput::from(batch);
                mcp_wrap(to_value(&out), None, false, false)
            }
            // Abort mode (continue_on_error=false) or pre-dispatch failure.
            Err(err) => item_error(&err, false),
        })
    }
}

async fn apply_mutation(
    client: &ApiClient,
    limiter: &RateLimiter,
    path: &str,
    verb: Verb,
    item: Value,
) -> Result<Value, ApiError> {
    let resp = match verb {
        Verb::Create => client.post_json::<_, Value>(path, &item).await?,
        Verb::Update => {
            let id = item_id(&item)?;
            client
                .patch_json::<_, Value>(&format!("{path}/{id}"), &item)
                .await?
        }
        Verb::Delete => {
            let id = item_id(&item)?;
            let resp = client.delete(&format!("{path}/{id}")).await?;
            limiter.record_observation(API_REQUEST_KEY, resp.rate);
            return Ok(serde_json::json!({ "id": id, "deleted": true }));
        }
        Verb::Ack => {
            let id = item_id(&item)?;
            let note = item.get("note").and_then(|v| v.as_str()).unwrap_or("");
            client
                .post_json::<_, Value>(
                    &format!("{path}/{id}/ack"),
                    &serde_json::json!({ "ackComment": note }),
                )
                .await?
        }
    };
    limiter.record_observation(API_REQUEST_KEY, resp.rate);
    Ok(resp.value)
}

fn item_id(item: &Value) -> Result<i64, ApiError> {
    item.as_i64()
        .or_else(|| item.get("id").and_then(|v| v.as_i64()))
        .ok_or_else(|| ApiError::Status {
            code: "bad_request".into(),
            message: "item is missing a numeric id".into(),
        })
}

// Keep only the requested top-level fields of an upstream object.
fn project_fields(item: Value, fields: Option<&[String]>) -> Value {
    let Some(fields) = fields else { return item };
    let Value::Object(map) = item else { return item };
    let mut projected = serde_json::Map::new();
    for (k, v) in map {
        if fields.iter().any(|f| f == &k) {
            projected.insert(k, v);
        }
    }
    Value::Object(projected)
}

fn to_value<T: Serialize>(out: &T) -> Value {
    serde_json::to_value(out).unwrap_or(Value::Null)
}

fn list_error(err: &ApiError, include_rate: bool) -> Value {
    let out = ListOutput {
        items: None,
        meta: Meta::default(),
        error: Some(ErrorShape::from(err)),
    };
    mcp_wrap(to_value(&out), Some(err.message()), true, include_rate)
}

fn item_error(err: &ApiError, include_rate: bool) -> Value {
    let out = ItemOutput {
        item: None,
        meta: Meta::default(),
        error: Some(ErrorShape::from(err)),
    };
    mcp_wrap(to_value(&out), Some(err.message()), true, include_rate)
}
