//! Node methods: listing, pairing decisions, invokes.

use serde::Deserialize;

use clawdis_protocol::{ErrorShape, error_codes};

use super::{MethodContext, MethodRegistry, MethodResult, handler};

pub fn register(registry: &mut MethodRegistry) {
    registry.register("nodes.list", handler!(list));
    registry.register("nodes.pending", handler!(pending));
    registry.register("nodes.approve", handler!(approve));
    registry.register("nodes.reject", handler!(reject));
    registry.register("nodes.invoke", handler!(invoke));
}

fn bridge(
    ctx: &MethodContext,
) -> Result<std::sync::Arc<clawdis_bridge::BridgeServer>, ErrorShape> {
    ctx.state
        .bridge
        .get()
        .cloned()
        .ok_or_else(|| ErrorShape::new(error_codes::UNAVAILABLE, "bridge disabled"))
}

async fn list(ctx: MethodContext) -> MethodResult {
    let bridge = bridge(&ctx)?;
    let connected = bridge.connected().await;
    let mut nodes = bridge.store().list_public().await;
    for node in &mut nodes {
        let online = node["nodeId"]
            .as_str()
            .is_some_and(|id| connected.iter().any(|(c, _, _)| c == id));
        node["connected"] = serde_json::Value::Bool(online);
    }
    Ok(serde_json::json!({ "nodes": nodes }))
}

async fn pending(ctx: MethodContext) -> MethodResult {
    let pending = ctx.state.pending_pairings.lock().await;
    let requests: Vec<serde_json::Value> = pending
        .iter()
        .map(|(id, p)| {
            serde_json::json!({
                "requestId": id,
                "nodeId": p.request.node_id,
                "displayName": p.request.display_name,
                "platform": p.request.platform,
                "isRepair": p.is_repair,
            })
        })
        .collect();
    Ok(serde_json::json!({ "pending": requests }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecisionParams {
    request_id: String,
}

async fn decide(ctx: MethodContext, approve: bool) -> MethodResult {
    let params: DecisionParams = ctx.parse_params()?;
    let pending = ctx
        .state
        .pending_pairings
        .lock()
        .await
        .remove(&params.request_id)
        .ok_or_else(|| ErrorShape::new(error_codes::INVALID_REQUEST, "unknown pairing request"))?;
    let node_id = pending.request.node_id.clone();
    let _ = pending.decision.send(approve);
    ctx.state
        .broadcaster
        .broadcast(
            "pairing.resolved",
            serde_json::json!({ "nodeId": node_id, "approved": approve }),
        )
        .await;
    Ok(serde_json::json!({ "ok": true }))
}

async fn approve(ctx: MethodContext) -> MethodResult {
    decide(ctx, true).await
}

async fn reject(ctx: MethodContext) -> MethodResult {
    decide(ctx, false).await
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvokeParams {
    node_id: String,
    command: String,
    #[serde(rename = "paramsJSON")]
    params_json: Option<String>,
    timeout_ms: Option<u64>,
}

async fn invoke(ctx: MethodContext) -> MethodResult {
    let params: InvokeParams = ctx.parse_params()?;
    let bridge = bridge(&ctx)?;
    let timeout = params.timeout_ms.map(std::time::Duration::from_millis);
    let result = bridge
        .invoke(&params.node_id, &params.command, params.params_json, timeout)
        .await
        .map_err(|e| ErrorShape::new(e.code(), e.user_summary()))?;
    Ok(serde_json::json!({ "ok": true, "resultJSON": result }))
}
