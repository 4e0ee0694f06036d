//! Cron methods.

use serde::Deserialize;

use {
    clawdis_cron::CronJobCreate,
    clawdis_protocol::{ErrorShape, error_codes},
};

use super::{MethodContext, MethodRegistry, MethodResult, handler};

pub fn register(registry: &mut MethodRegistry) {
    registry.register("cron.list", handler!(list));
    registry.register("cron.add", handler!(add));
    registry.register("cron.remove", handler!(remove));
    registry.register("cron.runNow", handler!(run_now));
}

fn service(
    ctx: &MethodContext,
) -> Result<std::sync::Arc<clawdis_cron::CronService>, ErrorShape> {
    ctx.state
        .cron
        .get()
        .cloned()
        .ok_or_else(|| ErrorShape::new(error_codes::UNAVAILABLE, "cron disabled"))
}

async fn list(ctx: MethodContext) -> MethodResult {
    let jobs = service(&ctx)?.list().await;
    Ok(serde_json::json!({ "jobs": jobs }))
}

async fn add(ctx: MethodContext) -> MethodResult {
    let create: CronJobCreate = ctx.parse_params()?;
    let job = service(&ctx)?
        .add(create)
        .await
        .map_err(|e| ErrorShape::new(error_codes::INVALID_REQUEST, e.to_string()))?;
    Ok(serde_json::json!({ "job": job }))
}

#[derive(Deserialize)]
struct IdParams {
    id: String,
}

async fn remove(ctx: MethodContext) -> MethodResult {
    let params: IdParams = ctx.parse_params()?;
    let removed = service(&ctx)?
        .remove(&params.id)
        .await
        .map_err(|e| ErrorShape::new(error_codes::UNAVAILABLE, e.to_string()))?;
    Ok(serde_json::json!({ "removed": removed }))
}

async fn run_now(ctx: MethodContext) -> MethodResult {
    let params: IdParams = ctx.parse_params()?;
    service(&ctx)?
        .run_now(&params.id)
        .await
        .map_err(|e| ErrorShape::new(error_codes::INVALID_REQUEST, e.to_string()))?;
    Ok(serde_json::json!({ "ok": true }))
}
