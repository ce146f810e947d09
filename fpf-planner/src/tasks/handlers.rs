//! Task handlers for every published task name

use super::names::*;
use super::registry::{TaskContext, TaskHandler, TaskRegistry};
use crate::autoplan::pipeline::to_json;
use crate::autoplan::PhaseRequest;
use crate::geo::seed::seed_aliases_from_trip_segments;
use crate::observability::Severity;
use crate::routing::{EnrichOptions, TripFilter};
use anyhow::Context;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

const DEFAULT_SEED_LIMIT: i64 = 500;

type HandlerFn = fn(TaskContext, Value) -> BoxFuture<'static, anyhow::Result<Value>>;

/// Adapts a plain function to [`TaskHandler`]
struct FnHandler(HandlerFn);

#[async_trait]
impl TaskHandler for FnHandler {
    async fn run(&self, ctx: TaskContext, args: Value) -> anyhow::Result<Value> {
        (self.0)(ctx, args).await
    }
}

/// Register a handler under every published name
pub fn register_all(registry: &mut TaskRegistry) {
    let table: &[(&str, HandlerFn)] = &[
        (AUTOPLAN_AUDIT, autoplan_audit),
        (AUTOPLAN_APPLY, autoplan_apply),
        (AUTOPLAN_PUSH, autoplan_push),
        (AUTOPLAN_CONFIRM, autoplan_confirm),
        (AUTOPLAN_CHAIN, autoplan_chain),
        (AUTOPLAN_CHAIN_ALIAS, autoplan_chain),
        (AUTOPLAN_CHAIN_PLANNER, autoplan_chain),
        (AUTOPLAN_KICK, autoplan_kick),
        (ROUTING_ENRICH_TRIPS, routing_enrich_trips),
        (ROUTING_ENRICH_CONFIRMED, routing_enrich_confirmed),
        (GEO_RESOLVE_BATCH, geo_resolve_batch),
        (GEO_SEED_ALIASES, geo_seed_aliases),
    ];
    for (name, handler) in table {
        registry.register(name, Arc::new(FnHandler(*handler)));
    }
}

/// Mirror a batch summary to the event log, when one is configured
async fn record_batch(ctx: &TaskContext, event_type: &str, degraded: bool, summary: &Value) {
    let Some(sink) = ctx.worker.sink.as_ref() else {
        return;
    };
    let severity = if degraded { Severity::Warn } else { Severity::Info };
    let task_id = ctx.task_id.to_string();
    sink.emit("worker", event_type, severity, Some(&task_id), summary.clone()).await;
}

fn parse_args<T: for<'de> Deserialize<'de> + Default>(args: Value) -> anyhow::Result<T> {
    if args.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(args).context("Invalid task arguments")
}

fn autoplan_audit(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let req = PhaseRequest::from_args(&args)?;
        let outcome = ctx.worker.autoplan.audit(&req).await.context("Autoplan audit failed")?;
        Ok(to_json(&outcome)?)
    })
}

fn autoplan_apply(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let req = PhaseRequest::from_args(&args)?;
        let outcome = ctx.worker.autoplan.apply(&req).await.context("Autoplan apply failed")?;
        Ok(to_json(&outcome)?)
    })
}

fn autoplan_push(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let req = PhaseRequest::from_args(&args)?;
        let outcome = ctx.worker.autoplan.push(&req).await.context("Autoplan push failed")?;
        Ok(to_json(&outcome)?)
    })
}

fn autoplan_confirm(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let req = PhaseRequest::from_args(&args)?;
        let outcome = ctx
            .worker
            .autoplan
            .confirm(&req, Some(ctx.broker.as_ref()))
            .await
            .context("Autoplan confirm failed")?;
        Ok(to_json(&outcome)?)
    })
}

fn autoplan_chain(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let req = PhaseRequest::from_args(&args)?;
        let result = ctx
            .worker
            .autoplan
            .run_chain(&req, Some(ctx.broker.as_ref()))
            .await
            .context("Autoplan chain failed")?;
        Ok(to_json(&result)?)
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KickArgs {
    limit: Option<i64>,
    dry: Option<bool>,
}

/// Minimal entry point: the active plan's chain with only limit and dry
fn autoplan_kick(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let kick: KickArgs = parse_args(args)?;
        let req = PhaseRequest {
            limit: kick.limit,
            dry: kick.dry,
            ..Default::default()
        };
        let result = ctx
            .worker
            .autoplan
            .run_chain(&req, Some(ctx.broker.as_ref()))
            .await
            .context("Autoplan kick failed")?;
        Ok(json!({"kicked": true, "chain": to_json(&result)?}))
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RoutingArgs {
    limit: Option<i64>,
    dry: Option<bool>,
    trip_id: Option<String>,
}

fn routing_enrich_trips(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let routing: RoutingArgs = parse_args(args)?;
        let options = EnrichOptions {
            limit: routing.limit,
            dry_run: routing.dry.unwrap_or(false),
            filter: match routing.trip_id {
                Some(trip_id) => TripFilter::Trip(trip_id),
                None => TripFilter::All,
            },
        };
        let summary = ctx.worker.routing.enrich(&options).await.context("Routing enrichment failed")?;
        let value = to_json(&summary)?;
        record_batch(&ctx, "routing.enrich", summary.update_errors > 0, &value).await;
        Ok(value)
    })
}

/// Segments of confirmed trips; one trip when `trip_id` is given
fn routing_enrich_confirmed(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let routing: RoutingArgs = parse_args(args)?;
        let options = EnrichOptions {
            limit: routing.limit,
            dry_run: routing.dry.unwrap_or(false),
            filter: match routing.trip_id {
                Some(trip_id) => TripFilter::Trip(trip_id),
                None => TripFilter::Confirmed,
            },
        };
        let summary = ctx.worker.routing.enrich(&options).await.context("Routing enrichment failed")?;
        let value = to_json(&summary)?;
        record_batch(&ctx, "routing.enrich_confirmed", summary.update_errors > 0, &value).await;
        Ok(value)
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeoArgs {
    limit: Option<i64>,
    force: bool,
}

fn geo_resolve_batch(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let geo: GeoArgs = parse_args(args)?;
        let Some(resolver) = ctx.worker.geo.as_ref() else {
            return Ok(json!({"ok": false, "disabled": true, "reason": "no_api_key"}));
        };
        let limit = geo.limit.unwrap_or(ctx.worker.geocoder.batch_limit).max(1);
        let summary = resolver
            .resolve_batch(limit, geo.force)
            .await
            .context("Geocoding batch failed")?;
        let value = to_json(&summary)?;
        record_batch(&ctx, "geo.resolve_batch", summary.first_error.is_some(), &value).await;
        Ok(value)
    })
}

fn geo_seed_aliases(ctx: TaskContext, args: Value) -> BoxFuture<'static, anyhow::Result<Value>> {
    Box::pin(async move {
        let geo: GeoArgs = parse_args(args)?;
        let limit = geo.limit.unwrap_or(DEFAULT_SEED_LIMIT).max(1);
        let summary = seed_aliases_from_trip_segments(&ctx.worker.pool, limit)
            .await
            .context("Alias seeding failed")?;
        Ok(to_json(&summary)?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_published_name_is_registered() {
        let mut registry = TaskRegistry::new();
        register_all(&mut registry);
        for name in [
            AUTOPLAN_AUDIT,
            AUTOPLAN_APPLY,
            AUTOPLAN_PUSH,
            AUTOPLAN_CONFIRM,
            AUTOPLAN_CHAIN,
            AUTOPLAN_CHAIN_ALIAS,
            AUTOPLAN_CHAIN_PLANNER,
            AUTOPLAN_KICK,
            ROUTING_ENRICH_TRIPS,
            ROUTING_ENRICH_CONFIRMED,
            GEO_RESOLVE_BATCH,
            GEO_SEED_ALIASES,
        ] {
            assert!(registry.contains(name), "{} not registered", name);
        }
    }

    #[test]
    fn test_args_default_when_null() {
        let args: RoutingArgs = parse_args(Value::Null).unwrap();
        assert!(args.limit.is_none());
        let args: GeoArgs = parse_args(json!({"force": true})).unwrap();
        assert!(args.force);
        assert!(parse_args::<GeoArgs>(json!({"limit": "x"})).is_err());
    }
}
