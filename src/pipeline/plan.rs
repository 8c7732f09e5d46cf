//! The built-in migration plan: cut a virtual data center over from its
//! legacy networking backend to the target backend.
//!
//! Each step is idempotent at the plan level through the checkpoint, and
//! each compensation reads what its forward action recorded in the
//! checkpoint values, so a rollback after a crash still knows what to undo.

use crate::client::{RemoteOutcome, RemoteRequest, SessionGuard, TaskPoller, TaskResult};
use crate::models::{Config, CutoverError, Result};
use crate::pipeline::step::{ActionOutput, Step, StepContext};
use crate::pool::BatchItem;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const KEY_TARGET_GATEWAYS: &str = "target_edge_gateways";
const KEY_TARGET_NETWORKS: &str = "target_networks";
const KEY_DISCONNECTED_NETWORKS: &str = "disconnected_networks";
const KEY_DISCONNECTED_GATEWAYS: &str = "disconnected_gateways";
const KEY_CONNECTED_TARGET_GATEWAYS: &str = "connected_target_gateways";
const KEY_RELOCATED_VAPPS: &str = "relocated_vapps";
const KEY_RENAMED_NETWORKS: &str = "renamed_networks";
const KEY_VDC_RENAMED: &str = "vdc_renamed";

/// Build the ordered cutover plan for the configured VDC pair.
pub fn migration_plan(config: &Config) -> Vec<Step> {
    let source = config.migration.source_vdc.clone();
    let target = config.migration.target_vdc();
    let suffix = config.migration.target_suffix.clone();

    vec![
        create_target_edge_gateways(&source, &target),
        create_target_networks(&source, &target, &suffix),
        disconnect_source_networks(&source),
        disconnect_source_edge_gateway(&source),
        reconnect_target_edge_gateway(&target),
        relocate_vapps(&source, &target),
        rename_target_networks(&target, &suffix),
        rename_target_vdc(&source, &target),
    ]
}

/// Execute a request and, when it spawns a remote task, wait it out.
async fn run_remote(
    ctx: &StepContext,
    request: RemoteRequest,
    timeout: Duration,
) -> Result<Value> {
    match ctx.remote.execute(&request).await? {
        RemoteOutcome::Completed(value) => Ok(value),
        RemoteOutcome::Accepted(handle) => {
            match ctx.poller.wait(&handle, timeout, ctx.tasks.poll_interval).await? {
                TaskResult::Succeeded => Ok(Value::Null),
                TaskResult::Failed(message) => Err(CutoverError::RemoteOperation(message)),
                TaskResult::TimedOut => Err(CutoverError::RemoteTimeout(timeout)),
            }
        }
    }
}

/// List a collection endpoint and normalize the answer to its records.
async fn list_records(ctx: &StepContext, operation: &str, path: String) -> Result<Vec<Value>> {
    let listing = run_remote(ctx, RemoteRequest::get(operation, path), ctx.tasks.timeout).await?;
    Ok(match listing {
        Value::Array(items) => items,
        Value::Object(ref map) => map
            .get("record")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => Vec::new(),
    })
}

fn text_field(record: &Value, field: &str) -> Result<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            CutoverError::ParseError(format!("record is missing the '{field}' field: {record}"))
        })
}

fn record_names(records: &[Value]) -> Result<HashSet<String>> {
    records.iter().map(|r| text_field(r, "name")).collect()
}

fn recorded_strings(value: &Value) -> HashSet<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn create_target_edge_gateways(source: &str, target: &str) -> Step {
    let fwd = (source.to_string(), target.to_string());
    let undo_target = target.to_string();
    Step::new(
        "create-target-edge-gateways",
        "creation of edge gateways on the target VDC",
        move |ctx: Arc<StepContext>| {
            let (source, target) = fwd.clone();
            Box::pin(async move {
                let records = list_records(
                    &ctx,
                    "listEdgeGateways",
                    format!("api/admin/vdc/{source}/edgeGateways"),
                )
                .await?;
                if records.is_empty() {
                    return Ok(ActionOutput::AlreadyDone(
                        "source VDC has no edge gateways".to_string(),
                    ));
                }
                // A crash between creation and the checkpoint write means
                // re-entry can find some gateways already on the target.
                let existing = record_names(
                    &list_records(
                        &ctx,
                        "listEdgeGateways",
                        format!("api/admin/vdc/{target}/edgeGateways"),
                    )
                    .await?,
                )?;
                let mut created: Vec<String> = Vec::new();
                let mut did_create = false;
                for record in &records {
                    let name = text_field(record, "name")?;
                    if !existing.contains(&name) {
                        run_remote(
                            &ctx,
                            RemoteRequest::post(
                                "createEdgeGateway",
                                format!("api/admin/vdc/{target}/edgeGateways"),
                            )
                            .with_body(json!({ "name": name, "cloneFrom": source })),
                            ctx.tasks.timeout,
                        )
                        .await?;
                        did_create = true;
                    }
                    created.push(name);
                }
                ctx.store.set(
                    KEY_TARGET_GATEWAYS,
                    Value::Array(created.iter().map(|n| json!(n)).collect()),
                )?;
                if did_create {
                    Ok(ActionOutput::Completed(Value::Null))
                } else {
                    Ok(ActionOutput::AlreadyDone(
                        "target edge gateways already exist".to_string(),
                    ))
                }
            })
        },
    )
    .with_compensation(move |ctx: Arc<StepContext>| {
        let target = undo_target.clone();
        Box::pin(async move {
            let Some(recorded) = ctx.store.value(KEY_TARGET_GATEWAYS) else {
                return Ok(ActionOutput::AlreadyDone(
                    "no target edge gateways recorded".to_string(),
                ));
            };
            let names = recorded_strings(&recorded);
            let records = list_records(
                &ctx,
                "listEdgeGateways",
                format!("api/admin/vdc/{target}/edgeGateways"),
            )
            .await?;
            for record in &records {
                if !names.contains(&text_field(record, "name")?) {
                    continue;
                }
                let id = text_field(record, "id")?;
                run_remote(
                    &ctx,
                    RemoteRequest::delete("deleteEdgeGateway", format!("api/admin/edgeGateway/{id}")),
                    ctx.tasks.timeout,
                )
                .await?;
            }
            ctx.store.remove(KEY_TARGET_GATEWAYS)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}

fn create_target_networks(source: &str, target: &str, suffix: &str) -> Step {
    let fwd = (source.to_string(), target.to_string(), suffix.to_string());
    let undo_target = target.to_string();
    Step::new(
        "create-target-networks",
        "creation of org networks on the target VDC",
        move |ctx: Arc<StepContext>| {
            let (source, target, suffix) = fwd.clone();
            Box::pin(async move {
                let records =
                    list_records(&ctx, "listNetworks", format!("api/vdc/{source}/networks"))
                        .await?;
                if records.is_empty() {
                    return Ok(ActionOutput::AlreadyDone(
                        "source VDC has no org networks".to_string(),
                    ));
                }
                // Re-entry after a crash may find some staged networks
                // already created.
                let existing = record_names(
                    &list_records(&ctx, "listNetworks", format!("api/vdc/{target}/networks"))
                        .await?,
                )?;
                let mut created: Vec<String> = Vec::new();
                let mut did_create = false;
                for record in &records {
                    let name = text_field(record, "name")?;
                    // Created under a suffixed name so both networks can
                    // coexist until the rename step.
                    let staged = format!("{name}{suffix}");
                    if !existing.contains(&staged) {
                        run_remote(
                            &ctx,
                            RemoteRequest::post(
                                "createNetwork",
                                format!("api/admin/vdc/{target}/networks"),
                            )
                            .with_body(json!({ "name": staged, "cloneFrom": name })),
                            ctx.tasks.timeout,
                        )
                        .await?;
                        did_create = true;
                    }
                    created.push(staged);
                }
                ctx.store.set(
                    KEY_TARGET_NETWORKS,
                    Value::Array(created.iter().map(|n| json!(n)).collect()),
                )?;
                if did_create {
                    Ok(ActionOutput::Completed(Value::Null))
                } else {
                    Ok(ActionOutput::AlreadyDone(
                        "target networks already exist".to_string(),
                    ))
                }
            })
        },
    )
    .with_compensation(move |ctx: Arc<StepContext>| {
        let target = undo_target.clone();
        Box::pin(async move {
            let Some(recorded) = ctx.store.value(KEY_TARGET_NETWORKS) else {
                return Ok(ActionOutput::AlreadyDone(
                    "no target networks recorded".to_string(),
                ));
            };
            let names = recorded_strings(&recorded);
            let records =
                list_records(&ctx, "listNetworks", format!("api/vdc/{target}/networks")).await?;
            for record in &records {
                if !names.contains(&text_field(record, "name")?) {
                    continue;
                }
                let id = text_field(record, "id")?;
                run_remote(
                    &ctx,
                    RemoteRequest::delete("deleteNetwork", format!("api/admin/network/{id}")),
                    ctx.tasks.timeout,
                )
                .await?;
            }
            ctx.store.remove(KEY_TARGET_NETWORKS)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}

fn disconnect_source_networks(source: &str) -> Step {
    let fwd_source = source.to_string();
    Step::new(
        "disconnect-source-networks",
        "disconnection of org networks from the source edge gateway",
        move |ctx: Arc<StepContext>| {
            let source = fwd_source.clone();
            Box::pin(async move {
                let records =
                    list_records(&ctx, "listNetworks", format!("api/vdc/{source}/networks"))
                        .await?;
                if records.is_empty() {
                    return Ok(ActionOutput::AlreadyDone(
                        "source VDC has no org networks".to_string(),
                    ));
                }
                let mut disconnected = Vec::new();
                for record in &records {
                    let id = text_field(record, "id")?;
                    run_remote(
                        &ctx,
                        RemoteRequest::put("disconnectNetwork", format!("api/admin/network/{id}"))
                            .with_body(json!({ "connected": false })),
                        ctx.tasks.timeout,
                    )
                    .await?;
                    disconnected.push(json!(id));
                }
                ctx.store
                    .set(KEY_DISCONNECTED_NETWORKS, Value::Array(disconnected))?;
                Ok(ActionOutput::Completed(Value::Null))
            })
        },
    )
    .with_compensation(|ctx: Arc<StepContext>| {
        Box::pin(async move {
            let Some(recorded) = ctx.store.value(KEY_DISCONNECTED_NETWORKS) else {
                return Ok(ActionOutput::AlreadyDone(
                    "no disconnected networks recorded".to_string(),
                ));
            };
            for id in recorded_strings(&recorded) {
                run_remote(
                    &ctx,
                    RemoteRequest::put("reconnectNetwork", format!("api/admin/network/{id}"))
                        .with_body(json!({ "connected": true })),
                    ctx.tasks.timeout,
                )
                .await?;
            }
            ctx.store.remove(KEY_DISCONNECTED_NETWORKS)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}

/// Toggle the connection state of every edge gateway on `vdc`, recording the
/// touched gateway ids under `key`.
async fn set_gateway_connection(
    ctx: &StepContext,
    vdc: &str,
    connect: bool,
    key: &str,
) -> Result<ActionOutput> {
    let records = list_records(
        ctx,
        "listEdgeGateways",
        format!("api/admin/vdc/{vdc}/edgeGateways"),
    )
    .await?;
    if records.is_empty() {
        return Ok(ActionOutput::AlreadyDone(format!(
            "{vdc} has no edge gateways"
        )));
    }
    let (operation, action) = if connect {
        ("connectEdgeGateway", "connect")
    } else {
        ("disconnectEdgeGateway", "disconnect")
    };
    let mut touched = Vec::new();
    for record in &records {
        let id = text_field(record, "id")?;
        run_remote(
            ctx,
            RemoteRequest::post(operation, format!("api/admin/edgeGateway/{id}/action/{action}")),
            ctx.tasks.timeout,
        )
        .await?;
        touched.push(json!(id));
    }
    ctx.store.set(key, Value::Array(touched))?;
    Ok(ActionOutput::Completed(Value::Null))
}

/// Undo a connection toggle for the gateways recorded under `key`.
async fn restore_gateway_connection(
    ctx: &StepContext,
    connect: bool,
    key: &str,
) -> Result<ActionOutput> {
    let Some(recorded) = ctx.store.value(key) else {
        return Ok(ActionOutput::AlreadyDone(
            "no gateway connection change recorded".to_string(),
        ));
    };
    let (operation, action) = if connect {
        ("connectEdgeGateway", "connect")
    } else {
        ("disconnectEdgeGateway", "disconnect")
    };
    for id in recorded_strings(&recorded) {
        run_remote(
            ctx,
            RemoteRequest::post(operation, format!("api/admin/edgeGateway/{id}/action/{action}")),
            ctx.tasks.timeout,
        )
        .await?;
    }
    ctx.store.remove(key)?;
    Ok(ActionOutput::Completed(Value::Null))
}

fn disconnect_source_edge_gateway(source: &str) -> Step {
    let source = source.to_string();
    Step::new(
        "disconnect-source-edge-gateway",
        "disconnection of the source edge gateway from its external network",
        move |ctx: Arc<StepContext>| {
            let source = source.clone();
            Box::pin(async move {
                set_gateway_connection(&ctx, &source, false, KEY_DISCONNECTED_GATEWAYS).await
            })
        },
    )
    .with_compensation(|ctx: Arc<StepContext>| {
        Box::pin(
            async move { restore_gateway_connection(&ctx, true, KEY_DISCONNECTED_GATEWAYS).await },
        )
    })
}

fn reconnect_target_edge_gateway(target: &str) -> Step {
    let target = target.to_string();
    Step::new(
        "reconnect-target-edge-gateway",
        "connection of the target edge gateway to the external network",
        move |ctx: Arc<StepContext>| {
            let target = target.clone();
            Box::pin(async move {
                set_gateway_connection(&ctx, &target, true, KEY_CONNECTED_TARGET_GATEWAYS).await
            })
        },
    )
    .with_compensation(|ctx: Arc<StepContext>| {
        Box::pin(async move {
            restore_gateway_connection(&ctx, false, KEY_CONNECTED_TARGET_GATEWAYS).await
        })
    })
}

async fn relocate_one(
    remote: Arc<SessionGuard>,
    poller: TaskPoller,
    vapp_id: String,
    destination: String,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let request = RemoteRequest::post("relocateVApp", format!("api/vApp/{vapp_id}/action/relocate"))
        .with_body(json!({ "vdc": destination }));
    match remote.execute(&request).await? {
        RemoteOutcome::Completed(_) => Ok(()),
        RemoteOutcome::Accepted(handle) => match poller.wait(&handle, timeout, interval).await? {
            TaskResult::Succeeded => Ok(()),
            TaskResult::Failed(message) => Err(CutoverError::RemoteOperation(message)),
            TaskResult::TimedOut => Err(CutoverError::RemoteTimeout(timeout)),
        },
    }
}

/// Relocate a batch of vApps to `to` with bounded parallelism.
///
/// When `record_key` is set, each worker checkpoints its vApp id as soon as
/// its own relocation succeeds, so a partial batch failure still leaves a
/// full record of which vApps actually moved.
async fn relocate_batch(
    ctx: &StepContext,
    items: Vec<BatchItem>,
    to: &str,
    record_key: Option<&'static str>,
) -> Result<()> {
    let remote = Arc::clone(&ctx.remote);
    let poller = ctx.poller.clone();
    let store = Arc::clone(&ctx.store);
    // Relocation moves disk images; it gets the long deadline.
    let timeout = ctx.tasks.relocation_timeout;
    let interval = ctx.tasks.poll_interval;
    let destination = to.to_string();

    let summary = ctx
        .batch
        .run_all(items, move |item| {
            let remote = Arc::clone(&remote);
            let poller = poller.clone();
            let store = Arc::clone(&store);
            let destination = destination.clone();
            Box::pin(async move {
                let id = item.id.clone();
                relocate_one(remote, poller, item.id, destination, timeout, interval).await?;
                if let Some(key) = record_key {
                    store.append_value(key, json!(id))?;
                }
                Ok(())
            })
        })
        .await;
    summary.into_result()?;
    Ok(())
}

fn relocate_vapps(source: &str, target: &str) -> Step {
    let fwd = (source.to_string(), target.to_string());
    let undo_source = source.to_string();
    Step::new(
        "relocate-vapps",
        "relocation of vApps to the target VDC",
        move |ctx: Arc<StepContext>| {
            let (source, target) = fwd.clone();
            Box::pin(async move {
                let records =
                    list_records(&ctx, "listVApps", format!("api/vdc/{source}/vApps")).await?;
                if records.is_empty() {
                    return Ok(ActionOutput::AlreadyDone(
                        "source VDC has no vApps".to_string(),
                    ));
                }
                let mut items = Vec::new();
                for record in &records {
                    let id = text_field(record, "id")?;
                    let name = text_field(record, "name")?;
                    items.push(BatchItem::new(id, json!({ "name": name })));
                }
                relocate_batch(&ctx, items, &target, Some(KEY_RELOCATED_VAPPS)).await?;
                Ok(ActionOutput::Completed(Value::Null))
            })
        },
    )
    .with_compensation(move |ctx: Arc<StepContext>| {
        let source = undo_source.clone();
        Box::pin(async move {
            let Some(recorded) = ctx.store.value(KEY_RELOCATED_VAPPS) else {
                return Ok(ActionOutput::AlreadyDone(
                    "no relocated vApps recorded".to_string(),
                ));
            };
            let items: Vec<BatchItem> = recorded_strings(&recorded)
                .into_iter()
                .map(|id| BatchItem::new(id, Value::Null))
                .collect();
            relocate_batch(&ctx, items, &source, None).await?;
            ctx.store.remove(KEY_RELOCATED_VAPPS)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}

fn rename_target_networks(target: &str, suffix: &str) -> Step {
    let fwd = (target.to_string(), suffix.to_string());
    Step::new(
        "rename-target-networks",
        "renaming of target org networks to their final names",
        move |ctx: Arc<StepContext>| {
            let (target, suffix) = fwd.clone();
            Box::pin(async move {
                let records =
                    list_records(&ctx, "listNetworks", format!("api/vdc/{target}/networks"))
                        .await?;
                let mut renamed = Vec::new();
                for record in &records {
                    let name = text_field(record, "name")?;
                    let Some(final_name) = name.strip_suffix(suffix.as_str()) else {
                        continue;
                    };
                    let id = text_field(record, "id")?;
                    run_remote(
                        &ctx,
                        RemoteRequest::put("renameNetwork", format!("api/admin/network/{id}"))
                            .with_body(json!({ "name": final_name })),
                        ctx.tasks.timeout,
                    )
                    .await?;
                    renamed.push(json!({ "id": id, "from": name, "to": final_name }));
                }
                if renamed.is_empty() {
                    return Ok(ActionOutput::AlreadyDone(
                        "no networks carry the staging suffix".to_string(),
                    ));
                }
                ctx.store.set(KEY_RENAMED_NETWORKS, Value::Array(renamed))?;
                Ok(ActionOutput::Completed(Value::Null))
            })
        },
    )
    .with_compensation(|ctx: Arc<StepContext>| {
        Box::pin(async move {
            let Some(recorded) = ctx.store.value(KEY_RENAMED_NETWORKS) else {
                return Ok(ActionOutput::AlreadyDone(
                    "no renamed networks recorded".to_string(),
                ));
            };
            for entry in recorded.as_array().cloned().unwrap_or_default() {
                let id = text_field(&entry, "id")?;
                let from = text_field(&entry, "from")?;
                run_remote(
                    &ctx,
                    RemoteRequest::put("renameNetwork", format!("api/admin/network/{id}"))
                        .with_body(json!({ "name": from })),
                    ctx.tasks.timeout,
                )
                .await?;
            }
            ctx.store.remove(KEY_RENAMED_NETWORKS)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}

fn rename_target_vdc(source: &str, target: &str) -> Step {
    let fwd = (source.to_string(), target.to_string());
    let undo = (source.to_string(), target.to_string());
    Step::new(
        "rename-target-vdc",
        "renaming of the target VDC to the source VDC's name",
        move |ctx: Arc<StepContext>| {
            let (source, target) = fwd.clone();
            Box::pin(async move {
                run_remote(
                    &ctx,
                    RemoteRequest::put("renameVdc", format!("api/admin/vdc/{target}"))
                        .with_body(json!({ "name": source })),
                    ctx.tasks.timeout,
                )
                .await?;
                ctx.store.set(KEY_VDC_RENAMED, json!(true))?;
                Ok(ActionOutput::Completed(Value::Null))
            })
        },
    )
    .with_compensation(move |ctx: Arc<StepContext>| {
        let (source, target) = undo.clone();
        Box::pin(async move {
            if ctx.store.value(KEY_VDC_RENAMED).is_none() {
                return Ok(ActionOutput::AlreadyDone(
                    "target VDC was not renamed".to_string(),
                ));
            }
            // The rename took effect, so the VDC now answers to the source
            // name.
            run_remote(
                &ctx,
                RemoteRequest::put("renameVdc", format!("api/admin/vdc/{source}"))
                    .with_body(json!({ "name": target })),
                ctx.tasks.timeout,
            )
            .await?;
            ctx.store.remove(KEY_VDC_RENAMED)?;
            Ok(ActionOutput::Completed(Value::Null))
        })
    })
}
