//! `get`, `delete` and `events` commands.

use anyhow::{bail, Result};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell as TableCell, Table};

use crate::cli::App;
use crate::domain::models::meta::ResourceKind;
use crate::domain::ports::resource_store::RawResource;

pub async fn handle_get(app: &App, kind: &str, name: Option<&str>, namespace: &str, json: bool) -> Result<()> {
    let Some(kind) = ResourceKind::from_str(kind) else {
        bail!("unknown kind '{}'", kind);
    };

    let resources: Vec<RawResource> = match name {
        Some(name) => match app.ctx.store.get(kind, namespace, name).await? {
            Some(resource) => vec![resource],
            None => bail!("{} {}/{} not found", kind, namespace, name),
        },
        None => {
            app.ctx
                .store
                .list(kind, Some(namespace), &Default::default())
                .await?
        }
    };

    if json {
        let rendered: Vec<serde_json::Value> = resources.iter().map(render_json).collect();
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["NAME", "NAMESPACE", "PHASE", "VERSION", "AGE"]);
    for resource in &resources {
        table.add_row(vec![
            TableCell::new(&resource.meta.name),
            TableCell::new(&resource.meta.namespace),
            TableCell::new(phase_of(resource)),
            TableCell::new(resource.meta.resource_version.to_string()),
            TableCell::new(age_of(resource)),
        ]);
    }
    println!("{table}");
    Ok(())
}

pub async fn handle_delete(app: &App, kind: &str, name: &str, namespace: &str, actor: &str) -> Result<()> {
    let Some(kind) = ResourceKind::from_str(kind) else {
        bail!("unknown kind '{}'", kind);
    };

    let outcome = app.ctx.store.delete(kind, namespace, name).await;
    let audit = crate::domain::ports::audit_log::AuditEntry::new(
        actor,
        "delete",
        kind.as_str(),
        namespace,
        if outcome.is_ok() {
            crate::domain::ports::audit_log::AuditOutcome::Success
        } else {
            crate::domain::ports::audit_log::AuditOutcome::Failure
        },
    )
    .with_resource_id(name);
    app.ctx.audit.record(audit).await?;
    outcome?;

    println!("{} {}/{} deleted", kind, namespace, name);
    Ok(())
}

pub async fn handle_events(app: &App, kind: &str, name: &str, namespace: &str, json: bool) -> Result<()> {
    let Some(kind) = ResourceKind::from_str(kind) else {
        bail!("unknown kind '{}'", kind);
    };
    let events = app.ctx.events.list_for(kind, namespace, name, 50).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_header(vec!["TIME", "TYPE", "REASON", "MESSAGE"]);
    for event in &events {
        table.add_row(vec![
            TableCell::new(event.created_at.to_rfc3339()),
            TableCell::new(event.kind.as_str()),
            TableCell::new(&event.reason),
            TableCell::new(&event.message),
        ]);
    }
    println!("{table}");
    Ok(())
}

fn phase_of(resource: &RawResource) -> String {
    resource
        .status
        .as_ref()
        .and_then(|s| s.get("phase"))
        .and_then(|p| p.as_str())
        .unwrap_or("-")
        .to_string()
}

fn age_of(resource: &RawResource) -> String {
    let age = chrono::Utc::now().signed_duration_since(resource.meta.created_at);
    if age.num_hours() >= 1 {
        format!("{}h{}m", age.num_hours(), age.num_minutes() % 60)
    } else if age.num_minutes() >= 1 {
        format!("{}m", age.num_minutes())
    } else {
        format!("{}s", age.num_seconds().max(0))
    }
}

fn render_json(resource: &RawResource) -> serde_json::Value {
    serde_json::json!({
        "kind": resource.kind.as_str(),
        "metadata": resource.meta,
        "spec": resource.spec,
        "status": resource.status,
    })
}
