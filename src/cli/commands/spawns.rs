//! `spawns` commands over the approval queue.

use anyhow::Result;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};

use crate::cli::{App, SpawnCommands};

pub async fn handle_spawns(
    app: &App,
    command: SpawnCommands,
    namespace: &str,
    actor: &str,
    json: bool,
) -> Result<()> {
    match command {
        SpawnCommands::List => {
            let pending = app.spawn_service.list_pending(namespace).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&pending)?);
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec!["REQUEST", "REQUESTOR", "CHILD", "REASON"]);
            for request in &pending {
                table.add_row(vec![
                    request.meta.name.clone(),
                    request.spec.requestor_cell_id.clone(),
                    request.spec.name.clone(),
                    request.spec.reason.clone().unwrap_or_default(),
                ]);
            }
            println!("{table}");
        }
        SpawnCommands::Approve { name, comment } => {
            let cell = app
                .spawn_service
                .approve(namespace, &name, actor, comment)
                .await?;
            println!("approved '{}'; cell '{}' created", name, cell.meta.name);
        }
        SpawnCommands::Reject { name, comment } => {
            app.spawn_service.reject(namespace, &name, actor, comment).await?;
            println!("rejected '{}'", name);
        }
    }
    Ok(())
}
