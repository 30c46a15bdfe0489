//! `budget` commands over the ledger.

use anyhow::{bail, Result};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};

use crate::cli::{App, BudgetCommands};
use crate::domain::models::budget::BudgetTreeNode;

pub async fn handle_budget(app: &App, command: BudgetCommands, json: bool) -> Result<()> {
    match command {
        BudgetCommands::InitRoot { cell, amount } => {
            let balance = app.ctx.ledger.init_root(&cell, amount, Some("cli init")).await?;
            println!(
                "initialised root budget for '{}' with {:.4} available",
                cell,
                balance.available()
            );
        }
        BudgetCommands::Show { cell } => {
            let Some(balance) = app.ctx.ledger.get_balance(&cell).await? else {
                bail!("no budget balance for '{}'", cell);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&balance)?);
            } else {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL_CONDENSED);
                table.set_header(vec!["CELL", "ALLOCATED", "SPENT", "DELEGATED", "AVAILABLE"]);
                table.add_row(vec![
                    balance.cell_id.clone(),
                    format!("{:.4}", balance.allocated),
                    format!("{:.4}", balance.spent),
                    format!("{:.4}", balance.delegated),
                    format!("{:.4}", balance.available()),
                ]);
                println!("{table}");
            }
        }
        BudgetCommands::Tree { root } => {
            let Some(tree) = app.ctx.ledger.get_tree(&root).await? else {
                bail!("no budget tree rooted at '{}'", root);
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&tree)?);
            } else {
                print_tree(&tree, 0);
                println!(
                    "subtree: {} cells, {:.4} allocated, {:.4} spent",
                    tree.node_count(),
                    tree.subtree_allocated(),
                    tree.subtree_spent()
                );
            }
        }
        BudgetCommands::History { cell, limit } => {
            let entries = app.ctx.ledger.get_history(&cell, limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL_CONDENSED);
                table.set_header(vec!["TIME", "OP", "AMOUNT", "FROM", "TO", "AFTER", "REASON"]);
                for entry in &entries {
                    table.add_row(vec![
                        entry.created_at.to_rfc3339(),
                        entry.operation.as_str().to_string(),
                        format!("{:.4}", entry.amount),
                        entry.from_cell_id.clone().unwrap_or_else(|| "-".to_string()),
                        entry.to_cell_id.clone().unwrap_or_else(|| "-".to_string()),
                        format!("{:.4}", entry.balance_after),
                        entry.reason.clone().unwrap_or_default(),
                    ]);
                }
                println!("{table}");
            }
        }
    }
    Ok(())
}

fn print_tree(node: &BudgetTreeNode, depth: usize) {
    let indent = "  ".repeat(depth);
    let marker = if depth == 0 { "" } else { "└ " };
    println!(
        "{}{}{}  available={:.4} (allocated={:.4} spent={:.4} delegated={:.4})",
        indent,
        marker,
        node.balance.cell_id,
        node.balance.available(),
        node.balance.allocated,
        node.balance.spent,
        node.balance.delegated,
    );
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
