//! Formation reconciler.
//!
//! Materialises a Formation: workspace directory, topology route table and
//! the expanded set of member Cells, then aggregates member state and
//! mission outcomes into the formation's phase.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::cell::{Cell, CellPhase};
use crate::domain::models::formation::{
    Formation, FormationPhase, FormationStatus, MemberStatus,
};
use crate::domain::models::meta::{ObjectMeta, OwnerReference, ResourceKind};
use crate::domain::models::mission::{Mission, MissionPhase};
use crate::domain::models::CustomResource;
use crate::domain::ports::event_recorder::{EventKind, ObjectRef};
use crate::domain::ports::resource_store::{
    create_typed, get_typed, list_typed, update_status_typed,
};
use crate::services::topology::{generate_routes, route_table_json};

use super::worker::Reconciler;
use super::ControllerContext;

/// Label marking a formation's member cells.
const FORMATION_LABEL: &str = "formation";

/// Label used as the explicit pause control signal.
const PAUSED_LABEL: &str = "paused";

pub struct FormationReconciler {
    ctx: Arc<ControllerContext>,
}

impl FormationReconciler {
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx }
    }

    fn workspace_dir(&self, namespace: &str, name: &str) -> PathBuf {
        PathBuf::from(&self.ctx.config.workspace_root)
            .join(namespace)
            .join(name)
    }

    /// Workspace volume plus the materialised route table file.
    async fn materialise_workspace(&self, formation: &Formation) -> ControlResult<()> {
        let dir = self.workspace_dir(&formation.meta.namespace, &formation.meta.name);
        tokio::fs::create_dir_all(dir.join("shared"))
            .await
            .map_err(|e| ControlError::Transient(format!("workspace create failed: {}", e)))?;

        let routes = generate_routes(&formation.spec);
        let rendered = route_table_json(&routes);
        let path = dir.join("routes.json");
        // Skip the write when identical; the table is a pure function of
        // the spec and rewrites would dirty mtime-watchers.
        let current = tokio::fs::read_to_string(&path).await.unwrap_or_default();
        if current != rendered {
            tokio::fs::write(&path, rendered)
                .await
                .map_err(|e| ControlError::Transient(format!("route table write failed: {}", e)))?;
        }
        Ok(())
    }

    /// Create missing member cells and delete members no longer declared.
    async fn reconcile_members(&self, formation: &Formation) -> ControlResult<Vec<Cell>> {
        let namespace = &formation.meta.namespace;
        let expected: Vec<(String, usize)> = formation
            .spec
            .cells
            .iter()
            .enumerate()
            .flat_map(|(i, template)| {
                template.expanded_names().into_iter().map(move |n| (n, i))
            })
            .collect();

        let mut selector = BTreeMap::new();
        selector.insert(FORMATION_LABEL.to_string(), formation.meta.name.clone());
        let existing: Vec<Cell> =
            list_typed(self.ctx.store.as_ref(), Some(namespace), &selector).await?;
        let existing_names: BTreeMap<&str, &Cell> =
            existing.iter().map(|c| (c.meta.name.as_str(), c)).collect();

        let mut created = false;
        for (cell_name, template_index) in &expected {
            if existing_names.contains_key(cell_name.as_str()) {
                continue;
            }
            let template = &formation.spec.cells[*template_index];
            let mut spec = template.spec.clone();
            spec.formation_ref = Some(formation.meta.name.clone());

            let mut labels = BTreeMap::new();
            labels.insert("role".to_string(), "cell".to_string());
            labels.insert(FORMATION_LABEL.to_string(), formation.meta.name.clone());
            labels.insert("template".to_string(), template.name.clone());

            let cell = Cell {
                meta: ObjectMeta::new(namespace.clone(), cell_name.clone())
                    .with_labels(labels)
                    .with_owner(OwnerReference {
                        kind: ResourceKind::Formation,
                        name: formation.meta.name.clone(),
                        uid: formation.meta.uid,
                    }),
                spec,
                status: None,
            };
            create_typed(self.ctx.store.as_ref(), &cell).await?;
            created = true;
        }

        // Members whose template shrank away are removed.
        let expected_set: std::collections::BTreeSet<&str> =
            expected.iter().map(|(n, _)| n.as_str()).collect();
        for cell in &existing {
            if !expected_set.contains(cell.meta.name.as_str()) {
                self.ctx
                    .store
                    .delete(ResourceKind::Cell, namespace, &cell.meta.name)
                    .await?;
            }
        }

        if created {
            self.ctx
                .events
                .emit(
                    ObjectRef::new(ResourceKind::Formation, &formation.meta),
                    EventKind::Normal,
                    "FormationExpanded",
                    &format!("{} member cells declared", expected.len()),
                )
                .await?;
        }

        list_typed(self.ctx.store.as_ref(), Some(namespace), &selector).await
    }

    /// Phase from the pause signal, mission linkage and member phases.
    async fn desired_phase(
        &self,
        formation: &Formation,
        members: &[Cell],
    ) -> ControlResult<FormationPhase> {
        if formation
            .meta
            .labels
            .get(PAUSED_LABEL)
            .is_some_and(|v| v == "true")
        {
            return Ok(FormationPhase::Paused);
        }

        let missions: Vec<Mission> =
            list_typed(self.ctx.store.as_ref(), Some(&formation.meta.namespace), &BTreeMap::new())
                .await?;
        let linked: Vec<&Mission> = missions
            .iter()
            .filter(|m| m.spec.formation_ref.as_deref() == Some(formation.meta.name.as_str()))
            .collect();
        if linked
            .iter()
            .any(|m| m.status.as_ref().is_some_and(|s| s.phase == MissionPhase::Succeeded))
        {
            return Ok(FormationPhase::Completed);
        }
        if linked
            .iter()
            .any(|m| m.status.as_ref().is_some_and(|s| s.phase == MissionPhase::Failed))
        {
            return Ok(FormationPhase::Failed);
        }

        let expected = formation.spec.expanded_cell_names().len();
        let running = members
            .iter()
            .filter(|c| c.status.as_ref().is_some_and(|s| s.phase == CellPhase::Running))
            .count();
        if expected > 0 && running == expected {
            Ok(FormationPhase::Running)
        } else {
            Ok(FormationPhase::Pending)
        }
    }

    async fn handle_invalid(&self, formation: &Formation, reason: String) -> ControlResult<()> {
        self.ctx
            .events
            .emit(
                ObjectRef::new(ResourceKind::Formation, &formation.meta),
                EventKind::Warning,
                "ValidationFailed",
                &reason,
            )
            .await?;
        let mut status = formation.status.clone().unwrap_or_default();
        status.phase = FormationPhase::Failed;
        status.message = Some(reason);
        self.write_status_if_changed(formation, status).await
    }

    async fn write_status_if_changed(
        &self,
        formation: &Formation,
        status: FormationStatus,
    ) -> ControlResult<()> {
        if formation.status.as_ref() == Some(&status) {
            return Ok(());
        }
        let phase_changed =
            formation.status.as_ref().map(|s| s.phase) != Some(status.phase);
        update_status_typed(self.ctx.store.as_ref(), formation, &status).await?;
        if phase_changed {
            self.ctx
                .events
                .emit(
                    ObjectRef::new(ResourceKind::Formation, &formation.meta),
                    EventKind::Normal,
                    &format!("Formation{}", status.phase.as_str()),
                    &format!("formation entered {}", status.phase.as_str()),
                )
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for FormationReconciler {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Formation
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let Some(formation) =
            get_typed::<Formation>(self.ctx.store.as_ref(), namespace, name).await?
        else {
            // Member cells cascade through their owner references.
            return Ok(());
        };

        if let Err(reason) = formation.validate() {
            return self.handle_invalid(&formation, reason).await;
        }

        self.materialise_workspace(&formation).await?;

        if cancel.is_cancelled() {
            return Err(ControlError::Transient("reconcile cancelled".to_string()));
        }

        let members = self.reconcile_members(&formation).await?;

        let mut member_statuses: Vec<MemberStatus> = members
            .iter()
            .map(|cell| MemberStatus {
                name: cell.meta.name.clone(),
                phase: cell
                    .status
                    .as_ref()
                    .map_or_else(|| "Pending".to_string(), |s| s.phase.as_str().to_string()),
                cost: cell.status.as_ref().map_or(0.0, |s| s.total_cost),
            })
            .collect();
        member_statuses.sort_by(|a, b| a.name.cmp(&b.name));
        let total_cost = member_statuses.iter().map(|m| m.cost).sum();

        let phase = self.desired_phase(&formation, &members).await?;
        let status = FormationStatus {
            phase,
            members: member_statuses,
            total_cost,
            message: None,
        };
        self.write_status_if_changed(&formation, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::test_context;
    use crate::domain::models::cell::{CellSpec, MindSpec, RecursionSpec};
    use crate::domain::models::formation::{
        CellTemplate, FormationBudget, FormationSpec, TopologyKind, TopologySpec,
    };

    fn formation(name: &str) -> Formation {
        let cell_spec = CellSpec {
            mind: MindSpec {
                provider: "anthropic".to_string(),
                model: "claude-sonnet".to_string(),
                system_prompt: String::new(),
                temperature: None,
                max_tokens: None,
                memory_window: None,
            },
            tools: vec![],
            resources: Default::default(),
            parent_ref: None,
            formation_ref: None,
            recursion: RecursionSpec::default(),
        };
        Formation::new(
            "default",
            name,
            FormationSpec {
                cells: vec![
                    CellTemplate { name: "h".to_string(), replicas: 1, spec: cell_spec.clone() },
                    CellTemplate { name: "s".to_string(), replicas: 2, spec: cell_spec },
                ],
                topology: TopologySpec {
                    kind: TopologyKind::Star,
                    root: None,
                    hub: Some("h".to_string()),
                    routes: None,
                    broadcast: false,
                    blackboard: None,
                },
                budget: FormationBudget::default(),
            },
        )
    }

    #[tokio::test]
    async fn test_materialises_members_and_routes() {
        let (ctx, _) = test_context().await;
        let reconciler = FormationReconciler::new(ctx.clone());
        create_typed(ctx.store.as_ref(), &formation("squad")).await.unwrap();

        reconciler
            .reconcile("default", "squad", &CancellationToken::new())
            .await
            .unwrap();

        // Three member cells created with the formation back-reference.
        let mut selector = BTreeMap::new();
        selector.insert("formation".to_string(), "squad".to_string());
        let members: Vec<Cell> =
            list_typed(ctx.store.as_ref(), Some("default"), &selector).await.unwrap();
        assert_eq!(members.len(), 3);
        assert!(members
            .iter()
            .all(|c| c.spec.formation_ref.as_deref() == Some("squad")));

        // Route table materialised.
        let routes_path = PathBuf::from(&ctx.config.workspace_root)
            .join("default/squad/routes.json");
        let rendered = std::fs::read_to_string(routes_path).unwrap();
        let routes: BTreeMap<String, Vec<String>> = serde_json::from_str(&rendered).unwrap();
        assert_eq!(routes["s-0"], vec!["h-0"]);
        assert_eq!(routes["h-0"], vec!["s-0", "s-1"]);

        let stored: Formation =
            get_typed(ctx.store.as_ref(), "default", "squad").await.unwrap().unwrap();
        let status = stored.status.unwrap();
        assert_eq!(status.phase, FormationPhase::Pending);
        assert_eq!(status.members.len(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (ctx, _) = test_context().await;
        let reconciler = FormationReconciler::new(ctx.clone());
        create_typed(ctx.store.as_ref(), &formation("squad")).await.unwrap();
        let cancel = CancellationToken::new();

        reconciler.reconcile("default", "squad", &cancel).await.unwrap();
        let first: Formation =
            get_typed(ctx.store.as_ref(), "default", "squad").await.unwrap().unwrap();

        reconciler.reconcile("default", "squad", &cancel).await.unwrap();
        let second: Formation =
            get_typed(ctx.store.as_ref(), "default", "squad").await.unwrap().unwrap();
        // No second status write for an identical observation.
        assert_eq!(first.meta.resource_version, second.meta.resource_version);

        let mut selector = BTreeMap::new();
        selector.insert("formation".to_string(), "squad".to_string());
        let members: Vec<Cell> =
            list_typed(ctx.store.as_ref(), Some("default"), &selector).await.unwrap();
        assert_eq!(members.len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_topology_fails() {
        let (ctx, _) = test_context().await;
        let reconciler = FormationReconciler::new(ctx.clone());
        let mut bad = formation("broken");
        bad.spec.topology.hub = None;
        create_typed(ctx.store.as_ref(), &bad).await.unwrap();

        reconciler
            .reconcile("default", "broken", &CancellationToken::new())
            .await
            .unwrap();

        let stored: Formation =
            get_typed(ctx.store.as_ref(), "default", "broken").await.unwrap().unwrap();
        assert_eq!(stored.status.unwrap().phase, FormationPhase::Failed);
    }

    #[tokio::test]
    async fn test_pause_label_wins() {
        let (ctx, _) = test_context().await;
        let reconciler = FormationReconciler::new(ctx.clone());
        let mut paused = formation("squad");
        paused
            .meta
            .labels
            .insert("paused".to_string(), "true".to_string());
        create_typed(ctx.store.as_ref(), &paused).await.unwrap();

        reconciler
            .reconcile("default", "squad", &CancellationToken::new())
            .await
            .unwrap();
        let stored: Formation =
            get_typed(ctx.store.as_ref(), "default", "squad").await.unwrap().unwrap();
        assert_eq!(stored.status.unwrap().phase, FormationPhase::Paused);
    }
}
