//! Workload building and spec-change detection.
//!
//! Deterministic translation from a Cell declaration to a workload spec.
//! The full cell spec rides along as an environment variable so the change
//! detector can compare it structurally against the current declaration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::cell::{Cell, CellSpec};
use crate::domain::models::meta::{OwnerReference, ResourceKind};
use crate::domain::models::workload::{
    ResourceRequirements, RestartPolicy, VolumeMount, WorkloadSpec, CELL_SPEC_ENV,
    PRIVATE_WORKSPACE_PREFIX, ROUTE_TABLE_PATH, SHARED_WORKSPACE_PATH,
};

/// Service endpoints injected into every cell workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderEndpoints {
    pub bus_url: String,
    pub store_url: String,
    pub llm_gateway_url: String,
    pub telemetry_url: String,
}

impl Default for BuilderEndpoints {
    fn default() -> Self {
        Self {
            bus_url: "nats://127.0.0.1:4222".to_string(),
            store_url: "http://127.0.0.1:8090".to_string(),
            llm_gateway_url: "http://127.0.0.1:8091".to_string(),
            telemetry_url: "http://127.0.0.1:8092".to_string(),
        }
    }
}

/// Workload name for a cell.
pub fn workload_name(cell_name: &str) -> String {
    format!("cell-{}", cell_name)
}

/// Build the workload spec for a cell. Pure: identical inputs produce an
/// identical spec.
pub fn build_workload(cell: &Cell, endpoints: &BuilderEndpoints) -> ControlResult<WorkloadSpec> {
    let mut labels = BTreeMap::new();
    labels.insert("role".to_string(), "cell".to_string());
    labels.insert("cell".to_string(), cell.meta.name.clone());
    if let Some(formation) = &cell.spec.formation_ref {
        labels.insert("formation".to_string(), formation.clone());
    }

    let mut env = BTreeMap::new();
    env.insert("CELL_NAME".to_string(), cell.meta.name.clone());
    env.insert("CELL_NAMESPACE".to_string(), cell.meta.namespace.clone());
    env.insert(CELL_SPEC_ENV.to_string(), serde_json::to_string(&cell.spec)?);
    env.insert("CELL_INBOX_SUBJECT".to_string(), cell.inbox_subject());
    env.insert("CELLPLANE_BUS_URL".to_string(), endpoints.bus_url.clone());
    env.insert("CELLPLANE_STORE_URL".to_string(), endpoints.store_url.clone());
    env.insert(
        "CELLPLANE_LLM_GATEWAY_URL".to_string(),
        endpoints.llm_gateway_url.clone(),
    );
    env.insert(
        "CELLPLANE_TELEMETRY_URL".to_string(),
        endpoints.telemetry_url.clone(),
    );

    let mut volume_mounts = Vec::new();
    if let Some(formation) = &cell.spec.formation_ref {
        let volume = format!("{}-workspace", formation);
        volume_mounts.push(VolumeMount {
            name: volume.clone(),
            mount_path: SHARED_WORKSPACE_PATH.to_string(),
            sub_path: Some("shared".to_string()),
            read_only: false,
        });
        volume_mounts.push(VolumeMount {
            name: volume,
            mount_path: format!("{}/{}", PRIVATE_WORKSPACE_PREFIX, cell.meta.name),
            sub_path: Some(format!("private/{}", cell.meta.name)),
            read_only: false,
        });
        volume_mounts.push(VolumeMount {
            name: format!("{}-routes", formation),
            mount_path: ROUTE_TABLE_PATH.to_string(),
            sub_path: None,
            read_only: true,
        });
    }

    let mut resources = ResourceRequirements::default();
    if let Some(cpu) = &cell.spec.resources.cpu {
        resources.limit_cpu = cpu.clone();
    }
    if let Some(memory) = &cell.spec.resources.memory {
        resources.limit_memory = memory.clone();
    }

    Ok(WorkloadSpec {
        name: workload_name(&cell.meta.name),
        namespace: cell.meta.namespace.clone(),
        labels,
        owner: OwnerReference {
            kind: ResourceKind::Cell,
            name: cell.meta.name.clone(),
            uid: cell.meta.uid,
        },
        env,
        volume_mounts,
        restart_policy: RestartPolicy::Never,
        resources,
    })
}

/// Recover the cell spec embedded in a workload.
pub fn parse_embedded_spec(workload: &WorkloadSpec) -> ControlResult<CellSpec> {
    let raw = workload.embedded_spec().ok_or_else(|| {
        ControlError::Validation(format!(
            "workload {} carries no embedded cell spec",
            workload.name
        ))
    })?;
    Ok(serde_json::from_str(raw)?)
}

/// Whether the workload's embedded spec differs structurally from the
/// current declaration. Key order is irrelevant; an unparseable or missing
/// embedded spec always reports a change.
pub fn spec_changed(workload: &WorkloadSpec, current: &CellSpec) -> bool {
    let Some(raw) = workload.embedded_spec() else {
        return true;
    };
    let Ok(embedded) = serde_json::from_str::<serde_json::Value>(raw) else {
        return true;
    };
    match serde_json::to_value(current) {
        Ok(declared) => embedded != declared,
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::cell::{CellResources, MindSpec, RecursionSpec};

    fn cell(formation: Option<&str>) -> Cell {
        Cell::new(
            "default",
            "worker-0",
            CellSpec {
                mind: MindSpec {
                    provider: "anthropic".to_string(),
                    model: "claude-sonnet".to_string(),
                    system_prompt: "reply ok".to_string(),
                    temperature: None,
                    max_tokens: None,
                    memory_window: None,
                },
                tools: vec![],
                resources: CellResources::default(),
                parent_ref: None,
                formation_ref: formation.map(str::to_string),
                recursion: RecursionSpec::default(),
            },
        )
    }

    #[test]
    fn test_workload_shape() {
        let cell = cell(None);
        let workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        assert_eq!(workload.name, "cell-worker-0");
        assert_eq!(workload.namespace, "default");
        assert_eq!(workload.labels["role"], "cell");
        assert_eq!(workload.labels["cell"], "worker-0");
        assert!(!workload.labels.contains_key("formation"));
        assert_eq!(workload.owner.uid, cell.meta.uid);
        assert_eq!(workload.restart_policy, RestartPolicy::Never);
        assert!(workload.volume_mounts.is_empty());
    }

    #[test]
    fn test_formation_mounts() {
        let cell = cell(Some("squad"));
        let workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        assert_eq!(workload.labels["formation"], "squad");
        assert_eq!(workload.volume_mounts.len(), 3);
        assert_eq!(workload.volume_mounts[0].mount_path, SHARED_WORKSPACE_PATH);
        assert_eq!(
            workload.volume_mounts[1].mount_path,
            "/workspace/private/worker-0"
        );
        let routes = &workload.volume_mounts[2];
        assert_eq!(routes.mount_path, ROUTE_TABLE_PATH);
        assert!(routes.read_only);
    }

    #[test]
    fn test_resource_overrides() {
        let mut cell = cell(None);
        cell.spec.resources.cpu = Some("2".to_string());
        cell.spec.resources.memory = Some("1Gi".to_string());
        let workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        assert_eq!(workload.resources.limit_cpu, "2");
        assert_eq!(workload.resources.limit_memory, "1Gi");
        assert_eq!(workload.resources.request_cpu, "100m");
    }

    #[test]
    fn test_embed_parse_round_trip() {
        let cell = cell(Some("squad"));
        let workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        let recovered = parse_embedded_spec(&workload).unwrap();
        assert_eq!(recovered, cell.spec);
    }

    #[test]
    fn test_determinism() {
        let cell = cell(Some("squad"));
        let endpoints = BuilderEndpoints::default();
        let a = build_workload(&cell, &endpoints).unwrap();
        let b = build_workload(&cell, &endpoints).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_spec_change_detection() {
        let cell = cell(None);
        let workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        assert!(!spec_changed(&workload, &cell.spec));

        let mut changed = cell.spec.clone();
        changed.mind.model = "claude-opus".to_string();
        assert!(spec_changed(&workload, &changed));
    }

    #[test]
    fn test_key_order_irrelevant() {
        let cell = cell(None);
        let mut workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        // Re-serialise the embedded spec through a Value, which may reorder
        // object keys; the detector must still see no change.
        let value: serde_json::Value =
            serde_json::from_str(workload.embedded_spec().unwrap()).unwrap();
        workload
            .env
            .insert(CELL_SPEC_ENV.to_string(), serde_json::to_string(&value).unwrap());
        assert!(!spec_changed(&workload, &cell.spec));
    }

    #[test]
    fn test_garbage_embedded_spec_forces_restart() {
        let cell = cell(None);
        let mut workload = build_workload(&cell, &BuilderEndpoints::default()).unwrap();
        workload.env.insert(CELL_SPEC_ENV.to_string(), "{not json".to_string());
        assert!(spec_changed(&workload, &cell.spec));
        workload.env.remove(CELL_SPEC_ENV);
        assert!(spec_changed(&workload, &cell.spec));
        assert!(parse_embedded_spec(&workload).is_err());
    }
}
