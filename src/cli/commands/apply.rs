//! `apply`: admit resource manifests into the store.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::cli::App;
use crate::domain::errors::ControlError;
use crate::domain::models::meta::{validate_label, ObjectMeta, ResourceKind};
use crate::domain::models::{
    BlueprintSpec, CellSpec, ChannelSpec, ExperimentSpec, FederationSpec, FormationSpec,
    KnowledgeGraphSpec, MissionSpec, RoleBindingSpec, RoleSpec, SpawnRequestSpec, SwarmSpec,
};
use crate::domain::ports::audit_log::{AuditEntry, AuditOutcome};
use crate::domain::ports::resource_store::RawResource;

#[derive(Debug, Deserialize)]
struct Manifest {
    kind: String,
    metadata: ManifestMeta,
    spec: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ManifestMeta {
    name: String,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

pub async fn handle_apply(
    app: &App,
    file: &Path,
    default_namespace: &str,
    actor: &str,
) -> Result<()> {
    let raw = if file.as_os_str() == "-" {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read {}", file.display()))?
    };

    let mut applied = 0usize;
    for document in serde_yaml::Deserializer::from_str(&raw) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let manifest: Manifest = serde_yaml::from_value(value)?;
        let namespace = manifest
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| default_namespace.to_string());
        apply_manifest(app, &manifest, &namespace, actor).await?;
        applied += 1;
    }

    if applied == 0 {
        bail!("no resources found in {}", file.display());
    }
    println!("{} resource(s) applied", applied);
    Ok(())
}

async fn apply_manifest(
    app: &App,
    manifest: &Manifest,
    namespace: &str,
    actor: &str,
) -> Result<()> {
    let Some(kind) = ResourceKind::from_str(&manifest.kind) else {
        bail!("unknown kind '{}'", manifest.kind);
    };

    let outcome = admit_and_store(app, manifest, kind, namespace).await;
    let audit = AuditEntry::new(
        actor,
        "apply",
        kind.as_str(),
        namespace,
        if outcome.is_ok() { AuditOutcome::Success } else { AuditOutcome::Failure },
    )
    .with_resource_id(manifest.metadata.name.clone());
    let audit = match &outcome {
        Err(err) => audit.with_detail(err.to_string()),
        Ok(verb) => audit.with_detail(format!("{} {}", verb, manifest.metadata.name)),
    };
    app.ctx.audit.record(audit).await?;

    match outcome {
        Ok(verb) => {
            println!("{} {}/{} {}", kind, namespace, manifest.metadata.name, verb);
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Admission: metadata grammar, spec parse, spec constraints; then create
/// or conditional update.
async fn admit_and_store(
    app: &App,
    manifest: &Manifest,
    kind: ResourceKind,
    namespace: &str,
) -> Result<&'static str> {
    validate_label(&manifest.metadata.name).map_err(anyhow::Error::msg)?;
    validate_label(namespace).map_err(anyhow::Error::msg)?;
    validate_spec(kind, &manifest.spec).map_err(anyhow::Error::msg)?;

    let existing = app
        .ctx
        .store
        .get(kind, namespace, &manifest.metadata.name)
        .await?;

    match existing {
        Some(mut resource) => {
            resource.spec = manifest.spec.clone();
            resource.meta.labels = manifest.metadata.labels.clone();
            match app.ctx.store.update(resource).await {
                Ok(_) => Ok("configured"),
                Err(err @ ControlError::Conflict { .. }) => {
                    Err(anyhow::Error::new(err).context("resource changed concurrently; re-apply"))
                }
                Err(err) => Err(err.into()),
            }
        }
        None => {
            let meta = ObjectMeta::new(namespace, manifest.metadata.name.clone())
                .with_labels(manifest.metadata.labels.clone());
            app.ctx
                .store
                .create(RawResource { kind, meta, spec: manifest.spec.clone(), status: None })
                .await?;
            Ok("created")
        }
    }
}

/// Parse the spec into its typed form and run its admission checks.
fn validate_spec(kind: ResourceKind, spec: &serde_json::Value) -> Result<(), String> {
    fn check<S>(spec: &serde_json::Value, validate: fn(&S) -> Result<(), String>) -> Result<(), String>
    where
        S: serde::de::DeserializeOwned,
    {
        let parsed: S = serde_json::from_value(spec.clone()).map_err(|e| e.to_string())?;
        validate(&parsed)
    }

    match kind {
        ResourceKind::Cell => check::<CellSpec>(spec, CellSpec::validate),
        ResourceKind::Formation => check::<FormationSpec>(spec, FormationSpec::validate),
        ResourceKind::Mission => check::<MissionSpec>(spec, MissionSpec::validate),
        ResourceKind::Experiment => check::<ExperimentSpec>(spec, ExperimentSpec::validate),
        ResourceKind::SpawnRequest => check::<SpawnRequestSpec>(spec, SpawnRequestSpec::validate),
        ResourceKind::Channel => check::<ChannelSpec>(spec, ChannelSpec::validate),
        ResourceKind::Swarm => check::<SwarmSpec>(spec, SwarmSpec::validate),
        ResourceKind::Federation => check::<FederationSpec>(spec, FederationSpec::validate),
        ResourceKind::KnowledgeGraph => {
            check::<KnowledgeGraphSpec>(spec, KnowledgeGraphSpec::validate)
        }
        ResourceKind::Role => check::<RoleSpec>(spec, RoleSpec::validate),
        ResourceKind::RoleBinding => check::<RoleBindingSpec>(spec, RoleBindingSpec::validate),
        ResourceKind::Blueprint => check::<BlueprintSpec>(spec, BlueprintSpec::validate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_spec_dispatch() {
        let good_cell = serde_json::json!({
            "mind": {
                "provider": "anthropic",
                "model": "claude-sonnet",
                "system_prompt": "reply ok"
            }
        });
        assert!(validate_spec(ResourceKind::Cell, &good_cell).is_ok());

        let bad_cell = serde_json::json!({
            "mind": { "provider": "", "model": "m", "system_prompt": "" }
        });
        assert!(validate_spec(ResourceKind::Cell, &bad_cell).is_err());

        let bad_mission = serde_json::json!({
            "objective": "x",
            "completion": { "checks": [], "timeout": "0h" },
            "entrypoint": { "cell": "a", "message": "go" }
        });
        assert!(validate_spec(ResourceKind::Mission, &bad_mission).is_err());
    }
}
