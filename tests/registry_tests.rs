mod common;

use armflow::device::DeviceSet;
use armflow::error::WorkflowError;
use armflow::runtime::Resolver;
use armflow::workflow::{WorkflowRegistry, WorkflowStorage};
use std::sync::Arc;

fn resolver() -> Resolver {
    common::resolver_with(Arc::new(DeviceSet::new()), common::settings())
}

fn warmup(resolver: Resolver) -> armflow::workflow::Workflow {
    let mut workflow = common::workflow("Morning Warmup", resolver);
    workflow.steps.add(common::delay_step("heat", 1.0), None).unwrap();
    workflow.steps.add(common::command_step("stir", "stirrer", "SPIN"), None).unwrap();
    workflow
}

#[tokio::test]
async fn register_load_and_unregister() {
    let dir = tempfile::tempdir().unwrap();
    let registry = WorkflowRegistry::new(WorkflowStorage::new(dir.path()));
    registry.init_from_storage().await.unwrap();
    assert!(registry.list().is_empty());

    let workflow = warmup(resolver());
    let entry = registry.register("warmup", &workflow, None).await.unwrap();
    assert_eq!(entry.step_count, 2);
    assert_eq!(entry.name, "Morning Warmup");
    assert_eq!(entry.workflow_id, workflow.meta.id);
    assert!(entry.file_path.exists());

    let names: Vec<_> = registry.list().into_keys().collect();
    assert_eq!(names, vec!["warmup"]);

    let loaded = registry.load_by_name("warmup", &resolver()).await.unwrap();
    assert_eq!(loaded.meta.id, workflow.meta.id);
    assert_eq!(loaded.steps.at(1).unwrap().name(), "stir");

    assert!(registry.unregister("warmup").await.unwrap());
    assert!(!registry.unregister("warmup").await.unwrap());
    assert!(registry.get("warmup").is_none());
    // the document outlives its registration
    assert!(entry.file_path.exists());
}

#[tokio::test]
async fn registry_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let registry = WorkflowRegistry::new(WorkflowStorage::new(dir.path()));
        registry.init_from_storage().await.unwrap();
        registry.register("warmup", &warmup(resolver()), None).await.unwrap();
        let custom = dir.path().join("nested").join("cleanup.json");
        registry
            .register("cleanup", &common::workflow("Cleanup", resolver()), Some(custom))
            .await
            .unwrap();
    }

    let registry = WorkflowRegistry::new(WorkflowStorage::new(dir.path()));
    registry.init_from_storage().await.unwrap();
    let entries = registry.list();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["warmup"].step_count, 2);
    assert!(entries["cleanup"].file_path.ends_with("nested/cleanup.json"));

    let loaded = registry.load_by_name("cleanup", &resolver()).await.unwrap();
    assert_eq!(loaded.name(), "Cleanup");
    assert!(loaded.steps.is_empty());
}

#[tokio::test]
async fn re_registering_replaces_the_entry() {
    let dir = tempfile::tempdir().unwrap();
    let registry = WorkflowRegistry::new(WorkflowStorage::new(dir.path()));
    registry.register("warmup", &warmup(resolver()), None).await.unwrap();

    let mut shorter = warmup(resolver());
    let stir = shorter.steps.at(1).unwrap().id().to_string();
    shorter.steps.delete(&stir).unwrap();
    registry.register("warmup", &shorter, None).await.unwrap();

    assert_eq!(registry.list().len(), 1);
    let loaded = registry.load_by_name("warmup", &resolver()).await.unwrap();
    assert_eq!(loaded.steps.len(), 1);
}

#[tokio::test]
async fn unknown_name_is_not_registered() {
    let dir = tempfile::tempdir().unwrap();
    let registry = WorkflowRegistry::new(WorkflowStorage::new(dir.path()));
    let err = registry.load_by_name("ghost", &resolver()).await.unwrap_err();
    assert_eq!(err, WorkflowError::WorkflowNotRegistered("ghost".into()));
}
