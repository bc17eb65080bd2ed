//! Store integration tests.
//!
//! These require a reachable PostgreSQL at `DATABASE_URL` and are skipped
//! otherwise. Migrations are applied on first use; names are unique per
//! run so reruns do not collide with leftovers.

use devarch_control::store::{migrate_up, Store};
use devarch_control::{
    EnvVar, LabelPair, NewInstance, NewStack, NewTemplate, OverrideGroup, ServiceChildren,
    StackUpdate,
};
use serial_test::serial;
use std::path::Path;

async fn store_or_skip() -> Option<Store> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        println!("DATABASE_URL not set - skipping store integration test");
        return None;
    };
    let store = Store::connect(&url).await.expect("connect to store");
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    migrate_up(store.pool(), &dir)
        .await
        .expect("apply migrations");
    Some(store)
}

fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", chrono::Utc::now().timestamp_millis())
}

fn new_template(name: &str) -> NewTemplate {
    NewTemplate {
        name: name.to_string(),
        image: "nginx".to_string(),
        tag: "1.27-alpine".to_string(),
        restart_policy: "unless-stopped".to_string(),
        command: None,
        user_spec: None,
        enabled: true,
        children: ServiceChildren {
            env_vars: vec![EnvVar {
                key: "A".to_string(),
                value: "1".to_string(),
            }],
            ..Default::default()
        },
    }
}

fn new_stack(name: &str) -> NewStack {
    NewStack {
        name: name.to_string(),
        description: "integration".to_string(),
        network_name: None,
        enabled: true,
    }
}

#[tokio::test]
#[serial]
async fn test_stack_lifecycle() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let name = unique("it-stack");

    let stack = store.create_stack(&new_stack(&name)).await.unwrap();
    assert_eq!(stack.name, name);
    assert!(stack.deleted_at.is_none());

    // duplicate live name rejected
    let dup = store.create_stack(&new_stack(&name)).await.unwrap_err();
    assert_eq!(dup.category(), "duplicate");

    // update advances updated_at
    let updated = store
        .update_stack(
            &name,
            &StackUpdate {
                description: "changed".to_string(),
                network_name: Some("shared-net".to_string()),
                enabled: false,
            },
        )
        .await
        .unwrap();
    assert!(updated.updated_at >= stack.updated_at);
    assert_eq!(updated.network(), "shared-net");

    // soft delete frees the name for reuse
    store.delete_stack(&name).await.unwrap();
    assert!(store.get_stack(&name).await.is_err());
    let recreated = store.create_stack(&new_stack(&name)).await.unwrap();
    assert_ne!(recreated.id, stack.id);

    store.delete_stack(&name).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_instance_overrides_and_reserved_labels() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let stack_name = unique("it-ovr");
    let template_name = unique("it-tpl");

    let template = store.create_template(&new_template(&template_name)).await.unwrap();
    let stack = store.create_stack(&new_stack(&stack_name)).await.unwrap();
    let detail = store
        .create_instance(
            &stack_name,
            &NewInstance {
                instance_id: "app1".to_string(),
                template_service_id: template.template.id,
                description: String::new(),
                enabled: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(detail.instance.container_name, format!("{stack_name}-app1"));

    // reserved label prefix rejected at the override boundary
    let err = store
        .replace_override_group(
            stack.id,
            "app1",
            OverrideGroup::Labels(vec![LabelPair {
                key: "devarch.foo".to_string(),
                value: "x".to_string(),
            }]),
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), "validation");
    assert!(err.to_string().contains("devarch."));

    // a clean env override lands and reads back
    let detail = store
        .replace_override_group(
            stack.id,
            "app1",
            OverrideGroup::EnvVars(vec![
                EnvVar {
                    key: "A".to_string(),
                    value: "2".to_string(),
                },
                EnvVar {
                    key: "B".to_string(),
                    value: "3".to_string(),
                },
            ]),
        )
        .await
        .unwrap();
    assert_eq!(detail.overrides.env_vars.len(), 2);

    store.delete_stack(&stack_name).await.unwrap();
    store.delete_template(template.template.id).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_token_sensitive_to_override_changes() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let stack_name = unique("it-tok");
    let template_name = unique("it-tok-tpl");

    let template = store.create_template(&new_template(&template_name)).await.unwrap();
    let stack = store.create_stack(&new_stack(&stack_name)).await.unwrap();
    store
        .create_instance(
            &stack_name,
            &NewInstance {
                instance_id: "app1".to_string(),
                template_service_id: template.template.id,
                description: String::new(),
                enabled: true,
            },
        )
        .await
        .unwrap();

    let (stack_ts, instance_ts) = store.stack_timestamps(stack.id).await.unwrap();
    let before = devarch_control::plan::plan_token(stack_ts, &instance_ts);

    // any override write must change the token
    store
        .replace_override_group(
            stack.id,
            "app1",
            OverrideGroup::EnvVars(vec![EnvVar {
                key: "X".to_string(),
                value: "y".to_string(),
            }]),
        )
        .await
        .unwrap();

    let (stack_ts, instance_ts) = store.stack_timestamps(stack.id).await.unwrap();
    let after = devarch_control::plan::plan_token(stack_ts, &instance_ts);
    assert_ne!(before, after, "override write must invalidate the token");

    store.delete_stack(&stack_name).await.unwrap();
    store.delete_template(template.template.id).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_lock_mutual_exclusion() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let name_a = unique("it-lock-a");
    let name_b = unique("it-lock-b");
    let stack_a = store.create_stack(&new_stack(&name_a)).await.unwrap();
    let stack_b = store.create_stack(&new_stack(&name_b)).await.unwrap();

    let first = store.try_lock_stack(stack_a.id).await.unwrap();
    assert!(first.is_some(), "first acquisition must succeed");

    let second = store.try_lock_stack(stack_a.id).await.unwrap();
    assert!(second.is_none(), "same stack must be mutually exclusive");

    // a different stack locks independently
    let other = store.try_lock_stack(stack_b.id).await.unwrap();
    assert!(other.is_some(), "different stacks lock in parallel");

    first.unwrap().release().await.unwrap();
    other.unwrap().release().await.unwrap();

    let reacquired = store.try_lock_stack(stack_a.id).await.unwrap();
    assert!(reacquired.is_some(), "release must free the lock");
    reacquired.unwrap().release().await.unwrap();

    store.delete_stack(&name_a).await.unwrap();
    store.delete_stack(&name_b).await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_template_delete_guarded_by_references() {
    let Some(store) = store_or_skip().await else {
        return;
    };
    let stack_name = unique("it-ref");
    let template_name = unique("it-ref-tpl");

    let template = store.create_template(&new_template(&template_name)).await.unwrap();
    store.create_stack(&new_stack(&stack_name)).await.unwrap();
    store
        .create_instance(
            &stack_name,
            &NewInstance {
                instance_id: "app1".to_string(),
                template_service_id: template.template.id,
                description: String::new(),
                enabled: true,
            },
        )
        .await
        .unwrap();

    let err = store.delete_template(template.template.id).await.unwrap_err();
    assert_eq!(err.category(), "validation");

    // tombstoning the stack (and its instances) releases the reference
    store.delete_stack(&stack_name).await.unwrap();
    store.delete_template(template.template.id).await.unwrap();
}
