//! Global read and write operations

mod common;

use async_runtime_compat::ThreadSpawner;
use common::{Fixture, op, set};
use management_model::{Operation, Outcome, PathAddress, keys};
use model_controller::ExecuteOptions;
use serde_json::{Value, json};

async fn fixture_with_children() -> Fixture {
    let fixture = Fixture::new();
    for (name, value) in [("one", 1), ("two", 2)] {
        let address = PathAddress::of("child", name);
        let response = fixture
            .controller
            .execute(Operation::new("add", address).param(keys::VALUE, value))
            .await;
        assert!(response.is_success(), "{:?}", response);
    }
    fixture
}

fn child(name: &str) -> PathAddress {
    PathAddress::of("child", name)
}

#[smol_potat::test]
async fn read_resource() {
    let fixture = fixture_with_children().await;

    let response = fixture.controller.execute(op(keys::READ_RESOURCE)).await;
    assert_eq!(
        response.result,
        json!({"attr1": 1, "attr2": 2, "child": {"one": null, "two": null}})
    );

    let response = fixture
        .controller
        .execute(op(keys::READ_RESOURCE).param(keys::RECURSIVE, true))
        .await;
    assert_eq!(response.result["child"]["two"], json!({"value": 2}));
}

#[smol_potat::test]
async fn read_missing_resource_fails() {
    let fixture = Fixture::new();
    let response = fixture
        .controller
        .execute(Operation::new(keys::READ_RESOURCE, child("nope")))
        .await;
    assert_eq!(response.outcome, Outcome::Failed);
}

#[smol_potat::test]
async fn attributes_on_child_use_inherited_handlers() {
    let fixture = fixture_with_children().await;

    let write = Operation::new(keys::WRITE_ATTRIBUTE, child("one"))
        .param(keys::NAME, "value")
        .param(keys::VALUE, 10);
    let response = fixture.controller.execute(write).await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(response.result, json!(1));

    let read = Operation::new(keys::READ_ATTRIBUTE, child("one")).param(keys::NAME, "value");
    let response = fixture.controller.execute(read.clone()).await;
    assert_eq!(response.result, json!(10));

    let undefine = Operation::new(keys::UNDEFINE_ATTRIBUTE, child("one")).param(keys::NAME, "value");
    assert!(fixture.controller.execute(undefine).await.is_success());
    let response = fixture.controller.execute(read).await;
    assert!(response.is_success());
    assert_eq!(response.result, Value::Null);
}

#[smol_potat::test]
async fn write_attribute_requires_name() {
    let fixture = Fixture::new();
    let response = fixture
        .controller
        .execute(op(keys::WRITE_ATTRIBUTE).param(keys::VALUE, 1))
        .await;
    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(
        response.failure_message(),
        Some("Missing required parameter: name")
    );
}

#[smol_potat::test]
async fn read_children() {
    let fixture = fixture_with_children().await;

    let response = fixture
        .controller
        .execute(op(keys::READ_CHILDREN_NAMES).param(keys::CHILD_TYPE, "child"))
        .await;
    assert_eq!(response.result, json!(["one", "two"]));

    let response = fixture.controller.execute(op(keys::READ_CHILDREN_TYPES)).await;
    assert_eq!(response.result, json!(["child"]));

    let response = fixture
        .controller
        .execute(op(keys::READ_CHILDREN_RESOURCES).param(keys::CHILD_TYPE, "child"))
        .await;
    assert_eq!(
        response.result,
        json!({"one": {"value": 1}, "two": {"value": 2}})
    );

    let response = fixture
        .controller
        .execute(op(keys::READ_CHILDREN_NAMES).param(keys::CHILD_TYPE, "other"))
        .await;
    assert_eq!(response.result, json!([]));
}

#[smol_potat::test]
async fn read_operation_names() {
    let fixture = fixture_with_children().await;

    let response = fixture.controller.execute(op(keys::READ_OPERATION_NAMES)).await;
    let names = response.result.as_array().unwrap();
    assert!(names.contains(&json!("composite")));
    assert!(names.contains(&json!("good")));

    let response = fixture
        .controller
        .execute(Operation::new(keys::READ_OPERATION_NAMES, child("one")))
        .await;
    let names = response.result.as_array().unwrap();
    assert!(names.contains(&json!("add")));
    assert!(names.contains(&json!(keys::READ_RESOURCE)));
    assert!(!names.contains(&json!("good")));
    assert!(!names.contains(&json!("composite")));
}

#[smol_potat::test]
async fn reads_in_composite_see_uncommitted_writes() {
    let fixture = Fixture::new();
    let response = fixture
        .controller
        .execute(Operation::composite([
            op(keys::WRITE_ATTRIBUTE)
                .param(keys::NAME, "attr1")
                .param(keys::VALUE, 8),
            op(keys::READ_ATTRIBUTE).param(keys::NAME, "attr1"),
        ]))
        .await;
    assert!(response.is_success());
    assert_eq!(response.step(2).unwrap().result, json!(8));
}

#[smol_potat::test]
async fn reads_do_not_wait_for_writer() {
    let fixture = Fixture::new();
    let writer = fixture.controller.execute_async(
        set("hold-lock", "attr1", 7),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    fixture.wait_entered().await;

    // The writer holds the lock; reads see the committed model
    let response = fixture
        .controller
        .execute(op(keys::READ_ATTRIBUTE).param(keys::NAME, "attr1"))
        .await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(response.result, json!(1));

    fixture.gate.release();
    assert!(writer.response().await.is_success());
    assert_eq!(fixture.attribute("attr1"), json!(7));
}
