//! Cancelling operations started with `execute_async`

mod common;

use async_runtime_compat::ThreadSpawner;
use common::{Fixture, service_op, set};
use management_model::{Operation, Outcome, PathAddress, keys};
use model_controller::ExecuteOptions;
use serde_json::json;
use std::time::Duration;

#[smol_potat::test]
async fn interrupted_model_handler_fails() {
    let fixture = Fixture::new();
    let handle = fixture.controller.execute_async(
        set("block-in-model", "attr1", 5),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    fixture.wait_entered().await;
    assert!(handle.cancel());

    let response = handle.response().await;
    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(response.rolled_back, Some(true));
    assert_eq!(
        response.failure_message(),
        Some("Operation handler failed: Operation interrupted")
    );
    assert_eq!(fixture.attribute("attr1"), json!(1));
}

#[smol_potat::test]
async fn interrupted_runtime_handler_fails() {
    let fixture = Fixture::new();
    let handle = fixture.controller.execute_async(
        set("block-in-runtime", "attr1", 5),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    fixture.wait_entered().await;
    assert!(handle.cancel());

    let response = handle.response().await;
    assert_eq!(response.outcome, Outcome::Failed);
    assert_eq!(response.rolled_back, Some(true));
    assert_eq!(fixture.attribute("attr1"), json!(1));
}

#[smol_potat::test]
async fn cancelled_while_waiting_for_lock() {
    let fixture = Fixture::new();
    let holder = fixture.controller.execute_async(
        set("hold-lock", "attr1", 7),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    fixture.wait_entered().await;

    let waiter = fixture.controller.execute_async(
        set(keys::WRITE_ATTRIBUTE, "attr2", 9),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    smol::Timer::after(Duration::from_millis(100)).await;
    assert!(waiter.cancel());

    let response = waiter.response().await;
    assert_eq!(response.outcome, Outcome::Cancelled);
    assert_eq!(response.rolled_back, Some(true));
    assert_eq!(response.failure_message(), Some("Operation cancelled"));

    fixture.gate.release();
    let response = holder.response().await;
    assert!(response.is_success(), "{:?}", response);
    assert_eq!(fixture.attribute("attr1"), json!(7));
    assert_eq!(fixture.attribute("attr2"), json!(2));
}

#[smol_potat::test]
async fn cancelled_while_verifying_services() {
    let fixture = Fixture::new();
    let handle = fixture.controller.execute_async(
        service_op("blocking-service", "test.pending").blocking_timeout(2),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    fixture.wait_entered().await;
    assert!(handle.cancel());

    let response = handle.response().await;
    assert_eq!(response.outcome, Outcome::Cancelled);
    assert_eq!(response.rolled_back, Some(true));
    assert_eq!(fixture.attribute("service"), serde_json::Value::Null);
}

#[smol_potat::test]
async fn cancel_after_completion_is_refused() {
    let fixture = Fixture::new();
    let handle = fixture.controller.execute_async(
        Operation::new(keys::READ_RESOURCE, PathAddress::root()),
        ExecuteOptions::default(),
        &ThreadSpawner,
    );
    let response = handle.response().await;
    assert!(response.is_success());
    assert!(!handle.cancel());
}
