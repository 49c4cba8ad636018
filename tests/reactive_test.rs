//! Integration tests for variable → comparison → trigger propagation.

use chrono::{Duration as ChronoDuration, Local};
use parking_lot::Mutex;
use rust_procedure::reactive::{ChangeKind, Notification, Trigger, Variable};
use rust_procedure::registry::VariableTable;
use rust_procedure::{BindingError, Value};
use std::sync::Arc;
use std::time::Duration;

fn variables(entries: &[(&str, Value)]) -> VariableTable {
    let table = VariableTable::new();
    for (name, value) in entries {
        table.insert(Arc::new(Variable::new(*name, value.clone())));
    }
    table
}

fn record(trigger: &Trigger) -> Arc<Mutex<Vec<(ChangeKind, Value)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    trigger.subscribe(Arc::new(move |n: &Notification| {
        sink.lock().push((n.kind, n.value.clone()));
    }));
    seen
}

fn changed(seen: &Mutex<Vec<(ChangeKind, Value)>>) -> Vec<Value> {
    seen.lock()
        .iter()
        .filter(|(kind, _)| *kind == ChangeKind::Changed)
        .map(|(_, value)| value.clone())
        .collect()
}

#[test]
fn every_flip_is_reported_once() {
    let table = variables(&[("Level", Value::Number(0.0))]);
    let level = table.get("Level").unwrap();
    let trigger = Trigger::with_repeat("Level>=5", &table, 10).unwrap();
    trigger.activate().unwrap();
    let seen = record(&trigger);

    level.set(6.0).unwrap();
    level.set(8.0).unwrap();
    level.set(2.0).unwrap();
    level.set(7.0).unwrap();

    assert_eq!(
        changed(&seen),
        vec![Value::Bool(true), Value::Bool(false), Value::Bool(true)]
    );
    // 8.0 kept the trigger true: one Updated between the first two edges.
    assert_eq!(seen.lock()[1].0, ChangeKind::Updated);
    assert_eq!(trigger.repeat(), 7);
}

#[test]
fn repeat_limits_reported_transitions() {
    let table = variables(&[("Level", Value::Number(0.0))]);
    let level = table.get("Level").unwrap();
    let trigger = Trigger::with_repeat("Level>=5", &table, 2).unwrap();
    trigger.activate().unwrap();
    let seen = record(&trigger);

    level.set(6.0).unwrap();
    level.set(1.0).unwrap();
    assert!(!trigger.is_active());
    level.set(9.0).unwrap();

    assert_eq!(changed(&seen), vec![Value::Bool(true), Value::Bool(false)]);
    assert!(!trigger.value());
    assert_eq!(level.subscriber_count(), 0);
}

#[test]
fn repeated_evaluation_without_change_is_updated() {
    let table = variables(&[("Level", Value::Number(3.0))]);
    let trigger = Trigger::with_repeat("Level>=5", &table, 5).unwrap();
    trigger.activate().unwrap();

    assert_eq!(trigger.evaluate().unwrap(), ChangeKind::Updated);
    assert_eq!(trigger.evaluate().unwrap(), ChangeKind::Updated);
    assert_eq!(trigger.repeat(), 5);
}

#[test]
fn combined_clauses_with_relative_timestamp() {
    let table = variables(&[
        ("WaterLevel", Value::Number(0.0)),
        ("Temperature", Value::Number(25.0)),
        ("TickTime", Value::Timestamp(Local::now())),
    ]);
    let temperature = table.get("Temperature").unwrap();
    let tick = table.get("TickTime").unwrap();
    let water = table.get("WaterLevel").unwrap();

    let trigger =
        Trigger::with_repeat("(WaterLevel>=5|Temperature<20.0)&10<TickTime", &table, 10).unwrap();
    assert_eq!(trigger.child_count(), 3);
    trigger.activate().unwrap();
    assert!(!trigger.value());

    temperature.set(15.0).unwrap();
    assert!(!trigger.value(), "tick time is not yet ten seconds ahead");

    tick.set(Local::now() + ChronoDuration::seconds(60)).unwrap();
    assert!(trigger.value());

    temperature.set(30.0).unwrap();
    assert!(!trigger.value());
    water.set(5.0).unwrap();
    assert!(trigger.value());
}

#[test]
fn bare_boolean_variables_join_expressions() {
    let table = variables(&[
        ("DoorClosed", Value::Bool(false)),
        ("Level", Value::Number(2.0)),
    ]);
    let door = table.get("DoorClosed").unwrap();
    let trigger = Trigger::new("DoorClosed & Level>1", &table).unwrap();
    trigger.activate().unwrap();
    assert!(!trigger.value());

    door.set(true).unwrap();
    assert!(trigger.value());
    assert!(!trigger.is_active());
}

#[test]
fn binding_failures_are_typed() {
    let table = variables(&[
        ("Level", Value::Number(2.0)),
        ("Mode", Value::Text("auto".into())),
    ]);
    assert!(matches!(
        Trigger::new("Volume>1", &table),
        Err(BindingError::NoVariableFound(_))
    ));
    assert!(matches!(
        Trigger::new("Level==Mode", &table),
        Err(BindingError::TypeMismatch { .. })
    ));
    assert!(matches!(
        Trigger::new("Level", &table),
        Err(BindingError::NotBoolean(_))
    ));
    assert!(matches!(
        Trigger::new("Level>1 &", &table),
        Err(BindingError::Compile(_))
    ));
}

#[tokio::test]
async fn async_waiters_observe_the_edge() {
    let table = variables(&[("Pressure", Value::Number(1.0))]);
    let pressure = table.get("Pressure").unwrap();
    let trigger = Trigger::new("Pressure>2.5", &table).unwrap();
    trigger.activate().unwrap();

    let mut rx = trigger.watch();
    let waiter = tokio::spawn(async move {
        let seen = rx.wait_for(|value| *value).await.map(|value| *value);
        seen
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    pressure.set(3.0).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.ok(), Some(true));
}

#[test]
fn trigger_notifications_carry_the_assignment_stamp() {
    let table = variables(&[("Level", Value::Number(0.0))]);
    let level = table.get("Level").unwrap();
    let trigger = Trigger::with_repeat("Level>=5", &table, 10).unwrap();
    trigger.activate().unwrap();

    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&written);
    level.subscribe(Arc::new(move |n: &Notification| sink.lock().push(n.stamp)));
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&fired);
    trigger.subscribe(Arc::new(move |n: &Notification| {
        sink.lock().push((n.kind, n.stamp));
    }));

    level.set(6.0).unwrap();
    std::thread::sleep(Duration::from_millis(5));
    level.set(1.0).unwrap();

    let written = written.lock().clone();
    let fired = fired.lock().clone();
    assert_eq!(written.len(), 2);
    assert_eq!(
        fired,
        vec![
            (ChangeKind::Changed, written[0]),
            (ChangeKind::Changed, written[1]),
        ]
    );
    assert!(written[0] < written[1]);
}
