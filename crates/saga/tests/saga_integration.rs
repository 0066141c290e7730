//! Integration tests driving the user registration saga over the in-memory bus.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use saga::user_registration::{self, NewUser};
use saga::{
    InMemoryMessageBus, RunError, RunnerConfig, SagaError, SagaOrchestrator, SagaRunner,
    SagaStatus, StepDefinition, StepStatus,
};
use serde_json::{Value, json};

/// Simulated users and cities services sharing one bus.
#[derive(Default)]
struct Directory {
    users: HashMap<String, String>,
    assignments: HashSet<(String, String)>,
    next_id: u32,
}

struct TestHarness {
    runner: SagaRunner<InMemoryMessageBus>,
    orchestrator: Arc<SagaOrchestrator>,
    bus: InMemoryMessageBus,
    directory: Arc<Mutex<Directory>>,
}

impl TestHarness {
    fn new() -> Self {
        let bus = InMemoryMessageBus::new();
        let directory = Arc::new(Mutex::new(Directory::default()));

        let dir = Arc::clone(&directory);
        bus.register("users", "CREATE_USER", move |payload| {
            let mut dir = dir.lock().unwrap();
            dir.next_id += 1;
            let id = format!("u{}", dir.next_id);
            let email = payload["email"].as_str().unwrap_or_default().to_string();
            dir.users.insert(id.clone(), email);
            Ok(json!({ "id": id }))
        });

        let dir = Arc::clone(&directory);
        bus.register("users", "DELETE_USER", move |payload| {
            let id = payload["userId"].as_str().unwrap_or_default();
            dir.lock().unwrap().users.remove(id);
            Ok(Value::Null)
        });

        let dir = Arc::clone(&directory);
        bus.register("cities", "ASSIGN_CITY", move |payload| {
            let user = payload["userId"].as_str().unwrap_or_default().to_string();
            let city = payload["cityId"].as_str().unwrap_or_default().to_string();
            dir.lock().unwrap().assignments.insert((user, city));
            Ok(json!({ "assigned": true }))
        });

        let dir = Arc::clone(&directory);
        bus.register("cities", "UNASSIGN_CITY", move |payload| {
            let user = payload["userId"].as_str().unwrap_or_default().to_string();
            let city = payload["cityId"].as_str().unwrap_or_default().to_string();
            dir.lock().unwrap().assignments.remove(&(user, city));
            Ok(Value::Null)
        });

        let orchestrator = Arc::new(SagaOrchestrator::in_memory());
        let runner = SagaRunner::new(
            Arc::clone(&orchestrator),
            bus.clone(),
            RunnerConfig {
                remote_timeout: Duration::from_millis(100),
            },
        );

        Self {
            runner,
            orchestrator,
            bus,
            directory,
        }
    }

    fn user_count(&self) -> usize {
        self.directory.lock().unwrap().users.len()
    }

    fn assignment_count(&self) -> usize {
        self.directory.lock().unwrap().assignments.len()
    }
}

fn ada() -> NewUser {
    NewUser {
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
    }
}

#[tokio::test]
async fn test_registration_happy_path() {
    let h = TestHarness::new();

    let saga = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::Completed);
    assert_eq!(saga.current_step_index(), 2);
    assert_eq!(
        saga.results().lookup("steps.CREATE_USER.result.id").unwrap(),
        "u1"
    );

    assert_eq!(h.user_count(), 1);
    assert!(
        h.directory
            .lock()
            .unwrap()
            .assignments
            .contains(&("u1".to_string(), "city-1".to_string()))
    );
}

#[tokio::test]
async fn test_registration_sends_user_input_verbatim() {
    let h = TestHarness::new();
    let user = NewUser {
        email: "ann@example.com".to_string(),
        name: "Ann {{ curly".to_string(),
    };
    let city_id = "{{steps.CREATE_USER.result.id}}";

    let saga = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&user, city_id),
        )
        .await
        .unwrap();

    assert_eq!(saga.status(), SagaStatus::Completed);
    let create = h.bus.sent_to("users", "CREATE_USER");
    assert_eq!(create[0].payload["name"], "Ann {{ curly");
    let assign = h.bus.sent_to("cities", "ASSIGN_CITY");
    assert_eq!(
        assign[0].payload,
        json!({"userId": "u1", "cityId": "{{steps.CREATE_USER.result.id}}"})
    );
}

#[tokio::test]
async fn test_assign_city_timeout_deletes_user() {
    let h = TestHarness::new();
    h.bus.set_delay("cities", "ASSIGN_CITY", Duration::from_secs(5));

    let err = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap_err();

    let RunError::RolledBack {
        saga_id,
        failed_compensations,
        ..
    } = err
    else {
        panic!("expected rollback");
    };
    assert!(failed_compensations.is_empty());

    let deletes = h.bus.sent_to("users", "DELETE_USER");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].payload, json!({ "userId": "u1" }));
    assert!(h.bus.sent_to("cities", "UNASSIGN_CITY").is_empty());

    let saga = h.orchestrator.get_saga(saga_id).unwrap();
    assert_eq!(saga.status(), SagaStatus::Compensated);
    assert_eq!(saga.steps()[0].status(), StepStatus::Compensated);
    assert_eq!(saga.steps()[1].status(), StepStatus::Failed);

    assert_eq!(h.user_count(), 0);
    assert_eq!(h.assignment_count(), 0);
}

#[tokio::test]
async fn test_create_user_failure_needs_no_compensation() {
    let h = TestHarness::new();
    h.bus.register("users", "CREATE_USER", |_| Err("email taken".to_string()));

    let err = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::RolledBack { .. }));
    assert!(h.bus.sent_to("users", "DELETE_USER").is_empty());
    assert!(h.bus.sent_to("cities", "ASSIGN_CITY").is_empty());
    assert_eq!(h.user_count(), 0);
}

#[tokio::test]
async fn test_manual_driving_matches_documented_scenario() {
    let orchestrator = SagaOrchestrator::in_memory();
    let steps = vec![
        StepDefinition::new("CREATE_USER", "users", "CREATE_USER")
            .with_compensation("DELETE_USER", json!({ "userId": "{{result.id}}" })),
        StepDefinition::new("ASSIGN_CITY", "cities", "ASSIGN_CITY").with_payload(json!({
            "userId": "{{steps.CREATE_USER.result.id}}",
            "cityId": "city-1",
        })),
    ];

    let saga_id = orchestrator.create_saga("USER_REGISTRATION", steps).unwrap();
    let outcome = orchestrator
        .execute_step(saga_id, json!({ "id": "u1" }))
        .unwrap();
    assert!(!outcome.completed);
    assert_eq!(outcome.current_step_index, 1);

    orchestrator.fail_step(saga_id, "timeout").unwrap();
    let plan = orchestrator.compensate(saga_id).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan[0].step_id, "CREATE_USER");
    assert_eq!(plan[0].action, "DELETE_USER");
    assert_eq!(plan[0].payload, json!({ "userId": "u1" }));

    orchestrator.mark_compensated(saga_id).unwrap();
    assert_eq!(
        orchestrator.get_saga(saga_id).unwrap().status(),
        SagaStatus::Compensated
    );
}

#[tokio::test]
async fn test_multiple_independent_sagas() {
    let h = TestHarness::new();

    let first = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap();

    h.bus.register("cities", "ASSIGN_CITY", |_| Err("city is full".to_string()));
    let second = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-2"),
        )
        .await;

    assert_ne!(
        first.id(),
        match &second {
            Err(RunError::RolledBack { saga_id, .. }) => *saga_id,
            other => panic!("expected rollback, got {other:?}"),
        }
    );
    assert_eq!(
        h.orchestrator.get_saga(first.id()).unwrap().status(),
        SagaStatus::Completed
    );

    // First saga's user remains; second saga's user was deleted.
    assert_eq!(h.user_count(), 1);
    assert_eq!(h.assignment_count(), 1);
}

#[tokio::test]
async fn test_concurrent_sagas_on_shared_orchestrator() {
    let h = Arc::new(TestHarness::new());

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                h.runner
                    .run(
                        user_registration::SAGA_TYPE,
                        user_registration::definition(&ada(), &format!("city-{i}")),
                    )
                    .await
                    .map(|saga| saga.id())
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap().unwrap());
    }

    assert_eq!(ids.len(), 8);
    assert_eq!(h.user_count(), 8);
    assert_eq!(h.assignment_count(), 8);
    assert_eq!(h.orchestrator.repository().len().unwrap(), 8);
}

#[tokio::test]
async fn test_archive_after_completion() {
    let h = TestHarness::new();
    let saga = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap();

    let archived = h.orchestrator.archive(saga.id()).unwrap();
    assert_eq!(archived.status(), SagaStatus::Completed);
    assert!(matches!(
        h.orchestrator.get_saga(saga.id()),
        Err(SagaError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_completion_event_is_emitted() {
    let h = TestHarness::new();
    let saga = h
        .runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&ada(), "city-1"),
        )
        .await
        .unwrap();

    let events = h.bus.emitted();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "saga.completed");
    assert_eq!(events[0].payload["sagaId"], json!(saga.id()));
    assert_eq!(events[0].payload["type"], "USER_REGISTRATION");
}
