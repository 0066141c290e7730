//! Demo wiring for the saga orchestrator.
//!
//! Simulates the users and cities services on an in-memory bus and runs the
//! user registration saga against them, with structured logging and
//! Prometheus metrics.

pub mod config;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use saga::user_registration::{
    self, ACTION_ASSIGN_CITY, ACTION_CREATE_USER, ACTION_DELETE_USER, ACTION_UNASSIGN_CITY,
    CITIES_SERVICE, NewUser, STEP_ASSIGN_CITY, STEP_CREATE_USER, USERS_SERVICE,
};
use saga::{InMemoryMessageBus, RunError, Saga, SagaOrchestrator, SagaRunner};
use serde_json::{Value, json};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use config::{Config, LogFormat};

/// Installs the global tracing subscriber.
pub fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Builds a bus answering for the users and cities services.
///
/// `FAIL_STEP` turns the named step's action into an error and `SLOW_STEP`
/// delays it past the configured deadline.
pub fn simulated_services(config: &Config) -> InMemoryMessageBus {
    let bus = InMemoryMessageBus::new();
    let next_user = Arc::new(AtomicU32::new(0));

    bus.register(USERS_SERVICE, ACTION_CREATE_USER, move |payload| {
        let id = next_user.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(json!({ "id": format!("user-{id}"), "email": payload["email"] }))
    });
    bus.register(USERS_SERVICE, ACTION_DELETE_USER, |_| Ok(Value::Null));
    bus.register(CITIES_SERVICE, ACTION_ASSIGN_CITY, |payload| {
        Ok(json!({ "userId": payload["userId"], "cityId": payload["cityId"] }))
    });
    bus.register(CITIES_SERVICE, ACTION_UNASSIGN_CITY, |_| Ok(Value::Null));

    for (step_id, service, action) in [
        (STEP_CREATE_USER, USERS_SERVICE, ACTION_CREATE_USER),
        (STEP_ASSIGN_CITY, CITIES_SERVICE, ACTION_ASSIGN_CITY),
    ] {
        if config.fail_step.as_deref() == Some(step_id) {
            bus.register(service, action, |_| Err("simulated failure".to_string()));
        }
        if config.slow_step.as_deref() == Some(step_id) {
            bus.set_delay(service, action, config.remote_timeout * 2);
        }
    }

    bus
}

/// Runs one user registration saga as configured.
pub async fn register_user(config: &Config, bus: InMemoryMessageBus) -> Result<Saga, RunError> {
    let runner = SagaRunner::new(
        Arc::new(SagaOrchestrator::in_memory()),
        bus,
        config.runner_config(),
    );
    let user = NewUser {
        email: config.user_email.clone(),
        name: config.user_name.clone(),
    };

    runner
        .run(
            user_registration::SAGA_TYPE,
            user_registration::definition(&user, &config.city_id),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use saga::SagaStatus;
    use std::time::Duration;

    fn config() -> Config {
        Config {
            remote_timeout: Duration::from_millis(50),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_registration_completes() {
        let config = config();
        let saga = register_user(&config, simulated_services(&config))
            .await
            .unwrap();

        assert_eq!(saga.status(), SagaStatus::Completed);
        assert_eq!(
            saga.results().lookup("result.userId").unwrap(),
            "user-1"
        );
    }

    #[tokio::test]
    async fn test_failing_step_rolls_back() {
        let config = Config {
            fail_step: Some(STEP_ASSIGN_CITY.to_string()),
            ..config()
        };
        let bus = simulated_services(&config);

        let err = register_user(&config, bus.clone()).await.unwrap_err();

        assert!(matches!(err, RunError::RolledBack { .. }));
        assert_eq!(bus.sent_to(USERS_SERVICE, ACTION_DELETE_USER).len(), 1);
    }

    #[tokio::test]
    async fn test_slow_step_times_out() {
        let config = Config {
            slow_step: Some(STEP_CREATE_USER.to_string()),
            ..config()
        };
        let bus = simulated_services(&config);

        let err = register_user(&config, bus.clone()).await.unwrap_err();

        assert!(matches!(err, RunError::RolledBack { .. }));
        assert!(bus.sent_to(CITIES_SERVICE, ACTION_ASSIGN_CITY).is_empty());
        assert!(bus.sent_to(USERS_SERVICE, ACTION_DELETE_USER).is_empty());
    }
}
