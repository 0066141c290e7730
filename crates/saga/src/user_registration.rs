//! User registration saga: create a user, then assign them to a city.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::step::StepDefinition;
use crate::template::literal;

/// The saga type identifier for user registration.
pub const SAGA_TYPE: &str = "USER_REGISTRATION";

/// Step: create the user record.
pub const STEP_CREATE_USER: &str = "CREATE_USER";

/// Step: attach the new user to a city.
pub const STEP_ASSIGN_CITY: &str = "ASSIGN_CITY";

pub const USERS_SERVICE: &str = "users";
pub const CITIES_SERVICE: &str = "cities";

pub const ACTION_CREATE_USER: &str = "CREATE_USER";
pub const ACTION_DELETE_USER: &str = "DELETE_USER";
pub const ACTION_ASSIGN_CITY: &str = "ASSIGN_CITY";
pub const ACTION_UNASSIGN_CITY: &str = "UNASSIGN_CITY";

/// Registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
}

/// Builds the registration steps.
///
/// The users service is expected to reply to `CREATE_USER` with an object
/// carrying the new user's `id`. User-supplied values are wrapped with
/// [`literal`] and reach the services exactly as given.
pub fn definition(user: &NewUser, city_id: &str) -> Vec<StepDefinition> {
    vec![
        StepDefinition::new(STEP_CREATE_USER, USERS_SERVICE, ACTION_CREATE_USER)
            .with_payload(json!({
                "email": literal(user.email.as_str()),
                "name": literal(user.name.as_str()),
            }))
            .with_compensation(ACTION_DELETE_USER, json!({ "userId": "{{result.id}}" })),
        StepDefinition::new(STEP_ASSIGN_CITY, CITIES_SERVICE, ACTION_ASSIGN_CITY)
            .with_payload(json!({
                "userId": format!("{{{{steps.{STEP_CREATE_USER}.result.id}}}}"),
                "cityId": literal(city_id),
            }))
            .with_compensation(
                ACTION_UNASSIGN_CITY,
                json!({
                    "userId": format!("{{{{steps.{STEP_CREATE_USER}.result.id}}}}"),
                    "cityId": literal(city_id),
                }),
            ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SagaOrchestrator;
    use crate::state::SagaStatus;

    #[test]
    fn test_definition_shape() {
        let user = NewUser {
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
        };
        let steps = definition(&user, "city-1");

        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_id, STEP_CREATE_USER);
        assert_eq!(steps[0].payload["email"], literal("ada@example.com"));
        assert_eq!(
            steps[0].compensation.as_ref().unwrap().action,
            ACTION_DELETE_USER
        );
        assert_eq!(
            steps[1].payload,
            json!({"userId": "{{steps.CREATE_USER.result.id}}", "cityId": literal("city-1")})
        );
    }

    #[test]
    fn test_user_input_is_sent_verbatim() {
        let user = NewUser {
            email: "ann@example.com".to_string(),
            name: "Ann {{ curly".to_string(),
        };
        let city_id = "{{steps.CREATE_USER.result.passwordHash}}";
        let steps = definition(&user, city_id);
        let orchestrator = SagaOrchestrator::in_memory();
        let saga_id = orchestrator.create_saga(SAGA_TYPE, steps).unwrap();

        let create = orchestrator.next_step(saga_id).unwrap().unwrap();
        assert_eq!(
            create.payload,
            json!({"email": "ann@example.com", "name": "Ann {{ curly"})
        );

        orchestrator
            .execute_step(saga_id, json!({"id": "u1", "passwordHash": "secret"}))
            .unwrap();
        let assign = orchestrator.next_step(saga_id).unwrap().unwrap();
        assert_eq!(assign.payload, json!({"userId": "u1", "cityId": city_id}));

        orchestrator.execute_step(saga_id, json!({"ok": true})).unwrap();
        let saga = orchestrator.get_saga(saga_id).unwrap();
        assert_eq!(saga.status(), SagaStatus::Completed);
    }
}
