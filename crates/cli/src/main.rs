//! Demo entry point: runs one user registration saga and reports the outcome.

use std::process::ExitCode;

use saga::RunError;
use saga_cli::config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Load configuration and initialize tracing
    let config = Config::from_env();
    saga_cli::init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Run the saga against the simulated services
    let bus = saga_cli::simulated_services(&config);
    let outcome = saga_cli::register_user(&config, bus).await;

    let code = match outcome {
        Ok(saga) => {
            tracing::info!(
                saga_id = %saga.id(),
                results = %serde_json::to_string(saga.results()).unwrap_or_default(),
                "registration completed"
            );
            ExitCode::SUCCESS
        }
        Err(RunError::RolledBack {
            operation,
            saga_id,
            failed_compensations,
        }) => {
            for failure in &failed_compensations {
                tracing::error!(
                    %saga_id,
                    step_id = %failure.step_id,
                    error = %failure.source,
                    "compensation needs manual repair"
                );
            }
            tracing::error!(%saga_id, "{operation} could not be completed and was rolled back");
            ExitCode::FAILURE
        }
        Err(RunError::Saga(error)) => {
            tracing::error!(%error, "saga was driven incorrectly");
            ExitCode::FAILURE
        }
    };

    // 4. Optionally dump metrics
    if config.print_metrics {
        println!("{}", metrics_handle.render());
    }

    code
}
