pub mod checks;

pub use checks::{health_check, liveness_check, readiness_check, HealthState, HealthStatus};
