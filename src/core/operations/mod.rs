pub mod intake;

pub use intake::{IntakeResponse, PaymentIntake, PaymentRequest};
