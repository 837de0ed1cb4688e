pub mod intents;
pub mod payments;
