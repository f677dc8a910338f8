pub mod agents;
pub mod certificates;
pub mod health;
pub mod metrics;
