mod health;
mod metrics;
mod predict;

pub use health::healthcheck;
pub use metrics::metrics_handler;
pub use predict::predict;
