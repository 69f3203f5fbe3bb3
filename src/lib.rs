pub mod admission;
pub mod balancer;
pub mod cache;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod monitor;
pub mod routes;
pub mod startup;
pub mod state;
pub mod telemetry;
pub mod video_url;
