//! Supervisor provisioning: cloud-init rendering and the droplet lifecycle.

pub mod cloud_init;
pub mod manager;

pub use manager::SupervisorManager;
