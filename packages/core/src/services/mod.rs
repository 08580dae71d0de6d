//! Clients for the external platforms the controller drives.

pub mod digitalocean;
pub mod railway;
