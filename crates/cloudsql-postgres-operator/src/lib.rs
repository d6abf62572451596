pub mod cloudsql;
pub mod config;
pub mod crds;
pub mod credentials;
pub mod error;
pub mod instance_controller;
pub mod patch;
pub mod settings;
pub mod store;
pub mod webhook;

#[cfg(test)]
mod test_utils;
