//! Core traits for lifecycle-managed services.

mod service;

pub use service::{Service, ServiceInstance};
