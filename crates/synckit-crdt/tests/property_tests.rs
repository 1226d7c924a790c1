//! Property test harness.

#[path = "property/convergence_properties.rs"]
mod convergence_properties;
