mod display;
mod registry;

pub use registry::{RegistryNotifierFactory, RegistrySettings};
