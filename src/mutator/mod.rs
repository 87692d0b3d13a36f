//! # Mutator
//!
//! - `references`: secret reference detection in container environments
//! - `container`: rewrites one container to start through the wrapper
//! - `pod`: orchestrates containers and adds the bootstrap init container

pub mod container;
pub mod pod;
pub mod references;

pub use container::{ContainerMutation, ContainerMutator};
pub use pod::{mutate_pod, InitContainerSettings, PodMutation};
pub use references::collect_secret_references;
