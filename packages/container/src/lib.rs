//! Container runtime elements for circuit anchors.
//!
//! `docker` and `container` elements run one container in the foreground
//! through the runtime's command-line client; `pod`, `network` and `volume`
//! elements own a named runtime object. Every element requires its tool to
//! be resolved on the hosting server and removes its object on scrub.

pub mod container;
pub mod error;
pub mod resource;
pub mod run;
pub mod tool;

#[cfg(test)]
mod fake;

pub use container::{Container, ContainerFactory, YContainer};
pub use error::{ContainerError, Result};
pub use resource::{Resource, ResourceFactory, YResource};
pub use run::{Create, Noun, Run};
pub use tool::{element_name, parse_json_array_first, Tool};
