//! Tool infrastructure: parameter contracts, registry and dispatch, result
//! envelopes, and deployment-profile packages.
//!
//! Domain modules describe their tools with [`ToolDescriptor`]s and register
//! them on a [`ToolRegistry`] at startup. Agents only ever go through
//! [`ToolRegistry::invoke`] (or a profile-restricted [`RegistryView`]).

pub mod envelope;
pub mod packages;
pub mod registry;
pub mod schema;

pub use envelope::ToolEnvelope;
pub use packages::{RegistryView, ToolPackages, EMPTY_PROFILE, SUPERSET_PROFILE};
pub use registry::{
    ResultContract, SerializationMode, ToolDescription, ToolDescriptor, ToolFuture, ToolHandler,
    ToolRegistry,
};
pub use schema::{ParamContract, ParamDef, ParamType, ToolParams};
