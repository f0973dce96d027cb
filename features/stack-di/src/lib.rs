//! Dependency container with deterministic construction order and scoped teardown
//!
//! Resources are registered by name on a [Definition], each one described by a
//! [Dependency]: a [Factory] plus the arguments it needs, either literal values or
//! other registered resources. Opening a [Container] builds everything in dependency
//! order and registers each resource's [Cleanup] on an [ExitStack], closing it runs those
//! cleanups again in reverse.

mod builder;
mod cleanup;
mod container;
mod dependency;
mod dependency_graph;
mod errors;
mod exit_stack;
mod factories;
mod resources;
mod types;

pub use builder::{Blueprint, ContainerDefinition, Definition};
pub use cleanup::{AsyncThunk, Cleanup};
pub use container::{Container, ContainerState};
pub use dependency::{Argument, Args, Dependency, Resolved};
pub use dependency_graph::{DependencyGraph, DependencyGraphError, DependencyGraphErrors};
pub use errors::{ContainerError, RequireError, ResolveError, TeardownError, TeardownErrors};
pub use exit_stack::ExitStack;
pub use factories::{DynFactory, Factory};
pub use resources::{FromResources, Resources};
pub use types::{BoxFuture, DynError, Injectable, Instance, TypeInfo};
