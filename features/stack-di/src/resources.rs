use std::{fmt::Debug, sync::Arc};

use crate::{
    dependency::{require, Resolved},
    errors::RequireError,
    types::{Injectable, Instance},
};

/// The resources of an opened container, together with its settings
///
/// Filled once while the container opens and read-only afterwards.
pub struct Resources<S> {
    pub settings: Arc<S>,
    instances: Resolved,
}
impl<S> Clone for Resources<S> {
    fn clone(&self) -> Self {
        Resources {
            settings: self.settings.clone(),
            instances: self.instances.clone(),
        }
    }
}
impl<S> Debug for Resources<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_struct("Resources");
        for (name, instance) in &self.instances {
            map.field(name, &instance.info.name());
        }
        map.finish()
    }
}

impl<S: Injectable> Resources<S> {
    pub(crate) fn new(settings: Arc<S>, instances: Resolved) -> Self {
        Resources {
            settings,
            instances,
        }
    }

    /// Attempts to get the resource registered as `name`
    pub fn require<T: Injectable>(&self, name: &str) -> Result<Arc<T>, RequireError> {
        require(&self.instances, name)
    }

    pub fn get(&self, name: &str) -> Option<&Instance> {
        self.instances.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instances.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Builds a typed bundle from the resources of an opened container
///
/// ```
/// use std::sync::Arc;
/// use stack_di::{FromResources, RequireError, Resources};
///
/// struct Pool;
/// struct AppResources {
///     settings: Arc<String>,
///     pool: Arc<Pool>,
/// }
/// impl FromResources<String> for AppResources {
///     fn from_resources(resources: Resources<String>) -> Result<Self, RequireError> {
///         Ok(AppResources {
///             pool: resources.require("pool")?,
///             settings: resources.settings,
///         })
///     }
/// }
/// ```
pub trait FromResources<S>: Sized {
    fn from_resources(resources: Resources<S>) -> Result<Self, RequireError>;
}
impl<S> FromResources<S> for Resources<S> {
    fn from_resources(resources: Resources<S>) -> Result<Self, RequireError> {
        Ok(resources)
    }
}
