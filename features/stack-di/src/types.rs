use std::{
    any::{type_name, Any, TypeId},
    fmt::Debug,
    sync::Arc,
};

/// Boxed error returned by constructors and cleanups
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Boxed future used wherever construction or teardown is awaited
pub type BoxFuture<T> = futures::future::BoxFuture<'static, T>;

/// Containers may be opened on a multithreaded async runtime
/// So every resource and literal argument needs to be Send + Sync + 'static
pub trait Injectable: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Injectable for T {}

/// A constructed resource or a literal argument value
#[derive(Clone)]
pub struct Instance {
    pub info: TypeInfo,
    pub instance: Arc<dyn Any + Send + Sync + 'static>,
}
impl Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Instance").field(&self.info.name()).finish()
    }
}

impl Instance {
    pub fn new<T: Injectable>(instance: T) -> Self {
        Self::from_arc(Arc::new(instance))
    }

    pub fn from_arc<T: Injectable>(instance: Arc<T>) -> Self {
        Instance {
            info: TypeInfo::of::<T>(),
            instance,
        }
    }

    /// Returns the concrete value, or the name of the stored type on mismatch
    pub fn downcast<T: Injectable>(&self) -> Result<Arc<T>, &'static str> {
        Arc::downcast::<T>(self.instance.clone()).map_err(|_| self.info.name())
    }
}

/// The type a resource or value was stored as, kept for diagnostics
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    name: &'static str,
    id: TypeId,
}
impl TypeInfo {
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeInfo {
            name: type_name::<T>(),
            id: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether this describes `T`
    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
