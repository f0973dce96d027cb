use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use stack_di::{
    Cleanup, ContainerDefinition, Definition, Dependency, DynError, Factory, RequireError,
    Resources,
};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let settings = AppSettings {
        database_url: "postgres://localhost/orders".to_string(),
    };

    let container = AppContainer::container(settings);
    let outcome = futures::executor::block_on(container.run(|app: AppResources| async move {
        let orders = app.repository.count();
        println!("{} orders in {}", orders, app.settings.database_url);
        println!("{:?}", app.pool);
    }));

    if let Err(error) = outcome {
        eprintln!("{error}");
        std::process::exit(1);
    }
}

#[derive(Debug)]
struct AppSettings {
    database_url: String,
}

#[derive(Debug)]
struct Pool {
    url: String,
    size: usize,
    open_connections: AtomicUsize,
}
impl Pool {
    async fn connect(url: String, size: usize) -> Result<Pool, DynError> {
        Ok(Pool {
            url,
            size,
            open_connections: AtomicUsize::new(size),
        })
    }

    async fn close(&self) -> Result<(), DynError> {
        self.open_connections.store(0, Ordering::SeqCst);
        println!("closed pool to {}", self.url);
        Ok(())
    }
}

struct Repository {
    pool: Arc<Pool>,
    table: String,
}
impl Repository {
    fn count(&self) -> usize {
        self.pool.size * self.table.len()
    }
}

struct AppResources {
    settings: Arc<AppSettings>,
    pool: Arc<Pool>,
    repository: Arc<Repository>,
}
impl stack_di::FromResources<AppSettings> for AppResources {
    fn from_resources(resources: Resources<AppSettings>) -> Result<Self, RequireError> {
        Ok(AppResources {
            pool: resources.require("pool")?,
            repository: resources.require("repository")?,
            settings: resources.settings,
        })
    }
}

struct AppContainer;
impl ContainerDefinition for AppContainer {
    type Settings = AppSettings;
    type Resources = AppResources;

    fn define(definition: Definition) -> Definition {
        definition
            .register(
                "url",
                Dependency::new(Factory::from_sync(|_| {
                    Ok::<_, DynError>("postgres://localhost/orders".to_string())
                })),
            )
            .register(
                "pool",
                Dependency::new(
                    Factory::from_async(|args| async move {
                        let url = args.cloned::<String>("url")?;
                        let size = args.cloned::<usize>("size")?;
                        Pool::connect(url, size).await
                    })
                    .on_exit(|pool: &Arc<Pool>| {
                        let pool = pool.clone();
                        Cleanup::from_async(move || async move { pool.close().await })
                    }),
                )
                .with_dependency("url", "url")
                .with_value("size", 4_usize),
            )
            .register(
                "repository",
                Dependency::new(
                    Factory::from_sync(|args| {
                        Ok::<_, DynError>(Repository {
                            pool: args.get("pool")?,
                            table: args.cloned("table")?,
                        })
                    })
                    .on_exit(|_| {
                        Cleanup::from_sync(|| {
                            println!("released repository");
                            Ok::<_, DynError>(())
                        })
                    }),
                )
                .with_dependency("pool", "pool")
                .with_value("table", "orders".to_string()),
            )
    }
}

