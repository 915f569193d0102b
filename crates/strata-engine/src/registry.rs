use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use strata_config::ComponentSpec;
use strata_core::FileSystem;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no provider registered for type {kind:?}")]
    NoProvider { kind: String },
    #[error("component {name:?} is already loaded")]
    AlreadyLoaded { name: String },
    #[error("unknown component {name:?}")]
    UnknownComponent { name: String },
    #[error("component {name:?} is not a backend")]
    NotABackend { name: String },
    #[error("component {name:?} failed to build: {source}")]
    Build {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Running network front-end owned by the engine.
pub struct FrontendHandle {
    pub local_addr: SocketAddr,
    pub shutdown: CancellationToken,
    pub task: tokio::task::JoinHandle<()>,
}

impl FrontendHandle {
    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

pub enum Component {
    Backend(Arc<dyn FileSystem>),
    Frontend(FrontendHandle),
}

/// Builds one component type from its blueprint config.
#[async_trait]
pub trait Provider: Send + Sync {
    fn kind(&self) -> &'static str;

    /// Config-shape validation without side effects, for `strata check`.
    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()>;

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component>;

    /// Tears down a component this provider built. Front-ends stop
    /// listening; backends release their resources. Inner backends are not
    /// touched here: the registry owns each component exactly once and
    /// closes it in its own turn.
    async fn close(&self, component: Component) -> anyhow::Result<()> {
        match component {
            Component::Frontend(handle) => {
                handle.stop().await;
                Ok(())
            }
            Component::Backend(fs) => fs.dispose().await.map_err(anyhow::Error::from),
        }
    }
}

struct LoadedComponent {
    name: String,
    kind: String,
    component: Option<Component>,
    provider: Arc<dyn Provider>,
}

/// Wires named components from a blueprint, in the order given.
///
/// Dependency lookups during a build record edges in the DAG; the engine
/// itself performs no topological validation: a provider whose dependency
/// has not been loaded yet fails at wire time. The registry owns every
/// component; `dispose` tears them down in reverse insertion order.
#[derive(Default)]
pub struct Engine {
    providers: HashMap<String, Arc<dyn Provider>>,
    loaded: Vec<LoadedComponent>,
    index: HashMap<String, usize>,
    edges: Vec<(String, String)>,
}

/// Passed to providers during a build: resolves dependencies by name and
/// records each lookup as a DAG edge.
pub struct BuildContext<'a> {
    dependent: &'a str,
    loaded: &'a [LoadedComponent],
    index: &'a HashMap<String, usize>,
    edges: &'a mut Vec<(String, String)>,
}

impl BuildContext<'_> {
    pub fn backend(&mut self, name: &str) -> Result<Arc<dyn FileSystem>, EngineError> {
        self.edges
            .push((self.dependent.to_string(), name.to_string()));
        let idx = *self.index.get(name).ok_or_else(|| EngineError::UnknownComponent {
            name: name.to_string(),
        })?;
        match &self.loaded[idx].component {
            Some(Component::Backend(fs)) => Ok(fs.clone()),
            _ => Err(EngineError::NotABackend {
                name: name.to_string(),
            }),
        }
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers
            .insert(provider.kind().to_string(), provider);
    }

    pub async fn load(&mut self, specs: &[ComponentSpec]) -> Result<(), EngineError> {
        for spec in specs {
            self.load_component(spec).await?;
        }
        Ok(())
    }

    pub async fn load_component(&mut self, spec: &ComponentSpec) -> Result<(), EngineError> {
        if self.index.contains_key(&spec.name) {
            return Err(EngineError::AlreadyLoaded {
                name: spec.name.clone(),
            });
        }
        let provider = self
            .providers
            .get(&spec.kind)
            .cloned()
            .ok_or_else(|| EngineError::NoProvider {
                kind: spec.kind.clone(),
            })?;

        let component = {
            let mut cx = BuildContext {
                dependent: &spec.name,
                loaded: &self.loaded,
                index: &self.index,
                edges: &mut self.edges,
            };
            provider
                .build(&mut cx, spec)
                .await
                .map_err(|source| EngineError::Build {
                    name: spec.name.clone(),
                    source,
                })?
        };

        info!(name = %spec.name, kind = %spec.kind, "component loaded");
        let idx = self.loaded.len();
        self.loaded.push(LoadedComponent {
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            component: Some(component),
            provider,
        });
        self.index.insert(spec.name.clone(), idx);
        Ok(())
    }

    /// Validates provider availability and config shapes without building
    /// anything.
    pub fn check(&self, specs: &[ComponentSpec]) -> Result<(), EngineError> {
        let mut seen = HashMap::new();
        for spec in specs {
            if seen.insert(spec.name.clone(), ()).is_some() {
                return Err(EngineError::AlreadyLoaded {
                    name: spec.name.clone(),
                });
            }
            let provider =
                self.providers
                    .get(&spec.kind)
                    .ok_or_else(|| EngineError::NoProvider {
                        kind: spec.kind.clone(),
                    })?;
            provider
                .validate(spec)
                .map_err(|source| EngineError::Build {
                    name: spec.name.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn backend(&self, name: &str) -> Option<Arc<dyn FileSystem>> {
        let idx = *self.index.get(name)?;
        match &self.loaded[idx].component {
            Some(Component::Backend(fs)) => Some(fs.clone()),
            _ => None,
        }
    }

    /// Addresses of every running front-end, in load order.
    pub fn frontend_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.loaded
            .iter()
            .filter_map(|c| match &c.component {
                Some(Component::Frontend(handle)) => Some((c.name.clone(), handle.local_addr)),
                _ => None,
            })
            .collect()
    }

    /// Dependency edges recorded during builds (`dependent -> dependency`).
    pub fn dependency_edges(&self) -> &[(String, String)] {
        &self.edges
    }

    /// Tears components down via their providers, in reverse insertion
    /// order: front-ends stop listening before the backends under them are
    /// disposed.
    pub async fn dispose(&mut self) {
        for loaded in self.loaded.iter_mut().rev() {
            let Some(component) = loaded.component.take() else {
                continue;
            };
            info!(name = %loaded.name, kind = %loaded.kind, "closing component");
            if let Err(error) = loaded.provider.close(component).await {
                warn!(name = %loaded.name, kind = %loaded.kind, error = %error, "close failed");
            }
        }
        self.loaded.clear();
        self.index.clear();
    }
}
