//! Built-in backend providers, one per blueprint `type`.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use strata_backend::{AliasFileSystem, LocalFileSystem, MemoryFileSystem, UnionFileSystem, UnionItem};
use strata_cache::{
    BlockCacheFileSystem, BlockCacheOptions, MetadataCacheFileSystem, MetadataCacheOptions,
};
use strata_config::{
    AliasConfig, BlockCacheConfig, ComponentSpec, LocalConfig, MemoryConfig, MetadataCacheConfig,
    UnionConfig, WebdavBackendConfig, types,
};
use strata_core::Path;
use strata_webdav::{HttpOptions, WebdavConfig, WebdavCredentials, WebdavFileSystem};

use crate::registry::{BuildContext, Component, Provider};

/// Providers for every built-in backend type. Front-end providers live with
/// the front-ends and are registered separately.
pub fn backend_providers() -> Vec<Arc<dyn Provider>> {
    vec![
        Arc::new(LocalProvider),
        Arc::new(MemoryProvider),
        Arc::new(AliasProvider),
        Arc::new(UnionProvider),
        Arc::new(WebdavProvider),
        Arc::new(MetadataCacheProvider),
        Arc::new(BlockCacheProvider),
    ]
}

struct LocalProvider;

#[async_trait]
impl Provider for LocalProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_LOCAL
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        spec.parse_config::<LocalConfig>()?;
        Ok(())
    }

    async fn build(
        &self,
        _cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: LocalConfig = spec.parse_config()?;
        let fs = LocalFileSystem::new(config.base_dir)?;
        Ok(Component::Backend(Arc::new(fs)))
    }
}

struct MemoryProvider;

#[async_trait]
impl Provider for MemoryProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_MEMORY
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        spec.parse_config::<MemoryConfig>()?;
        Ok(())
    }

    async fn build(
        &self,
        _cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let _config: MemoryConfig = spec.parse_config()?;
        Ok(Component::Backend(Arc::new(MemoryFileSystem::new())))
    }
}

struct AliasProvider;

#[async_trait]
impl Provider for AliasProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_ALIAS
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: AliasConfig = spec.parse_config()?;
        config.sub_directory.parse::<Path>()?;
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: AliasConfig = spec.parse_config()?;
        let inner = cx.backend(&config.backend)?;
        let sub_directory: Path = config.sub_directory.parse()?;
        Ok(Component::Backend(Arc::new(AliasFileSystem::new(
            inner,
            sub_directory,
        ))))
    }
}

struct UnionProvider;

#[async_trait]
impl Provider for UnionProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_UNION
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: UnionConfig = spec.parse_config()?;
        for item in &config.items {
            item.mount_path.parse::<Path>()?;
        }
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: UnionConfig = spec.parse_config()?;
        let mut items = Vec::with_capacity(config.items.len());
        for item in &config.items {
            items.push(UnionItem {
                fs: cx.backend(&item.backend)?,
                mount_path: item.mount_path.parse()?,
                priority: item.priority,
                read_only: item.read_only,
            });
        }
        Ok(Component::Backend(Arc::new(UnionFileSystem::new(items))))
    }
}

struct WebdavProvider;

#[async_trait]
impl Provider for WebdavProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_WEBDAV
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: WebdavBackendConfig = spec.parse_config()?;
        Url::parse(&config.base_url)?;
        Ok(())
    }

    async fn build(
        &self,
        _cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: WebdavBackendConfig = spec.parse_config()?;
        let credentials = match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(WebdavCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };
        let fs = WebdavFileSystem::new(WebdavConfig {
            base_url: Url::parse(&config.base_url)?,
            credentials,
            bearer_token: config.bearer_token.clone(),
            http_options: HttpOptions {
                connect_timeout: config.http_options.connect_timeout,
                send_timeout: config.http_options.send_timeout,
                receive_timeout: config.http_options.receive_timeout,
            },
        })?;
        Ok(Component::Backend(Arc::new(fs)))
    }
}

struct MetadataCacheProvider;

#[async_trait]
impl Provider for MetadataCacheProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_METADATA_CACHE
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: MetadataCacheConfig = spec.parse_config()?;
        config.cache_dir.parse::<Path>()?;
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: MetadataCacheConfig = spec.parse_config()?;
        let origin = cx.backend(&config.origin_backend)?;
        let cache_fs = cx.backend(&config.cache_backend)?;
        let cache_dir: Path = config.cache_dir.parse()?;
        let fs = MetadataCacheFileSystem::new(
            origin,
            cache_fs,
            cache_dir,
            MetadataCacheOptions {
                max_cache_age: config.max_cache_age,
                large_directory_threshold: config.large_directory_threshold,
                max_cache_size: config.max_cache_size,
                cleanup_interval: config.cleanup_interval,
                cleanup_batch_size: config.cleanup_batch_size,
            },
        );
        Ok(Component::Backend(Arc::new(fs)))
    }
}

struct BlockCacheProvider;

#[async_trait]
impl Provider for BlockCacheProvider {
    fn kind(&self) -> &'static str {
        types::BACKEND_BLOCK_CACHE
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: BlockCacheConfig = spec.parse_config()?;
        config.cache_dir.parse::<Path>()?;
        anyhow::ensure!(config.block_size > 0, "blockSize must be positive");
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: BlockCacheConfig = spec.parse_config()?;
        anyhow::ensure!(config.block_size > 0, "blockSize must be positive");
        let origin = cx.backend(&config.origin_backend)?;
        let cache_fs = cx.backend(&config.cache_backend)?;
        let cache_dir: Path = config.cache_dir.parse()?;
        let fs = BlockCacheFileSystem::new(
            origin,
            cache_fs,
            cache_dir,
            BlockCacheOptions {
                block_size: config.block_size,
                read_ahead_blocks: config.read_ahead_blocks,
                enable_read_ahead: config.enable_read_ahead,
            },
        );
        Ok(Component::Backend(Arc::new(fs)))
    }
}
