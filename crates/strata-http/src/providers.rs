//! Blueprint providers for the network front-ends.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use strata_config::{AuthMethod, ComponentSpec, HttpFrontendConfig, WebdavFrontendConfig, types};
use strata_engine::{BuildContext, Component, Provider};

use crate::dav::DavAuthConfig;

pub fn frontend_providers() -> Vec<Arc<dyn Provider>> {
    vec![Arc::new(HttpFrontendProvider), Arc::new(WebdavFrontendProvider)]
}

fn parse_addr(address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    format!("{address}:{port}")
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {address}:{port}: {e}"))
}

struct HttpFrontendProvider;

#[async_trait]
impl Provider for HttpFrontendProvider {
    fn kind(&self) -> &'static str {
        types::FRONTEND_HTTP
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: HttpFrontendConfig = spec.parse_config()?;
        parse_addr(&config.address, config.port)?;
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: HttpFrontendConfig = spec.parse_config()?;
        let backend = cx.backend(&config.backend)?;
        let addr = parse_addr(&config.address, config.port)?;
        let handle = crate::serve_http(backend, addr).await?;
        Ok(Component::Frontend(handle))
    }
}

struct WebdavFrontendProvider;

#[async_trait]
impl Provider for WebdavFrontendProvider {
    fn kind(&self) -> &'static str {
        types::FRONTEND_WEBDAV
    }

    fn validate(&self, spec: &ComponentSpec) -> anyhow::Result<()> {
        let config: WebdavFrontendConfig = spec.parse_config()?;
        parse_addr(&config.address, config.port)?;
        Ok(())
    }

    async fn build(
        &self,
        cx: &mut BuildContext<'_>,
        spec: &ComponentSpec,
    ) -> anyhow::Result<Component> {
        let config: WebdavFrontendConfig = spec.parse_config()?;
        let backend = cx.backend(&config.backend)?;
        let addr = parse_addr(&config.address, config.port)?;
        let auth = config.auth_config.as_ref().map(|auth| DavAuthConfig {
            username: auth.username.clone(),
            password: auth.password.clone(),
            allow_basic: auth.methods.contains(&AuthMethod::Basic),
            allow_digest: auth.methods.contains(&AuthMethod::Digest),
        });
        let handle = crate::serve_webdav(backend, addr, auth).await?;
        Ok(Component::Frontend(handle))
    }
}
