//! Startup sequence of the launcher
//!
//! Order matters: stale state is cleared before anything is written, the
//! HTTP server comes up before discovery so requests are answered (404)
//! while the tunnel is still starting, and the subscription is published
//! only once a hostname is known.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use tunnelsub_api::{ApiServer, ApiServerConfig};
use tunnelsub_links::{
    node_lines, write_atomic, CloudflareMeta, IspLookup, LinkGenerator, StaticIsp,
    SubscriptionDocument, SubscriptionStore,
};
use tunnelsub_notify::{Registration, RegistryClient, TelegramNotifier};
use tunnelsub_proto::Arch;
use tunnelsub_tunnel::{
    remove_files, write_named_tunnel_files, ArtifactFetcher, BinarySpec, DomainDiscovery,
    IngressFile, ManagedProcess, ProcessLauncher, ProxyConfig, TunnelContext, TunnelLauncher,
    TunnelMode,
};

use crate::config::Settings;

/// Processes that must stay alive for the subscription to be usable
struct RunningTunnel {
    _proxy: ManagedProcess,
    _tunnel: ProcessLauncher,
}

pub struct Runner {
    settings: Settings,
    client: reqwest::Client,
    store: SubscriptionStore,
}

impl Runner {
    pub fn new(settings: Settings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tunnelsub/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        let store = SubscriptionStore::new(settings.layout.subscription());

        Ok(Self {
            settings,
            client,
            store,
        })
    }

    /// Run until the HTTP server stops
    pub async fn run(self) -> Result<()> {
        self.deregister_previous_nodes().await;
        self.clear_stale_files().await?;

        let server = ApiServer::new(
            ApiServerConfig {
                bind_addr: SocketAddr::from(([0, 0, 0, 0], self.settings.http_port)),
                subscription_path: self.settings.subscription_path.clone(),
            },
            self.store.clone(),
        );
        let server_task = tokio::spawn(server.start());

        // Held until the server stops; dropping it kills the children
        let _running = match self.start_tunnel().await {
            Ok(running) => Some(running),
            Err(e) => {
                error!("Subscription not published: {:#}", e);
                None
            }
        };

        if let Some(period) = self.settings.keep_alive {
            if let Some(app_url) = self.settings.app_url.clone() {
                tokio::spawn(keep_alive(self.client.clone(), app_url, period));
            }
        }

        server_task.await.context("HTTP server task failed")?
    }

    /// Tell the registry to forget the nodes of the previous run
    async fn deregister_previous_nodes(&self) {
        let Some(webhook_url) = &self.settings.webhook_url else {
            return;
        };

        let nodes = match self.store.load().await {
            Ok(Some(document)) => match document.nodes() {
                Ok(nodes) => nodes,
                Err(e) => {
                    warn!("Previous subscription is unreadable: {}", e);
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to read previous subscription: {}", e);
                return;
            }
        };
        if nodes.is_empty() {
            return;
        }

        let registry = RegistryClient::new(self.client.clone(), webhook_url);
        if let Err(e) = registry.delete_nodes(&nodes).await {
            warn!("Failed to deregister previous nodes: {}", e);
        }
    }

    async fn clear_stale_files(&self) -> Result<()> {
        let layout = &self.settings.layout;
        let mut stale = layout.stale_artifacts();
        stale.extend(self.binary_specs().into_iter().filter_map(|spec| {
            if spec.is_downloaded() {
                Some(spec.path)
            } else {
                None
            }
        }));
        remove_files(&stale).await;

        layout
            .ensure_data_dir()
            .await
            .with_context(|| format!("Failed to create data directory {:?}", layout.data_dir()))
    }

    fn binary_specs(&self) -> [BinarySpec; 2] {
        [
            BinarySpec::new("proxy", &self.settings.proxy_binary)
                .with_url(self.settings.proxy_binary_url.clone()),
            BinarySpec::new("tunnel", &self.settings.tunnel_binary)
                .with_url(self.settings.tunnel_binary_url.clone()),
        ]
    }

    fn tunnel_context(&self) -> TunnelContext {
        TunnelContext {
            log_path: self.settings.layout.tunnel_log(),
            ingress_path: self.settings.layout.tunnel_ingress(),
            proxy_port: self.settings.proxy_port,
        }
    }

    /// Start the proxy and tunnel, then publish the subscription
    async fn start_tunnel(&self) -> Result<RunningTunnel> {
        let settings = &self.settings;
        let layout = &settings.layout;

        let fetcher = ArtifactFetcher::new(self.client.clone(), Arch::detect());
        let specs = self.binary_specs();
        for spec in &specs {
            fetcher
                .ensure(spec)
                .await
                .with_context(|| format!("Failed to prepare {} binary", spec.name))?;
        }

        let config_path = layout.proxy_config();
        ProxyConfig::new(&settings.identity.user_id, settings.proxy_port)
            .write(&config_path)
            .await?;
        let proxy = ManagedProcess::spawn(
            "proxy",
            &settings.proxy_binary,
            &["-c".to_string(), config_path.display().to_string()],
        )?;

        let mode = TunnelMode::select(
            settings.server_secret.as_deref(),
            settings.server_domain.as_deref(),
        );
        let context = self.tunnel_context();

        if let TunnelMode::Named {
            credentials,
            raw,
            hostname,
        } = &mode
        {
            let credentials_path = layout.tunnel_credentials();
            let ingress =
                IngressFile::new(credentials, &credentials_path, hostname, settings.proxy_port);
            write_named_tunnel_files(raw, &ingress, &credentials_path, &context.ingress_path)
                .await?;
        }

        let mut tunnel = ProcessLauncher::new(&settings.tunnel_binary);
        if !mode.is_quick() {
            tunnel.launch(&mode.args(&context)).await?;
        }

        let discovery = DomainDiscovery::new(settings.discovery.clone(), mode, context);
        let session = discovery.run(&mut tunnel).await?;
        let hostname = session
            .discovered_hostname
            .context("Discovery finished without a hostname")?;

        self.publish(&hostname).await?;
        self.schedule_cleanup(&specs);

        Ok(RunningTunnel {
            _proxy: proxy,
            _tunnel: tunnel,
        })
    }

    async fn publish(&self, hostname: &str) -> Result<()> {
        let settings = &self.settings;

        let lookup: Box<dyn IspLookup> = match &settings.isp_label {
            Some(label) => Box::new(StaticIsp::new(label)),
            None => Box::new(CloudflareMeta::new(self.client.clone())),
        };
        let generator = LinkGenerator::new(settings.identity.clone(), settings.link_options.clone());
        let links = generator.generate(hostname, lookup.as_ref()).await?;

        let text = links.joined();
        write_atomic(&settings.layout.links(), text.as_bytes()).await?;

        let document = SubscriptionDocument::from_links(&links)?;
        self.store.write(&document).await?;
        info!(
            "Subscription published at /{} ({} links)",
            settings.subscription_path,
            links.len()
        );
        info!("{}", document.as_str());

        self.notify(&document, node_lines(&text)).await;
        Ok(())
    }

    async fn notify(&self, document: &SubscriptionDocument, nodes: Vec<String>) {
        let settings = &self.settings;

        if let Some(telegram) = &settings.telegram {
            let notifier =
                TelegramNotifier::new(self.client.clone(), &telegram.bot_token, &telegram.chat_id);
            if let Err(e) = notifier
                .notify(&settings.identity.display_name, document.as_str())
                .await
            {
                warn!("Telegram notification failed: {}", e);
            }
        }

        if let Some(webhook_url) = &settings.webhook_url {
            let registration = Registration::plan(
                settings.app_url.as_deref(),
                &settings.subscription_path,
                nodes,
            );
            let registry = RegistryClient::new(self.client.clone(), webhook_url);
            if let Err(e) = registry.register(&registration).await {
                warn!("Registry update failed: {}", e);
            }
        }
    }

    fn schedule_cleanup(&self, specs: &[BinarySpec]) {
        let Some(delay) = self.settings.cleanup_delay else {
            return;
        };

        let mut paths: Vec<PathBuf> = self.settings.layout.published_artifacts();
        paths.extend(
            specs
                .iter()
                .filter(|spec| spec.is_downloaded())
                .map(|spec| spec.path.clone()),
        );

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            remove_files(&paths).await;
            info!("Temporary files removed");
        });
    }
}

/// Request `app_url` every `period`
async fn keep_alive(client: reqwest::Client, app_url: String, period: Duration) {
    info!("Keep-alive enabled for {} every {:?}", app_url, period);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        ticker.tick().await;
        match client.get(&app_url).send().await {
            Ok(response) => debug!("Keep-alive {}: {}", app_url, response.status()),
            Err(e) => warn!("Keep-alive request to {} failed: {}", app_url, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLayer;
    use axum::{
        body::Body,
        extract::{Path as UrlPath, State},
        http::{Request, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use tunnelsub_links::SubscriptionDocument;
    use tunnelsub_tunnel::DiscoveryError;

    type Captured = Arc<Mutex<Vec<(String, Value)>>>;

    async fn capture(
        State(captured): State<Captured>,
        UrlPath(path): UrlPath<String>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        captured.lock().unwrap().push((path, body));
        StatusCode::OK
    }

    /// Registry stand-in recording every POST as (path, JSON body)
    async fn start_registry() -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route("/{*path}", post(capture))
            .with_state(captured.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{}", addr), captured)
    }

    fn test_settings(data_dir: &Path, webhook_url: Option<String>) -> Settings {
        let overrides = ConfigLayer {
            data_path: Some(data_dir.to_path_buf()),
            isp_label: Some("Test-ISP".to_string()),
            max_attempts: Some(1),
            cleanup_delay: Some(0),
            webhook_url,
            ..Default::default()
        };
        let mut settings = Settings::resolve(overrides, ConfigLayer::default()).unwrap();
        settings.discovery.settle = Duration::from_millis(10);
        settings.discovery.poll_interval = Duration::from_millis(10);
        settings.discovery.attempt_timeout = Duration::from_millis(100);
        settings
    }

    async fn subscription_status(runner: &Runner) -> StatusCode {
        let server = ApiServer::new(
            ApiServerConfig {
                bind_addr: "127.0.0.1:0".parse().unwrap(),
                subscription_path: runner.settings.subscription_path.clone(),
            },
            runner.store.clone(),
        );
        let request = Request::builder()
            .uri(format!("/{}", runner.settings.subscription_path))
            .body(Body::empty())
            .unwrap();
        server.build_router().oneshot(request).await.unwrap().status()
    }

    #[tokio::test]
    async fn test_failed_start_does_not_serve_previous_subscription() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(test_settings(temp.path(), None)).unwrap();
        runner.settings.layout.ensure_data_dir().await.unwrap();
        runner
            .store
            .write(&SubscriptionDocument::from_encoded("b2xkLXJ1bi1saW5rcw=="))
            .await
            .unwrap();

        runner.clear_stale_files().await.unwrap();
        // No binaries and no download URLs
        assert!(runner.start_tunnel().await.is_err());

        assert!(runner.store.read().await.unwrap().is_none());
        assert_eq!(subscription_status(&runner).await, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exhausted_discovery_leaves_subscription_unpublished() {
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(test_settings(temp.path(), None)).unwrap();
        runner.clear_stale_files().await.unwrap();

        // Binaries that start and exit without ever printing a hostname
        let layout = &runner.settings.layout;
        for binary in [layout.proxy_binary(), layout.tunnel_binary()] {
            std::fs::write(&binary, "#!/bin/sh\nexit 0\n").unwrap();
        }

        let err = match runner.start_tunnel().await {
            Ok(_) => panic!("quick tunnel without a hostname must not publish"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<DiscoveryError>(),
            Some(DiscoveryError::Exhausted { attempts: 1 })
        ));

        assert!(runner.store.read().await.unwrap().is_none());
        assert!(!layout.tunnel_log().exists());
        assert_eq!(subscription_status(&runner).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_publish_writes_list_and_subscription() {
        let (registry_url, captured) = start_registry().await;
        let temp = TempDir::new().unwrap();
        let runner = Runner::new(test_settings(temp.path(), Some(registry_url))).unwrap();
        runner.clear_stale_files().await.unwrap();

        runner.publish("abc-def.trycloudflare.com").await.unwrap();

        let layout = &runner.settings.layout;
        let list = std::fs::read_to_string(layout.links()).unwrap();
        let document = runner.store.load().await.unwrap().unwrap();
        assert_eq!(document.decode().unwrap(), list);

        let nodes = node_lines(&list);
        assert_eq!(nodes.len(), 3);
        assert!(nodes[0].starts_with("vless://"));
        assert!(nodes[0].contains("sni=abc-def.trycloudflare.com"));
        assert!(nodes[2].starts_with("trojan://"));

        let leftovers: Vec<_> = std::fs::read_dir(layout.data_dir())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "temp files left: {:?}", leftovers);

        assert_eq!(subscription_status(&runner).await, StatusCode::OK);

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].0, "api/add-nodes");
        assert_eq!(captured[0].1, json!({ "nodes": nodes }));
    }

    #[tokio::test]
    async fn test_restart_deregisters_then_clears_previous_nodes() {
        let (registry_url, captured) = start_registry().await;
        let temp = TempDir::new().unwrap();

        let first = Runner::new(test_settings(temp.path(), Some(registry_url.clone()))).unwrap();
        first.clear_stale_files().await.unwrap();
        first.publish("old-run.trycloudflare.com").await.unwrap();
        let published = node_lines(&std::fs::read_to_string(first.settings.layout.links()).unwrap());

        let second = Runner::new(test_settings(temp.path(), Some(registry_url))).unwrap();
        second.deregister_previous_nodes().await;
        second.clear_stale_files().await.unwrap();

        assert!(second.store.read().await.unwrap().is_none());
        assert!(!second.settings.layout.links().exists());

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 2);
        assert_eq!(captured[1].0, "api/delete-nodes");
        assert_eq!(captured[1].1, json!({ "nodes": published }));
    }
}
