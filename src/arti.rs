//! Arti-backed engine.
//!
//! [`ArtiFactory`] bootstraps an [`arti_client::TorClient`] inside a private tokio
//! runtime and serves SOCKS5 on top of it with [`crate::socks`].
//!
//! # Layout
//!
//! ```text
//!   <data_dir>/
//!   ├── state/    ◄── guards, keys, persistent state
//!   └── cache/    ◄── directory documents
//! ```
//!
//! # Resources
//!
//! | Resource | Owner | Released by |
//! |----------|-------|-------------|
//! | tokio runtime (`arti-engine` threads) | [`ArtiEngine`] | `shutdown` (bounded by `shutdown_grace_ms`) |
//! | `TorClient` | [`ArtiEngine`] | `shutdown` |
//! | accept loop task | listener map | `close_listener` / `shutdown` |
//! | SOCKS sessions | `JoinSet` inside the accept loop | aborting the accept loop |
//!
//! Host calls block on the engine's runtime, so they must not be made from
//! inside another tokio runtime.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use arti_client::config::TorClientConfigBuilder;
use arti_client::TorClient;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::task::{JoinHandle, JoinSet};
use tor_rtcompat::PreferredRuntime;

use crate::bridge::{markers, LogEmitter};
use crate::config::{Config, LogLevel};
use crate::engine::{Engine, EngineError, EngineFactory, EngineResult, ListenerHandle};
use crate::socks::{self, TargetAddr};

/// Engine settings taken from [`Config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ArtiSettings {
    /// Address SOCKS listeners bind to.
    pub listen_ip: IpAddr,
    /// Worker threads for the engine runtime; tokio's default when `None`.
    pub worker_threads: Option<usize>,
    /// Upper bound on runtime shutdown.
    pub shutdown_grace: Duration,
}

impl From<&Config> for ArtiSettings {
    fn from(config: &Config) -> Self {
        Self {
            listen_ip: config.listen_ip(),
            worker_threads: config.runtime_worker_threads,
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }
}

/// Factory for [`ArtiEngine`]s.
#[derive(Debug, Clone)]
pub struct ArtiFactory {
    settings: ArtiSettings,
}

impl ArtiFactory {
    /// Creates a factory using the engine settings in `config`.
    pub fn new(config: &Config) -> Self {
        Self {
            settings: ArtiSettings::from(config),
        }
    }

    /// The settings engines are created with.
    pub fn settings(&self) -> &ArtiSettings {
        &self.settings
    }

    fn build_runtime(&self) -> std::io::Result<Runtime> {
        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all().thread_name("arti-engine");
        if let Some(threads) = self.settings.worker_threads {
            builder.worker_threads(threads);
        }
        builder.build()
    }
}

impl Default for ArtiFactory {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl EngineFactory for ArtiFactory {
    fn name(&self) -> &'static str {
        "arti"
    }

    fn configure(&self, data_dir: &Path, logs: LogEmitter) -> EngineResult<Box<dyn Engine>> {
        let state_dir = data_dir.join("state");
        let cache_dir = data_dir.join("cache");
        for dir in [&state_dir, &cache_dir] {
            std::fs::create_dir_all(dir).map_err(|e| {
                EngineError::Config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }

        let config = TorClientConfigBuilder::from_directories(&state_dir, &cache_dir)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let runtime = self
            .build_runtime()
            .map_err(|e| EngineError::Runtime(format!("cannot start engine runtime: {}", e)))?;

        logs.info("Creating Arti client...");
        logs.emit(LogLevel::Debug, format!("State dir: {}", state_dir.display()));
        logs.emit(LogLevel::Debug, format!("Cache dir: {}", cache_dir.display()));

        let client = runtime
            .block_on(TorClient::create_bootstrapped(config))
            .map_err(|e| EngineError::Config(format!("bootstrap failed: {}", e)))?;
        logs.info("Arti client bootstrapped");

        Ok(Box::new(ArtiEngine::new(
            runtime,
            client,
            logs,
            self.settings.clone(),
        )))
    }
}

/// A bootstrapped Arti client and its SOCKS listeners.
pub struct ArtiEngine {
    runtime: Runtime,
    client: Arc<TorClient<PreferredRuntime>>,
    logs: LogEmitter,
    settings: ArtiSettings,
    listeners: HashMap<u64, JoinHandle<()>>,
    next_listener: u64,
}

impl ArtiEngine {
    fn new(
        runtime: Runtime,
        client: TorClient<PreferredRuntime>,
        logs: LogEmitter,
        settings: ArtiSettings,
    ) -> Self {
        Self {
            runtime,
            client: Arc::new(client),
            logs,
            settings,
            listeners: HashMap::new(),
            next_listener: 0,
        }
    }
}

impl Engine for ArtiEngine {
    fn bind_socks_listener(&mut self, port: u16) -> EngineResult<ListenerHandle> {
        let addr = SocketAddr::new(self.settings.listen_ip, port);
        let listener = self
            .runtime
            .block_on(TcpListener::bind(addr))
            .map_err(|source| EngineError::Bind { port, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| EngineError::Bind { port, source })?;

        let id = self.next_listener;
        self.next_listener += 1;
        let task = self.runtime.spawn(accept_loop(
            listener,
            self.client.clone(),
            self.logs.clone(),
        ));
        self.listeners.insert(id, task);

        self.logs.info(format!("SOCKS proxy listening on {}", local));
        self.logs.info(markers::SOCKS_FUNCTIONAL);
        self.logs.info(markers::GUARD_USABLE);
        Ok(ListenerHandle { id, addr: local })
    }

    fn close_listener(&mut self, listener: ListenerHandle) -> EngineResult<()> {
        let task = self
            .listeners
            .remove(&listener.id)
            .ok_or(EngineError::UnknownListener(listener.id))?;
        task.abort();
        match self.runtime.block_on(task) {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                return Err(EngineError::Runtime(format!(
                    "listener task on {} failed: {}",
                    listener.addr, e
                )))
            }
        }
        self.logs.info(format!("SOCKS proxy on {} closed", listener.addr));
        Ok(())
    }

    fn shutdown(self: Box<Self>) -> EngineResult<()> {
        let ArtiEngine {
            runtime,
            client,
            logs,
            settings,
            listeners,
            ..
        } = *self;

        for task in listeners.into_values() {
            task.abort();
        }
        drop(client);
        runtime.shutdown_timeout(settings.shutdown_grace);
        logs.info("Arti client shut down");
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    client: Arc<TorClient<PreferredRuntime>>,
    logs: LogEmitter,
) {
    let mut sessions = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    logs.emit(LogLevel::Debug, format!("SOCKS connection from {}", peer));
                    sessions.spawn(session(stream, client.clone(), logs.clone()));
                }
                Err(e) => {
                    logs.error(format!("Failed to accept SOCKS connection: {}", e));
                    break;
                }
            },
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
}

async fn session(
    stream: tokio::net::TcpStream,
    client: Arc<TorClient<PreferredRuntime>>,
    logs: LogEmitter,
) {
    let connect_logs = logs.clone();
    let result = socks::serve(stream, move |target: TargetAddr| async move {
        connect_logs.info(format!("SOCKS5 CONNECT to {}", target));
        let host = target.host();
        client
            .connect((host.as_str(), target.port()))
            .await
            .map(Box::pin)
    })
    .await;

    match result {
        Ok((sent, received)) => logs.emit(
            LogLevel::Debug,
            format!("SOCKS session closed ({} bytes out, {} bytes in)", sent, received),
        ),
        Err(e) => logs.error(format!("SOCKS session error: {}", e)),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{LogBridge, LogRecord};
    use std::io::{Read, Write};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// An engine around an unbootstrapped client. Binding and closing
    /// listeners never touches the network.
    fn offline_engine(bridge: &LogBridge) -> (ArtiEngine, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let factory = ArtiFactory::new(&Config {
            runtime_worker_threads: Some(2),
            ..Default::default()
        });
        let runtime = factory.build_runtime().unwrap();

        let mut builder = TorClientConfigBuilder::from_directories(
            dir.path().join("state"),
            dir.path().join("cache"),
        );
        builder.storage().permissions().dangerously_trust_everyone();
        let config = builder.build().unwrap();

        let client = {
            let _entered = runtime.enter();
            TorClient::builder()
                .config(config)
                .create_unbootstrapped()
                .unwrap()
        };
        let engine = ArtiEngine::new(
            runtime,
            client,
            bridge.emitter("arti"),
            factory.settings().clone(),
        );
        (engine, dir)
    }

    #[test]
    fn test_settings_from_config() {
        let config = Config {
            listen_address: "::1".to_string(),
            runtime_worker_threads: Some(2),
            shutdown_grace_ms: 250,
            ..Default::default()
        };
        let settings = ArtiSettings::from(&config);
        assert_eq!(settings.listen_ip, "::1".parse::<IpAddr>().unwrap());
        assert_eq!(settings.worker_threads, Some(2));
        assert_eq!(settings.shutdown_grace, Duration::from_millis(250));
    }

    #[test]
    fn test_default_factory_binds_loopback() {
        let factory = ArtiFactory::default();
        assert!(factory.settings().listen_ip.is_loopback());
        assert_eq!(factory.name(), "arti");
    }

    #[test]
    fn test_runtime_respects_worker_threads() {
        let factory = ArtiFactory::new(&Config {
            runtime_worker_threads: Some(1),
            ..Default::default()
        });
        let runtime = factory.build_runtime().unwrap();
        let name = runtime.block_on(async {
            tokio::task::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        assert_eq!(name.as_deref(), Some("arti-engine"));
    }

    #[test]
    fn test_bind_accepts_socks_clients() {
        let bridge = LogBridge::new(64);
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = lines.clone();
        bridge.set_sink(Some(Arc::new(move |record: &LogRecord| {
            sink_lines.lock().unwrap().push(record.message.clone());
        })));
        let (mut engine, _dir) = offline_engine(&bridge);

        let handle = engine.bind_socks_listener(0).unwrap();
        assert!(handle.addr.ip().is_loopback());
        assert_ne!(handle.port(), 0);

        // Method negotiation is answered locally.
        let mut client = std::net::TcpStream::connect(handle.addr).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        client.write_all(&[0x05, 0x01, 0x00]).unwrap();
        let mut reply = [0u8; 2];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, [0x05, 0x00]);

        assert!(bridge.flush(Duration::from_secs(5)));
        let lines = lines.lock().unwrap().clone();
        assert!(lines.iter().any(|l| l == markers::SOCKS_FUNCTIONAL));
        assert!(lines.iter().any(|l| l == markers::GUARD_USABLE));

        drop(client);
        Box::new(engine).shutdown().unwrap();
    }

    #[test]
    fn test_close_listener_releases_port() {
        let bridge = LogBridge::new(64);
        let (mut engine, _dir) = offline_engine(&bridge);

        let handle = engine.bind_socks_listener(0).unwrap();
        let addr = handle.addr;
        engine.close_listener(handle).unwrap();

        std::net::TcpListener::bind(addr).unwrap();
        assert!(matches!(
            engine.close_listener(handle),
            Err(EngineError::UnknownListener(_))
        ));
        Box::new(engine).shutdown().unwrap();
    }

    #[test]
    fn test_occupied_port_is_a_bind_error() {
        let bridge = LogBridge::new(64);
        let (mut engine, _dir) = offline_engine(&bridge);
        let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = holder.local_addr().unwrap().port();

        match engine.bind_socks_listener(port) {
            Err(EngineError::Bind { port: p, .. }) => assert_eq!(p, port),
            other => panic!("expected bind error, got {:?}", other.map(|h| h.addr)),
        }
        Box::new(engine).shutdown().unwrap();
    }

    #[test]
    fn test_shutdown_releases_open_listeners() {
        let bridge = LogBridge::new(64);
        let (mut engine, _dir) = offline_engine(&bridge);
        let addr = engine.bind_socks_listener(0).unwrap().addr;

        Box::new(engine).shutdown().unwrap();
        std::net::TcpListener::bind(addr).unwrap();
    }
}
