//! Topology manager - owns the directories, resolves the hub hierarchy,
//! keeps latencies fresh and decides where to jump next.
//!
//! Everything it depends on is handed in at construction: the list
//! source, the prober, the settings store and the runtime the probe
//! slots run on.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::config::Config;
use crate::error::SdkError;
use crate::events::{EventBus, TopologyEvent};
use crate::jump::{self, pick_jump_target};
use crate::probe::{PingProber, ProbeScheduler, Prober};
use crate::servers::cache::{load_cached, save_cached};
use crate::servers::{
    ApiServer, ApiServerSource, Credentials, Directories, Encryption, Latency, PortSpec, Scope,
    ServerRecord, ServerSource,
};
use crate::settings::{JsonFileStore, MemoryStore, Settings, SettingsStore};
use crate::topology::{resolve, ClearedNameIndex, Level0Entry, Topology, TopologyCache};

/// Whoever actually (re)establishes the tunnel.
pub trait ConnectionControl: Send + Sync {
    fn connect(&self, scope: Scope, server: &ServerRecord) -> Result<(), SdkError>;
}

pub struct TopologyManager {
    config: Config,
    source: Arc<dyn ServerSource>,
    store: Arc<dyn SettingsStore>,
    settings: RwLock<Settings>,
    directories: Arc<Directories>,
    index: RwLock<ClearedNameIndex>,
    topology: TopologyCache,
    scheduler: ProbeScheduler,
    events: Arc<EventBus>,
    connection: RwLock<Option<Arc<dyn ConnectionControl>>>,
    rng: Mutex<StdRng>,
}

impl TopologyManager {
    pub fn new(
        config: Config,
        source: Arc<dyn ServerSource>,
        prober: Arc<dyn Prober>,
        store: Arc<dyn SettingsStore>,
        runtime: Handle,
    ) -> Self {
        let settings = match store.load() {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to load settings: {}. Starting with defaults.", e);
                Settings::default()
            }
        };
        log::info!(
            "Topology manager starting: encryption {}, {} scope",
            settings.encryption,
            Scope::from_show_nodes(settings.show_nodes)
        );

        let directories = Arc::new(Directories::new());
        let events = Arc::new(EventBus::new());
        let scheduler = ProbeScheduler::new(
            config.probe_workers,
            config.probe_timeout(),
            prober,
            Arc::clone(&directories),
            Arc::clone(&events),
            runtime,
        );

        Self {
            config,
            source,
            store,
            settings: RwLock::new(settings),
            directories,
            index: RwLock::new(ClearedNameIndex::default()),
            topology: TopologyCache::new(),
            scheduler,
            events,
            connection: RwLock::new(None),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// HTTP source, system `ping`, settings at `config.settings_path`.
    pub fn from_config(config: Config, runtime: Handle) -> Result<Self, SdkError> {
        config.validate()?;
        let source: Arc<dyn ServerSource> = Arc::new(ApiServerSource::new(&config)?);
        let prober: Arc<dyn Prober> = Arc::new(PingProber::new(config.ping_command.clone()));
        let store: Arc<dyn SettingsStore> = match &config.settings_path {
            Some(path) => Arc::new(JsonFileStore::new(path.clone())),
            None => {
                log::warn!("No settings path, settings will not persist");
                Arc::new(MemoryStore::default())
            }
        };
        Ok(Self::new(config, source, prober, store, runtime))
    }

    pub fn set_connection_control(&self, connection: Option<Arc<dyn ConnectionControl>>) {
        *self.connection.write() = connection;
    }

    pub fn subscribe(&self) -> UnboundedReceiver<TopologyEvent> {
        self.events.subscribe()
    }

    pub fn scheduler(&self) -> &ProbeScheduler {
        &self.scheduler
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reseed the jump selector.
    pub fn seed_rng(&self, seed: u64) {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
    }

    // ── Settings ────────────────────────────────────────────────────────────

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn encryption(&self) -> Encryption {
        self.settings.read().encryption
    }

    pub fn scope(&self) -> Scope {
        Scope::from_show_nodes(self.settings.read().show_nodes)
    }

    fn update_settings<F>(&self, change: F) -> Result<(), SdkError>
    where
        F: FnOnce(&mut Settings),
    {
        let snapshot = {
            let mut settings = self.settings.write();
            change(&mut settings);
            settings.clone()
        };
        self.store.save(&snapshot)
    }

    pub fn set_encryption(&self, encryption: Encryption) -> Result<(), SdkError> {
        log::info!("Encryption set to {}", encryption);
        self.update_settings(|s| s.encryption = encryption)?;
        self.topology.invalidate();
        Ok(())
    }

    pub fn set_show_nodes(&self, show_nodes: bool) -> Result<(), SdkError> {
        log::info!("Showing {}s", Scope::from_show_nodes(show_nodes));
        self.update_settings(|s| s.show_nodes = show_nodes)?;
        self.topology.invalidate();
        Ok(())
    }

    /// Turning probing off drops all pending work; turning it back on
    /// probes both directories again.
    pub fn set_ping_enabled(&self, enabled: bool) -> Result<(), SdkError> {
        let was_enabled = self.settings.read().ping_enabled;
        self.update_settings(|s| s.ping_enabled = enabled)?;
        if !enabled {
            self.scheduler.stop();
        } else if !was_enabled {
            self.ping_all(Scope::Nodes);
            self.ping_all(Scope::Hubs);
        }
        Ok(())
    }

    /// Log in (`Some`) or out (`None`). The next refresh fetches the
    /// matching lists.
    pub fn set_credentials(&self, credentials: Option<Credentials>) {
        match &credentials {
            Some(c) => log::info!("Using lists for user {}", c.username),
            None => log::info!("Using public lists"),
        }
        self.source.set_credentials(credentials);
        self.topology.invalidate();
    }

    // ── Loading ─────────────────────────────────────────────────────────────

    /// Replace one directory with `servers`.
    ///
    /// Re-applies favourites, rebuilds the hub name index for hub loads,
    /// drops the cached topology and starts probing the new entries.
    pub fn load(&self, scope: Scope, servers: Vec<ApiServer>) -> usize {
        let records: Vec<ServerRecord> = servers.into_iter().map(ApiServer::into_record).collect();
        let count = records.len();
        let favorites = self.settings.read().favorites.clone();

        let index = {
            let mut dir = self.directories.get(scope).write();
            dir.load(records);
            dir.apply_favorites(&favorites);
            match scope {
                Scope::Hubs => Some(ClearedNameIndex::build(&dir)),
                Scope::Nodes => None,
            }
        };
        if let Some(index) = index {
            log::debug!("Hub name index has {} entries", index.len());
            *self.index.write() = index;
        }
        self.topology.invalidate();

        log::info!("Loaded {} {}s", count, scope);
        self.events.emit(match scope {
            Scope::Nodes => TopologyEvent::NodesLoaded { count },
            Scope::Hubs => TopologyEvent::HubsLoaded { count },
        });
        if self.directories.both_loaded() {
            self.events.emit(TopologyEvent::ServerListsLoaded);
        }

        self.ping_all(scope);
        count
    }

    /// Parse a list body and load it.
    pub fn load_json(&self, scope: Scope, body: &str) -> Result<usize, SdkError> {
        let servers = crate::servers::record::parse_server_list(body)?;
        if servers.is_empty() {
            return Err(SdkError::EmptyList(scope.noun()));
        }
        Ok(self.load(scope, servers))
    }

    /// Fetch and load one list, retrying transient failures.
    ///
    /// While the directory is still empty, the first failure falls back
    /// to the disk cache so there is something to show.
    pub async fn refresh(&self, scope: Scope) -> Result<usize, SdkError> {
        let max_attempts = self.config.fetch_max_attempts;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.source.fetch(scope).await {
                Ok(servers) => {
                    self.save_cache(scope, &servers);
                    return Ok(self.load(scope, servers));
                }
                Err(e) => {
                    log::warn!("Fetching {} list failed (attempt {}): {}", scope, attempt, e);
                    if attempt == 1 {
                        self.load_cache(scope);
                    }
                    if !e.is_transient() || (max_attempts != 0 && attempt >= max_attempts) {
                        return Err(e);
                    }
                    tokio::time::sleep(self.config.fetch_retry_delay()).await;
                }
            }
        }
    }

    /// Nodes first, then hubs.
    pub async fn refresh_all(&self) -> Result<(), SdkError> {
        self.refresh(Scope::Nodes).await?;
        self.refresh(Scope::Hubs).await?;
        Ok(())
    }

    fn save_cache(&self, scope: Scope, servers: &[ApiServer]) {
        if let Some(dir) = &self.config.cache_dir {
            if let Err(e) = save_cached(dir, scope, servers) {
                log::warn!("Failed to cache {} list: {}", scope, e);
            }
        }
    }

    fn load_cache(&self, scope: Scope) -> bool {
        let dir = match &self.config.cache_dir {
            Some(d) => d,
            None => return false,
        };
        if !self.directories.get(scope).read().is_empty() {
            return false;
        }
        match load_cached(dir, scope) {
            Some(cached) if !cached.servers.is_empty() => {
                log::info!("Using cached {} list until a fetch succeeds", scope);
                self.load(scope, cached.servers);
                true
            }
            _ => false,
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────────────

    pub fn topology(&self) -> Arc<Topology> {
        let encryption = self.encryption();
        self.topology.get_or_resolve(encryption, || {
            let nodes = self.directories.nodes.read();
            let hubs = self.directories.hubs.read();
            let index = self.index.read();
            resolve(&nodes, &hubs, &index, encryption)
        })
    }

    pub fn level0(&self) -> Vec<Level0Entry> {
        self.topology().level0.clone()
    }

    pub fn level1(&self, hub: usize) -> Vec<usize> {
        self.topology().level1(hub).to_vec()
    }

    /// Entry `id` of the browsed scope, or of the node list when
    /// `force_node` is set.
    pub fn server(&self, id: usize, force_node: bool) -> Option<ServerRecord> {
        let scope = if force_node {
            Scope::Nodes
        } else {
            self.scope()
        };
        let record = self.directories.get(scope).read().get(id).cloned();
        if record.is_none() {
            log::warn!("{} {} requested but out of bounds", scope, id);
        }
        record
    }

    pub fn hub(&self, id: usize) -> Option<ServerRecord> {
        let record = self.directories.hubs.read().get(id).cloned();
        if record.is_none() {
            log::warn!("Hub {} requested but out of bounds", id);
        }
        record
    }

    pub fn find_node_by_name(&self, name: &str) -> Option<usize> {
        self.directories.nodes.read().find_id_by_name(name)
    }

    pub fn hub_for_node(&self, node: usize) -> Option<usize> {
        let nodes = self.directories.nodes.read();
        self.index.read().hub_for_node(&nodes, node)
    }

    pub fn latency_of_node(&self, node: usize) -> Option<Latency> {
        self.directories.nodes.read().latency(node)
    }

    pub fn count(&self, scope: Scope) -> usize {
        self.directories.get(scope).read().len()
    }

    /// Node ids usable with the current encryption.
    pub fn current_encryption_servers(&self) -> Vec<usize> {
        self.directories.nodes.read().ids_supporting(self.encryption())
    }

    /// Hub ids usable with the current encryption.
    pub fn current_encryption_hubs(&self) -> Vec<usize> {
        self.directories.hubs.read().ids_supporting(self.encryption())
    }

    /// Ports the node list offers for the current encryption.
    pub fn ports_for_encryption(&self) -> Vec<PortSpec> {
        self.directories.nodes.read().ports_for_encryption(self.encryption())
    }

    // ── Probing ─────────────────────────────────────────────────────────────

    /// (Re)start probing `scope`. Returns false when probing is disabled.
    pub fn ping_all(&self, scope: Scope) -> bool {
        if !self.settings.read().probing_allowed() {
            log::debug!("Probing disabled, not pinging {}s", scope);
            return false;
        }
        self.scheduler.ping_all(scope);
        true
    }

    /// Abort probing, e.g. before the runtime goes away.
    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    // ── Jumping ─────────────────────────────────────────────────────────────

    /// Next target in the browsed scope, avoiding the selected one.
    pub fn server_to_jump(&self) -> Option<usize> {
        let (encryption, scope, previous) = {
            let s = self.settings.read();
            (s.encryption, Scope::from_show_nodes(s.show_nodes), s.server_id)
        };
        let top_k = match scope {
            Scope::Nodes => self.config.node_top_k,
            Scope::Hubs => self.config.hub_top_k,
        };
        let dir = self.directories.get(scope).read();
        let mut rng = self.rng.lock();
        pick_jump_target(&dir, encryption, previous, top_k, &mut *rng)
    }

    /// Select a new target, ask the connection layer to switch and, once it
    /// has accepted, remember the target. `Ok(None)` when there is nothing
    /// to jump to. A rejected switch leaves the selection unchanged.
    pub fn jump(&self) -> Result<Option<usize>, SdkError> {
        let scope = self.scope();
        let id = match self.server_to_jump() {
            Some(id) => id,
            None => {
                log::warn!("Jump requested but no {}s are loaded", scope);
                return Ok(None);
            }
        };

        log::info!("Jumping to {} {}", scope, id);
        let connection = self.connection.read().clone();
        if let Some(connection) = connection {
            let record = self.directories.get(scope).read().get(id).cloned();
            if let Some(record) = record {
                connection.connect(scope, &record)?;
            }
        }

        self.update_settings(|s| s.server_id = Some(id))?;
        self.events.emit(TopologyEvent::JumpRequested { scope, id });
        Ok(Some(id))
    }

    // ── Favourites ──────────────────────────────────────────────────────────

    pub fn set_favorite(&self, scope: Scope, id: usize, favorite: bool) -> Result<(), SdkError> {
        let address = self
            .directories
            .get(scope)
            .write()
            .set_favorite(id, favorite)
            .ok_or_else(|| SdkError::InvalidParam(format!("No {} with id {}", scope, id)))?;

        self.update_settings(|s| {
            if favorite {
                s.favorites.insert(address.clone());
            } else {
                s.favorites.remove(&address);
            }
        })?;

        // The same address may be listed as both a node and a hub.
        let favorites: HashSet<String> = self.settings.read().favorites.clone();
        self.directories.nodes.write().apply_favorites(&favorites);
        self.directories.hubs.write().apply_favorites(&favorites);
        Ok(())
    }

    pub fn favorites(&self, scope: Scope) -> Vec<usize> {
        self.directories.get(scope).read().favorites()
    }

    pub fn favorites_count(&self) -> usize {
        self.favorites(self.scope()).len()
    }

    fn favorite_flags(&self, scope: Scope) -> Vec<bool> {
        self.directories
            .get(scope)
            .read()
            .records()
            .iter()
            .map(|r| r.favorite)
            .collect()
    }

    /// Move the favourite cursor forward. Hub browsing wraps around.
    pub fn next_favorite(&self) -> Result<Option<usize>, SdkError> {
        let (scope, cursor) = {
            let s = self.settings.read();
            (Scope::from_show_nodes(s.show_nodes), s.favorite)
        };
        let flags = self.favorite_flags(scope);
        let next = jump::next_favorite(&flags, cursor, scope == Scope::Hubs);
        if let Some(id) = next {
            self.update_settings(|s| s.favorite = Some(id))?;
        }
        Ok(next)
    }

    pub fn previous_favorite(&self) -> Result<Option<usize>, SdkError> {
        let (scope, cursor) = {
            let s = self.settings.read();
            (Scope::from_show_nodes(s.show_nodes), s.favorite)
        };
        let flags = self.favorite_flags(scope);
        let previous = jump::previous_favorite(&flags, cursor);
        if let Some(id) = previous {
            self.update_settings(|s| s.favorite = Some(id))?;
        }
        Ok(previous)
    }

    pub fn has_next_favorite(&self) -> bool {
        let cursor = self.settings.read().favorite;
        jump::has_next_favorite(&self.favorites(self.scope()), cursor)
    }

    pub fn has_previous_favorite(&self) -> bool {
        let cursor = self.settings.read().favorite;
        jump::has_previous_favorite(&self.favorites(self.scope()), cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::servers::record::ApiPorts;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use Encryption::{Ecc, Rsa};

    fn api(name: &str, encryptions: &[Encryption]) -> ApiServer {
        let udp: BTreeMap<String, Vec<u16>> = encryptions
            .iter()
            .map(|e| (e.api_key().to_string(), vec![1194]))
            .collect();
        ApiServer {
            name: name.to_string(),
            hostname: format!("{}.example.net", name.to_lowercase().replace(' ', "-")),
            ip: "10.0.0.1".to_string(),
            iso_code: "cl".to_string(),
            server_load: 12,
            ports: ApiPorts {
                tcp: BTreeMap::new(),
                udp,
            },
        }
    }

    fn node_list() -> Vec<ApiServer> {
        vec![
            api("Germany 1", &[Ecc]),
            api("Chile Hub", &[Rsa, Ecc]),
            api("Chile 2", &[Rsa]),
            api("France 1", &[Rsa, Ecc]),
            api("Chile 1", &[Rsa, Ecc]),
        ]
    }

    fn hub_list() -> Vec<ApiServer> {
        vec![api("Germany Hub", &[Ecc]), api("Chile Hub", &[Rsa, Ecc])]
    }

    #[derive(Default)]
    struct ScriptedSource {
        replies: Mutex<HashMap<Scope, VecDeque<Result<Vec<ApiServer>, SdkError>>>>,
        calls: AtomicUsize,
        credentials: Mutex<Option<Credentials>>,
    }

    impl ScriptedSource {
        fn push(&self, scope: Scope, reply: Result<Vec<ApiServer>, SdkError>) {
            self.replies.lock().entry(scope).or_default().push_back(reply);
        }
    }

    #[async_trait]
    impl ServerSource for ScriptedSource {
        async fn fetch(&self, scope: Scope) -> Result<Vec<ApiServer>, SdkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .get_mut(&scope)
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| Err(SdkError::Network("no scripted reply".into())))
        }

        fn set_credentials(&self, credentials: Option<Credentials>) {
            *self.credentials.lock() = credentials;
        }
    }

    /// Latency derived from the address length, so results are stable.
    struct LengthProber;

    #[async_trait]
    impl Prober for LengthProber {
        async fn probe(&self, address: &str, _timeout: Duration) -> Latency {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Latency::Measured(address.len() as u32)
        }
    }

    #[derive(Default)]
    struct RecordingConnection {
        requests: Mutex<Vec<(Scope, String)>>,
    }

    impl ConnectionControl for RecordingConnection {
        fn connect(&self, scope: Scope, server: &ServerRecord) -> Result<(), SdkError> {
            self.requests.lock().push((scope, server.name.clone()));
            Ok(())
        }
    }

    struct RejectingConnection;

    impl ConnectionControl for RejectingConnection {
        fn connect(&self, _scope: Scope, server: &ServerRecord) -> Result<(), SdkError> {
            Err(SdkError::Internal(format!("refused {}", server.name)))
        }
    }

    fn quiet_settings() -> Settings {
        Settings {
            ping_enabled: false,
            ..Settings::default()
        }
    }

    fn manager_with(settings: Settings) -> (TopologyManager, Arc<ScriptedSource>, Arc<MemoryStore>) {
        let config = Config {
            cache_dir: None,
            fetch_retry_delay_ms: 10,
            ..Config::default()
        };
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new(settings));
        let manager = TopologyManager::new(
            config,
            source.clone(),
            Arc::new(LengthProber),
            store.clone(),
            Handle::current(),
        );
        manager.seed_rng(7);
        (manager, source, store)
    }

    fn loaded(settings: Settings) -> (TopologyManager, Arc<ScriptedSource>, Arc<MemoryStore>) {
        let (manager, source, store) = manager_with(settings);
        manager.load(Scope::Nodes, node_list());
        manager.load(Scope::Hubs, hub_list());
        (manager, source, store)
    }

    #[tokio::test]
    async fn load_emits_events_in_order() {
        let (manager, _, _) = manager_with(quiet_settings());
        let mut rx = manager.subscribe();

        manager.load(Scope::Nodes, node_list());
        manager.load(Scope::Hubs, hub_list());

        assert_eq!(rx.try_recv().unwrap(), TopologyEvent::NodesLoaded { count: 5 });
        assert_eq!(rx.try_recv().unwrap(), TopologyEvent::HubsLoaded { count: 2 });
        assert_eq!(rx.try_recv().unwrap(), TopologyEvent::ServerListsLoaded);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hierarchy_follows_encryption() {
        // nodes: Chile 1(0) Chile 2(1) Chile Hub(2) France 1(3) Germany 1(4)
        // hubs:  Chile Hub(0) Germany Hub(1)
        let (manager, _, _) = loaded(quiet_settings());
        assert_eq!(
            manager.level0(),
            vec![Level0Entry::hub(0), Level0Entry::node(3)]
        );
        assert_eq!(manager.level1(0), vec![2, 0, 1]);

        manager.set_encryption(Ecc).unwrap();
        assert_eq!(
            manager.level0(),
            vec![Level0Entry::hub(0), Level0Entry::node(3), Level0Entry::hub(1)]
        );
        assert_eq!(manager.level1(1), vec![4]);
        assert_eq!(manager.current_encryption_servers(), vec![0, 2, 3, 4]);
        assert_eq!(manager.current_encryption_hubs(), vec![0, 1]);
    }

    #[tokio::test]
    async fn lookups_and_sentinels() {
        let (manager, _, _) = loaded(quiet_settings());
        assert_eq!(manager.find_node_by_name("France 1"), Some(3));
        assert_eq!(manager.find_node_by_name("Peru 1"), None);
        assert_eq!(manager.hub_for_node(0), Some(0));
        assert_eq!(manager.hub_for_node(4), Some(1));
        assert_eq!(manager.hub_for_node(3), None);
        assert_eq!(manager.hub_for_node(99), None);

        // hub scope by default
        assert_eq!(manager.server(1, false).unwrap().name, "Germany Hub");
        assert_eq!(manager.server(1, true).unwrap().name, "Chile 2");
        assert!(manager.server(9, false).is_none());
        assert_eq!(manager.hub(0).unwrap().iso_code, "CL");
        assert_eq!(manager.latency_of_node(0), Some(Latency::Unknown));
        assert_eq!(manager.latency_of_node(50), None);
        assert_eq!(manager.ports_for_encryption().len(), 1);
    }

    #[tokio::test]
    async fn refresh_retries_then_loads() {
        let (manager, source, _) = manager_with(quiet_settings());
        source.push(Scope::Nodes, Err(SdkError::Network("down".into())));
        source.push(Scope::Nodes, Err(SdkError::EmptyList("server")));
        source.push(Scope::Nodes, Ok(node_list()));
        source.push(Scope::Hubs, Ok(hub_list()));

        manager.refresh_all().await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
        assert_eq!(manager.count(Scope::Nodes), 5);
        assert_eq!(manager.count(Scope::Hubs), 2);
    }

    #[tokio::test]
    async fn refresh_gives_up_after_max_attempts() {
        let config = Config {
            cache_dir: None,
            fetch_retry_delay_ms: 1,
            fetch_max_attempts: 2,
            ..Config::default()
        };
        let source = Arc::new(ScriptedSource::default());
        let manager = TopologyManager::new(
            config,
            source.clone(),
            Arc::new(LengthProber),
            Arc::new(MemoryStore::new(quiet_settings())),
            Handle::current(),
        );
        let err = manager.refresh(Scope::Hubs).await.unwrap_err();
        assert!(matches!(err, SdkError::Network(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_cache() {
        let cache = tempfile::tempdir().unwrap();
        save_cached(cache.path(), Scope::Hubs, &hub_list()).unwrap();
        let config = Config {
            cache_dir: Some(cache.path().to_path_buf()),
            fetch_max_attempts: 1,
            ..Config::default()
        };
        let source = Arc::new(ScriptedSource::default());
        let manager = TopologyManager::new(
            config,
            source,
            Arc::new(LengthProber),
            Arc::new(MemoryStore::new(quiet_settings())),
            Handle::current(),
        );

        assert!(manager.refresh(Scope::Hubs).await.is_err());
        assert_eq!(manager.count(Scope::Hubs), 2);
    }

    #[tokio::test]
    async fn successful_fetch_is_cached() {
        let cache = tempfile::tempdir().unwrap();
        let config = Config {
            cache_dir: Some(cache.path().to_path_buf()),
            ..Config::default()
        };
        let source = Arc::new(ScriptedSource::default());
        source.push(Scope::Nodes, Ok(node_list()));
        let manager = TopologyManager::new(
            config,
            source,
            Arc::new(LengthProber),
            Arc::new(MemoryStore::new(quiet_settings())),
            Handle::current(),
        );
        manager.refresh(Scope::Nodes).await.unwrap();
        let cached = load_cached(cache.path(), Scope::Nodes).unwrap();
        assert_eq!(cached.servers.len(), 5);
    }

    #[tokio::test]
    async fn credentials_reach_the_source() {
        let (manager, source, _) = loaded(quiet_settings());
        manager.level0();
        manager.set_credentials(Some(Credentials {
            username: "jdoe".into(),
            password: "pw".into(),
        }));
        assert_eq!(source.credentials.lock().as_ref().unwrap().username, "jdoe");
        manager.set_credentials(None);
        assert!(source.credentials.lock().is_none());
    }

    #[tokio::test]
    async fn load_starts_probing_when_enabled() {
        let (manager, _, _) = manager_with(Settings::default());
        let mut rx = manager.subscribe();
        manager.load(Scope::Nodes, node_list());
        tokio::time::timeout(Duration::from_secs(5), manager.scheduler().wait_idle())
            .await
            .unwrap();

        for id in 0..5 {
            assert!(manager.latency_of_node(id).unwrap().is_measured());
        }
        let mut saw_complete = false;
        while let Ok(event) = rx.try_recv() {
            if event == TopologyEvent::ProbingComplete {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn reenabling_probing_measures_again() {
        let (manager, _, _) = manager_with(Settings::default());
        manager.load(Scope::Nodes, node_list());
        manager.set_ping_enabled(false).unwrap();
        assert_eq!(manager.scheduler().pending(), 0);
        assert!(manager.scheduler().is_complete());

        manager.load(Scope::Hubs, hub_list());
        assert_eq!(manager.latency_of_node(0), Some(Latency::Unknown));

        manager.set_ping_enabled(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), manager.scheduler().wait_idle())
            .await
            .unwrap();
        for id in 0..5 {
            assert!(manager.latency_of_node(id).unwrap().is_measured());
        }
        for id in 0..2 {
            assert!(manager.directories.hubs.read().latency(id).unwrap().is_measured());
        }
    }

    #[tokio::test]
    async fn testing_mode_suppresses_probing() {
        let settings = Settings {
            testing: true,
            ..Settings::default()
        };
        let (manager, _, _) = loaded(settings);
        assert!(!manager.ping_all(Scope::Nodes));
        assert_eq!(manager.scheduler().pending(), 0);
        assert_eq!(manager.latency_of_node(0), Some(Latency::Unknown));
    }

    #[tokio::test]
    async fn jump_selects_connects_and_persists() {
        let settings = Settings {
            show_nodes: true,
            server_id: Some(3),
            ..quiet_settings()
        };
        let (manager, _, store) = loaded(settings);
        let connection = Arc::new(RecordingConnection::default());
        manager.set_connection_control(Some(connection.clone()));
        let mut rx = manager.subscribe();

        let id = manager.jump().unwrap().unwrap();
        assert_ne!(id, 3);
        assert!(manager.current_encryption_servers().contains(&id));
        assert_eq!(store.load().unwrap().server_id, Some(id));
        assert_eq!(
            rx.try_recv().unwrap(),
            TopologyEvent::JumpRequested {
                scope: Scope::Nodes,
                id
            }
        );
        let requests = connection.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, Scope::Nodes);
    }

    #[tokio::test]
    async fn rejected_jump_keeps_selection() {
        let settings = Settings {
            show_nodes: true,
            server_id: Some(3),
            ..quiet_settings()
        };
        let (manager, _, store) = loaded(settings);
        manager.set_connection_control(Some(Arc::new(RejectingConnection)));
        let mut rx = manager.subscribe();

        assert!(matches!(manager.jump(), Err(SdkError::Internal(_))));
        assert_eq!(manager.settings().server_id, Some(3));
        assert_eq!(store.load().unwrap().server_id, Some(3));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hub_jump_never_returns_current_hub() {
        // both hubs offer Ecc: Chile Hub(0) Germany Hub(1)
        for current in 0..2 {
            let (manager, _, _) = loaded(Settings {
                encryption: Ecc,
                server_id: Some(current),
                ..quiet_settings()
            });
            assert_eq!(manager.scope(), Scope::Hubs);
            for _ in 0..50 {
                assert_eq!(manager.server_to_jump(), Some(1 - current));
            }
            assert_eq!(manager.jump().unwrap(), Some(1 - current));
            assert_eq!(manager.settings().server_id, Some(1 - current));
        }
    }

    #[tokio::test]
    async fn jump_prefers_fast_hubs() {
        let (manager, _, _) = loaded(Settings {
            encryption: Ecc,
            ..quiet_settings()
        });
        manager
            .directories
            .hubs
            .write()
            .set_latency(1, Latency::Measured(5));
        for _ in 0..50 {
            assert_eq!(manager.server_to_jump(), Some(1));
        }
    }

    #[tokio::test]
    async fn jump_with_nothing_loaded() {
        let (manager, _, _) = manager_with(quiet_settings());
        assert_eq!(manager.server_to_jump(), None);
        assert_eq!(manager.jump().unwrap(), None);
    }

    #[tokio::test]
    async fn favourites_survive_reload() {
        let settings = Settings {
            show_nodes: true,
            ..quiet_settings()
        };
        let (manager, _, store) = loaded(settings);
        manager.set_favorite(Scope::Nodes, 3, true).unwrap();
        manager.set_favorite(Scope::Nodes, 1, true).unwrap();
        assert_eq!(manager.favorites(Scope::Nodes), vec![1, 3]);
        assert!(store
            .load()
            .unwrap()
            .favorites
            .contains("france-1.example.net"));

        manager.load(Scope::Nodes, node_list());
        assert_eq!(manager.favorites(Scope::Nodes), vec![1, 3]);

        manager.set_favorite(Scope::Nodes, 1, false).unwrap();
        assert_eq!(manager.favorites_count(), 1);
        assert!(manager.set_favorite(Scope::Nodes, 40, true).is_err());
    }

    #[tokio::test]
    async fn node_alias_of_hub_shares_favourite() {
        let (manager, _, _) = loaded(quiet_settings());
        // Chile Hub is node 2 and hub 0
        manager.set_favorite(Scope::Hubs, 0, true).unwrap();
        assert_eq!(manager.favorites(Scope::Nodes), vec![2]);
    }

    #[tokio::test]
    async fn favourite_navigation() {
        let settings = Settings {
            show_nodes: true,
            ..quiet_settings()
        };
        let (manager, _, _) = loaded(settings);
        manager.set_favorite(Scope::Nodes, 1, true).unwrap();
        manager.set_favorite(Scope::Nodes, 3, true).unwrap();

        assert!(manager.has_next_favorite());
        assert_eq!(manager.next_favorite().unwrap(), Some(1));
        assert_eq!(manager.next_favorite().unwrap(), Some(3));
        assert!(!manager.has_next_favorite());
        assert_eq!(manager.next_favorite().unwrap(), None);
        assert!(manager.has_previous_favorite());
        assert_eq!(manager.previous_favorite().unwrap(), Some(1));
        assert_eq!(manager.previous_favorite().unwrap(), None);
        assert_eq!(manager.settings().favorite, Some(1));

        manager.set_show_nodes(false).unwrap();
        manager.set_favorite(Scope::Hubs, 0, true).unwrap();
        // cursor 1 in hub scope wraps round to hub 0
        assert_eq!(manager.next_favorite().unwrap(), Some(0));
    }

    #[tokio::test]
    async fn load_json_rejects_empty_lists() {
        let (manager, _, _) = manager_with(quiet_settings());
        assert!(matches!(
            manager.load_json(Scope::Hubs, "[]"),
            Err(SdkError::EmptyList("hub"))
        ));
        assert!(matches!(
            manager.load_json(Scope::Hubs, "not json"),
            Err(SdkError::Parse(_))
        ));
        let body = serde_json::to_string(&hub_list()).unwrap();
        assert_eq!(manager.load_json(Scope::Hubs, &body).unwrap(), 2);
    }
}
