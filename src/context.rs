//! Explicit component wiring.
//!
//! Every subsystem is constructed here and handed exactly the
//! collaborators it needs, forming a DAG with no global lookups. The
//! startup sequence matters: the store opens and the block state
//! reconciles before the syslog tail starts, so a restart cannot race a
//! fresh classifier line against a half-restored block set.

use crate::blocker::BlockManager;
use crate::commands::CommandContext;
use crate::config::Config;
use crate::db::Database;
use crate::dns::ReverseDns;
use crate::engine::{AddressDirectory, EnforcementEngine};
use crate::events::EventBus;
use crate::firewall::FirewallDriver;
use crate::geo::GeoResolver;
use crate::lists::BlockListManager;
use crate::logs::ConnectionLog;
use crate::scheduler::Scheduler;
use crate::server::crypto::PayloadCipher;
use crate::tail::SyslogTail;
use crate::tasks::register_periodic_tasks;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The assembled daemon: every component, ready to run.
pub struct FirewallContext {
    pub config: Arc<Config>,
    pub bus: Arc<EventBus>,
    pub scheduler: Arc<Scheduler>,
    pub driver: Arc<FirewallDriver>,
    pub db: Database,
    pub lists: Arc<BlockListManager>,
    pub geo: Arc<GeoResolver>,
    pub directory: Arc<AddressDirectory>,
    pub conn_log: Arc<ConnectionLog>,
    pub blocker: Arc<BlockManager>,
    pub engine: Arc<EnforcementEngine>,
    pub cipher: PayloadCipher,
    pub root: CancellationToken,
}

impl FirewallContext {
    /// Build every component and reconcile persisted block state.
    pub async fn initialize(
        config: Config,
        root: CancellationToken,
    ) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let bus = Arc::new(EventBus::new());
        let scheduler = Arc::new(Scheduler::new(root.clone()));
        let driver = Arc::new(FirewallDriver::new(config.firewall.tool.clone()));

        let db_path = config.database_path();
        let db = Database::open(&db_path.to_string_lossy()).await?;

        let lists = Arc::new(BlockListManager::load(
            &config.blocklist_path(),
            config.whitelist_path(),
            Arc::clone(&bus),
        ));
        let geo = Arc::new(GeoResolver::load(
            &config.zones_dir(),
            &config.blocked_countries_path(),
        ));
        let directory = Arc::new(AddressDirectory::new());
        let conn_log = Arc::new(ConnectionLog::new(
            config.connection_log_path(),
            config.archive_dir(),
            config.logging.max_log_size_bytes,
            config.logging.max_log_archives,
        ));
        let cipher = PayloadCipher::new(config.command_key(), config.command_iv())?;

        let blocker = Arc::new(BlockManager::new(
            Arc::clone(&driver),
            db.clone(),
            Arc::clone(&lists),
            Arc::clone(&bus),
            Arc::clone(&scheduler),
            Arc::clone(&directory),
            Duration::from_secs(config.thresholds.default_block_secs),
        ));

        // Must complete before the tail task is spawned.
        blocker.reconcile().await?;

        let engine = Arc::new(EnforcementEngine::new(
            config.thresholds.clone(),
            config.logging.plaintext_logs,
            Arc::clone(&directory),
            Arc::clone(&lists),
            Arc::clone(&geo),
            Arc::clone(&blocker),
            Arc::clone(&bus),
            ReverseDns::new(),
            Arc::clone(&conn_log),
        ));

        Ok(Arc::new(Self {
            config,
            bus,
            scheduler,
            driver,
            db,
            lists,
            geo,
            directory,
            conn_log,
            blocker,
            engine,
            cipher,
            root,
        }))
    }

    /// Register the periodic tasks (expiry sweep and monitors).
    pub fn start_periodic_tasks(&self) -> Vec<Uuid> {
        register_periodic_tasks(
            &self.scheduler,
            &self.bus,
            &self.blocker,
            &self.config.monitors,
            self.config.certificate_path(),
        )
    }

    /// Spawn the syslog tail task.
    pub fn start_tail(&self) {
        let tail = SyslogTail::new(
            self.config.tail.syslog_path.clone(),
            Duration::from_secs(self.config.tail.poll_interval_secs.max(1)),
        );
        tokio::spawn(tail.run(
            Arc::clone(&self.engine),
            Arc::clone(&self.conn_log),
            self.root.child_token(),
        ));
    }

    /// Context handed to the command layer.
    pub fn command_context(&self) -> Arc<CommandContext> {
        Arc::new(CommandContext::new(
            Arc::clone(&self.config),
            self.db.clone(),
            Arc::clone(&self.blocker),
            Arc::clone(&self.lists),
            Arc::clone(&self.geo),
            Arc::clone(&self.directory),
            Arc::clone(&self.conn_log),
            self.cipher.clone(),
            Arc::clone(&self.driver),
            Arc::clone(&self.scheduler),
            self.root.clone(),
        ))
    }
}
