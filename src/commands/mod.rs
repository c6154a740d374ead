//! Command abstraction, registry, and dispatch.
//!
//! Every operator command implements [`Command`]: a name, a one-line
//! description, a usage string, and an async `execute` returning its
//! textual response. The registry maps names case-insensitively and
//! dispatches one whitespace-tokenized line at a time. User errors (bad
//! arguments, unknown names, unparseable identifiers) come back as
//! response text, never as process failures.

mod audit;
mod blocks;
mod core;
mod logsops;
mod whitelist;

use crate::blocker::BlockManager;
use crate::config::Config;
use crate::db::Database;
use crate::engine::AddressDirectory;
use crate::firewall::FirewallDriver;
use crate::geo::GeoResolver;
use crate::lists::BlockListManager;
use crate::logs::ConnectionLog;
use crate::scheduler::Scheduler;
use crate::server::crypto::PayloadCipher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::TypeId;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, OnceLock, RwLock, Weak};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One operator command.
#[async_trait]
pub trait Command: Send + Sync {
    /// Command name as typed (lowercase by convention).
    fn name(&self) -> &'static str;

    /// One-line description for `help`.
    fn description(&self) -> &'static str;

    /// Usage string for `help <name>` and argument errors.
    fn usage(&self) -> &'static str;

    /// Execute with pre-tokenized arguments. The returned text is written
    /// to the peer; an empty response writes nothing.
    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String;
}

/// Everything a command may touch, as narrow shared handles.
pub struct CommandContext {
    pub config: Arc<Config>,
    pub db: Database,
    pub blocker: Arc<BlockManager>,
    pub lists: Arc<BlockListManager>,
    pub geo: Arc<GeoResolver>,
    pub directory: Arc<AddressDirectory>,
    pub conn_log: Arc<ConnectionLog>,
    pub cipher: PayloadCipher,
    pub driver: Arc<FirewallDriver>,
    pub scheduler: Arc<Scheduler>,
    pub shutdown: CancellationToken,
    pub started_at: DateTime<Utc>,
    registry: OnceLock<Weak<CommandRegistry>>,
}

impl CommandContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        db: Database,
        blocker: Arc<BlockManager>,
        lists: Arc<BlockListManager>,
        geo: Arc<GeoResolver>,
        directory: Arc<AddressDirectory>,
        conn_log: Arc<ConnectionLog>,
        cipher: PayloadCipher,
        driver: Arc<FirewallDriver>,
        scheduler: Arc<Scheduler>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            db,
            blocker,
            lists,
            geo,
            directory,
            conn_log,
            cipher,
            driver,
            scheduler,
            shutdown,
            started_at: Utc::now(),
            registry: OnceLock::new(),
        }
    }

    /// Hand the context a registry reference so `help` can enumerate
    /// commands. Called once after registry construction.
    pub fn attach_registry(&self, registry: &Arc<CommandRegistry>) {
        let _ = self.registry.set(Arc::downgrade(registry));
    }

    fn registry(&self) -> Option<Arc<CommandRegistry>> {
        self.registry.get().and_then(Weak::upgrade)
    }
}

/// The target of an address-scoped command: a literal, or a previously
/// surfaced identifier.
pub(crate) struct Target {
    pub id: Uuid,
    pub addr: Option<IpAddr>,
}

/// Resolve a command argument to an address identifier. Address literals
/// mint through the directory; raw UUIDs resolve back when known.
pub(crate) fn resolve_target(ctx: &CommandContext, raw: &str) -> Result<Target, String> {
    if let Ok(addr) = raw.parse::<IpAddr>() {
        return Ok(Target {
            id: ctx.directory.id_of(addr),
            addr: Some(addr),
        });
    }
    if let Ok(id) = raw.parse::<Uuid>() {
        return Ok(Target {
            id,
            addr: ctx.directory.address_of(id),
        });
    }
    Err(format!(
        "'{}' is neither an address nor an identifier",
        raw
    ))
}

/// Name → command mapping with case-insensitive lookup. The concrete
/// type of each registration is remembered so callers can also fetch a
/// command by type.
pub struct CommandRegistry {
    commands: RwLock<HashMap<String, (TypeId, Arc<dyn Command>)>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }

    /// A registry loaded with the full built-in command set.
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register(Arc::new(core::HelpCommand));
        registry.register(Arc::new(core::StatusCommand));
        registry.register(Arc::new(core::MonitorCommand));
        registry.register(Arc::new(core::ClearCommand));
        registry.register(Arc::new(core::ReloadCommand));
        registry.register(Arc::new(core::ExitCommand));
        registry.register(Arc::new(blocks::ListCommand));
        registry.register(Arc::new(blocks::BlockCommand));
        registry.register(Arc::new(blocks::UnblockCommand));
        registry.register(Arc::new(blocks::UnblockAllCommand));
        registry.register(Arc::new(whitelist::WhitelistCommand));
        registry.register(Arc::new(logsops::RotateCommand));
        registry.register(Arc::new(logsops::ExportLogsCommand));
        registry.register(Arc::new(logsops::ShowLogsCommand));
        registry.register(Arc::new(audit::InfoCommand));
        registry.register(Arc::new(audit::IpHistoryCommand));
        registry.register(Arc::new(audit::IpTagCommand));
        registry.register(Arc::new(audit::IpCommentCommand));

        registry
    }

    /// Register under the command's name (case-insensitive). A later
    /// registration under the same name replaces the earlier one.
    pub fn register<C: Command + 'static>(&self, command: Arc<C>) {
        let command: Arc<dyn Command> = command;
        self.commands
            .write()
            .expect("registry lock poisoned")
            .insert(
                command.name().to_lowercase(),
                (TypeId::of::<C>(), command),
            );
    }

    /// Remove a command by name. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        self.commands
            .write()
            .expect("registry lock poisoned")
            .remove(&name.to_lowercase())
            .is_some()
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands
            .read()
            .expect("registry lock poisoned")
            .get(&name.to_lowercase())
            .map(|(_, command)| Arc::clone(command))
    }

    /// Fetch a command by its concrete type.
    pub fn get_by_type<C: Command + 'static>(&self) -> Option<Arc<dyn Command>> {
        let want = TypeId::of::<C>();
        self.commands
            .read()
            .expect("registry lock poisoned")
            .values()
            .find(|(type_id, _)| *type_id == want)
            .map(|(_, command)| Arc::clone(command))
    }

    /// All commands, sorted by name.
    pub fn registered(&self) -> Vec<Arc<dyn Command>> {
        let mut commands: Vec<Arc<dyn Command>> = self
            .commands
            .read()
            .expect("registry lock poisoned")
            .values()
            .map(|(_, command)| Arc::clone(command))
            .collect();
        commands.sort_by_key(|c| c.name());
        commands
    }

    /// Tokenize and execute one input line. Empty input yields an empty
    /// response; unknown names yield a user-visible message.
    pub async fn dispatch(&self, line: &str, ctx: &CommandContext) -> String {
        let mut parts = line.split_whitespace();
        let name = match parts.next() {
            Some(name) => name,
            None => return String::new(),
        };
        let args: Vec<&str> = parts.collect();

        match self.get_by_name(name) {
            Some(command) => command.execute(&args, ctx).await,
            None => format!("Unknown command '{}'. Try 'help'.", name),
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatch_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = testutil::context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        let lower = registry.dispatch("status", &ctx).await;
        let upper = registry.dispatch("STATUS", &ctx).await;
        assert!(lower.contains("Active blocks"));
        assert!(upper.contains("Active blocks"));
    }

    #[tokio::test]
    async fn unknown_command_is_a_textual_response() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = testutil::context_in(dir.path()).await;
        let registry = CommandRegistry::with_defaults();

        let response = registry.dispatch("frobnicate now", &ctx).await;
        assert!(response.contains("Unknown command 'frobnicate'"));
        assert_eq!(registry.dispatch("   ", &ctx).await, "");
    }

    #[tokio::test]
    async fn unregister_removes_lookup() {
        let registry = CommandRegistry::with_defaults();
        assert!(registry.get_by_name("LIST").is_some());
        assert!(registry.unregister("list"));
        assert!(!registry.unregister("list"));
        assert!(registry.get_by_name("list").is_none());
    }

    #[test]
    fn get_by_type_finds_the_concrete_registration() {
        let registry = CommandRegistry::with_defaults();

        let by_type = registry
            .get_by_type::<super::core::HelpCommand>()
            .unwrap();
        assert_eq!(by_type.name(), "help");

        registry.unregister("help");
        assert!(registry.get_by_type::<super::core::HelpCommand>().is_none());
    }
}
