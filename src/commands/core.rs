//! General service commands: help, status, monitor, clear, reload, exit.

use super::{Command, CommandContext};
use crate::firewall::ReloadRules;
use async_trait::async_trait;
use chrono::Utc;

pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn name(&self) -> &'static str {
        "help"
    }

    fn description(&self) -> &'static str {
        "List commands, or show usage for one command"
    }

    fn usage(&self) -> &'static str {
        "help [command]"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let registry = match ctx.registry() {
            Some(registry) => registry,
            None => return "Command registry unavailable.".to_string(),
        };

        if let Some(name) = args.first() {
            return match registry.get_by_name(name) {
                Some(command) => format!(
                    "{}\nUsage: {}",
                    command.description(),
                    command.usage()
                ),
                None => format!("Unknown command '{}'.", name),
            };
        }

        let mut lines = vec!["Available commands:".to_string()];
        for command in registry.registered() {
            lines.push(format!("  {:<12} {}", command.name(), command.description()));
        }
        lines.join("\n")
    }
}

pub struct StatusCommand;

#[async_trait]
impl Command for StatusCommand {
    fn name(&self) -> &'static str {
        "status"
    }

    fn description(&self) -> &'static str {
        "Service state: uptime, blocks, lists, jobs"
    }

    fn usage(&self) -> &'static str {
        "status"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        let uptime = Utc::now() - ctx.started_at;
        let persisted = ctx.db.blocks().count().await.unwrap_or(-1);

        format!(
            "Uptime: {}s\n\
             Active blocks: {} (persisted: {})\n\
             Whitelisted: {}\n\
             Observed addresses: {}\n\
             Geo prefixes: {} (blocked countries: {})\n\
             Scheduled jobs: {}",
            uptime.num_seconds(),
            ctx.lists.blocked_snapshot().len(),
            persisted,
            ctx.lists.whitelist_snapshot().len(),
            ctx.directory.len(),
            ctx.geo.prefix_count(),
            ctx.geo.blocked_country_codes().join(", "),
            ctx.scheduler.list_ids().len(),
        )
    }
}

pub struct MonitorCommand;

#[async_trait]
impl Command for MonitorCommand {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn description(&self) -> &'static str {
        "One-shot dashboard snapshot"
    }

    fn usage(&self) -> &'static str {
        "monitor"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        let blocked = ctx.lists.blocked_snapshot();
        let mut lines = vec![format!(
            "== vigild monitor == {}",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        )];

        lines.push(format!("Blocked addresses ({}):", blocked.len()));
        for addr in &blocked {
            lines.push(format!("  {}", addr));
        }

        let recent = ctx.conn_log.tail(10).unwrap_or_default();
        lines.push(format!("Recent connection records ({}):", recent.len()));
        for record in recent {
            lines.push(format!("  {}", record));
        }

        lines.join("\n")
    }
}

pub struct ClearCommand;

#[async_trait]
impl Command for ClearCommand {
    fn name(&self) -> &'static str {
        "clear"
    }

    fn description(&self) -> &'static str {
        "Clear the remote terminal"
    }

    fn usage(&self) -> &'static str {
        "clear"
    }

    async fn execute(&self, _args: &[&str], _ctx: &CommandContext) -> String {
        // ANSI erase-display plus cursor-home; the peer owns the terminal.
        "\x1b[2J\x1b[H".to_string()
    }
}

pub struct ReloadCommand;

#[async_trait]
impl Command for ReloadCommand {
    fn name(&self) -> &'static str {
        "reload"
    }

    fn description(&self) -> &'static str {
        "Re-apply the firewall ruleset from the rule files"
    }

    fn usage(&self) -> &'static str {
        "reload"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        let rules = ReloadRules {
            ssh_port: ctx.config.resolve_ssh_port(),
            syn_rate_per_sec: ctx.config.firewall.syn_rate_per_sec,
            syn_burst: ctx.config.firewall.syn_burst,
        };
        let blocked = ctx.lists.blocked_snapshot();
        let (applied, failed) = ctx
            .driver
            .reload_ruleset(&rules, &ctx.config.rule_files(), &blocked)
            .await;

        if failed == 0 {
            format!("Ruleset reloaded: {} rules applied.", applied)
        } else {
            format!(
                "Ruleset reloaded with errors: {} applied, {} failed (see log).",
                applied, failed
            )
        }
    }
}

pub struct ExitCommand;

#[async_trait]
impl Command for ExitCommand {
    fn name(&self) -> &'static str {
        "exit"
    }

    fn description(&self) -> &'static str {
        "Gracefully shut the service down"
    }

    fn usage(&self) -> &'static str {
        "exit"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        ctx.shutdown.cancel();
        "Shutting down.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::context_in;
    use super::super::CommandRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn help_lists_every_registered_command() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        let listing = registry.dispatch("help", &ctx).await;
        for name in [
            "help",
            "list",
            "block",
            "unblock",
            "unblockall",
            "status",
            "rotate",
            "reload",
            "clear",
            "whitelist",
            "exportlogs",
            "show-logs",
            "info",
            "exit",
            "ip-history",
            "ip-tag",
            "ip-comment",
            "monitor",
        ] {
            assert!(listing.contains(name), "help is missing '{}'", name);
        }

        let usage = registry.dispatch("help block", &ctx).await;
        assert!(usage.contains("block <address>"));
    }

    #[tokio::test]
    async fn exit_cancels_the_shutdown_token() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        assert!(!ctx.shutdown.is_cancelled());
        let response = registry.dispatch("exit", &ctx).await;
        assert!(response.contains("Shutting down"));
        assert!(ctx.shutdown.is_cancelled());
    }
}
