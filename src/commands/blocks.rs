//! Block manipulation commands: list, block, unblock, unblockall.

use super::{Command, CommandContext};
use crate::blocker::{BlockOutcome, UnblockOutcome};
use async_trait::async_trait;
use chrono::Utc;
use std::net::IpAddr;
use std::time::Duration;

pub struct ListCommand;

#[async_trait]
impl Command for ListCommand {
    fn name(&self) -> &'static str {
        "list"
    }

    fn description(&self) -> &'static str {
        "List currently blocked addresses"
    }

    fn usage(&self) -> &'static str {
        "list"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        let records = match ctx.db.blocks().list().await {
            Ok(records) => records,
            Err(e) => return format!("Failed to read block records: {}", e),
        };

        if records.is_empty() {
            return "No blocked addresses.".to_string();
        }

        let now = Utc::now();
        records
            .iter()
            .map(|record| {
                let remaining = (record.scheduled_unblock - now).num_seconds().max(0);
                format!(
                    "{} until {} ({}s left)",
                    record.address,
                    record.scheduled_unblock.format("%Y-%m-%d %H:%M:%S UTC"),
                    remaining
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct BlockCommand;

#[async_trait]
impl Command for BlockCommand {
    fn name(&self) -> &'static str {
        "block"
    }

    fn description(&self) -> &'static str {
        "Block an address, optionally for a given number of seconds"
    }

    fn usage(&self) -> &'static str {
        "block <address> [seconds]"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let addr: IpAddr = match args.first().and_then(|raw| raw.parse().ok()) {
            Some(addr) => addr,
            None => return format!("Usage: {}", self.usage()),
        };

        let duration = match args.get(1) {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => return format!("'{}' is not a number of seconds.", raw),
            },
            None => None,
        };

        let effective = duration.unwrap_or_else(|| ctx.blocker.default_duration());
        match ctx.blocker.block(addr, duration, "manual block").await {
            BlockOutcome::Installed => {
                format!("Blocked {} for {}s.", addr, effective.as_secs())
            }
            BlockOutcome::AlreadyBlocked => format!("{} is already blocked.", addr),
            BlockOutcome::Whitelisted => {
                format!("{} is whitelisted; refusing to block.", addr)
            }
            BlockOutcome::DriverFailed(detail) => {
                format!("Failed to block {}: {}", addr, detail)
            }
        }
    }
}

pub struct UnblockCommand;

#[async_trait]
impl Command for UnblockCommand {
    fn name(&self) -> &'static str {
        "unblock"
    }

    fn description(&self) -> &'static str {
        "Remove the block for an address"
    }

    fn usage(&self) -> &'static str {
        "unblock <address>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let addr: IpAddr = match args.first().and_then(|raw| raw.parse().ok()) {
            Some(addr) => addr,
            None => return format!("Usage: {}", self.usage()),
        };

        match ctx.blocker.unblock(addr).await {
            UnblockOutcome::Removed => format!("Unblocked {}.", addr),
            UnblockOutcome::NotBlocked => format!("{} is not blocked.", addr),
            UnblockOutcome::DriverFailed(detail) => {
                format!("Failed to unblock {}: {}", addr, detail)
            }
        }
    }
}

pub struct UnblockAllCommand;

#[async_trait]
impl Command for UnblockAllCommand {
    fn name(&self) -> &'static str {
        "unblockall"
    }

    fn description(&self) -> &'static str {
        "Remove every active block"
    }

    fn usage(&self) -> &'static str {
        "unblockall"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        let (removed, failed) = ctx.blocker.unblock_all().await;
        if failed == 0 {
            format!("Unblocked {} addresses.", removed)
        } else {
            format!("Unblocked {} addresses; {} failed (see log).", removed, failed)
        }
    }
}
