//! Whitelist maintenance.

use super::{Command, CommandContext};
use async_trait::async_trait;
use std::net::IpAddr;

pub struct WhitelistCommand;

#[async_trait]
impl Command for WhitelistCommand {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    fn description(&self) -> &'static str {
        "Add or remove a whitelisted address"
    }

    fn usage(&self) -> &'static str {
        "whitelist add|remove <address>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let (action, raw) = match (args.first(), args.get(1)) {
            (Some(action), Some(raw)) => (*action, *raw),
            _ => return format!("Usage: {}", self.usage()),
        };

        let addr: IpAddr = match raw.parse() {
            Ok(addr) => addr,
            Err(_) => return format!("'{}' is not a valid address.", raw),
        };

        match action.to_lowercase().as_str() {
            "add" => match ctx.lists.whitelist_add(addr) {
                Ok(true) => format!("{} whitelisted.", addr),
                Ok(false) => format!("{} is already whitelisted.", addr),
                Err(e) => format!("Failed to persist whitelist: {}", e),
            },
            "remove" => match ctx.lists.whitelist_remove(addr) {
                Ok(true) => format!("{} removed from whitelist.", addr),
                Ok(false) => format!("{} is not whitelisted.", addr),
                Err(e) => format!("Failed to persist whitelist: {}", e),
            },
            other => format!("Unknown action '{}'. Usage: {}", other, self.usage()),
        }
    }
}
