//! Per-address audit commands: info, ip-history, ip-tag, ip-comment.
//!
//! These accept either an address literal or a previously surfaced
//! identifier (UUID).

use super::{resolve_target, Command, CommandContext};
use async_trait::async_trait;
use chrono::Utc;

pub struct InfoCommand;

#[async_trait]
impl Command for InfoCommand {
    fn name(&self) -> &'static str {
        "info"
    }

    fn description(&self) -> &'static str {
        "Summarize what is known about an address"
    }

    fn usage(&self) -> &'static str {
        "info <address|id>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let raw = match args.first() {
            Some(raw) => *raw,
            None => return format!("Usage: {}", self.usage()),
        };
        let target = match resolve_target(ctx, raw) {
            Ok(target) => target,
            Err(message) => return message,
        };

        let stats = match ctx.db.audit().stats(target.id).await {
            Ok(stats) => stats,
            Err(e) => return format!("Failed to read history: {}", e),
        };
        let tags = ctx.db.audit().tags(target.id).await.unwrap_or_default();

        let mut lines = Vec::new();
        match target.addr {
            Some(addr) => {
                lines.push(format!("Address: {}", addr));
                lines.push(format!("Identifier: {}", target.id));
                lines.push(format!("Country: {}", ctx.geo.country_of(addr)));
                lines.push(format!(
                    "Blocked: {} | Whitelisted: {}",
                    ctx.lists.is_blocked(addr),
                    ctx.lists.is_whitelisted(addr)
                ));
            }
            None => {
                lines.push(format!("Identifier: {} (no known address)", target.id));
            }
        }
        lines.push(format!(
            "History: {} events, {} mentioning failures",
            stats.total, stats.recent_fails
        ));
        if let Some(last_seen) = stats.last_seen {
            lines.push(format!(
                "Last seen: {}",
                last_seen.format("%Y-%m-%d %H:%M:%S UTC")
            ));
        }
        if !tags.is_empty() {
            lines.push(format!("Tags: {}", tags.join(", ")));
        }
        lines.join("\n")
    }
}

pub struct IpHistoryCommand;

#[async_trait]
impl Command for IpHistoryCommand {
    fn name(&self) -> &'static str {
        "ip-history"
    }

    fn description(&self) -> &'static str {
        "Show the recorded history of an address"
    }

    fn usage(&self) -> &'static str {
        "ip-history <address|id>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let raw = match args.first() {
            Some(raw) => *raw,
            None => return format!("Usage: {}", self.usage()),
        };
        let target = match resolve_target(ctx, raw) {
            Ok(target) => target,
            Err(message) => return message,
        };

        match ctx.db.audit().history(target.id).await {
            Ok(events) if events.is_empty() => format!("No history for {}.", raw),
            Ok(events) => events
                .iter()
                .map(|(time, message)| {
                    format!("{} | {}", time.format("%Y-%m-%d %H:%M:%S UTC"), message)
                })
                .collect::<Vec<_>>()
                .join("\n"),
            Err(e) => format!("Failed to read history: {}", e),
        }
    }
}

pub struct IpTagCommand;

#[async_trait]
impl Command for IpTagCommand {
    fn name(&self) -> &'static str {
        "ip-tag"
    }

    fn description(&self) -> &'static str {
        "Manage tags on an address"
    }

    fn usage(&self) -> &'static str {
        "ip-tag add|remove|list <address|id> [tag]"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let (action, raw) = match (args.first(), args.get(1)) {
            (Some(action), Some(raw)) => (*action, *raw),
            _ => return format!("Usage: {}", self.usage()),
        };
        let target = match resolve_target(ctx, raw) {
            Ok(target) => target,
            Err(message) => return message,
        };

        match action.to_lowercase().as_str() {
            "add" => {
                let tag = match args.get(2) {
                    Some(tag) => *tag,
                    None => return format!("Usage: {}", self.usage()),
                };
                match ctx.db.audit().add_tag(target.id, tag).await {
                    Ok(true) => format!("Tagged {} with '{}'.", raw, tag),
                    Ok(false) => format!("{} already carries '{}'.", raw, tag),
                    Err(e) => format!("Failed to add tag: {}", e),
                }
            }
            "remove" => {
                let tag = match args.get(2) {
                    Some(tag) => *tag,
                    None => return format!("Usage: {}", self.usage()),
                };
                match ctx.db.audit().remove_tag(target.id, tag).await {
                    Ok(true) => format!("Removed '{}' from {}.", tag, raw),
                    Ok(false) => format!("{} does not carry '{}'.", raw, tag),
                    Err(e) => format!("Failed to remove tag: {}", e),
                }
            }
            "list" => match ctx.db.audit().tags(target.id).await {
                Ok(tags) if tags.is_empty() => format!("No tags for {}.", raw),
                Ok(tags) => tags.join("\n"),
                Err(e) => format!("Failed to list tags: {}", e),
            },
            other => format!("Unknown action '{}'. Usage: {}", other, self.usage()),
        }
    }
}

pub struct IpCommentCommand;

#[async_trait]
impl Command for IpCommentCommand {
    fn name(&self) -> &'static str {
        "ip-comment"
    }

    fn description(&self) -> &'static str {
        "Attach or list operator comments on an address"
    }

    fn usage(&self) -> &'static str {
        "ip-comment add <address|id> <text> | ip-comment list <address|id>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let (action, raw) = match (args.first(), args.get(1)) {
            (Some(action), Some(raw)) => (*action, *raw),
            _ => return format!("Usage: {}", self.usage()),
        };
        let target = match resolve_target(ctx, raw) {
            Ok(target) => target,
            Err(message) => return message,
        };

        match action.to_lowercase().as_str() {
            "add" => {
                let text = args[2..].join(" ");
                if text.is_empty() {
                    return format!("Usage: {}", self.usage());
                }
                match ctx.db.audit().add_comment(target.id, Utc::now(), &text).await {
                    Ok(()) => format!("Comment recorded for {}.", raw),
                    Err(e) => format!("Failed to record comment: {}", e),
                }
            }
            "list" => match ctx.db.audit().comments(target.id).await {
                Ok(comments) if comments.is_empty() => format!("No comments for {}.", raw),
                Ok(comments) => comments
                    .iter()
                    .map(|(time, text)| {
                        format!("{} | {}", time.format("%Y-%m-%d %H:%M:%S UTC"), text)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("Failed to list comments: {}", e),
            },
            other => format!("Unknown action '{}'. Usage: {}", other, self.usage()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::context_in;
    use super::super::CommandRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn tags_and_comments_accept_address_or_id() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        let tagged = registry.dispatch("ip-tag add 203.0.113.9 scanner", &ctx).await;
        assert!(tagged.contains("scanner"));

        // The identifier surfaced by `info` addresses the same trail.
        let id = ctx.directory.id_of("203.0.113.9".parse().unwrap());
        let listing = registry.dispatch(&format!("ip-tag list {}", id), &ctx).await;
        assert_eq!(listing, "scanner");

        registry
            .dispatch("ip-comment add 203.0.113.9 repeat offender", &ctx)
            .await;
        let comments = registry.dispatch("ip-comment list 203.0.113.9", &ctx).await;
        assert!(comments.contains("repeat offender"));
    }

    #[tokio::test]
    async fn malformed_target_is_a_user_error() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        let response = registry.dispatch("ip-history definitely-not-a-uuid", &ctx).await;
        assert!(response.contains("neither an address nor an identifier"));
    }

    #[tokio::test]
    async fn info_summarizes_block_state_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let (ctx, _engine) = context_in(dir.path()).await;
        let registry = Arc::new(CommandRegistry::with_defaults());
        ctx.attach_registry(&registry);

        registry.dispatch("block 203.0.113.9", &ctx).await;
        let info = registry.dispatch("info 203.0.113.9", &ctx).await;

        assert!(info.contains("Address: 203.0.113.9"));
        assert!(info.contains("Blocked: true"));
        // The manual block left a history event behind.
        assert!(info.contains("History: 1 events"));
    }
}
