//! Connection-log commands: rotate, exportlogs, show-logs.

use super::{Command, CommandContext};
use async_trait::async_trait;

pub struct RotateCommand;

#[async_trait]
impl Command for RotateCommand {
    fn name(&self) -> &'static str {
        "rotate"
    }

    fn description(&self) -> &'static str {
        "Rotate the connection log into the archive directory"
    }

    fn usage(&self) -> &'static str {
        "rotate"
    }

    async fn execute(&self, _args: &[&str], ctx: &CommandContext) -> String {
        match ctx.conn_log.rotate() {
            Ok(archive) => format!("Log rotated to {}.", archive.display()),
            Err(e) => format!("Rotation failed: {}", e),
        }
    }
}

pub struct ExportLogsCommand;

#[async_trait]
impl Command for ExportLogsCommand {
    fn name(&self) -> &'static str {
        "exportlogs"
    }

    fn description(&self) -> &'static str {
        "Write an encrypted export of the connection log"
    }

    fn usage(&self) -> &'static str {
        "exportlogs <name>"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let name = match args.first() {
            Some(name) => *name,
            None => return format!("Usage: {}", self.usage()),
        };
        // The export lands inside the secure directory only.
        if name.contains('/') || name.contains("..") {
            return format!("'{}' is not a plain file name.", name);
        }

        let dest = ctx.config.secure_export_dir().join(name);
        match ctx.conn_log.export(&dest, &ctx.cipher) {
            Ok(lines) => format!("Exported {} lines to {}.", lines, dest.display()),
            Err(e) => format!("Export failed: {}", e),
        }
    }
}

pub struct ShowLogsCommand;

#[async_trait]
impl Command for ShowLogsCommand {
    fn name(&self) -> &'static str {
        "show-logs"
    }

    fn description(&self) -> &'static str {
        "Show the newest connection records"
    }

    fn usage(&self) -> &'static str {
        "show-logs [count]"
    }

    async fn execute(&self, args: &[&str], ctx: &CommandContext) -> String {
        let count = match args.first() {
            Some(raw) => match raw.parse::<usize>() {
                Ok(count) => count,
                Err(_) => return format!("'{}' is not a line count.", raw),
            },
            None => 20,
        };

        match ctx.conn_log.tail(count) {
            Ok(lines) if lines.is_empty() => "Connection log is empty.".to_string(),
            Ok(lines) => lines.join("\n"),
            Err(e) => format!("Failed to read connection log: {}", e),
        }
    }
}
