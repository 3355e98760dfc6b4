//! Command registry
//!
//! Immutable table of every command a [`Db`](super::Db) can execute. Built
//! once and shared by all databases.

use super::{admin, keys, string, Db};
use crate::protocol::Reply;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

/// Command execution trait
pub trait Command: Send + Sync {
    /// Execute against `db`
    ///
    /// `args` excludes the command name and has already passed the arity check.
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply;

    /// Lowercase command name
    fn name(&self) -> &'static str;

    /// Allowed length of the full command line, name included
    ///
    /// A negative arity `-n` means at least `n`.
    fn arity(&self) -> i32;
}

/// Check a command line length against an arity
pub fn arity_ok(arity: i32, len: usize) -> bool {
    let len = len as i64;
    let arity = arity as i64;
    if arity >= 0 {
        len == arity
    } else {
        len >= -arity
    }
}

/// Registry of all available commands
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Create a new command registry and register all commands
    pub fn new() -> Self {
        let mut registry = CommandRegistry {
            commands: HashMap::new(),
        };

        registry.register(Arc::new(admin::PingCommand));
        registry.register(Arc::new(admin::FlushDbCommand));

        registry.register(Arc::new(keys::DelCommand));
        registry.register(Arc::new(keys::ExistsCommand));
        registry.register(Arc::new(keys::KeysCommand));
        registry.register(Arc::new(keys::TypeCommand));
        registry.register(Arc::new(keys::RenameCommand));
        registry.register(Arc::new(keys::RenameNxCommand));

        registry.register(Arc::new(string::GetCommand));
        registry.register(Arc::new(string::SetCommand));
        registry.register(Arc::new(string::SetNxCommand));
        registry.register(Arc::new(string::GetSetCommand));
        registry.register(Arc::new(string::StrLenCommand));

        registry
    }

    fn register(&mut self, command: Arc<dyn Command>) {
        self.commands.insert(command.name(), command);
    }

    /// Look up a command by its lowercase name
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.commands.get(name)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.keys().copied().collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
