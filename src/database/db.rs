//! A single logical database

use super::registry::{arity_ok, CommandRegistry};
use crate::aof::AofSink;
use crate::protocol::Reply;
use crate::store::Dict;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// One numbered keyspace with its own dictionary and AOF sink
pub struct Db {
    index: usize,
    data: Dict,
    aof: Option<AofSink>,
    registry: Arc<CommandRegistry>,
}

impl Db {
    pub fn new(index: usize, registry: Arc<CommandRegistry>) -> Self {
        Db {
            index,
            data: Dict::new(),
            aof: None,
            registry,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &Dict {
        &self.data
    }

    /// Start appending mutations to the AOF
    pub(crate) fn attach_aof(&mut self, sink: AofSink) {
        self.aof = Some(sink);
    }

    /// Execute a full command line, name included
    pub fn exec(&self, cmd_line: &[Bytes]) -> Reply {
        let Some(first) = cmd_line.first() else {
            return Reply::error("ERR empty command");
        };
        let name = String::from_utf8_lossy(first).to_ascii_lowercase();

        let Some(command) = self.registry.get(&name) else {
            debug!("Unknown command: {}", name);
            return Reply::error(format!("ERR unknown command '{}'", name));
        };

        if !arity_ok(command.arity(), cmd_line.len()) {
            return Reply::arg_num_error(&name);
        }

        command.execute(self, &cmd_line[1..])
    }

    /// Append `name args...` to the AOF if enabled
    pub(crate) fn log_to_aof(&self, name: &'static str, args: &[Bytes]) {
        if let Some(sink) = &self.aof {
            let mut cmd_line = Vec::with_capacity(args.len() + 1);
            cmd_line.push(Bytes::from_static(name.as_bytes()));
            cmd_line.extend_from_slice(args);
            sink.add(cmd_line);
        }
    }
}
