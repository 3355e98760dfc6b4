//! Admin commands (PING, FLUSHDB)

use super::{Command, Db};
use crate::protocol::Reply;
use bytes::Bytes;

/// PING command
///
/// Syntax: PING [message]
pub struct PingCommand;

impl Command for PingCommand {
    fn execute(&self, _db: &Db, args: &[Bytes]) -> Reply {
        match args {
            [] => Reply::pong(),
            [message] => Reply::bulk(message.clone()),
            _ => Reply::arg_num_error("ping"),
        }
    }

    fn name(&self) -> &'static str {
        "ping"
    }

    fn arity(&self) -> i32 {
        -1
    }
}

/// FLUSHDB command - Remove all keys from the current database
///
/// Syntax: FLUSHDB
pub struct FlushDbCommand;

impl Command for FlushDbCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        db.data().clear();
        db.log_to_aof("flushdb", args);
        Reply::ok()
    }

    fn name(&self) -> &'static str {
        "flushdb"
    }

    fn arity(&self) -> i32 {
        -1
    }
}

#[cfg(test)]
mod tests {
    use crate::database::db::tests::{exec, test_db};
    use crate::protocol::Reply;

    #[test]
    fn test_ping() {
        let db = test_db();
        assert_eq!(exec(&db, &["PING"]), Reply::pong());
        assert_eq!(exec(&db, &["PING", "hello"]), Reply::bulk("hello"));
        assert_eq!(exec(&db, &["PING", "a", "b"]), Reply::arg_num_error("ping"));
    }

    #[test]
    fn test_flushdb() {
        let db = test_db();
        exec(&db, &["SET", "a", "1"]);
        exec(&db, &["SET", "b", "2"]);
        assert_eq!(exec(&db, &["FLUSHDB"]), Reply::ok());
        assert!(db.data().is_empty());
    }
}
