//! Key space commands (DEL, EXISTS, KEYS, TYPE, RENAME, RENAMENX)

use super::{Command, Db};
use crate::protocol::Reply;
use crate::store::Pattern;
use bytes::Bytes;

/// DEL command - Delete one or more keys
///
/// Syntax: DEL key [key ...]
pub struct DelCommand;

impl Command for DelCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let deleted: usize = args.iter().map(|key| db.data().remove(key)).sum();

        // Log to AOF only when the keyspace changed
        if deleted > 0 {
            db.log_to_aof("del", args);
        }

        Reply::integer(deleted as i64)
    }

    fn name(&self) -> &'static str {
        "del"
    }

    fn arity(&self) -> i32 {
        -2
    }
}

/// EXISTS command - Count how many of the given keys exist
///
/// Syntax: EXISTS key [key ...]
pub struct ExistsCommand;

impl Command for ExistsCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let count = args.iter().filter(|key| db.data().contains(key)).count();
        Reply::integer(count as i64)
    }

    fn name(&self) -> &'static str {
        "exists"
    }

    fn arity(&self) -> i32 {
        -2
    }
}

/// KEYS command - Find all keys matching a glob pattern
///
/// Syntax: KEYS pattern
pub struct KeysCommand;

impl Command for KeysCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let pattern = Pattern::compile(&args[0]);
        let mut matching = Vec::new();
        db.data().for_each(|key, _| {
            if pattern.is_match(key) {
                matching.push(key.clone());
            }
            true
        });
        Reply::multi_bulk(matching)
    }

    fn name(&self) -> &'static str {
        "keys"
    }

    fn arity(&self) -> i32 {
        2
    }
}

/// TYPE command
///
/// Only string values exist, so the answer is `string` or `none`.
pub struct TypeCommand;

impl Command for TypeCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        if db.data().contains(&args[0]) {
            Reply::status("string")
        } else {
            Reply::status("none")
        }
    }

    fn name(&self) -> &'static str {
        "type"
    }

    fn arity(&self) -> i32 {
        2
    }
}

/// RENAME command - Move a value to a new key, overwriting it
///
/// Syntax: RENAME key newkey
pub struct RenameCommand;

impl Command for RenameCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        match db.data().rename(&args[0], args[1].clone(), false) {
            None => Reply::error("ERR no such key"),
            Some(_) => {
                db.log_to_aof("rename", args);
                Reply::ok()
            }
        }
    }

    fn name(&self) -> &'static str {
        "rename"
    }

    fn arity(&self) -> i32 {
        3
    }
}

/// RENAMENX command - Rename only if the new key does not exist
///
/// Syntax: RENAMENX key newkey
pub struct RenameNxCommand;

impl Command for RenameNxCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        match db.data().rename(&args[0], args[1].clone(), true) {
            None => Reply::error("ERR no such key"),
            Some(false) => Reply::integer(0),
            Some(true) => {
                db.log_to_aof("renamenx", args);
                Reply::integer(1)
            }
        }
    }

    fn name(&self) -> &'static str {
        "renamenx"
    }

    fn arity(&self) -> i32 {
        3
    }
}

#[cfg(test)]
mod tests {
    use crate::database::db::tests::{exec, test_db};
    use crate::protocol::Reply;
    use bytes::Bytes;

    #[test]
    fn test_del() {
        let db = test_db();
        exec(&db, &["SET", "key1", "value1"]);
        exec(&db, &["SET", "key2", "value2"]);

        let result = exec(&db, &["DEL", "key1", "key2", "key3"]);
        assert_eq!(result, Reply::integer(2));
        assert_eq!(exec(&db, &["DEL", "key1"]), Reply::integer(0));
    }

    #[test]
    fn test_exists_counts_duplicates() {
        let db = test_db();
        exec(&db, &["SET", "key1", "value1"]);

        assert_eq!(exec(&db, &["EXISTS", "key1", "key2"]), Reply::integer(1));
        assert_eq!(exec(&db, &["EXISTS", "key1", "key1"]), Reply::integer(2));
    }

    #[test]
    fn test_keys() {
        let db = test_db();
        exec(&db, &["SET", "user:1", "a"]);
        exec(&db, &["SET", "user:2", "b"]);
        exec(&db, &["SET", "session:1", "c"]);

        let Reply::MultiBulk(items) = exec(&db, &["KEYS", "user:*"]) else {
            panic!("expected multi bulk");
        };
        let mut keys: Vec<Bytes> = items.into_iter().flatten().collect();
        keys.sort();
        assert_eq!(keys, vec![Bytes::from("user:1"), Bytes::from("user:2")]);

        assert_eq!(exec(&db, &["KEYS", "nothing*"]), Reply::empty_multi_bulk());
    }

    #[test]
    fn test_type() {
        let db = test_db();
        exec(&db, &["SET", "k", "v"]);
        assert_eq!(exec(&db, &["TYPE", "k"]), Reply::status("string"));
        assert_eq!(exec(&db, &["TYPE", "missing"]), Reply::status("none"));
    }

    #[test]
    fn test_rename() {
        let db = test_db();
        assert_eq!(exec(&db, &["RENAME", "a", "b"]), Reply::error("ERR no such key"));

        exec(&db, &["SET", "a", "1"]);
        exec(&db, &["SET", "b", "2"]);
        assert_eq!(exec(&db, &["RENAME", "a", "b"]), Reply::ok());
        assert_eq!(exec(&db, &["GET", "a"]), Reply::null_bulk());
        assert_eq!(exec(&db, &["GET", "b"]), Reply::bulk("1"));
    }

    #[test]
    fn test_renamenx() {
        let db = test_db();
        exec(&db, &["SET", "a", "1"]);
        exec(&db, &["SET", "b", "2"]);

        assert_eq!(exec(&db, &["RENAMENX", "a", "b"]), Reply::integer(0));
        assert_eq!(exec(&db, &["GET", "b"]), Reply::bulk("2"));

        assert_eq!(exec(&db, &["RENAMENX", "a", "c"]), Reply::integer(1));
        assert_eq!(exec(&db, &["GET", "c"]), Reply::bulk("1"));
        assert_eq!(exec(&db, &["RENAMENX", "a", "d"]), Reply::error("ERR no such key"));
    }
}
