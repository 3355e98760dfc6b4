//! String commands (GET, SET, SETNX, GETSET, STRLEN)

use super::{Command, Db};
use crate::protocol::Reply;
use bytes::Bytes;

/// GET command - Get the value of a key
///
/// Syntax: GET key
pub struct GetCommand;

impl Command for GetCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        match db.data().get(&args[0]) {
            Some(value) => Reply::bulk(value),
            None => Reply::null_bulk(),
        }
    }

    fn name(&self) -> &'static str {
        "get"
    }

    fn arity(&self) -> i32 {
        2
    }
}

/// SET command - Set a key to a value
///
/// Syntax: SET key value
pub struct SetCommand;

impl Command for SetCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        db.data().put(args[0].clone(), args[1].clone());
        db.log_to_aof("set", args);
        Reply::ok()
    }

    fn name(&self) -> &'static str {
        "set"
    }

    fn arity(&self) -> i32 {
        3
    }
}

/// SETNX command - Set a key only if it does not exist
///
/// Syntax: SETNX key value
pub struct SetNxCommand;

impl Command for SetNxCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let inserted = db.data().put_if_absent(args[0].clone(), args[1].clone());
        if inserted > 0 {
            db.log_to_aof("setnx", args);
        }
        Reply::integer(inserted as i64)
    }

    fn name(&self) -> &'static str {
        "setnx"
    }

    fn arity(&self) -> i32 {
        3
    }
}

/// GETSET command - Set a key and return its previous value
///
/// Syntax: GETSET key value
pub struct GetSetCommand;

impl Command for GetSetCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let old = db.data().swap(args[0].clone(), args[1].clone());
        db.log_to_aof("getset", args);
        match old {
            Some(value) => Reply::bulk(value),
            None => Reply::null_bulk(),
        }
    }

    fn name(&self) -> &'static str {
        "getset"
    }

    fn arity(&self) -> i32 {
        3
    }
}

/// STRLEN command - Length of the value, 0 for a missing key
///
/// Syntax: STRLEN key
pub struct StrLenCommand;

impl Command for StrLenCommand {
    fn execute(&self, db: &Db, args: &[Bytes]) -> Reply {
        let len = db.data().get(&args[0]).map_or(0, |value| value.len());
        Reply::integer(len as i64)
    }

    fn name(&self) -> &'static str {
        "strlen"
    }

    fn arity(&self) -> i32 {
        2
    }
}
