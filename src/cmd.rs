//! Command dispatch against the process dictionary.
//!
//! A parsed request is an array of byte strings; the first selects the
//! command and the rest are its arguments, with exact arity. Anything else
//! is answered with ERR 1 and the connection stays up — only framing
//! violations cost a peer its connection.

use std::mem;

use crate::buf::Buf;
use crate::dict::HMap;
use crate::hash::str_hash;
use crate::wire::{self, ERR_UNKNOWN};

/// One stored record. The key bytes never change once inserted; the hash
/// lives in the dictionary node alongside.
pub struct Entry {
    pub key: Vec<u8>,
    pub val: Vec<u8>,
}

/// The process-wide key-value store. Owned by the event loop and lent to the
/// dispatcher one command at a time.
#[derive(Default)]
pub struct Store {
    map: HMap<Entry>,
}

impl Store {
    pub fn new() -> Self {
        Store { map: HMap::new() }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Value bytes for `key`, if present.
    pub fn get(&mut self, key: &[u8]) -> Option<&[u8]> {
        let hash = str_hash(key);
        self.map.lookup(hash, |e| e.key == key).map(|e| e.val.as_slice())
    }

    /// Insert or overwrite.
    pub fn set(&mut self, key: Vec<u8>, val: Vec<u8>) {
        let hash = str_hash(&key);
        match self.map.lookup_mut(hash, |e| e.key == key) {
            Some(entry) => entry.val = val,
            None => self.map.insert(hash, Entry { key, val }),
        }
    }

    /// Remove `key`, reporting whether it was present.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let hash = str_hash(key);
        self.map.remove(hash, |e| e.key == key).is_some()
    }

    /// Visit every key, in dictionary order (unspecified to clients).
    pub fn keys(&self, mut f: impl FnMut(&[u8])) {
        self.map.for_each(|e| f(&e.key));
    }
}

/// Execute one parsed request against `store`, appending the response value
/// to `out`. Framing (the u32 prefix and the size cap) belongs to the
/// caller.
pub fn do_request(store: &mut Store, mut cmd: Vec<Vec<u8>>, out: &mut Buf) {
    let verb = cmd.first().map(Vec::as_slice).unwrap_or(b"");
    match (verb, cmd.len()) {
        (b"get", 2) => match store.get(&cmd[1]) {
            Some(val) => wire::out_str(out, val),
            None => wire::out_nil(out),
        },
        (b"set", 3) => {
            let key = mem::take(&mut cmd[1]);
            let val = mem::take(&mut cmd[2]);
            store.set(key, val);
            wire::out_nil(out);
        }
        (b"del", 2) => {
            let removed = store.del(&cmd[1]);
            wire::out_int(out, i64::from(removed));
        }
        (b"keys", 1) => {
            wire::out_arr(out, store.len() as u32);
            store.keys(|key| wire::out_str(out, key));
        }
        _ => wire::out_err(out, ERR_UNKNOWN, "unknown command"),
    }
}
