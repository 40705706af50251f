//! Structural check of client supplied v1 updates and state vectors.
//!
//! yrs reads strings without UTF-8 validation and sizes some allocations
//! from counts taken off the wire. Everything a client sends is walked here
//! first, with the same layout yrs decodes, so malformed input is rejected
//! before yrs sees it.

use yrs::encoding::read::{Cursor, Read};

const BLOCK_GC: u8 = 0;
const BLOCK_SKIP: u8 = 10;
const HAS_ORIGIN: u8 = 0b1000_0000;
const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
const HAS_PARENT_SUB: u8 = 0b0010_0000;

const CONTENT_DELETED: u8 = 1;
const CONTENT_JSON: u8 = 2;
const CONTENT_BINARY: u8 = 3;
const CONTENT_STRING: u8 = 4;
const CONTENT_EMBED: u8 = 5;
const CONTENT_FORMAT: u8 = 6;
const CONTENT_TYPE: u8 = 7;
const CONTENT_ANY: u8 = 8;
const CONTENT_DOC: u8 = 9;
const CONTENT_MOVE: u8 = 11;

const TYPE_XML_ELEMENT: u8 = 3;

/// Nesting limit for `Any` values; yrs decodes them recursively.
const MAX_ANY_DEPTH: usize = 64;

#[derive(Debug)]
pub enum UpdateCheckError {
    Decode(yrs::encoding::read::Error),
    InvalidUtf8,
    /// A count larger than the bytes left could possibly hold
    CountTooLarge(u32),
    TooDeep,
    UnknownContent(u8),
    UnknownTypeRef(u8),
    UnknownAny(u8),
}

impl std::fmt::Display for UpdateCheckError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateCheckError::Decode(e) => write!(f, "{}", e),
            UpdateCheckError::InvalidUtf8 => write!(f, "string is not valid UTF-8"),
            UpdateCheckError::CountTooLarge(n) => write!(f, "count {} exceeds payload", n),
            UpdateCheckError::TooDeep => write!(f, "value nested deeper than {}", MAX_ANY_DEPTH),
            UpdateCheckError::UnknownContent(r) => write!(f, "unknown content ref {}", r),
            UpdateCheckError::UnknownTypeRef(r) => write!(f, "unsupported type ref {}", r),
            UpdateCheckError::UnknownAny(t) => write!(f, "unknown value tag {}", t),
        }
    }
}

impl std::error::Error for UpdateCheckError {}

impl From<yrs::encoding::read::Error> for UpdateCheckError {
    fn from(e: yrs::encoding::read::Error) -> Self {
        UpdateCheckError::Decode(e)
    }
}

/// Check a v1 update: block headers, contents and the delete set.
pub fn check_update_v1(update: &[u8]) -> Result<(), UpdateCheckError> {
    let mut checker = Checker { cursor: Cursor::new(update) };

    // num structs, client, clock
    let clients = checker.count(3)?;
    for _ in 0..clients {
        let blocks = checker.count(1)?;
        let _client: u32 = checker.cursor.read_var()?;
        let _clock: u32 = checker.cursor.read_var()?;
        for _ in 0..blocks {
            checker.block()?;
        }
    }

    let clients = checker.count(2)?;
    for _ in 0..clients {
        let _client: u32 = checker.cursor.read_var()?;
        let ranges = checker.count(2)?;
        for _ in 0..ranges {
            let _clock: u32 = checker.cursor.read_var()?;
            let _len: u32 = checker.cursor.read_var()?;
        }
    }
    Ok(())
}

/// Check a v1 state vector.
pub fn check_state_vector_v1(state_vector: &[u8]) -> Result<(), UpdateCheckError> {
    let mut checker = Checker { cursor: Cursor::new(state_vector) };
    let entries = checker.count(2)?;
    for _ in 0..entries {
        let _client: u64 = checker.cursor.read_var()?;
        let _clock: u32 = checker.cursor.read_var()?;
    }
    Ok(())
}

struct Checker<'a> {
    cursor: Cursor<'a>,
}

impl<'a> Checker<'a> {
    fn remaining(&self) -> usize {
        self.cursor.buf.len().saturating_sub(self.cursor.next)
    }

    /// Read a count of entries that take at least `min_entry_len` bytes each.
    fn count(&mut self, min_entry_len: usize) -> Result<usize, UpdateCheckError> {
        let n: u32 = self.cursor.read_var()?;
        if (n as usize).saturating_mul(min_entry_len) > self.remaining() {
            return Err(UpdateCheckError::CountTooLarge(n));
        }
        Ok(n as usize)
    }

    fn string(&mut self) -> Result<(), UpdateCheckError> {
        let buf = self.cursor.read_buf()?;
        std::str::from_utf8(buf).map_err(|_| UpdateCheckError::InvalidUtf8)?;
        Ok(())
    }

    fn id(&mut self) -> Result<(), UpdateCheckError> {
        let _client: u32 = self.cursor.read_var()?;
        let _clock: u32 = self.cursor.read_var()?;
        Ok(())
    }

    fn block(&mut self) -> Result<(), UpdateCheckError> {
        let info = self.cursor.read_u8()?;
        if info == BLOCK_GC || info == BLOCK_SKIP {
            let _len: u32 = self.cursor.read_var()?;
            return Ok(());
        }

        if info & HAS_ORIGIN != 0 {
            self.id()?;
        }
        if info & HAS_RIGHT_ORIGIN != 0 {
            self.id()?;
        }
        if info & (HAS_ORIGIN | HAS_RIGHT_ORIGIN) == 0 {
            let named: u32 = self.cursor.read_var()?;
            if named == 1 {
                self.string()?;
            } else {
                self.id()?;
            }
            if info & HAS_PARENT_SUB != 0 {
                self.string()?;
            }
        }
        self.content(info & 0b1111)
    }

    fn content(&mut self, content_ref: u8) -> Result<(), UpdateCheckError> {
        match content_ref {
            CONTENT_DELETED => {
                let _len: u32 = self.cursor.read_var()?;
            }
            CONTENT_JSON => {
                // yrs reads one string past the count
                let n = self.count(1)?;
                for _ in 0..=n {
                    self.string()?;
                }
            }
            CONTENT_BINARY => {
                self.cursor.read_buf()?;
            }
            CONTENT_STRING | CONTENT_EMBED => self.string()?,
            CONTENT_FORMAT => {
                self.string()?;
                self.string()?;
            }
            CONTENT_TYPE => match self.cursor.read_u8()? {
                TYPE_XML_ELEMENT => self.string()?,
                0 | 1 | 2 | 4 | 5 | 6 | 9 | 15 => {}
                other => return Err(UpdateCheckError::UnknownTypeRef(other)),
            },
            CONTENT_ANY => {
                let n = self.count(1)?;
                for _ in 0..n {
                    self.any(0)?;
                }
            }
            CONTENT_DOC => {
                self.string()?;
                self.any(0)?;
            }
            CONTENT_MOVE => {
                let flags: i32 = self.cursor.read_var()?;
                self.id()?;
                if flags & 1 == 0 {
                    self.id()?;
                }
            }
            other => return Err(UpdateCheckError::UnknownContent(other)),
        }
        Ok(())
    }

    fn any(&mut self, depth: usize) -> Result<(), UpdateCheckError> {
        if depth > MAX_ANY_DEPTH {
            return Err(UpdateCheckError::TooDeep);
        }
        match self.cursor.read_u8()? {
            127 | 126 | 121 | 120 => {}
            125 => {
                let _n: i64 = self.cursor.read_var()?;
            }
            124 => {
                self.cursor.read_exact(4)?;
            }
            123 | 122 => {
                self.cursor.read_exact(8)?;
            }
            119 => self.string()?,
            118 => {
                let n = self.count(2)?;
                for _ in 0..n {
                    self.string()?;
                    self.any(depth + 1)?;
                }
            }
            117 => {
                let n = self.count(1)?;
                for _ in 0..n {
                    self.any(depth + 1)?;
                }
            }
            116 => {
                self.cursor.read_buf()?;
            }
            other => return Err(UpdateCheckError::UnknownAny(other)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::ydoc::tests::client_insert;
    use crate::ws::ydoc::{OUTPUTS_NAME, TEXT_NAME};
    use std::sync::Arc;
    use yrs::updates::encoder::Encode;
    use yrs::{Any, Doc, Map, ReadTxn, StateVector, Text, Transact};

    /// One client (id 1, clock 0) inserting `content` into the root text.
    fn text_insert(content: &[u8]) -> Vec<u8> {
        let mut update = vec![1, 1, 1, 0, CONTENT_STRING, 1, TEXT_NAME.len() as u8];
        update.extend_from_slice(TEXT_NAME.as_bytes());
        update.push(content.len() as u8);
        update.extend_from_slice(content);
        update.push(0);
        update
    }

    #[test]
    fn accepts_editor_updates() {
        let doc = Doc::new();
        check_update_v1(&client_insert(&doc, 0, "print(1)")).unwrap();
        check_update_v1(&client_insert(&doc, 3, "ünïcode ✓")).unwrap();

        let text = doc.get_or_insert_text(TEXT_NAME);
        text.remove_range(&mut doc.transact_mut(), 0, 4);
        let full = doc.transact().encode_state_as_update_v1(&StateVector::default());
        check_update_v1(&full).unwrap();
        check_state_vector_v1(&doc.transact().state_vector().encode_v1()).unwrap();
    }

    #[test]
    fn accepts_output_map_values() {
        let doc = Doc::new();
        let outputs = doc.get_or_insert_map(OUTPUTS_NAME);
        {
            let mut txn = doc.transact_mut();
            outputs.insert(&mut txn, "stdout", "1\n");
            outputs.insert(&mut txn, "ts", 1_700_000_000_000.0);
            outputs.insert(&mut txn, "ok", true);
            outputs.insert(
                &mut txn,
                "runs",
                Any::Array(Arc::from(vec![Any::Number(1.0), Any::from("python")])),
            );
        }
        let full = doc.transact().encode_state_as_update_v1(&StateVector::default());
        check_update_v1(&full).unwrap();
    }

    #[test]
    fn hand_built_update_matches_the_yrs_layout() {
        check_update_v1(&text_insert(b"hello world")).unwrap();
    }

    #[test]
    fn rejects_invalid_utf8_in_text() {
        assert!(matches!(
            check_update_v1(&text_insert(b"hello w\xf4rld")),
            Err(UpdateCheckError::InvalidUtf8)
        ));
    }

    #[test]
    fn rejects_invalid_utf8_with_wide_client_id() {
        let update = [
            1, 1, 235, 147, 143, 215, 85, 0, 4, 1, 6, 109, 111, 110, 97, 99, 111, 11, 104, 101, 108,
            108, 111, 32, 119, 244, 114, 108, 100, 0,
        ];
        assert!(check_update_v1(&update).is_err());
    }

    #[test]
    fn rejects_counts_the_payload_cannot_hold() {
        assert!(matches!(
            check_update_v1(&[0xff, 0xff, 0xff, 0xff, 0x0f]),
            Err(UpdateCheckError::CountTooLarge(u32::MAX))
        ));
        // empty struct list, then a delete set claiming u32::MAX ranges
        assert!(matches!(
            check_update_v1(&[0, 1, 1, 0xff, 0xff, 0xff, 0xff, 0x0f]),
            Err(UpdateCheckError::CountTooLarge(_))
        ));
        assert!(matches!(
            check_state_vector_v1(&[0xff, 0xff, 0xff, 0xff, 0x0f]),
            Err(UpdateCheckError::CountTooLarge(_))
        ));
    }

    #[test]
    fn rejects_oversized_any_collections() {
        // one Any item whose value is a map claiming u32::MAX entries
        let mut update = vec![1, 1, 1, 0, CONTENT_ANY, 1, 7];
        update.extend_from_slice(b"outputs");
        update.extend_from_slice(&[1, 118, 0xff, 0xff, 0xff, 0xff, 0x0f, 0]);
        assert!(matches!(
            check_update_v1(&update),
            Err(UpdateCheckError::CountTooLarge(u32::MAX))
        ));
    }

    #[test]
    fn rejects_deeply_nested_values() {
        let mut update = vec![1, 1, 1, 0, CONTENT_ANY, 1, 7];
        update.extend_from_slice(b"outputs");
        update.push(1);
        for _ in 0..200 {
            update.extend_from_slice(&[117, 1]);
        }
        update.push(126);
        update.push(0);
        assert!(matches!(check_update_v1(&update), Err(UpdateCheckError::TooDeep)));
    }

    #[test]
    fn rejects_truncated_updates() {
        let full = text_insert(b"hello");
        assert!(matches!(
            check_update_v1(&full[..full.len() - 4]),
            Err(UpdateCheckError::Decode(_))
        ));
    }
}
