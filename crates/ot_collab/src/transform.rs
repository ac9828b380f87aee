//! Operational transformation for concurrent text operations.
//!
//! [`transform`] takes two operations authored against the same document
//! version and returns `(a', b')` such that applying `a` then `b'` yields the
//! same text as applying `b` then `a'`. [`rebase`] is the one-sided form:
//! it rewrites an operation as if another one had already been applied.
//!
//! # Rules
//!
//! - **Insert vs. insert**: the insert at the higher position shifts right by
//!   the other's length. At equal positions the earlier timestamp goes first;
//!   ties fall back to user ID and then operation ID, so the order is total
//!   and identical from both sides.
//! - **Delete vs. delete**: each endpoint is mapped through the other delete.
//!   Overlapping ranges remove their union exactly once; a delete fully
//!   contained in another becomes an empty range.
//! - **Insert vs. delete**: the insert collapses onto the delete start when it
//!   falls inside the deleted range. The delete shifts around inserts before
//!   it, but an insert strictly inside the delete has no single-range rewrite
//!   that keeps the inserted text, so that pair is a [`TransformGap`].
//! - **Format, cursor, selection, comment**: coordinates map through content
//!   changes; format ranges widen when text is inserted strictly inside.
//! - Anything transformed against a non-content operation is unchanged.

use crate::ids::OpId;
use crate::operation::{char_len, OpData, OpKind, Operation};
use thiserror::Error;

/// An operation pair with no transform rule.
///
/// Never dropped silently: the document rejects the operation and the merge
/// path reports it as a conflict.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No transform rule for {incoming_kind} {incoming} against {applied_kind} {applied}: {reason}")]
pub struct TransformGap {
    pub incoming: OpId,
    pub incoming_kind: OpKind,
    pub applied: OpId,
    pub applied_kind: OpKind,
    pub reason: String,
}

/// Transform two concurrent operations against each other.
pub fn transform(a: &Operation, b: &Operation) -> Result<(Operation, Operation), TransformGap> {
    let a_prime = rebase(a, b)?;
    let b_prime = rebase(b, a)?;
    Ok((a_prime, b_prime))
}

/// Rewrite `op` so it applies on top of a document that already contains
/// `applied`. Both must have been authored against the same state.
pub fn rebase(op: &Operation, applied: &Operation) -> Result<Operation, TransformGap> {
    match &applied.data {
        OpData::Insert { position, text } => rebase_over_insert(op, applied, *position, char_len(text)),
        OpData::Delete { start, end } => Ok(rebase_over_delete(op, *start, *end)),
        OpData::Format { .. }
        | OpData::Cursor { .. }
        | OpData::Selection { .. }
        | OpData::Comment { .. }
        | OpData::Lock { .. }
        | OpData::Unlock { .. } => Ok(op.clone()),
    }
}

/// Rebase `op` over a sequence of already-applied operations, in order.
pub fn rebase_all<'a>(
    op: &Operation,
    history: impl IntoIterator<Item = &'a Operation>,
) -> Result<Operation, TransformGap> {
    let mut current = op.clone();
    for applied in history {
        current = rebase(&current, applied)?;
    }
    Ok(current)
}

/// Whether `a` sorts before `b` when two inserts target the same position.
pub fn precedes(a: &Operation, b: &Operation) -> bool {
    (a.timestamp, &a.user_id, a.id) < (b.timestamp, &b.user_id, b.id)
}

/// Map a caret-like position through an applied operation.
///
/// A caret sitting exactly at a remote insert stays in front of it.
pub fn map_position(position: usize, applied: &Operation) -> usize {
    match &applied.data {
        OpData::Insert { position: at, text } => point_over_insert(position, *at, char_len(text)),
        OpData::Delete { start, end } => point_over_delete(position, *start, *end),
        _ => position,
    }
}

/// Map a `start..end` range through an applied operation.
pub fn map_range(start: usize, end: usize, applied: &Operation) -> (usize, usize) {
    match &applied.data {
        OpData::Insert { position, text } => range_over_insert(start, end, *position, char_len(text)),
        OpData::Delete {
            start: del_start,
            end: del_end,
        } => (
            point_over_delete(start, *del_start, *del_end),
            point_over_delete(end, *del_start, *del_end),
        ),
        _ => (start, end),
    }
}

fn rebase_over_insert(
    op: &Operation,
    applied: &Operation,
    at: usize,
    len: usize,
) -> Result<Operation, TransformGap> {
    let data = match &op.data {
        OpData::Insert { position, text } => {
            let shifted = at < *position || (at == *position && precedes(applied, op));
            OpData::Insert {
                position: if shifted { position + len } else { *position },
                text: text.clone(),
            }
        }
        OpData::Delete { start, end } => {
            if at <= *start {
                OpData::Delete {
                    start: start + len,
                    end: end + len,
                }
            } else if at >= *end {
                op.data.clone()
            } else {
                return Err(TransformGap {
                    incoming: op.id,
                    incoming_kind: op.kind(),
                    applied: applied.id,
                    applied_kind: applied.kind(),
                    reason: format!(
                        "insert at {} falls strictly inside delete {}..{}",
                        at, start, end
                    ),
                });
            }
        }
        OpData::Format {
            start,
            end,
            attribute,
            value,
        } => {
            let (start, end) = range_over_insert(*start, *end, at, len);
            OpData::Format {
                start,
                end,
                attribute: attribute.clone(),
                value: value.clone(),
            }
        }
        OpData::Cursor { position } => OpData::Cursor {
            position: point_over_insert(*position, at, len),
        },
        OpData::Selection { start, end } => {
            let (start, end) = range_over_insert(*start, *end, at, len);
            OpData::Selection { start, end }
        }
        OpData::Comment {
            comment_id,
            position,
            text,
        } => OpData::Comment {
            comment_id: comment_id.clone(),
            position: point_over_insert(*position, at, len),
            text: text.clone(),
        },
        OpData::Lock { .. } | OpData::Unlock { .. } => op.data.clone(),
    };
    Ok(op.with_data(data))
}

fn rebase_over_delete(op: &Operation, del_start: usize, del_end: usize) -> Operation {
    let map = |p: usize| point_over_delete(p, del_start, del_end);
    let data = match &op.data {
        OpData::Insert { position, text } => OpData::Insert {
            position: map(*position),
            text: text.clone(),
        },
        OpData::Delete { start, end } => OpData::Delete {
            start: map(*start),
            end: map(*end),
        },
        OpData::Format {
            start,
            end,
            attribute,
            value,
        } => OpData::Format {
            start: map(*start),
            end: map(*end),
            attribute: attribute.clone(),
            value: value.clone(),
        },
        OpData::Cursor { position } => OpData::Cursor {
            position: map(*position),
        },
        OpData::Selection { start, end } => OpData::Selection {
            start: map(*start),
            end: map(*end),
        },
        OpData::Comment {
            comment_id,
            position,
            text,
        } => OpData::Comment {
            comment_id: comment_id.clone(),
            position: map(*position),
            text: text.clone(),
        },
        OpData::Lock { .. } | OpData::Unlock { .. } => op.data.clone(),
    };
    op.with_data(data)
}

fn point_over_insert(position: usize, at: usize, len: usize) -> usize {
    if at < position {
        position + len
    } else {
        position
    }
}

/// A reversed range deletes nothing.
fn point_over_delete(position: usize, start: usize, end: usize) -> usize {
    if position <= start {
        position
    } else if position >= end {
        position - end.saturating_sub(start)
    } else {
        start
    }
}

/// Inserts at or before `start` shift the whole range; inserts strictly
/// inside widen it.
fn range_over_insert(start: usize, end: usize, at: usize, len: usize) -> (usize, usize) {
    let new_start = if at <= start { start + len } else { start };
    let new_end = if at < end { end + len } else { end };
    (new_start, new_end.max(new_start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn apply(text: &str, op: &Operation) -> String {
        let mut chars: Vec<char> = text.chars().collect();
        match &op.data {
            OpData::Insert { position, text } => {
                let tail = chars.split_off(*position);
                chars.extend(text.chars());
                chars.extend(tail);
            }
            OpData::Delete { start, end } => {
                chars.drain(*start..*end);
            }
            _ => {}
        }
        chars.into_iter().collect()
    }

    fn converge(base: &str, a: &Operation, b: &Operation) -> (String, String) {
        let (a_prime, b_prime) = transform(a, b).unwrap();
        let ab = apply(&apply(base, a), &b_prime);
        let ba = apply(&apply(base, b), &a_prime);
        (ab, ba)
    }

    fn at(seconds: i64) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + Duration::seconds(seconds)
    }

    #[test]
    fn test_insert_insert_different_positions() {
        let a = Operation::insert("alice", 0, 0, "Hello ");
        let b = Operation::insert("bob", 0, 3, "XY");
        let (ab, ba) = converge("abcdef", &a, &b);
        assert_eq!(ab, ba);
        assert_eq!(ab, "Hello abcXYdef");
    }

    #[test]
    fn test_insert_insert_tie_earlier_timestamp_first() {
        let early = Operation::insert("zed", 0, 2, "E").with_timestamp(at(0));
        let late = Operation::insert("amy", 0, 2, "L").with_timestamp(at(5));

        let (early_prime, late_prime) = transform(&early, &late).unwrap();
        assert_eq!(early_prime.span(), Some((2, 2)));
        assert_eq!(late_prime.span(), Some((3, 3)));

        // Same answer when the arguments are swapped
        let (late_prime2, early_prime2) = transform(&late, &early).unwrap();
        assert_eq!(early_prime2, early_prime);
        assert_eq!(late_prime2, late_prime);

        let (ab, ba) = converge("abcd", &early, &late);
        assert_eq!(ab, ba);
        assert_eq!(ab, "abELcd");
    }

    #[test]
    fn test_insert_insert_tie_same_timestamp_uses_user() {
        let ts = at(0);
        let a = Operation::insert("alice", 0, 1, "A").with_timestamp(ts);
        let b = Operation::insert("bob", 0, 1, "B").with_timestamp(ts);
        let (ab, ba) = converge("xy", &a, &b);
        assert_eq!(ab, ba);
        assert_eq!(ab, "xABy");
    }

    #[test]
    fn test_delete_delete_disjoint() {
        let a = Operation::delete("alice", 0, 0, 2);
        let b = Operation::delete("bob", 0, 4, 6);
        let (ab, ba) = converge("abcdefgh", &a, &b);
        assert_eq!(ab, ba);
        assert_eq!(ab, "cdgh");
    }

    #[test]
    fn test_delete_delete_overlapping_removes_union_once() {
        let a = Operation::delete("alice", 0, 1, 4);
        let b = Operation::delete("bob", 0, 2, 5);
        let (ab, ba) = converge("ABCDE", &a, &b);
        assert_eq!(ab, ba);
        assert_eq!(ab, "A");
    }

    #[test]
    fn test_delete_fully_contains_other() {
        let outer = Operation::delete("alice", 0, 1, 5);
        let inner = Operation::delete("bob", 0, 2, 4);

        let (outer_prime, inner_prime) = transform(&outer, &inner).unwrap();
        // Inner delete becomes an empty range after the outer one
        assert!(inner_prime.is_noop());
        assert_eq!(outer_prime.span(), Some((1, 3)));

        let (ab, ba) = converge("0123456", &outer, &inner);
        assert_eq!(ab, ba);
        assert_eq!(ab, "056");
    }

    #[test]
    fn test_identical_deletes() {
        let a = Operation::delete("alice", 0, 2, 4);
        let b = Operation::delete("bob", 0, 2, 4);
        let (ab, ba) = converge("abcdef", &a, &b);
        assert_eq!(ab, "abef");
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_insert_before_delete() {
        let ins = Operation::insert("alice", 0, 1, "++");
        let del = Operation::delete("bob", 0, 2, 4);
        let (ab, ba) = converge("abcdef", &ins, &del);
        assert_eq!(ab, ba);
        assert_eq!(ab, "a++bef");
    }

    #[test]
    fn test_insert_after_delete() {
        let ins = Operation::insert("alice", 0, 5, "!");
        let del = Operation::delete("bob", 0, 0, 2);
        let (ab, ba) = converge("abcdef", &ins, &del);
        assert_eq!(ab, ba);
        assert_eq!(ab, "cde!f");
    }

    #[test]
    fn test_insert_at_delete_boundaries() {
        let del = Operation::delete("bob", 0, 2, 4);
        for pos in [2, 4] {
            let ins = Operation::insert("alice", 0, pos, "X");
            let (ab, ba) = converge("abcdef", &ins, &del);
            assert_eq!(ab, ba, "insert at {pos}");
            assert_eq!(ab, "abXef");
        }
    }

    #[test]
    fn test_insert_inside_delete_is_gap() {
        let ins = Operation::insert("alice", 0, 3, "X");
        let del = Operation::delete("bob", 0, 2, 5);

        let err = transform(&ins, &del).unwrap_err();
        assert_eq!(err.incoming, del.id);
        assert_eq!(err.incoming_kind, OpKind::Delete);
        assert_eq!(err.applied_kind, OpKind::Insert);

        // The insert side alone is well defined: it collapses onto the delete start
        let ins_prime = rebase(&ins, &del).unwrap();
        assert_eq!(ins_prime.span(), Some((2, 2)));
    }

    #[test]
    fn test_format_widens_on_inner_insert() {
        let fmt = Operation::format("alice", 0, 2, 6, "bold", serde_json::json!(true));
        let ins = Operation::insert("bob", 0, 4, "xyz");
        let rebased = rebase(&fmt, &ins).unwrap();
        assert_eq!(rebased.span(), Some((2, 9)));

        let before = Operation::insert("bob", 0, 2, "xyz");
        assert_eq!(rebase(&fmt, &before).unwrap().span(), Some((5, 9)));

        let after = Operation::insert("bob", 0, 6, "xyz");
        assert_eq!(rebase(&fmt, &after).unwrap().span(), Some((2, 6)));
    }

    #[test]
    fn test_format_shrinks_on_delete() {
        let fmt = Operation::format("alice", 0, 2, 6, "bold", serde_json::json!(true));
        let del = Operation::delete("bob", 0, 4, 8);
        assert_eq!(rebase(&fmt, &del).unwrap().span(), Some((2, 4)));
    }

    #[test]
    fn test_non_content_ops_are_transparent() {
        let ins = Operation::insert("alice", 0, 3, "abc");
        for other in [
            Operation::lock("bob", 0, "intro"),
            Operation::unlock("bob", 0, "intro"),
            Operation::cursor("bob", 0, 1),
            Operation::comment("bob", 0, 1, "hm"),
            Operation::format("bob", 0, 0, 9, "italic", serde_json::json!(true)),
        ] {
            assert_eq!(rebase(&ins, &other).unwrap(), ins);
        }
    }

    #[test]
    fn test_cursor_and_comment_mapping() {
        let ins = Operation::insert("bob", 0, 2, "xx");
        let cursor = Operation::cursor("alice", 0, 5);
        assert_eq!(rebase(&cursor, &ins).unwrap().span(), Some((7, 7)));

        let at_insert = Operation::cursor("alice", 0, 2);
        assert_eq!(rebase(&at_insert, &ins).unwrap().span(), Some((2, 2)));

        let del = Operation::delete("bob", 0, 1, 4);
        let comment = Operation::comment("alice", 0, 3, "note");
        assert_eq!(rebase(&comment, &del).unwrap().span(), Some((1, 1)));
    }

    #[test]
    fn test_rebase_all_folds_in_order() {
        let op = Operation::insert("alice", 0, 4, "!");
        let history = vec![
            Operation::insert("bob", 0, 0, "ab"),
            Operation::delete("carol", 1, 0, 1),
        ];
        let rebased = rebase_all(&op, &history).unwrap();
        assert_eq!(rebased.span(), Some((5, 5)));
    }

    #[test]
    fn test_map_helpers() {
        let ins = Operation::insert("bob", 0, 2, "xyz");
        assert_eq!(map_position(1, &ins), 1);
        assert_eq!(map_position(3, &ins), 6);
        assert_eq!(map_range(1, 4, &ins), (1, 7));

        let del = Operation::delete("bob", 0, 2, 5);
        assert_eq!(map_position(4, &del), 2);
        assert_eq!(map_position(7, &del), 4);
        assert_eq!(map_range(0, 6, &del), (0, 3));
    }

    #[test]
    fn test_reversed_delete_moves_nothing() {
        let reversed = Operation::delete("bob", 0, 5, 2);
        assert_eq!(map_position(3, &reversed), 3);
        assert_eq!(map_position(8, &reversed), 8);
        assert_eq!(map_range(1, 9, &reversed), (1, 9));

        let insert = Operation::insert("alice", 0, 8, "x");
        let (insert_prime, reversed_prime) = transform(&insert, &reversed).unwrap();
        assert_eq!(insert_prime.span(), Some((8, 8)));
        assert_eq!(reversed_prime.span(), Some((5, 2)));
    }
}
