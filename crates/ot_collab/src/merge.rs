//! Conflict-aware merging of operations authored against an older version.
//!
//! [`merge_into`] takes a batch of operations a client produced, in order,
//! on top of `base_version`, and replays them over everything the document
//! recorded since. Edits that overlap a concurrent edit in a way the user
//! should see (two deletes over the same text, text typed into a range
//! someone else removed) are held back as [`Conflict`]s; the rest are
//! reconciled and applied. A held-back conflict is settled later with
//! [`resolve`].
//!
//! The batch is sequential on the author's side: operation `n` already
//! includes operations `0..n`. So batch members are never transformed
//! against each other. Instead the concurrent history is carried past each
//! applied batch member ([`Bridge`]).

use crate::document::Document;
use crate::error::{CollabError, CollabResult};
use crate::operation::{char_len, OpData, Operation};
use crate::transform::{self, TransformGap};
use serde::{Deserialize, Serialize};

/// Why two operations were reported instead of merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both operations delete some of the same text.
    OverlappingDeletes,
    /// One operation inserts text strictly inside a range the other deletes.
    InsertInsideDelete,
    /// No transform rule exists for the pair.
    TransformGap,
}

/// An incoming operation held back because of a concurrent edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    /// The operation as submitted
    pub incoming: Operation,
    /// The concurrent operation as recorded in the log
    pub concurrent: Operation,
    pub kind: ConflictKind,
    /// Version both operations were authored against
    pub base_version: u64,
}

/// Result of [`merge_into`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MergeOutcome {
    /// Reconciled operations as applied, in order
    pub merged: Vec<Operation>,
    /// Operations held back for the user to resolve
    pub conflicts: Vec<Conflict>,
    /// Operations the document refused for another reason
    pub rejected: Vec<(Operation, CollabError)>,
}

impl MergeOutcome {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.rejected.is_empty()
    }
}

/// How to settle a [`Conflict`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConflictResolution {
    /// Apply the incoming operation over the concurrent one.
    KeepMine,
    /// Drop the incoming operation.
    KeepTheirs,
    /// Apply a caller-supplied replacement instead.
    Merge(Operation),
}

/// Classify a pair of operations authored against the same state.
pub fn detect_conflict(incoming: &Operation, concurrent: &Operation) -> Option<ConflictKind> {
    match (&incoming.data, &concurrent.data) {
        (
            OpData::Delete { start: a_start, end: a_end },
            OpData::Delete { start: b_start, end: b_end },
        ) if a_start < b_end && b_start < a_end => Some(ConflictKind::OverlappingDeletes),
        (OpData::Insert { position, .. }, OpData::Delete { start, end })
        | (OpData::Delete { start, end }, OpData::Insert { position, .. })
            if start < position && position < end =>
        {
            Some(ConflictKind::InsertInsideDelete)
        }
        _ => None,
    }
}

/// Concurrent history carried forward across a sequential batch.
///
/// `chain[i]` is `raw[i]` rewritten past every batch member applied so far,
/// so the next batch member and the chain always share one coordinate frame.
///
/// `local_len` is the content length on the author's side: the base content
/// plus every batch member admitted so far.
#[derive(Debug)]
pub(crate) struct Bridge {
    raw: Vec<Operation>,
    chain: Vec<Operation>,
    local_len: usize,
}

impl Bridge {
    /// Capture the content history recorded after `base_version`.
    pub(crate) fn new(document: &Document, base_version: u64) -> CollabResult<Self> {
        document.check_base(base_version)?;
        let raw: Vec<Operation> = document
            .concurrent_with(base_version)
            .into_iter()
            .cloned()
            .collect();
        let local_len = document
            .content_len_at(base_version)
            .unwrap_or_else(|| document.len());
        Ok(Self {
            chain: raw.clone(),
            raw,
            local_len,
        })
    }

    /// Check the next batch member against the author's view of the content.
    ///
    /// An admitted operation counts toward the author's view whether or not
    /// it ends up applied, since later members were written assuming it.
    pub(crate) fn admit(&mut self, op: &Operation) -> CollabResult<()> {
        if let Some((start, end)) = op.span() {
            if start > end || end > self.local_len {
                return Err(CollabError::InvalidRange {
                    start,
                    end,
                    len: self.local_len,
                });
            }
        }
        self.local_len = self.local_len.saturating_add_signed(op.length_delta());
        Ok(())
    }

    /// First concurrent operation `op` conflicts with, in raw form.
    ///
    /// `op` is folded through the chain as it goes, so each pair is compared
    /// in the frame where both apply.
    pub(crate) fn find_conflict(&self, op: &Operation) -> Option<(&Operation, ConflictKind)> {
        let mut current = op.clone();
        for concurrent in &self.chain {
            if let Some(kind) = detect_conflict(&current, concurrent) {
                let raw = self.raw_op(concurrent.id).unwrap_or(concurrent);
                return Some((raw, kind));
            }
            // A gap here is reported by `reconcile`
            current = transform::rebase(&current, concurrent).ok()?;
        }
        None
    }

    /// The raw concurrent operation with this id.
    pub(crate) fn raw_op(&self, id: crate::ids::OpId) -> Option<&Operation> {
        self.raw.iter().find(|op| op.id == id)
    }

    /// Rewrite `op` past the whole chain.
    ///
    /// Returns the rewritten operation and the chain as it will look once
    /// that operation is applied. Nothing changes until [`commit`](Self::commit).
    ///
    /// A concurrent delete enclosing `op`'s insert is carried forward as two
    /// deletes around the inserted text.
    pub(crate) fn reconcile(
        &self,
        op: &Operation,
    ) -> Result<(Operation, Vec<Operation>), TransformGap> {
        let mut current = op.clone();
        let mut next_chain = Vec::with_capacity(self.chain.len());
        for concurrent in &self.chain {
            let op_prime = transform::rebase(&current, concurrent)?;
            match transform::rebase(concurrent, &current) {
                Ok(concurrent_prime) => next_chain.push(concurrent_prime),
                Err(gap) => match split_around_insert(concurrent, &current) {
                    Some((tail, head)) => {
                        next_chain.push(tail);
                        next_chain.push(head);
                    }
                    None => return Err(gap),
                },
            }
            current = op_prime;
        }
        Ok((current, next_chain))
    }

    pub(crate) fn commit(&mut self, next_chain: Vec<Operation>) {
        self.chain = next_chain;
    }
}

/// Replay a sequential batch authored on `base_version` into `document`.
///
/// Fails only when `base_version` itself is unusable; per-operation problems
/// are reported in the outcome.
pub fn merge_into(
    document: &mut Document,
    base_version: u64,
    incoming: Vec<Operation>,
) -> CollabResult<MergeOutcome> {
    let mut bridge = Bridge::new(document, base_version)?;
    let mut outcome = MergeOutcome::default();

    for op in incoming {
        if let Err(err) = bridge.admit(&op) {
            tracing::debug!(
                doc_id = %document.id(),
                op_id = %op.id,
                error = %err,
                "Batch operation out of range for its author"
            );
            outcome.rejected.push((op, err));
            continue;
        }

        if let Some((concurrent, kind)) = bridge.find_conflict(&op) {
            tracing::debug!(
                doc_id = %document.id(),
                op_id = %op.id,
                concurrent_id = %concurrent.id,
                ?kind,
                "Holding back conflicting operation"
            );
            outcome.conflicts.push(Conflict {
                concurrent: concurrent.clone(),
                incoming: op,
                kind,
                base_version,
            });
            continue;
        }

        let (reconciled, next_chain) = match bridge.reconcile(&op) {
            Ok(result) => result,
            Err(gap) => {
                match bridge.raw_op(gap.applied).or_else(|| bridge.raw_op(gap.incoming)) {
                    Some(concurrent) => outcome.conflicts.push(Conflict {
                        incoming: op,
                        concurrent: concurrent.clone(),
                        kind: ConflictKind::TransformGap,
                        base_version,
                    }),
                    None => outcome.rejected.push((op, CollabError::from(gap))),
                }
                continue;
            }
        };

        let reconciled = reconciled.with_base_version(document.version());
        match document.apply_operation(&reconciled) {
            Ok(applied) => {
                bridge.commit(next_chain);
                outcome.merged.push(applied);
            }
            Err(err) => {
                tracing::warn!(
                    doc_id = %document.id(),
                    op_id = %op.id,
                    error = %err,
                    "Merged operation rejected by document"
                );
                outcome.rejected.push((op, err));
            }
        }
    }

    Ok(outcome)
}

/// Settle a conflict reported by [`merge_into`].
///
/// Returns the operation applied, or `None` for
/// [`KeepTheirs`](ConflictResolution::KeepTheirs).
pub fn resolve(
    document: &mut Document,
    conflict: &Conflict,
    resolution: ConflictResolution,
) -> CollabResult<Option<Operation>> {
    match resolution {
        ConflictResolution::KeepTheirs => {
            tracing::debug!(
                doc_id = %document.id(),
                op_id = %conflict.incoming.id,
                "Conflict resolved by dropping incoming operation"
            );
            Ok(None)
        }
        ConflictResolution::Merge(replacement) => document.apply_operation(&replacement).map(Some),
        ConflictResolution::KeepMine => {
            document.check_base(conflict.base_version)?;
            let history = document.concurrent_with(conflict.base_version);
            let reconciled = rebase_winning(&conflict.incoming, history)
                .with_base_version(document.version());
            document.apply_operation(&reconciled).map(Some)
        }
    }
}

/// Fold `op` through `history` where it must win every overlap.
///
/// A delete that encloses a concurrent insert widens to remove the inserted
/// text too; every other pair follows the normal transform rules.
fn rebase_winning<'a>(op: &Operation, history: impl IntoIterator<Item = &'a Operation>) -> Operation {
    let mut current = op.clone();
    for applied in history {
        current = match transform::rebase(&current, applied) {
            Ok(rebased) => rebased,
            Err(_) => widen_over_insert(&current, applied),
        };
    }
    current
}

/// Split `delete` around an insert strictly inside it.
///
/// The pieces apply in order: the part after the inserted text first, then
/// the part before it, so neither shifts the other.
fn split_around_insert(delete: &Operation, insert: &Operation) -> Option<(Operation, Operation)> {
    match (&delete.data, &insert.data) {
        (OpData::Delete { start, end }, OpData::Insert { position, text })
            if start < position && position < end =>
        {
            let len = char_len(text);
            let tail = delete.with_data(OpData::Delete {
                start: position + len,
                end: end + len,
            });
            let head = delete.with_data(OpData::Delete {
                start: *start,
                end: *position,
            });
            Some((tail, head))
        }
        _ => None,
    }
}

fn widen_over_insert(op: &Operation, applied: &Operation) -> Operation {
    match (&op.data, &applied.data) {
        (OpData::Delete { start, end }, OpData::Insert { text, .. }) => op.with_data(OpData::Delete {
            start: *start,
            end: end + char_len(text),
        }),
        _ => op.clone(),
    }
}
