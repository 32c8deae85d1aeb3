//! List reconciliation
//!
//! Computes an ordered edit script that turns one render list into another.
//! Applying the ops in order to `old` yields exactly `new`; indices always
//! refer to the list as it stands after the preceding ops.
//!
//! ## Algorithm
//!
//! A longest-common-subsequence alignment where two items may be aligned
//! only if their union tags match. Aligned pairs with equal content need no
//! op, aligned pairs with different content become `Update`, unaligned old
//! items become `Remove` and unaligned new items become `Insert`.
//!
//! Among alignments the one producing the fewest ops wins: a content-equal
//! pair saves two ops (remove + insert), an update pair saves one. Remaining
//! ties prefer more aligned pairs, then the earliest old candidate, then
//! `Remove` before `Insert`. The walk is a pure function of its inputs, so
//! identical inputs always produce identical scripts.
//!
//! O(|old|·|new|) time and space, which is fine for lists of tens of items.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::ContentItem;

/// A single list mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    Insert { index: usize, item: ContentItem },
    Remove { index: usize },
    Update { index: usize, item: ContentItem },
    /// Relocate an item; `to` is the index after the item has been taken out
    Move { from: usize, to: usize },
}

/// Ordered list of edits
pub type EditScript = Vec<EditOp>;

/// Error applying a script that does not fit the list
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ApplyError {
    #[error("Edit #{op} ({kind}) index {index} out of bounds for list of length {len}")]
    OutOfBounds {
        op: usize,
        kind: &'static str,
        index: usize,
        len: usize,
    },
}

/// Compute the edit script from `old` to `new`
pub fn diff(old: &[ContentItem], new: &[ContentItem]) -> EditScript {
    let table = ScoreTable::build(old, new);
    let mut script = EditScript::new();

    let (mut i, mut j, mut pos) = (0, 0, 0);
    while i < old.len() && j < new.len() {
        let here = table.get(i, j);
        let paired = table
            .pair_score(&old[i], &new[j])
            .map(|score| score + table.get(i + 1, j + 1));

        if paired == Some(here) {
            if old[i] != new[j] {
                script.push(EditOp::Update {
                    index: pos,
                    item: new[j].clone(),
                });
            }
            i += 1;
            j += 1;
            pos += 1;
        } else if here == table.get(i + 1, j) {
            script.push(EditOp::Remove { index: pos });
            i += 1;
        } else {
            script.push(EditOp::Insert {
                index: pos,
                item: new[j].clone(),
            });
            j += 1;
            pos += 1;
        }
    }

    for _ in i..old.len() {
        script.push(EditOp::Remove { index: pos });
    }
    for item in &new[j..] {
        script.push(EditOp::Insert {
            index: pos,
            item: item.clone(),
        });
        pos += 1;
    }

    script
}

/// Apply a script to a list, in order
pub fn apply(old: &[ContentItem], script: &[EditOp]) -> Result<Vec<ContentItem>, ApplyError> {
    let mut list = old.to_vec();

    for (op, edit) in script.iter().enumerate() {
        let out_of_bounds = |kind, index, len| ApplyError::OutOfBounds {
            op,
            kind,
            index,
            len,
        };

        match edit {
            EditOp::Insert { index, item } => {
                if *index > list.len() {
                    return Err(out_of_bounds("insert", *index, list.len()));
                }
                list.insert(*index, item.clone());
            }
            EditOp::Remove { index } => {
                if *index >= list.len() {
                    return Err(out_of_bounds("remove", *index, list.len()));
                }
                list.remove(*index);
            }
            EditOp::Update { index, item } => match list.get_mut(*index) {
                Some(slot) => *slot = item.clone(),
                None => return Err(out_of_bounds("update", *index, list.len())),
            },
            EditOp::Move { from, to } => {
                if *from >= list.len() {
                    return Err(out_of_bounds("move", *from, list.len()));
                }
                let item = list.remove(*from);
                if *to > list.len() {
                    return Err(out_of_bounds("move", *to, list.len()));
                }
                list.insert(*to, item);
            }
        }
    }

    Ok(list)
}

/// Suffix score table: `get(i, j)` is the best score aligning `old[i..]` with `new[j..]`
struct ScoreTable {
    cols: usize,
    /// Weight of one "saved op"; larger than any possible pair count
    unit: usize,
    cells: Vec<usize>,
}

impl ScoreTable {
    fn build(old: &[ContentItem], new: &[ContentItem]) -> Self {
        let cols = new.len() + 1;
        let mut table = Self {
            cols,
            unit: old.len().min(new.len()) + 1,
            cells: vec![0; (old.len() + 1) * cols],
        };

        for i in (0..old.len()).rev() {
            for j in (0..new.len()).rev() {
                let mut best = table.get(i + 1, j).max(table.get(i, j + 1));
                if let Some(score) = table.pair_score(&old[i], &new[j]) {
                    best = best.max(score + table.get(i + 1, j + 1));
                }
                table.cells[i * cols + j] = best;
            }
        }

        table
    }

    fn get(&self, i: usize, j: usize) -> usize {
        self.cells[i * self.cols + j]
    }

    /// Score of aligning two items, `None` if they cannot be aligned
    fn pair_score(&self, old: &ContentItem, new: &ContentItem) -> Option<usize> {
        if !old.same_identity(new) {
            return None;
        }
        let saved_ops = if old == new { 2 } else { 1 };
        Some(saved_ops * self.unit + 1)
    }
}
