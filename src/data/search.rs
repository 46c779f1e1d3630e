use std::cmp::Ordering;

use crate::{Error, Result};

/// Find where a candidate belongs in `items`, which must already be sorted.
///
/// `probe(item)` orders an existing item relative to the candidate. The
/// returned position follows every item that compares `Less` or `Equal`, so a
/// candidate equal to existing items lands after them.
pub fn insert_position<T, F>(items: &[T], mut probe: F) -> Result<usize>
where
    F: FnMut(&T) -> Result<Ordering>,
{
    let mut low = 0;
    let mut high = items.len();
    let mut iterations = 0;

    while low < high {
        iterations += 1;
        if iterations > items.len() {
            return Err(Error::SearchDiverged { bound: items.len() });
        }

        let mid = low + (high - low) / 2;
        match probe(&items[mid])? {
            Ordering::Greater => high = mid,
            Ordering::Less | Ordering::Equal => low = mid + 1,
        }
    }

    Ok(low)
}

/// Find the position of the item that compares `Equal` under `probe`.
/// Returns `None` when no such item exists.
pub fn find_position<T, F>(items: &[T], mut probe: F) -> Result<Option<usize>>
where
    F: FnMut(&T) -> Result<Ordering>,
{
    let mut low = 0;
    let mut high = items.len();
    let mut iterations = 0;

    while low < high {
        iterations += 1;
        if iterations > items.len() {
            return Err(Error::SearchDiverged { bound: items.len() });
        }

        let mid = low + (high - low) / 2;
        match probe(&items[mid])? {
            Ordering::Equal => return Ok(Some(mid)),
            Ordering::Greater => high = mid,
            Ordering::Less => low = mid + 1,
        }
    }

    Ok(None)
}
