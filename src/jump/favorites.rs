//! Stepping through favourites with a persisted cursor.
//!
//! `flags[id]` says whether entry `id` is a favourite. A `None` cursor
//! sits before the first entry.

/// Next favourite after `cursor`. With `wrap` the search continues from
/// the start and gives up once it is back where it began.
pub fn next_favorite(flags: &[bool], cursor: Option<usize>, wrap: bool) -> Option<usize> {
    let n = flags.len();
    if n == 0 {
        return None;
    }
    let start = cursor.map(|c| c + 1).unwrap_or(0);

    if !wrap {
        return (start..n).find(|&id| flags[id]);
    }

    (0..n)
        .map(|step| (start + step) % n)
        .take_while(|&id| Some(id) != cursor)
        .find(|&id| flags[id])
}

/// Previous favourite before `cursor`; never wraps.
pub fn previous_favorite(flags: &[bool], cursor: Option<usize>) -> Option<usize> {
    let end = cursor?.min(flags.len());
    (0..end).rev().find(|&id| flags[id])
}

/// `favorites` is the ascending list of favourite ids.
pub fn has_next_favorite(favorites: &[usize], cursor: Option<usize>) -> bool {
    match position(favorites, cursor) {
        Some(index) => index + 1 < favorites.len(),
        None => !favorites.is_empty(),
    }
}

pub fn has_previous_favorite(favorites: &[usize], cursor: Option<usize>) -> bool {
    matches!(position(favorites, cursor), Some(index) if index > 0)
}

fn position(favorites: &[usize], cursor: Option<usize>) -> Option<usize> {
    let cursor = cursor?;
    favorites.iter().position(|&id| id == cursor)
}
