//! Jump target selection and favourite navigation.

pub mod favorites;
pub mod selector;

pub use favorites::{has_next_favorite, has_previous_favorite, next_favorite, previous_favorite};
pub use selector::{pick_from_ranked, pick_jump_target};
