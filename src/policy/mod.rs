//! Access policy for topics.

pub mod access;

pub use access::{
    can_access, check_detail_access, is_accessible_for_detail, is_visible_in_listing,
    DetailDecision,
};
