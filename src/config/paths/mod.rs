//! Default filesystem locations.

pub mod xdg_root;
