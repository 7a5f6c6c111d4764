//! Utility
//!
//! **This module is exempt from the API stability guarantee.** It's exposed
//! only so that ports and tests can inspect the kernel's bit sets.
mod owner;
mod prio_bitmap;
pub use self::{owner::*, prio_bitmap::*};

#[cfg(test)]
pub(crate) mod mock;
