//! Resource generation module.
//!
//! Renders the platform objects a StarRocks role owns. Generation is pure:
//! the same cluster spec and dependency addresses always render the same objects.
//!
//! ## Resources Generated
//!
//! | Resource | Purpose |
//! |----------|---------|
//! | StatefulSet | Stable pod identity for role members |
//! | Search Service | Peer discovery (headless, publishNotReadyAddresses) |
//! | External Service | Client and dependent-role access endpoint |

pub mod common;
pub mod services;
pub mod statefulset;

pub use common::{RoleContext, owner_reference, standard_labels};
