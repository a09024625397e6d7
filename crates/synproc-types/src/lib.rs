//! Shared identity types for synproc.
//!
//! This crate has **no internal synproc dependencies**. It is a leaf crate
//! that the kernel and the CLI build on.
//!
//! | Type              | Purpose                                          |
//! |-------------------|--------------------------------------------------|
//! | [`MountId`]       | Which mount instance                             |
//! | [`BaseNodeId`]    | Which schema position                            |
//! | [`NodeIdentity`]  | (mount, pid, object, base): one live node        |
//! | [`Credential`]    | Who is asking (pid + effective/real uid, gid)    |

pub mod credential;
pub mod ids;

pub use credential::Credential;
pub use ids::{BaseNodeId, MountId, NodeIdentity, ParseIdentityError};
