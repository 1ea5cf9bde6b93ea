//! Access Control
//!
//! Single answer to "may this actor do this here". Used by privileged bot
//! commands and by every privileged dashboard route. Decisions are computed
//! fresh from point-in-time reads; nothing is cached across requests.

mod decision;
mod owner;
mod resolver;

pub use decision::{AccessDecision, AccessKind, CommunityRef, DenyReason};
pub use owner::ApplicationOwner;
pub use resolver::PermissionResolver;
