//! Application owner predicate.

use vk_common::PrincipalId;

/// The configured application owner, if any.
///
/// Every gate asks this one predicate; the owner passes all of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplicationOwner(Option<PrincipalId>);

impl ApplicationOwner {
    #[must_use]
    pub const fn new(owner: Option<PrincipalId>) -> Self {
        Self(owner)
    }

    #[must_use]
    pub const fn id(&self) -> Option<PrincipalId> {
        self.0
    }

    #[must_use]
    pub fn is_application_owner(&self, actor: PrincipalId) -> bool {
        self.0 == Some(actor)
    }
}
