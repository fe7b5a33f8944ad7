//! Static allow-list authorization

use std::collections::HashSet;

/// Identity of whoever sent a command (a chat user id)
pub type RequesterId = i64;

/// Who may mutate the working copy or the service.
///
/// Built once from configuration and never changed for the lifetime of the
/// process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    allowed: HashSet<RequesterId>,
    admin: Option<RequesterId>,
}

impl AccessPolicy {
    pub fn new(
        allowed: impl IntoIterator<Item = RequesterId>,
        admin: Option<RequesterId>,
    ) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            admin,
        }
    }

    /// Allow-list membership or the privileged identity. No I/O.
    pub fn permits(&self, requester: RequesterId) -> bool {
        self.allowed.contains(&requester) || self.admin == Some(requester)
    }

    pub fn admin(&self) -> Option<RequesterId> {
        self.admin
    }
}

/// Gate in front of every mutating command.
#[derive(Debug, Clone)]
pub struct AccessGuard {
    policy: AccessPolicy,
}

impl AccessGuard {
    pub fn new(policy: AccessPolicy) -> Self {
        Self { policy }
    }

    /// Whether `requester` may update or restart the service.
    pub fn authorize(&self, requester: RequesterId) -> bool {
        let allowed = self.policy.permits(requester);
        if !allowed {
            tracing::debug!(requester, "Requester not in allow-list");
        }
        allowed
    }

    pub fn policy(&self) -> &AccessPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(7, true)]
    #[case(9, true)]
    #[case(42, false)]
    #[case(0, false)]
    #[case(-7, false)]
    fn allow_list_without_admin(#[case] requester: RequesterId, #[case] expected: bool) {
        let guard = AccessGuard::new(AccessPolicy::new([7, 9], None));
        assert_eq!(guard.authorize(requester), expected);
    }

    #[test]
    fn admin_is_allowed_even_when_not_listed() {
        let guard = AccessGuard::new(AccessPolicy::new([7, 9], Some(1)));

        assert!(guard.authorize(1));
        assert!(guard.authorize(7));
        assert!(!guard.authorize(42));
    }

    #[test]
    fn empty_policy_denies_everyone() {
        let guard = AccessGuard::new(AccessPolicy::default());

        assert!(!guard.authorize(0));
        assert!(!guard.authorize(7));
    }

    #[test]
    fn decisions_do_not_depend_on_call_order() {
        let guard = AccessGuard::new(AccessPolicy::new([7, 9], None));
        let ids = [42, 7, 42, 9, 1, 7];

        let first: Vec<bool> = ids.iter().map(|&id| guard.authorize(id)).collect();
        let second: Vec<bool> = ids.iter().rev().map(|&id| guard.authorize(id)).collect();

        assert_eq!(first, vec![false, true, false, true, false, true]);
        assert_eq!(second, vec![true, false, true, false, true, false]);
    }
}
