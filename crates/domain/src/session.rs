//! Signed-in user context.
//!
//! A [`Session`] is created empty, filled on sign-in and cleared on sign-out.
//! Services never read it directly; callers hand them a [`SessionSnapshot`].

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::auth::Role;
use crate::error::DomainError;
use crate::identity::ActorIdentity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub actor: ActorIdentity,
    pub role: Role,
}

impl SessionSnapshot {
    pub fn new(actor: ActorIdentity, role: Role) -> Self {
        Self { actor, role }
    }

    pub fn user_id(&self) -> &str {
        &self.actor.user_id
    }

    /// The organization this session acts for.
    pub fn require_organization(&self) -> DomainResult<&str> {
        match self.role {
            Role::Organization => Ok(&self.actor.user_id),
            _ => Err(DomainError::PermissionDenied(
                "organization account required".into(),
            )),
        }
    }

    pub fn require_volunteer(&self) -> DomainResult<&str> {
        match self.role {
            Role::Volunteer => Ok(&self.actor.user_id),
            _ => Err(DomainError::PermissionDenied(
                "volunteer account required".into(),
            )),
        }
    }
}

#[derive(Clone, Default)]
pub struct Session {
    current: Arc<RwLock<Option<SessionSnapshot>>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, actor: ActorIdentity, role: Role) -> SessionSnapshot {
        let snapshot = SessionSnapshot::new(actor, role);
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = Some(snapshot.clone());
        tracing::debug!(
            user_id = %snapshot.actor.user_id,
            role = snapshot.role.as_str(),
            "session started"
        );
        snapshot
    }

    pub fn sign_out(&self) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = current.take() {
            tracing::debug!(user_id = %previous.actor.user_id, "session ended");
        }
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn require(&self) -> DomainResult<SessionSnapshot> {
        self.snapshot()
            .ok_or_else(|| DomainError::PermissionDenied("not signed in".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_then_sign_out_clears_snapshot() {
        let session = Session::new();
        assert!(session.snapshot().is_none());

        session.sign_in(ActorIdentity::with_user_id("org1"), Role::Organization);
        let snapshot = session.require().unwrap();
        assert_eq!(snapshot.require_organization().unwrap(), "org1");

        session.sign_out();
        assert!(matches!(
            session.require(),
            Err(DomainError::PermissionDenied(_))
        ));
    }

    #[test]
    fn volunteer_cannot_act_as_organization() {
        let snapshot = SessionSnapshot::new(ActorIdentity::with_user_id("u1"), Role::Volunteer);
        assert!(snapshot.require_organization().is_err());
        assert_eq!(snapshot.require_volunteer().unwrap(), "u1");
    }

    #[test]
    fn clones_share_the_same_session() {
        let session = Session::new();
        let view = session.clone();
        session.sign_in(ActorIdentity::with_user_id("u1"), Role::Volunteer);
        assert_eq!(view.snapshot().unwrap().user_id(), "u1");
    }
}
