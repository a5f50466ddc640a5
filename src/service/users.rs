use tracing::{debug, info};

use super::AuthService;
use crate::context::Context;
use crate::error::{AuthError, Result};
use crate::permissions::Permissions;
use crate::storage::models::{NewUser, User, UserChange};

/// Requested change to another user's login and/or password.
/// `None` leaves the field as it is.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub login: Option<String>,
    pub password: Option<String>,
}

impl AuthService {
    /// Register a user with no permissions.
    pub fn new_user(&self, ctx: &Context, login: &str, password: &str) -> Result<String> {
        self.new_user_with_permissions(ctx, login, password, Permissions::empty())
    }

    pub fn new_user_with_permissions(
        &self,
        ctx: &Context,
        login: &str,
        password: &str,
        permissions: Permissions,
    ) -> Result<String> {
        ctx.check()?;
        let user = NewUser {
            login: login.to_string(),
            password_hash: self.hasher.hash(password)?,
            permissions,
        };

        ctx.check()?;
        let id = self.store.save_user(&user)?;
        info!(user_id = %id, "created user");
        Ok(id)
    }

    /// Create the bootstrap administrator with every permission. An existing
    /// user with that login is left untouched; returns whether one was created.
    pub fn ensure_admin(&self, ctx: &Context, login: &str, password: &str) -> Result<bool> {
        match self.new_user_with_permissions(ctx, login, password, Permissions::all()) {
            Ok(_) => Ok(true),
            Err(AuthError::DuplicateUser) => {
                info!(login, "administrator already exists");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Id of the user with this login and password, or `NoUser`.
    pub fn check_user(&self, ctx: &Context, login: &str, password: &str) -> Result<String> {
        ctx.check()?;
        self.store.check_user(login, password)
    }

    pub fn user_info(&self, ctx: &Context, id: &str) -> Result<User> {
        ctx.check()?;
        self.store.user(id)
    }

    /// Remove a user together with every token bound to it.
    pub fn delete_user(&self, ctx: &Context, id: &str) -> Result<()> {
        ctx.check()?;
        let revoked = self.store.pop_user(id)?;
        info!(user_id = %id, revoked, "deleted user");
        Ok(())
    }

    /// Change another user's login and/or password. The actor behind
    /// `acting_token` needs MANAGE_USERS. Permissions are never touched here.
    pub fn edit_user(
        &self,
        ctx: &Context,
        acting_token: &str,
        id: &str,
        update: UserUpdate,
    ) -> Result<User> {
        let actor = self.authorize(ctx, acting_token, Permissions::MANAGE_USERS)?;

        let password_hash = match update.password {
            Some(password) => Some(self.hasher.hash(&password)?),
            None => None,
        };
        let change = UserChange {
            id: id.to_string(),
            login: update.login,
            password_hash,
        };

        ctx.check()?;
        let user = self.store.change_user(&change)?;
        info!(actor_id = %actor.id, user_id = %id, "edited user");
        Ok(user)
    }

    /// Replace the target's permission bitmask wholesale. The actor needs
    /// MANAGE_USERS, and `bits` must name known permissions with their
    /// prerequisites.
    pub fn give_permission(
        &self,
        ctx: &Context,
        acting_token: &str,
        target_id: &str,
        bits: u32,
    ) -> Result<()> {
        let actor = self.authorize(ctx, acting_token, Permissions::MANAGE_USERS)?;
        let permissions = Permissions::validate_grant(bits)?;

        ctx.check()?;
        self.store.set_permission(target_id, permissions)?;
        info!(
            actor_id = %actor.id,
            user_id = %target_id,
            permissions = %permissions,
            "changed permissions"
        );
        Ok(())
    }

    /// Snapshot of all users. The actor needs QUERY_USERS.
    pub fn list_users(&self, ctx: &Context, acting_token: &str) -> Result<Vec<User>> {
        self.authorize(ctx, acting_token, Permissions::QUERY_USERS)?;
        ctx.check()?;
        self.store.load_users()
    }

    /// Resolve the actor behind a token and require `needed` on it. An
    /// expired acting token is purged and reported as `TokenExistence`.
    fn authorize(&self, ctx: &Context, acting_token: &str, needed: Permissions) -> Result<User> {
        let actor_id = match self.get_id_by_token(ctx, acting_token) {
            Ok(id) => id,
            Err(AuthError::TokenExpired) => return Err(AuthError::TokenExistence),
            Err(e) => return Err(e),
        };
        let actor = self.user_info(ctx, &actor_id)?;

        if !actor.permissions.contains(needed) {
            debug!(actor_id = %actor.id, needed = %needed, "permission denied");
            return Err(AuthError::WrongPermissions);
        }
        Ok(actor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_token, test_service};

    fn login(service: &AuthService, login: &str, password: &str) -> String {
        service
            .create_token(&Context::background(), login, password)
            .unwrap()
            .access
    }

    #[test]
    fn test_new_user_duplicate() {
        let service = test_service();
        let ctx = Context::background();

        let alice = service.new_user(&ctx, "alice", "pw1").unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        assert_ne!(alice, bob);
        assert!(matches!(
            service.new_user(&ctx, "alice", "other"),
            Err(AuthError::DuplicateUser)
        ));
    }

    #[test]
    fn test_new_user_stores_hash() {
        let service = test_service();
        let ctx = Context::background();

        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        let user = service.user_info(&ctx, &id).unwrap();
        assert_ne!(user.password_hash, "pw1");
        assert!(user.permissions.is_empty());
        assert_eq!(service.check_user(&ctx, "alice", "pw1").unwrap(), id);
        assert!(matches!(
            service.check_user(&ctx, "alice", "pw2"),
            Err(AuthError::NoUser)
        ));
    }

    #[test]
    fn test_ensure_admin_is_idempotent() {
        let service = test_service();
        let ctx = Context::background();

        assert!(service.ensure_admin(&ctx, "admin", "root").unwrap());
        assert!(!service.ensure_admin(&ctx, "admin", "other").unwrap());

        let id = service.check_user(&ctx, "admin", "root").unwrap();
        assert_eq!(
            service.user_info(&ctx, &id).unwrap().permissions,
            Permissions::all()
        );
    }

    #[test]
    fn test_edit_requires_manage_users() {
        let service = test_service();
        let ctx = Context::background();

        service.new_user(&ctx, "alice", "pw1").unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        let token = login(&service, "alice", "pw1");

        let update = UserUpdate {
            login: Some("robert".into()),
            password: None,
        };
        assert!(matches!(
            service.edit_user(&ctx, &token, &bob, update),
            Err(AuthError::WrongPermissions)
        ));
        assert_eq!(service.user_info(&ctx, &bob).unwrap().login, "bob");
    }

    #[test]
    fn test_edit_user_as_admin() {
        let service = test_service();
        let ctx = Context::background();

        service
            .new_user_with_permissions(&ctx, "admin", "root", Permissions::all())
            .unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        service.new_user(&ctx, "carol", "pw3").unwrap();
        let token = login(&service, "admin", "root");

        let update = UserUpdate {
            login: None,
            password: Some("new-pw".into()),
        };
        let edited = service.edit_user(&ctx, &token, &bob, update).unwrap();
        assert_eq!(edited.login, "bob");
        assert_eq!(service.check_user(&ctx, "bob", "new-pw").unwrap(), bob);

        let taken = UserUpdate {
            login: Some("carol".into()),
            password: None,
        };
        assert!(matches!(
            service.edit_user(&ctx, &token, &bob, taken),
            Err(AuthError::DuplicateUser)
        ));
    }

    #[test]
    fn test_give_permission_replaces_bits() {
        let service = test_service();
        let ctx = Context::background();

        service
            .new_user_with_permissions(&ctx, "admin", "root", Permissions::all())
            .unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        let token = login(&service, "admin", "root");

        let bits = (Permissions::QUERY_USERS | Permissions::LOAN_BOOKS).bits();
        service.give_permission(&ctx, &token, &bob, bits).unwrap();
        service
            .give_permission(&ctx, &token, &bob, Permissions::MANAGE_BOOKS.bits())
            .unwrap();
        assert_eq!(
            service.user_info(&ctx, &bob).unwrap().permissions,
            Permissions::MANAGE_BOOKS
        );
    }

    #[test]
    fn test_give_permission_checks_prerequisites() {
        let service = test_service();
        let ctx = Context::background();

        service
            .new_user_with_permissions(&ctx, "admin", "root", Permissions::all())
            .unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        let token = login(&service, "admin", "root");

        assert!(matches!(
            service.give_permission(&ctx, &token, &bob, Permissions::MANAGE_USERS.bits()),
            Err(AuthError::InvalidPermissions(_))
        ));
        assert!(matches!(
            service.give_permission(&ctx, &token, &bob, 1 << 20),
            Err(AuthError::InvalidPermissions(_))
        ));
        assert!(service.user_info(&ctx, &bob).unwrap().permissions.is_empty());
    }

    #[test]
    fn test_give_permission_unknown_target() {
        let service = test_service();
        let ctx = Context::background();

        service
            .new_user_with_permissions(&ctx, "admin", "root", Permissions::all())
            .unwrap();
        let token = login(&service, "admin", "root");
        assert!(matches!(
            service.give_permission(&ctx, &token, "999", Permissions::LOAN_BOOKS.bits()),
            Err(AuthError::NoUser)
        ));
    }

    #[test]
    fn test_delete_user_revokes_tokens() {
        let service = test_service();
        let ctx = Context::background();

        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        let first = login(&service, "alice", "pw1");
        let second = login(&service, "alice", "pw1");

        service.delete_user(&ctx, &id).unwrap();
        for token in [first, second] {
            assert!(matches!(
                service.get_id_by_token(&ctx, &token),
                Err(AuthError::TokenExistence)
            ));
        }
        assert!(matches!(
            service.delete_user(&ctx, &id),
            Err(AuthError::NoUser)
        ));
    }

    #[test]
    fn test_expired_acting_token_is_token_existence() {
        let service = test_service();
        let ctx = Context::background();

        let admin = service
            .new_user_with_permissions(&ctx, "admin", "root", Permissions::all())
            .unwrap();
        let bob = service.new_user(&ctx, "bob", "pw2").unwrap();
        service
            .bind(&ctx, &make_token("stale", "r1", -5), &admin)
            .unwrap();

        assert!(matches!(
            service.give_permission(&ctx, "stale", &bob, Permissions::LOAN_BOOKS.bits()),
            Err(AuthError::TokenExistence)
        ));
        assert!(!service.store().check_token("stale").unwrap());

        service
            .bind(&ctx, &make_token("stale2", "r2", -5), &admin)
            .unwrap();
        assert!(matches!(
            service.edit_user(&ctx, "stale2", &bob, UserUpdate::default()),
            Err(AuthError::TokenExistence)
        ));
        assert!(matches!(
            service.edit_user(&ctx, "unknown", &bob, UserUpdate::default()),
            Err(AuthError::TokenExistence)
        ));
    }

    #[test]
    fn test_list_users_requires_query_users() {
        let service = test_service();
        let ctx = Context::background();

        service.new_user(&ctx, "alice", "pw1").unwrap();
        let token = login(&service, "alice", "pw1");
        assert!(matches!(
            service.list_users(&ctx, &token),
            Err(AuthError::WrongPermissions)
        ));

        service
            .new_user_with_permissions(&ctx, "auditor", "pw", Permissions::QUERY_USERS)
            .unwrap();
        let token = login(&service, "auditor", "pw");
        assert_eq!(service.list_users(&ctx, &token).unwrap().len(), 2);
    }
}
