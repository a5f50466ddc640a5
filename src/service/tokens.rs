use chrono::Utc;
use tracing::{debug, warn};

use super::AuthService;
use crate::context::Context;
use crate::error::{AuthError, Result};
use crate::storage::models::Token;
use crate::tokens::{generate_hex, TOKEN_BYTES};

/// Candidates drawn per token half before giving up
pub const GENERATE_RETRIES: usize = 5;

impl AuthService {
    /// Verify credentials and issue a fresh token bound to the user.
    pub fn create_token(&self, ctx: &Context, login: &str, password: &str) -> Result<Token> {
        let id = match self.check_user(ctx, login, password) {
            Ok(id) => id,
            Err(AuthError::NoUser) => {
                debug!("login rejected");
                return Err(AuthError::NoUser);
            }
            Err(e) => return Err(e),
        };

        let token = self.get_unique_token(ctx)?;
        self.bind(ctx, &token, &id)?;

        debug!(user_id = %id, expires_at = %token.expiration, "issued token");
        Ok(token)
    }

    /// Persist `token` as belonging to user `id`.
    pub fn bind(&self, ctx: &Context, token: &Token, id: &str) -> Result<()> {
        ctx.check()?;
        self.store.save_token(token, id)
    }

    /// Draw an access/refresh pair that collides with no live token.
    ///
    /// Each half gets [`GENERATE_RETRIES`] candidates. Running out on either
    /// half fails the whole call with `NoTokens`, as does a TTL that pushes the
    /// expiration past the representable range.
    pub fn get_unique_token(&self, ctx: &Context) -> Result<Token> {
        let access = self.unique_value(ctx, AuthError::DupAccess, |v| {
            self.store.check_token(v)
        })?;
        let refresh = self.unique_value(ctx, AuthError::DupRefresh, |v| {
            self.store.refresh_in_use(v)
        })?;

        let Some(expiration) = Utc::now().checked_add_signed(self.access_ttl) else {
            warn!(ttl = %self.access_ttl, "token expiration out of range");
            return Err(AuthError::NoTokens);
        };

        Ok(Token {
            access,
            refresh,
            expiration,
        })
    }

    fn unique_value<F>(&self, ctx: &Context, collision: AuthError, in_use: F) -> Result<String>
    where
        F: Fn(&str) -> Result<bool>,
    {
        for attempt in 1..=GENERATE_RETRIES {
            ctx.check()?;
            let candidate = generate_hex(TOKEN_BYTES);
            if !in_use(&candidate)? {
                return Ok(candidate);
            }
            debug!(attempt, error = %collision, "token candidate collided");
        }

        warn!(retries = GENERATE_RETRIES, "token generation exhausted");
        Err(AuthError::NoTokens)
    }

    /// Resolve an access token to its owner.
    ///
    /// An expired token is purged on the spot and reported as `TokenExpired`.
    pub fn get_id_by_token(&self, ctx: &Context, access: &str) -> Result<String> {
        ctx.check()?;
        let owner = self.store.get_session_id(access)?;

        if self.is_expired(ctx, access)? {
            ctx.check()?;
            self.store.pop_token(access)?;
            debug!(user_id = %owner, "purged expired token");
            return Err(AuthError::TokenExpired);
        }

        Ok(owner)
    }

    /// Whether the stored expiration of `access` has passed.
    pub fn is_expired(&self, ctx: &Context, access: &str) -> Result<bool> {
        ctx.check()?;
        self.store.token_expired(access, Utc::now())
    }

    /// Remove a token. Unknown tokens are ignored.
    pub fn delete_token(&self, ctx: &Context, access: &str) -> Result<()> {
        ctx.check()?;
        self.store.pop_token(access)
    }

    /// Rotate a live token: the old pair stops resolving and a new pair is
    /// bound to the same owner.
    ///
    /// The new pair is generated before anything is removed, and the swap is a
    /// compare-and-swap on (access, refresh). If two callers rotate the same
    /// token, the loser gets `TokenExistence`.
    pub fn refresh_token(&self, ctx: &Context, access: &str, refresh: &str) -> Result<Token> {
        ctx.check()?;
        let current = self
            .store
            .load_token(access)?
            .ok_or(AuthError::TokenExistence)?;
        if current.refresh != refresh {
            warn!("refresh token mismatch");
            return Err(AuthError::NoRefresh);
        }

        let owner = self.get_id_by_token(ctx, access)?;
        let token = self.get_unique_token(ctx)?;

        ctx.check()?;
        self.store.replace_token(access, refresh, &token)?;

        debug!(user_id = %owner, expires_at = %token.expiration, "rotated token");
        Ok(token)
    }

    /// Number of tokens that have not expired yet.
    pub fn live_sessions(&self, ctx: &Context) -> Result<usize> {
        ctx.check()?;
        let now = Utc::now();
        Ok(self
            .store
            .load_tokens()?
            .iter()
            .filter(|stored| !stored.token.is_expired_at(now))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cheap_hasher, make_token, test_service};
    use std::collections::HashSet;
    use std::sync::Arc;

    use crate::permissions::Permissions;
    use crate::storage::models::{NewUser, StoredToken, User, UserChange};
    use crate::storage::{MemoryStore, Store};

    #[test]
    fn test_unique_tokens() {
        let service = test_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();

        let mut accesses = HashSet::new();
        let mut refreshes = HashSet::new();
        for _ in 0..50 {
            let token = service.get_unique_token(&ctx).unwrap();
            assert_eq!(token.access.len(), TOKEN_BYTES * 2);
            assert!(
                token.expiration > Utc::now() + service.access_ttl() - chrono::Duration::seconds(5)
            );
            assert!(accesses.insert(token.access.clone()));
            assert!(refreshes.insert(token.refresh.clone()));
            service.bind(&ctx, &token, &id).unwrap();
        }
    }

    #[test]
    fn test_ttl_past_calendar_range() {
        let service = AuthService::new(
            Arc::new(MemoryStore::new()),
            cheap_hasher(),
            chrono::Duration::days(365 * 1_000_000),
        );
        let ctx = Context::background();
        service.new_user(&ctx, "alice", "pw1").unwrap();

        assert!(matches!(
            service.create_token(&ctx, "alice", "pw1"),
            Err(AuthError::NoTokens)
        ));
        assert!(service.store().load_tokens().unwrap().is_empty());
    }

    macro_rules! delegate {
        ($($name:ident($($arg:ident: $ty:ty),*) -> $ret:ty;)*) => {
            $(fn $name(&self, $($arg: $ty),*) -> $ret { self.0.$name($($arg),*) })*
        };
    }

    /// A store where every candidate is already taken.
    struct Saturated(MemoryStore);

    impl Store for Saturated {
        delegate! {
            save_user(user: &NewUser) -> Result<String>;
            check_user(login: &str, password: &str) -> Result<String>;
            user(id: &str) -> Result<User>;
            pop_user(id: &str) -> Result<usize>;
            change_user(change: &UserChange) -> Result<User>;
            set_permission(id: &str, permissions: Permissions) -> Result<()>;
            save_token(token: &Token, owner: &str) -> Result<()>;
            load_token(access: &str) -> Result<Option<Token>>;
            get_session_id(access: &str) -> Result<String>;
            token_expired(access: &str, now: chrono::DateTime<Utc>) -> Result<bool>;
            pop_token(access: &str) -> Result<()>;
            replace_token(access: &str, refresh: &str, new: &Token) -> Result<String>;
            load_users() -> Result<Vec<User>>;
            load_tokens() -> Result<Vec<StoredToken>>;
        }

        fn check_token(&self, _access: &str) -> Result<bool> {
            Ok(true)
        }

        fn refresh_in_use(&self, _refresh: &str) -> Result<bool> {
            Ok(true)
        }
    }

    /// A store whose user is deleted right after the password check passes,
    /// as when `delete_user` lands between a login's check and its bind.
    struct DeletedMidLogin(MemoryStore);

    impl Store for DeletedMidLogin {
        delegate! {
            save_user(user: &NewUser) -> Result<String>;
            user(id: &str) -> Result<User>;
            pop_user(id: &str) -> Result<usize>;
            change_user(change: &UserChange) -> Result<User>;
            set_permission(id: &str, permissions: Permissions) -> Result<()>;
            save_token(token: &Token, owner: &str) -> Result<()>;
            check_token(access: &str) -> Result<bool>;
            refresh_in_use(refresh: &str) -> Result<bool>;
            load_token(access: &str) -> Result<Option<Token>>;
            get_session_id(access: &str) -> Result<String>;
            token_expired(access: &str, now: chrono::DateTime<Utc>) -> Result<bool>;
            pop_token(access: &str) -> Result<()>;
            replace_token(access: &str, refresh: &str, new: &Token) -> Result<String>;
            load_users() -> Result<Vec<User>>;
            load_tokens() -> Result<Vec<StoredToken>>;
        }

        fn check_user(&self, login: &str, password: &str) -> Result<String> {
            let id = self.0.check_user(login, password)?;
            self.0.pop_user(&id)?;
            Ok(id)
        }
    }

    fn saturated_service() -> AuthService {
        AuthService::new(
            Arc::new(Saturated(MemoryStore::new())),
            cheap_hasher(),
            chrono::Duration::minutes(10),
        )
    }

    #[test]
    fn test_generation_exhausted() {
        let service = saturated_service();
        assert!(matches!(
            service.get_unique_token(&Context::background()),
            Err(AuthError::NoTokens)
        ));
    }

    #[test]
    fn test_refresh_exhausted_keeps_old_token() {
        let service = saturated_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        service.bind(&ctx, &make_token("a1", "r1", 60), &id).unwrap();

        assert!(matches!(
            service.refresh_token(&ctx, "a1", "r1"),
            Err(AuthError::NoTokens)
        ));
        assert_eq!(service.get_id_by_token(&ctx, "a1").unwrap(), id);
        assert_eq!(service.store().load_token("a1").unwrap().unwrap().refresh, "r1");
    }

    #[test]
    fn test_login_racing_delete_binds_nothing() {
        let service = AuthService::new(
            Arc::new(DeletedMidLogin(MemoryStore::new())),
            cheap_hasher(),
            chrono::Duration::minutes(10),
        );
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();

        assert!(matches!(
            service.create_token(&ctx, "alice", "pw1"),
            Err(AuthError::NoUser)
        ));
        assert!(matches!(service.user_info(&ctx, &id), Err(AuthError::NoUser)));
        assert!(service.store().load_tokens().unwrap().is_empty());
    }

    #[test]
    fn test_expired_token_is_purged() {
        let service = test_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        service
            .bind(&ctx, &make_token("a1", "r1", -5), &id)
            .unwrap();

        assert!(service.is_expired(&ctx, "a1").unwrap());
        assert!(matches!(
            service.get_id_by_token(&ctx, "a1"),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            service.get_id_by_token(&ctx, "a1"),
            Err(AuthError::TokenExistence)
        ));
    }

    #[test]
    fn test_refresh_mismatch_keeps_token() {
        let service = test_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        service
            .bind(&ctx, &make_token("a1", "r1", 60), &id)
            .unwrap();

        assert!(matches!(
            service.refresh_token(&ctx, "a1", "r2"),
            Err(AuthError::NoRefresh)
        ));
        assert_eq!(service.get_id_by_token(&ctx, "a1").unwrap(), id);
    }

    #[test]
    fn test_refresh_unknown_access() {
        let service = test_service();
        assert!(matches!(
            service.refresh_token(&Context::background(), "missing", "r1"),
            Err(AuthError::TokenExistence)
        ));
    }

    #[test]
    fn test_bind_unknown_owner() {
        let service = test_service();
        assert!(matches!(
            service.bind(&Context::background(), &make_token("a1", "r1", 60), "42"),
            Err(AuthError::NoUser)
        ));
    }

    #[test]
    fn test_cancelled_context_stops_before_store() {
        let service = test_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        ctx.cancel();

        assert!(matches!(
            service.get_unique_token(&ctx),
            Err(AuthError::Cancelled)
        ));
        assert!(matches!(
            service.bind(&ctx, &make_token("a1", "r1", 60), &id),
            Err(AuthError::Cancelled)
        ));
        assert!(service.store().load_tokens().unwrap().is_empty());
    }

    #[test]
    fn test_live_sessions_ignores_expired() {
        let service = test_service();
        let ctx = Context::background();
        let id = service.new_user(&ctx, "alice", "pw1").unwrap();
        service.bind(&ctx, &make_token("a1", "r1", 60), &id).unwrap();
        service.bind(&ctx, &make_token("a2", "r2", -60), &id).unwrap();

        assert_eq!(service.live_sessions(&ctx).unwrap(), 1);
    }
}
