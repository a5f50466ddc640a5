use redb::TableDefinition;

/// Users: id -> User (MessagePack)
pub const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Unique index: login -> id
pub const USER_LOGINS: TableDefinition<&str, &str> = TableDefinition::new("user_logins");

/// Tokens: access -> StoredToken (MessagePack)
pub const TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("tokens");

/// Unique index: refresh -> access
pub const REFRESH_TOKENS: TableDefinition<&str, &str> = TableDefinition::new("refresh_tokens");

/// Secondary index: owner id -> Vec<access> (MessagePack)
pub const OWNER_TOKENS: TableDefinition<&str, &[u8]> = TableDefinition::new("owner_tokens");
