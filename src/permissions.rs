use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// A user's permission bitmask. Each bit independently grants one capability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permissions(u32);

impl Permissions {
    /// Add, edit and delete books.
    pub const MANAGE_BOOKS: Self = Self(1 << 0);
    /// Read the total stored book count.
    pub const QUERY_TOTAL_STOCK: Self = Self(1 << 1);
    /// Register updates to the total stored book count.
    pub const CHANGE_TOTAL_STOCK: Self = Self(1 << 2);
    /// Read information about other users, including their permissions.
    pub const QUERY_USERS: Self = Self(1 << 3);
    /// Add, edit and delete other users, and replace their permissions.
    pub const MANAGE_USERS: Self = Self(1 << 4);
    /// Grant permissions to other users.
    pub const GRANT_PERMISSIONS: Self = Self(1 << 5);
    /// Register book takeouts and returns.
    pub const LOAN_BOOKS: Self = Self(1 << 6);
    /// Read the number of copies of a book not lent out.
    pub const QUERY_AVAILABLE_STOCK: Self = Self(1 << 7);
    /// Read book reservations.
    pub const QUERY_RESERVATIONS: Self = Self(1 << 8);

    const NAMED: [(Self, &'static str); 9] = [
        (Self::MANAGE_BOOKS, "manage_books"),
        (Self::QUERY_TOTAL_STOCK, "query_total_stock"),
        (Self::CHANGE_TOTAL_STOCK, "change_total_stock"),
        (Self::QUERY_USERS, "query_users"),
        (Self::MANAGE_USERS, "manage_users"),
        (Self::GRANT_PERMISSIONS, "grant_permissions"),
        (Self::LOAN_BOOKS, "loan_books"),
        (Self::QUERY_AVAILABLE_STOCK, "query_available_stock"),
        (Self::QUERY_RESERVATIONS, "query_reservations"),
    ];

    /// Bits that require another bit to be set alongside them.
    const PREREQUISITES: [(Self, Self); 3] = [
        (Self::CHANGE_TOTAL_STOCK, Self::QUERY_TOTAL_STOCK),
        (Self::MANAGE_USERS, Self::QUERY_USERS),
        (Self::GRANT_PERMISSIONS, Self::QUERY_USERS),
    ];

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self((1 << 9) - 1)
    }

    pub const fn from_bits_retain(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Validate a bitmask about to be granted.
    ///
    /// Rejects unknown bits and bits whose prerequisite is missing from the
    /// same mask.
    pub fn validate_grant(bits: u32) -> Result<Self, AuthError> {
        let unknown = bits & !Self::all().0;
        if unknown != 0 {
            return Err(AuthError::InvalidPermissions(format!(
                "unknown permission bits {unknown:#x}"
            )));
        }

        let perms = Self(bits);
        for (bit, required) in Self::PREREQUISITES {
            if perms.contains(bit) && !perms.contains(required) {
                return Err(AuthError::InvalidPermissions(format!(
                    "{} requires {}",
                    bit.names().join(","),
                    required.names().join(",")
                )));
            }
        }

        Ok(perms)
    }

    /// Names of the set bits, lowest bit first.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(bit, _)| self.contains(*bit))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
