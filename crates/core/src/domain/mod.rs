use serde::{Deserialize, Serialize};

pub mod account;
pub mod allowlist;
pub mod interaction;
pub mod link;
pub mod task;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

string_id!(
    /// Chat-platform server (guild) identifier.
    GuildId
);
string_id!(
    /// Chat-platform channel identifier.
    ChannelId
);
string_id!(
    /// Chat-platform message identifier.
    MessageId
);
string_id!(
    /// Chat-platform user identifier.
    UserId
);
string_id!(
    /// Platform-side community identifier.
    CommunityId
);
string_id!(
    /// Platform-side social task identifier.
    TaskId
);
string_id!(
    /// Platform-side allowlist identifier.
    AllowlistId
);
string_id!(
    /// Unique identifier for one user-originated gateway event.
    EventId
);

/// Schema version stamped on every persisted record. The v2 migration
/// backfills `guild_snapshot.last_updated` where missing.
pub const SCHEMA_VERSION: i64 = 2;
