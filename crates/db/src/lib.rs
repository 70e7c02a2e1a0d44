pub mod cleanup;
pub mod connection;
pub mod integrity;
pub mod migrations;
pub mod repositories;

pub use cleanup::{CleanupJob, CleanupReport};
pub use connection::{connect, connect_with_settings, DbPool};
pub use integrity::{collection_stats, validate_integrity, IntegrityReport};
pub use repositories::{
    AllowlistRepository, CollectionStats, GuildAnalytics, InteractionFilter,
    InteractionLogRepository, PlatformAnalytics, RepositoryError, ServerLinkRepository,
    TaskPostRepository, UserLinkRepository,
};
