//! Database Schema Definitions
//!
//! Collection names, secondary indexes, and the additive migration list.

/// Chat conversations
pub const CONVERSATIONS: &str = "conversations";
/// Chat messages
pub const MESSAGES: &str = "messages";
/// Cached companion answers
pub const AI_RESPONSES: &str = "aiResponses";
/// Story library
pub const STORIES: &str = "stories";
/// Music metadata
pub const MUSIC: &str = "music";
/// Downloaded audio blobs and their metadata
pub const AUDIO_LIBRARY: &str = "audioLibrary";
/// Memory book entries
pub const MEMORIES: &str = "memories";
/// Patient profile
pub const USER_PROFILE: &str = "userProfile";
/// Caregiver journal
pub const CARE_JOURNAL: &str = "careJournal";
/// Family photos and videos
pub const FAMILY_MEDIA: &str = "familyMedia";
/// Activity log
pub const ACTIVITY_LOG: &str = "activityLog";
/// Daily routines
pub const ROUTINES: &str = "routines";
/// Geofenced safe zones
pub const SAFE_ZONES: &str = "safeZones";
/// Emergency contacts
pub const EMERGENCY_CONTACTS: &str = "emergencyContacts";
/// Sync metadata singleton
pub const SYNC_META: &str = "syncMeta";
/// Pending operation queue
pub const PENDING_OPS: &str = "pendingOps";
/// Cognitive exercises (added in schema 2)
pub const EXERCISES: &str = "exercises";
/// Care plans (added in schema 2)
pub const CARE_PLANS: &str = "carePlans";

/// Every collection the offline layer knows about
pub const COLLECTIONS: &[&str] = &[
    CONVERSATIONS,
    MESSAGES,
    AI_RESPONSES,
    STORIES,
    MUSIC,
    AUDIO_LIBRARY,
    MEMORIES,
    USER_PROFILE,
    CARE_JOURNAL,
    FAMILY_MEDIA,
    ACTIVITY_LOG,
    ROUTINES,
    SAFE_ZONES,
    EMERGENCY_CONTACTS,
    SYNC_META,
    PENDING_OPS,
    EXERCISES,
    CARE_PLANS,
];

/// Secondary index columns maintained for every record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    /// Creation time (`created_at`, `created_date` or `createdAt`)
    CreatedAt,
    /// `category`
    Category,
    /// `status` / `sync_status`
    SyncStatus,
}

impl IndexField {
    /// SQL column backing the index
    pub fn column(self) -> &'static str {
        match self {
            IndexField::CreatedAt => "created_at",
            IndexField::Category => "category",
            IndexField::SyncStatus => "sync_status",
        }
    }

    /// Document fields the index value is taken from, first hit wins
    pub fn source_fields(self) -> &'static [&'static str] {
        match self {
            IndexField::CreatedAt => &["created_at", "created_date", "createdAt", "timestamp"],
            IndexField::Category => &["category"],
            IndexField::SyncStatus => &["sync_status", "status"],
        }
    }

    /// Extract the index value from a document
    pub fn extract(self, record: &serde_json::Map<String, serde_json::Value>) -> Option<String> {
        self.source_fields().iter().find_map(|field| match record.get(*field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
    }
}

/// Current database schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Schema migrations, applied in order. Each must only add.
///
/// A migration is a list of single statements.
pub const MIGRATIONS: &[(i32, &[&str])] = &[
    (
        1,
        &[
            "CREATE TABLE IF NOT EXISTS records (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )",
            "CREATE TABLE IF NOT EXISTS blobs (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                bytes BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        ],
    ),
    (
        2,
        &[
            "ALTER TABLE records ADD COLUMN created_at TEXT",
            "ALTER TABLE records ADD COLUMN category TEXT",
            "ALTER TABLE records ADD COLUMN sync_status TEXT",
            "CREATE INDEX IF NOT EXISTS idx_records_created ON records (collection, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_records_category ON records (collection, category)",
            "CREATE INDEX IF NOT EXISTS idx_records_sync_status ON records (collection, sync_status)",
        ],
    ),
];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Get pending migrations
pub fn get_pending_migrations(current_version: i32) -> Vec<i32> {
    MIGRATIONS
        .iter()
        .map(|(version, _)| *version)
        .filter(|&v| v > current_version)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_version() {
        assert_eq!(CURRENT_SCHEMA_VERSION, 2);
        assert!(!needs_migration(CURRENT_SCHEMA_VERSION));
        assert!(needs_migration(0));
    }

    #[test]
    fn test_pending_migrations() {
        assert_eq!(get_pending_migrations(0), vec![1, 2]);
        assert_eq!(get_pending_migrations(1), vec![2]);
        assert_eq!(get_pending_migrations(2), Vec::<i32>::new());
    }

    #[test]
    fn test_index_extraction() {
        let record = json!({"created_date": "2024-05-01", "status": "pending", "category": "anxiety"});
        let record = record.as_object().unwrap();
        assert_eq!(IndexField::CreatedAt.extract(record).as_deref(), Some("2024-05-01"));
        assert_eq!(IndexField::SyncStatus.extract(record).as_deref(), Some("pending"));
        assert_eq!(IndexField::Category.extract(record).as_deref(), Some("anxiety"));
    }

    #[test]
    fn test_collections_are_unique() {
        let mut names: Vec<_> = COLLECTIONS.to_vec();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), COLLECTIONS.len());
    }
}
