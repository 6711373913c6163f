//! Utility functions for the matchmaking broker

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Leading segments of every assignment bucket id
pub const BUCKET_NAMESPACE: &str = "Fortnite:Fortnite";

/// Generate a ticket id (dash-less UUID)
pub fn generate_ticket_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a session id for a newly created record (dash-less UUID)
pub fn generate_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a match id (hyphenated UUID)
pub fn generate_match_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate an opaque connection id
pub fn generate_connection_id() -> String {
    Uuid::new_v4().to_string()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Compose the bucket id sent with an assignment
pub fn bucket_id(build_id: &str, region: &str, playlist: &str) -> String {
    format!("{}:{}:0:{}:{}", BUCKET_NAMESPACE, build_id, region, playlist)
}

/// Split a comma-separated party member list, dropping blanks
pub fn split_party_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Playlist name as reported to the admin API
pub fn display_playlist(playlist: &str) -> &str {
    playlist.strip_prefix("playlist_").unwrap_or(playlist)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique_ids() {
        let t1 = generate_ticket_id();
        let t2 = generate_ticket_id();
        assert_ne!(t1, t2);
        assert_eq!(t1.len(), 32);
        assert!(!t1.contains('-'));

        let m = generate_match_id();
        assert_eq!(m.len(), 36);
        assert!(m.contains('-'));
    }

    #[test]
    fn test_bucket_id() {
        assert_eq!(
            bucket_id("++Fortnite+Release-1.11", "NAE", "playlist_solo"),
            "Fortnite:Fortnite:++Fortnite+Release-1.11:0:NAE:playlist_solo"
        );
    }

    #[test]
    fn test_split_party_ids() {
        assert_eq!(split_party_ids("a,b, c"), vec!["a", "b", "c"]);
        assert_eq!(split_party_ids("solo"), vec!["solo"]);
        assert!(split_party_ids("").is_empty());
        assert_eq!(split_party_ids("a,,b,"), vec!["a", "b"]);
    }

    #[test]
    fn test_display_playlist() {
        assert_eq!(display_playlist("playlist_defaultsolo"), "defaultsolo");
        assert_eq!(display_playlist("custom"), "custom");
    }
}
