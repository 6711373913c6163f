//! Playlist admission engine
//!
//! - `statistics`: rolling per-playlist queue sizes feeding the threshold
//! - `teams`: idempotent party-to-team merging
//! - `selection`: the per-cycle playlist decision

pub mod selection;
pub mod statistics;
pub mod teams;

pub use selection::{rank_candidates, AdmissionPlan, PlaylistMetric, PlaylistSelector};
pub use statistics::{admission_threshold, PlaylistStat, PlaylistStatistics, StatsKey};
pub use teams::{merge_party, team_members};
