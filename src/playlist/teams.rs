//! Merging queued parties into session teams

use crate::types::{AccountId, Team};

/// Merge a party into a session's team list.
///
/// The party joins the team holding the first of its ids that is already
/// merged, or a new team otherwise. Each id not yet present in any team is
/// added as a singleton group, so an id sits in at most one team and merging
/// the same parties again leaves the teams unchanged. Empty parties are
/// ignored. Returns the index of the target team.
pub fn merge_party(teams: &mut Vec<Team>, party: &[AccountId]) -> usize {
    if party.is_empty() {
        return teams.len();
    }

    let index = match party.iter().find_map(|id| team_of(teams, id)) {
        Some(index) => index,
        None => {
            teams.push(Team::new());
            teams.len() - 1
        }
    };

    for id in party {
        if team_of(teams, id).is_none() {
            teams[index].push(vec![id.clone()]);
        }
    }
    index
}

fn team_of(teams: &[Team], id: &str) -> Option<usize> {
    teams
        .iter()
        .position(|team| team.iter().flatten().any(|member| member == id))
}

/// Every account id across all teams, in order
pub fn team_members(teams: &[Team]) -> Vec<AccountId> {
    teams.iter().flatten().flatten().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disjoint_parties_get_their_own_teams() {
        let mut teams = Vec::new();
        assert_eq!(merge_party(&mut teams, &ids(&["a"])), 0);
        assert_eq!(merge_party(&mut teams, &ids(&["b"])), 1);
        assert_eq!(merge_party(&mut teams, &ids(&["c", "d"])), 2);

        assert_eq!(teams.len(), 3);
        assert_eq!(teams[2], vec![ids(&["c"]), ids(&["d"])]);
    }

    #[test]
    fn test_overlapping_party_joins_existing_team() {
        let mut teams = Vec::new();
        merge_party(&mut teams, &ids(&["a", "b"]));
        merge_party(&mut teams, &ids(&["c"]));

        // "b" already sits in team 0, so "e" lands there too
        assert_eq!(merge_party(&mut teams, &ids(&["b", "e"])), 0);
        assert_eq!(teams[0], vec![ids(&["a"]), ids(&["b"]), ids(&["e"])]);
        assert_eq!(teams.len(), 2);
    }

    #[test]
    fn test_repeated_merge_is_idempotent() {
        let mut teams = Vec::new();
        merge_party(&mut teams, &ids(&["a", "b"]));
        merge_party(&mut teams, &ids(&["c"]));
        let once = teams.clone();

        merge_party(&mut teams, &ids(&["a", "b"]));
        merge_party(&mut teams, &ids(&["c"]));
        assert_eq!(teams, once);
        assert_eq!(team_members(&teams), ids(&["a", "b", "c"]));
    }

    #[test]
    fn test_id_already_in_another_team_is_not_duplicated() {
        let mut teams = Vec::new();
        merge_party(&mut teams, &ids(&["d"]));
        merge_party(&mut teams, &ids(&["b", "a"]));
        assert_eq!(merge_party(&mut teams, &ids(&["d", "a"])), 0);
        let once = teams.clone();
        assert_eq!(once, vec![vec![ids(&["d"])], vec![ids(&["b"]), ids(&["a"])]]);

        for party in [ids(&["d"]), ids(&["b", "a"]), ids(&["d", "a"])] {
            merge_party(&mut teams, &party);
        }
        assert_eq!(teams, once);
    }

    #[test]
    fn test_empty_party_adds_no_team() {
        let mut teams = Vec::new();
        merge_party(&mut teams, &ids(&["a"]));
        assert_eq!(merge_party(&mut teams, &[]), 1);
        assert_eq!(teams.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_merge_twice_equals_merge_once(
            parties in prop::collection::vec(
                prop::collection::vec("[a-f]", 0..4),
                0..8,
            )
        ) {
            let mut once = Vec::new();
            for party in &parties {
                merge_party(&mut once, party);
            }

            let mut twice = once.clone();
            for party in &parties {
                merge_party(&mut twice, party);
            }
            prop_assert_eq!(&once, &twice);

            // No id appears twice across all teams
            let members = team_members(&once);
            let mut deduped = members.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(members.len(), deduped.len());
        }
    }
}
