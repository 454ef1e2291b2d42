//! Team resolution — IdP group claims to Vault team roles.
//!
//! A *team* is the unit of authorization: each team carries a Vault JWT role
//! (named after the team), a token role (`<team>-token`), a policy set, and
//! child-token bounds. Users land on teams through their IdP groups; the
//! mapping is static configuration, never mutated at runtime.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Per-team Vault settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamSettings {
    /// Vault token role used for child-token creation. Defaults to
    /// `<team>-token` when empty.
    pub token_role: Option<String>,
    /// Policies carried by the team's tokens.
    pub policies: Vec<String>,
    /// Default child-token TTL in seconds.
    pub ttl_default_secs: u64,
    /// Upper bound on child-token TTL in seconds.
    pub ttl_max_secs: u64,
    /// Child-token use limit.
    pub uses: u32,
}

impl Default for TeamSettings {
    fn default() -> Self {
        Self {
            token_role: None,
            policies: Vec::new(),
            ttl_default_secs: 7200,
            ttl_max_secs: 14400,
            uses: 10,
        }
    }
}

/// Static team configuration: group mapping plus the per-team table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeamConfig {
    /// IdP group name → team name.
    pub group_to_team: HashMap<String, String>,
    /// Team name → Vault settings. Only teams present here are offered.
    pub teams: HashMap<String, TeamSettings>,
    /// Team whose Vault token role allows creating tokens for any team.
    pub devops_team: Option<String>,
}

impl Default for TeamConfig {
    fn default() -> Self {
        let mappings = [
            ("mobile-developers", "mobile-team"),
            ("backend-developers", "backend-team"),
            ("frontend-developers", "frontend-team"),
            ("devops-team", "devops-team"),
        ];

        let group_to_team = mappings
            .iter()
            .map(|(g, t)| ((*g).to_string(), (*t).to_string()))
            .collect();

        let teams = mappings
            .iter()
            .map(|(_, t)| {
                let settings = TeamSettings {
                    policies: vec!["base".to_string(), (*t).to_string()],
                    ..TeamSettings::default()
                };
                ((*t).to_string(), settings)
            })
            .collect();

        Self {
            group_to_team,
            teams,
            devops_team: Some("devops-team".to_string()),
        }
    }
}

impl TeamConfig {
    /// Settings for a known team, `None` when the team is not in the table.
    #[must_use]
    pub fn settings(&self, team: &str) -> Option<&TeamSettings> {
        self.teams.get(team)
    }

    /// Vault token role name for a known team.
    #[must_use]
    pub fn token_role(&self, team: &str) -> Option<String> {
        let settings = self.teams.get(team)?;
        Some(
            settings
                .token_role
                .clone()
                .unwrap_or_else(|| format!("{team}-token")),
        )
    }

    /// Policies attached to a known team's tokens.
    #[must_use]
    pub fn policies(&self, team: &str) -> Vec<String> {
        self.teams
            .get(team)
            .map(|s| {
                if s.policies.is_empty() {
                    vec!["base".to_string(), team.to_string()]
                } else {
                    s.policies.clone()
                }
            })
            .unwrap_or_default()
    }

    /// Resolve the ordered candidate teams for a set of IdP groups.
    ///
    /// Teams appear in the order their first mapping group appears in
    /// `groups`, deduplicated, restricted to teams present in the team table.
    /// An empty result means the user has no recognized team assignment.
    #[must_use]
    pub fn resolve_teams(&self, groups: &[String]) -> Vec<String> {
        let mut candidates = Vec::new();
        for group in groups {
            if let Some(team) = self.group_to_team.get(group) {
                if self.teams.contains_key(team) && !candidates.contains(team) {
                    candidates.push(team.clone());
                }
            }
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn single_group_resolves_to_single_team() {
        let cfg = TeamConfig::default();
        let teams = cfg.resolve_teams(&groups(&["mobile-developers"]));
        assert_eq!(teams, vec!["mobile-team"]);
    }

    #[test]
    fn resolution_preserves_group_order() {
        let cfg = TeamConfig::default();
        let teams = cfg.resolve_teams(&groups(&["backend-developers", "mobile-developers"]));
        assert_eq!(teams, vec!["backend-team", "mobile-team"]);
    }

    #[test]
    fn duplicate_groups_dedup_keeping_first_occurrence() {
        let mut cfg = TeamConfig::default();
        // Two groups mapping onto the same team
        cfg.group_to_team
            .insert("mobile-contractors".to_string(), "mobile-team".to_string());

        let teams = cfg.resolve_teams(&groups(&[
            "mobile-developers",
            "backend-developers",
            "mobile-contractors",
        ]));
        assert_eq!(teams, vec!["mobile-team", "backend-team"]);
    }

    #[test]
    fn unmapped_groups_resolve_to_nothing() {
        let cfg = TeamConfig::default();
        assert!(cfg.resolve_teams(&groups(&["book-club", "everyone"])).is_empty());
        assert!(cfg.resolve_teams(&[]).is_empty());
    }

    #[test]
    fn mapped_group_without_team_entry_is_dropped() {
        let mut cfg = TeamConfig::default();
        cfg.group_to_team
            .insert("data-engineers".to_string(), "data-team".to_string());
        // "data-team" deliberately absent from cfg.teams

        let teams = cfg.resolve_teams(&groups(&["data-engineers", "mobile-developers"]));
        assert_eq!(teams, vec!["mobile-team"]);
    }

    #[test]
    fn token_role_defaults_to_team_dash_token() {
        let cfg = TeamConfig::default();
        assert_eq!(
            cfg.token_role("mobile-team").as_deref(),
            Some("mobile-team-token")
        );
        assert!(cfg.token_role("nonexistent-team").is_none());
    }

    #[test]
    fn token_role_override_wins() {
        let mut cfg = TeamConfig::default();
        cfg.teams.get_mut("mobile-team").unwrap().token_role =
            Some("mobile-special".to_string());
        assert_eq!(cfg.token_role("mobile-team").as_deref(), Some("mobile-special"));
    }

    #[test]
    fn policies_include_base_and_team() {
        let cfg = TeamConfig::default();
        assert_eq!(cfg.policies("backend-team"), vec!["base", "backend-team"]);
    }

    #[test]
    fn devops_is_offered_like_any_other_team() {
        let cfg = TeamConfig::default();
        let teams = cfg.resolve_teams(&groups(&["devops-team", "mobile-developers"]));
        assert_eq!(teams, vec!["devops-team", "mobile-team"]);
    }
}
