use std::fmt;

/// Suffix shared by every Challenge Pro experience and its CMS variant group.
pub const CHALLENGE_PRO_MARKER: &str = "-challenge-pro";

/// Delivery alias of the first variant of a Personalize experience.
pub fn variant_alias(experience_short_uid: &str) -> String {
    format!("cs_personalize_{experience_short_uid}_0")
}

pub fn experience_name(team: &str) -> String {
    format!("{team}{CHALLENGE_PRO_MARKER}")
}

/// Returns the team part of a Challenge Pro variant group name, matching the
/// marker case-insensitively and keeping the team's original casing.
pub fn team_from_group_name(name: &str) -> Option<&str> {
    // ASCII lowercasing keeps byte offsets aligned with `name`.
    let idx = name
        .to_ascii_lowercase()
        .find(CHALLENGE_PRO_MARKER)?;
    let team = name[..idx].trim();
    (!team.is_empty()).then_some(team)
}

/// Bearer token for the Personalize API.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new<T: Into<String>>(token: T) -> Self {
        AccessToken(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}
