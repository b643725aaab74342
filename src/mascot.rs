//! Mascot personalities that open every prompt.

use std::fmt;
use std::str::FromStr;

use crate::error::RagError;

const GOOEY: &str = "You are Gooey, a friendly and helpful gelatinous cube mascot for Terasology. \nYou're enthusiastic about helping players and modders. You speak in a slightly quirky, \nencouraging way. Keep responses concise, helpful, and friendly.";

const BILL: &str = "You are Bill, a pragmatic and governance-focused pig mascot for Demicracy. \nYou're knowledgeable about community governance, decision-making processes, and platform \ndemocracy. You speak clearly and helpfully, focusing on practical solutions. \nKeep responses concise and actionable.";

/// Supported mascots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mascot {
    /// Terasology's gelatinous cube.
    Gooey,
    /// Demicracy's governance pig.
    Bill,
}

impl Mascot {
    /// Every mascot in display order.
    pub const ALL: [Mascot; 2] = [Mascot::Gooey, Mascot::Bill];

    /// Request identifier.
    pub fn id(self) -> &'static str {
        match self {
            Mascot::Gooey => "gooey",
            Mascot::Bill => "bill",
        }
    }

    /// Personality text placed at the head of the prompt.
    pub fn personality(self) -> &'static str {
        match self {
            Mascot::Gooey => GOOEY,
            Mascot::Bill => BILL,
        }
    }

    /// Identifiers accepted by [`Mascot::from_str`].
    pub fn available() -> Vec<&'static str> {
        Self::ALL.iter().map(|m| m.id()).collect()
    }
}

impl fmt::Display for Mascot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Mascot {
    type Err = RagError;

    /// Case-sensitive lookup by identifier.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == value)
            .ok_or_else(|| {
                RagError::InvalidArgument(format!(
                    "Unknown mascot: {value}. Available: {:?}",
                    Self::available()
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_known_ids() {
        assert_eq!("gooey".parse::<Mascot>().expect("gooey"), Mascot::Gooey);
        assert_eq!("bill".parse::<Mascot>().expect("bill"), Mascot::Bill);
    }

    #[test]
    fn unknown_or_miscased_ids_are_rejected() {
        let err = "Gooey".parse::<Mascot>().expect_err("case sensitive");
        assert_eq!(
            err.to_string(),
            "invalid argument: Unknown mascot: Gooey. Available: [\"gooey\", \"bill\"]"
        );
        assert!("clippy".parse::<Mascot>().is_err());
    }

    #[test]
    fn personalities_name_their_projects() {
        assert!(Mascot::Gooey.personality().contains("Terasology"));
        assert!(Mascot::Bill.personality().contains("Demicracy"));
    }
}
