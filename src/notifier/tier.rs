/// Display bucket for a purchase, chosen by its USD value.
#[derive(Debug, Clone, PartialEq)]
pub struct Tier {
    pub label: &'static str,
    pub emoji: &'static str,
    /// Values strictly below this bound belong to the tier. `None` for the top tier.
    pub below: Option<f64>,
}

pub static TIERS: [Tier; 4] = [
    Tier {
        label: "Shrimp",
        emoji: "🦐",
        below: Some(50.0),
    },
    Tier {
        label: "Fish",
        emoji: "🐟",
        below: Some(200.0),
    },
    Tier {
        label: "Dolphin",
        emoji: "🐬",
        below: Some(500.0),
    },
    Tier {
        label: "Whale",
        emoji: "🐋",
        below: None,
    },
];

/// Ordered thresholds, lower bound inclusive on the upper tier.
pub fn tier_for(usd_value: f64) -> &'static Tier {
    TIERS
        .iter()
        .find(|tier| tier.below.is_none_or(|bound| usd_value < bound))
        .unwrap_or(&TIERS[TIERS.len() - 1])
}
