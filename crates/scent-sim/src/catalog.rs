//! Demo catalog, archetypes and seed profiles used by the simulators

use scent_profile::{FragranceItem, InMemoryContentStore};

/// Trait sets visitors answer the quiz with
pub const ARCHETYPES: [&[&str]; 6] = [
    &["sophisticated", "confident"],
    &["fresh", "energetic"],
    &["romantic", "elegant"],
    &["calm", "natural"],
    &["bold", "playful"],
    &["mysterious", "warm"],
];

/// Returning users seeded into the profile store: (user, traits, favourites)
pub const SEED_USERS: [(&str, &[&str], &[&str]); 4] = [
    ("ava", &["sophisticated", "confident"], &["noir-01", "rose-03"]),
    ("ben", &["fresh", "playful"], &["citrus-02", "aqua-06"]),
    ("cleo", &["romantic", "elegant"], &["rose-03", "iris-08"]),
    ("dev", &["calm", "natural"], &["cedar-04", "vetiver-09"]),
];

/// Catalog with a spread of personality tags
#[must_use]
pub fn demo_catalog() -> Vec<FragranceItem> {
    vec![
        FragranceItem::new("noir-01", "Velvet Noir", "Maison Ombre")
            .with_tags(["sophisticated", "confident", "mysterious"])
            .with_accords(["oud", "amber", "leather"])
            .with_popularity(0.92),
        FragranceItem::new("citrus-02", "Morning Grove", "Atelier Sol")
            .with_tags(["fresh", "energetic", "playful"])
            .with_accords(["bergamot", "neroli"])
            .with_popularity(0.81),
        FragranceItem::new("rose-03", "Rose Letter", "Maison Ombre")
            .with_tags(["romantic", "sophisticated", "elegant"])
            .with_accords(["rose", "iris", "musk"])
            .with_popularity(0.77),
        FragranceItem::new("cedar-04", "Cedar Path", "North & Pine")
            .with_tags(["calm", "natural", "grounded"])
            .with_accords(["cedar", "vetiver"])
            .with_popularity(0.64),
        FragranceItem::new("spice-05", "Ember Market", "Atelier Sol")
            .with_tags(["confident", "bold", "warm"])
            .with_accords(["cardamom", "tobacco", "vanilla"])
            .with_popularity(0.71),
        FragranceItem::new("aqua-06", "Salt Air", "North & Pine")
            .with_tags(["fresh", "calm", "casual"])
            .with_accords(["sea salt", "driftwood"])
            .with_popularity(0.58),
        FragranceItem::new("smoke-07", "Night Ritual", "Maison Ombre")
            .with_tags(["mysterious", "bold", "warm"])
            .with_accords(["incense", "labdanum"])
            .with_popularity(0.66),
        FragranceItem::new("iris-08", "Paper Iris", "Studio Lune")
            .with_tags(["elegant", "romantic", "calm"])
            .with_accords(["iris", "violet", "suede"])
            .with_popularity(0.69),
        FragranceItem::new("vetiver-09", "Field Notes", "North & Pine")
            .with_tags(["natural", "grounded", "casual"])
            .with_accords(["vetiver", "hay", "tea"])
            .with_popularity(0.52),
        FragranceItem::new("pop-10", "Soda Pop", "Studio Lune")
            .with_tags(["playful", "energetic", "bold"])
            .with_accords(["pink pepper", "cola", "lime"])
            .with_popularity(0.61),
    ]
}

/// Content store over [`demo_catalog`]
#[must_use]
pub fn demo_content_store() -> InMemoryContentStore {
    InMemoryContentStore::with_items(demo_catalog())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seed_favourites_exist_in_the_catalog() {
        let ids: HashSet<String> = demo_catalog().into_iter().map(|item| item.id).collect();
        for (_, _, favourites) in SEED_USERS {
            assert!(favourites.iter().all(|id| ids.contains(*id)));
        }
    }
}
