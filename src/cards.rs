use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use uuid::Uuid;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Wood,
    Bronze,
    Silver,
    Gold,
    Diamond,
}

impl Quality {
    /// Range every skill rating of a card of this quality falls in.
    pub fn skill_range(self) -> RangeInclusive<u8> {
        match self {
            Quality::Wood => 5..=35,
            Quality::Bronze => 20..=50,
            Quality::Silver => 35..=65,
            Quality::Gold => 50..=80,
            Quality::Diamond => 70..=99,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DominantFoot {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub player_name: String,
    pub quality: Quality,
    pub user_id: Uuid,

    pub height: f32,
    pub weight: f32,
    pub dominant_foot: DominantFoot,

    pub skin_color: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub accessories: Vec<u8>,
    pub is_tattoo: bool,

    pub tactics: u8,
    pub positioning: u8,
    pub composure: u8,
    pub aggression: u8,
    pub vision: u8,
    pub awareness: u8,
    pub crosses: u8,

    pub physique: u8,
    pub acceleration: u8,
    pub running_speed: u8,
    pub reaction_speed: u8,
    pub agility: u8,
    pub stamina: u8,
    pub strength: u8,
    pub jumping: u8,
    pub balance: u8,

    pub technique: u8,
    pub dribbling: u8,
    pub ball_control: u8,
    pub weak_foot: u8,
    pub skill_moves: u8,
    pub finesse: u8,
    pub curve: u8,
    pub volleys: u8,
    pub short_passing: u8,
    pub long_passing: u8,
    pub forward_pass: u8,

    pub offence: u8,
    pub finishing_ability: u8,
    pub shot_power: u8,
    pub accuracy: u8,
    pub distance: u8,
    pub penalty: u8,
    pub free_kicks: u8,
    pub corners: u8,
    pub heading_accuracy: u8,

    pub defence: u8,
    pub offside_trap: u8,
    pub sliding: u8,
    pub tackles: u8,
    pub ball_focus: u8,
    pub interceptions: u8,
    pub vigilance: u8,

    pub goalkeeping: u8,
    pub reflexes: u8,
    pub diving: u8,
    pub handling: u8,
    pub sweeping: u8,
    pub throwing: u8,
}

const FIRST_NAMES: &[&str] = &[
    "Luca", "Mateo", "Noah", "Kofi", "Jonas", "Rafael", "Ivan", "Hugo", "Tomas", "Yusuf",
];

const LAST_NAMES: &[&str] = &[
    "Moreno", "Kovac", "Lindqvist", "Mensah", "Duarte", "Okafor", "Petrov", "Silva", "Brandt",
    "Haddad",
];

fn average(skills: &[u8]) -> u8 {
    let sum: u32 = skills.iter().map(|&s| s as u32).sum();
    (sum / skills.len() as u32) as u8
}

impl Card {
    /// Mints a new card for `owner` with every skill rolled in `quality`'s range.
    pub fn generate<R: Rng + ?Sized>(owner: Uuid, quality: Quality, rng: &mut R) -> Self {
        let range = quality.skill_range();
        let mut roll = |n: usize| -> Vec<u8> { (0..n).map(|_| rng.random_range(range.clone())).collect() };

        let tactics = roll(6);
        let physique = roll(8);
        let technique = roll(10);
        let offence = roll(8);
        let defence = roll(6);
        let goalkeeping = roll(5);

        let first = FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())];
        let last = LAST_NAMES[rng.random_range(0..LAST_NAMES.len())];
        let accessories = (0..rng.random_range(0..=3u8))
            .map(|_| rng.random_range(1..=10u8))
            .collect();

        Self {
            id: Uuid::new_v4(),
            player_name: format!("{} {}", first, last),
            quality,
            user_id: owner,

            height: rng.random_range(165.0..200.0),
            weight: rng.random_range(60.0..95.0),
            dominant_foot: if rng.random_bool(0.75) {
                DominantFoot::Right
            } else {
                DominantFoot::Left
            },

            skin_color: rng.random_range(1..=10),
            hair_style: rng.random_range(1..=10),
            hair_color: rng.random_range(1..=10),
            accessories,
            is_tattoo: rng.random_bool(0.2),

            tactics: average(&tactics),
            positioning: tactics[0],
            composure: tactics[1],
            aggression: tactics[2],
            vision: tactics[3],
            awareness: tactics[4],
            crosses: tactics[5],

            physique: average(&physique),
            acceleration: physique[0],
            running_speed: physique[1],
            reaction_speed: physique[2],
            agility: physique[3],
            stamina: physique[4],
            strength: physique[5],
            jumping: physique[6],
            balance: physique[7],

            technique: average(&technique),
            dribbling: technique[0],
            ball_control: technique[1],
            weak_foot: technique[2],
            skill_moves: technique[3],
            finesse: technique[4],
            curve: technique[5],
            volleys: technique[6],
            short_passing: technique[7],
            long_passing: technique[8],
            forward_pass: technique[9],

            offence: average(&offence),
            finishing_ability: offence[0],
            shot_power: offence[1],
            accuracy: offence[2],
            distance: offence[3],
            penalty: offence[4],
            free_kicks: offence[5],
            corners: offence[6],
            heading_accuracy: offence[7],

            defence: average(&defence),
            offside_trap: defence[0],
            sliding: defence[1],
            tackles: defence[2],
            ball_focus: defence[3],
            interceptions: defence[4],
            vigilance: defence[5],

            goalkeeping: average(&goalkeeping),
            reflexes: goalkeeping[0],
            diving: goalkeeping[1],
            handling: goalkeeping[2],
            sweeping: goalkeeping[3],
            throwing: goalkeeping[4],
        }
    }
}

#[async_trait]
pub trait CardStore: Send + Sync {
    async fn create(&self, owner_id: Uuid, quality: Quality) -> Result<Card, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Card, StoreError>;
    async fn list(&self) -> Result<Vec<Card>, StoreError>;
    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;
}

pub struct InMemoryCardStore {
    cards: DashMap<Uuid, Card>,
    rng: Mutex<StdRng>,
}

impl InMemoryCardStore {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    pub fn with_rng(rng: StdRng) -> Self {
        Self {
            cards: DashMap::new(),
            rng: Mutex::new(rng),
        }
    }
}

#[async_trait]
impl CardStore for InMemoryCardStore {
    async fn create(&self, owner_id: Uuid, quality: Quality) -> Result<Card, StoreError> {
        let card = {
            let mut rng = self.rng.lock();
            Card::generate(owner_id, quality, &mut *rng)
        };
        self.cards.insert(card.id, card.clone());
        Ok(card)
    }

    async fn get(&self, id: Uuid) -> Result<Card, StoreError> {
        self.cards
            .get(&id)
            .map(|c| c.clone())
            .ok_or(StoreError::NotFound { entity: "card", id })
    }

    async fn list(&self) -> Result<Vec<Card>, StoreError> {
        Ok(self.cards.iter().map(|c| c.value().clone()).collect())
    }

    async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
        self.cards
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "card", id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skills(card: &Card) -> Vec<u8> {
        vec![
            card.positioning, card.composure, card.aggression, card.vision, card.awareness,
            card.crosses, card.acceleration, card.running_speed, card.reaction_speed, card.agility,
            card.stamina, card.strength, card.jumping, card.balance, card.dribbling,
            card.ball_control, card.weak_foot, card.skill_moves, card.finesse, card.curve,
            card.volleys, card.short_passing, card.long_passing, card.forward_pass,
            card.finishing_ability, card.shot_power, card.accuracy, card.distance, card.penalty,
            card.free_kicks, card.corners, card.heading_accuracy, card.offside_trap, card.sliding,
            card.tackles, card.ball_focus, card.interceptions, card.vigilance, card.reflexes,
            card.diving, card.handling, card.sweeping, card.throwing,
        ]
    }

    #[test]
    fn test_generated_skills_follow_quality_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let owner = Uuid::new_v4();

        for quality in [Quality::Wood, Quality::Bronze, Quality::Silver, Quality::Gold, Quality::Diamond] {
            let range = quality.skill_range();
            for _ in 0..20 {
                let card = Card::generate(owner, quality, &mut rng);
                assert_eq!(card.quality, quality);
                assert_eq!(card.user_id, owner);
                for skill in skills(&card) {
                    assert!(range.contains(&skill), "{:?} skill {} out of range", quality, skill);
                }
                for group in [card.tactics, card.physique, card.technique, card.offence, card.defence, card.goalkeeping] {
                    assert!(range.contains(&group));
                }
            }
        }
    }

    #[test]
    fn test_group_rating_is_mean_of_its_skills() {
        let mut rng = StdRng::seed_from_u64(9);
        let card = Card::generate(Uuid::new_v4(), Quality::Gold, &mut rng);

        let goalkeeping = [card.reflexes, card.diving, card.handling, card.sweeping, card.throwing];
        assert_eq!(card.goalkeeping, average(&goalkeeping));
    }

    #[test]
    fn test_quality_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Quality::Diamond).unwrap(), "\"diamond\"");
        let q: Quality = serde_json::from_str("\"wood\"").unwrap();
        assert_eq!(q, Quality::Wood);
    }

    #[tokio::test]
    async fn test_in_memory_store_crud() {
        let store = InMemoryCardStore::with_rng(StdRng::seed_from_u64(1));
        let owner = Uuid::new_v4();

        let card = store.create(owner, Quality::Silver).await.unwrap();
        assert_eq!(store.get(card.id).await.unwrap(), card);
        assert_eq!(store.list().await.unwrap().len(), 1);

        store.delete(card.id).await.unwrap();
        assert_eq!(
            store.get(card.id).await,
            Err(StoreError::NotFound { entity: "card", id: card.id })
        );
        assert!(store.delete(card.id).await.is_err());
    }
}
