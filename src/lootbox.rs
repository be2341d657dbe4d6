use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cards::{Card, CardStore};
use crate::config::{BoxConfig, LootBoxesConfig};
use crate::draw::WeightedDraw;
use crate::error::{LootBoxError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LootBoxType {
    #[serde(rename = "Regular Box")]
    Regular,
    #[serde(rename = "Release Celebration Box")]
    ReleaseCelebration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LootBox {
    pub user_id: Uuid,
    pub lootbox_id: Uuid,
    #[serde(rename = "type")]
    pub kind: LootBoxType,
}

#[async_trait]
pub trait LootBoxStore: Send + Sync {
    async fn create(&self, lootbox: LootBox) -> Result<(), StoreError>;
    async fn get(&self, lootbox_id: Uuid) -> Result<LootBox, StoreError>;
    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<LootBox>, StoreError>;
    async fn delete(&self, lootbox_id: Uuid) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryLootBoxStore {
    boxes: DashMap<Uuid, LootBox>,
}

impl InMemoryLootBoxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LootBoxStore for InMemoryLootBoxStore {
    async fn create(&self, lootbox: LootBox) -> Result<(), StoreError> {
        if self.boxes.contains_key(&lootbox.lootbox_id) {
            return Err(StoreError::Rejected(format!(
                "lootbox {} already exists",
                lootbox.lootbox_id
            )));
        }
        self.boxes.insert(lootbox.lootbox_id, lootbox);
        Ok(())
    }

    async fn get(&self, lootbox_id: Uuid) -> Result<LootBox, StoreError> {
        self.boxes
            .get(&lootbox_id)
            .map(|b| b.clone())
            .ok_or(StoreError::NotFound { entity: "lootbox", id: lootbox_id })
    }

    async fn list_by_user(&self, user_id: Uuid) -> Result<Vec<LootBox>, StoreError> {
        Ok(self
            .boxes
            .iter()
            .filter(|b| b.user_id == user_id)
            .map(|b| b.value().clone())
            .collect())
    }

    async fn delete(&self, lootbox_id: Uuid) -> Result<(), StoreError> {
        // Removal is atomic, so only one of two racing openers gets Ok.
        self.boxes
            .remove(&lootbox_id)
            .map(|_| ())
            .ok_or(StoreError::NotFound { entity: "lootbox", id: lootbox_id })
    }
}

struct BoxDraw {
    cost: u64,
    cards_num: usize,
    draw: WeightedDraw,
}

impl BoxDraw {
    fn from_config(kind: LootBoxType, config: &BoxConfig) -> Result<Self, LootBoxError> {
        if config.cards_num == 0 {
            return Err(LootBoxError::Config(format!("{:?}: cards_num must be positive", kind)));
        }
        let draw = WeightedDraw::new(config.weights())
            .ok_or_else(|| LootBoxError::Config(format!("{:?}: all quality weights are zero", kind)))?;
        Ok(Self {
            cost: config.cost,
            cards_num: config.cards_num,
            draw,
        })
    }
}

/// Marks a lootbox as being opened until dropped.
struct OpenClaim<'a> {
    opening: &'a DashMap<Uuid, ()>,
    lootbox_id: Uuid,
}

impl<'a> OpenClaim<'a> {
    fn acquire(opening: &'a DashMap<Uuid, ()>, lootbox_id: Uuid) -> Option<Self> {
        if opening.insert(lootbox_id, ()).is_some() {
            return None;
        }
        Some(Self { opening, lootbox_id })
    }
}

impl Drop for OpenClaim<'_> {
    fn drop(&mut self) {
        self.opening.remove(&self.lootbox_id);
    }
}

/// Opens lootboxes into freshly minted cards.
pub struct LootBoxService {
    cards: Arc<dyn CardStore>,
    lootboxes: Arc<dyn LootBoxStore>,
    regular: BoxDraw,
    release_celebration: BoxDraw,
    rng: Mutex<StdRng>,
    opening: DashMap<Uuid, ()>,
}

impl LootBoxService {
    pub fn new(
        cards: Arc<dyn CardStore>,
        lootboxes: Arc<dyn LootBoxStore>,
        config: &LootBoxesConfig,
    ) -> Result<Self, LootBoxError> {
        Self::with_rng(cards, lootboxes, config, StdRng::from_os_rng())
    }

    pub fn with_rng(
        cards: Arc<dyn CardStore>,
        lootboxes: Arc<dyn LootBoxStore>,
        config: &LootBoxesConfig,
        rng: StdRng,
    ) -> Result<Self, LootBoxError> {
        Ok(Self {
            cards,
            lootboxes,
            regular: BoxDraw::from_config(LootBoxType::Regular, &config.regular)?,
            release_celebration: BoxDraw::from_config(
                LootBoxType::ReleaseCelebration,
                &config.release_celebration,
            )?,
            rng: Mutex::new(rng),
            opening: DashMap::new(),
        })
    }

    fn box_draw(&self, kind: LootBoxType) -> &BoxDraw {
        match kind {
            LootBoxType::Regular => &self.regular,
            LootBoxType::ReleaseCelebration => &self.release_celebration,
        }
    }

    pub async fn create(&self, user_id: Uuid, kind: LootBoxType) -> Result<LootBox, LootBoxError> {
        let lootbox = LootBox {
            user_id,
            lootbox_id: Uuid::new_v4(),
            kind,
        };
        self.lootboxes.create(lootbox.clone()).await?;
        info!(
            user_id = %user_id,
            lootbox_id = %lootbox.lootbox_id,
            kind = ?kind,
            cost = self.box_draw(kind).cost,
            "Lootbox created"
        );
        Ok(lootbox)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<LootBox>, LootBoxError> {
        Ok(self.lootboxes.list_by_user(user_id).await?)
    }

    /// Loads `lootbox_id`, checks it belongs to `user_id` and opens it.
    pub async fn open_by_id(&self, user_id: Uuid, lootbox_id: Uuid) -> Result<Vec<Card>, LootBoxError> {
        let lootbox = match self.lootboxes.get(lootbox_id).await {
            Ok(lootbox) => lootbox,
            Err(StoreError::NotFound { .. }) => return Err(LootBoxError::NotFound(lootbox_id)),
            Err(e) => return Err(e.into()),
        };
        if lootbox.user_id != user_id {
            return Err(LootBoxError::NotOwner { lootbox_id, user_id });
        }
        self.open(&lootbox).await
    }

    /// Mints `cards_num` cards for the lootbox owner and deletes the lootbox.
    ///
    /// Only one open of a given lootbox runs at a time, and the lootbox must
    /// still be stored once claimed. Cards already minted are kept when a
    /// later step fails; they travel in the error so the caller can still
    /// show them.
    pub async fn open(&self, lootbox: &LootBox) -> Result<Vec<Card>, LootBoxError> {
        let _claim = OpenClaim::acquire(&self.opening, lootbox.lootbox_id)
            .ok_or(LootBoxError::AlreadyOpening(lootbox.lootbox_id))?;

        match self.lootboxes.get(lootbox.lootbox_id).await {
            Ok(_) => {}
            Err(StoreError::NotFound { .. }) => return Err(LootBoxError::NotFound(lootbox.lootbox_id)),
            Err(e) => return Err(e.into()),
        }

        let box_draw = self.box_draw(lootbox.kind);
        let mut cards = Vec::with_capacity(box_draw.cards_num);

        for _ in 0..box_draw.cards_num {
            let quality = {
                let mut rng = self.rng.lock();
                box_draw.draw.draw(&mut *rng)
            };
            match self.cards.create(lootbox.user_id, quality).await {
                Ok(card) => cards.push(card),
                Err(source) => {
                    warn!(
                        lootbox_id = %lootbox.lootbox_id,
                        minted = cards.len(),
                        error = %source,
                        "Card creation failed while opening lootbox"
                    );
                    return Err(LootBoxError::CardCreation { minted: cards, source });
                }
            }
        }

        if let Err(source) = self.lootboxes.delete(lootbox.lootbox_id).await {
            error!(
                lootbox_id = %lootbox.lootbox_id,
                error = %source,
                "Cards minted but lootbox could not be deleted"
            );
            return Err(LootBoxError::Deletion { cards, source });
        }

        info!(
            user_id = %lootbox.user_id,
            lootbox_id = %lootbox.lootbox_id,
            cards = cards.len(),
            "Lootbox opened"
        );
        Ok(cards)
    }
}
