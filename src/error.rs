use thiserror::Error;
use uuid::Uuid;

use crate::cards::Card;

#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Invalid rate limiter configuration: {0}")]
    Config(String),
}

/// Failure reported by a card or lootbox store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Store rejected request: {0}")]
    Rejected(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum LootBoxError {
    #[error("Invalid lootbox configuration: {0}")]
    Config(String),

    #[error("Lootbox not found: {0}")]
    NotFound(Uuid),

    #[error("Lootbox is already being opened: {0}")]
    AlreadyOpening(Uuid),

    #[error("Lootbox {lootbox_id} does not belong to user {user_id}")]
    NotOwner { lootbox_id: Uuid, user_id: Uuid },

    /// Card minting stopped part way; `minted` holds the cards that exist.
    #[error("Card creation failed after {} card(s): {source}", .minted.len())]
    CardCreation {
        minted: Vec<Card>,
        #[source]
        source: StoreError,
    },

    /// Every card was minted but the lootbox record is still present.
    #[error("Lootbox deletion failed after minting {} card(s): {source}", .cards.len())]
    Deletion {
        cards: Vec<Card>,
        #[source]
        source: StoreError,
    },

    #[error("Lootbox store error: {0}")]
    Store(#[from] StoreError),
}

impl LootBoxError {
    /// Cards that were minted before the operation failed.
    pub fn minted_cards(&self) -> &[Card] {
        match self {
            LootBoxError::CardCreation { minted, .. } => minted,
            LootBoxError::Deletion { cards, .. } => cards,
            _ => &[],
        }
    }
}
