use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::{user::UserId, wallet::Amount};

pub type GoodsId = Uuid;

#[derive(Debug, Error)]
pub enum GoodsError {
    #[error("Goods name is required")]
    MissingName,
    #[error("Cost must be positive, got {0}")]
    InvalidCost(Amount),
    #[error("Goods {0} not found")]
    NotFound(GoodsId),
}

/// Something a user sells. Payment goes to the owner's default wallet.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Goods {
    id: GoodsId,
    #[serde(skip)]
    owner: UserId,
    name: String,
    cost: Amount,
}

impl Goods {
    pub fn id(&self) -> GoodsId {
        self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cost(&self) -> Amount {
        self.cost
    }
}

#[derive(Default)]
pub struct GoodsCatalog {
    by_id: Mutex<HashMap<GoodsId, Arc<Goods>>>,
}

impl GoodsCatalog {
    fn by_id(&self) -> MutexGuard<'_, HashMap<GoodsId, Arc<Goods>>> {
        self.by_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create(
        &self,
        owner: UserId,
        name: &str,
        cost: Amount,
    ) -> Result<Arc<Goods>, GoodsError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GoodsError::MissingName);
        }
        if cost <= 0 {
            return Err(GoodsError::InvalidCost(cost));
        }
        let goods = Arc::new(Goods {
            id: Uuid::new_v4(),
            owner,
            name: name.to_string(),
            cost,
        });
        self.by_id().insert(goods.id, Arc::clone(&goods));
        debug!(goods_id = %goods.id, owner = %owner, name, cost, "goods created");
        Ok(goods)
    }

    pub fn get(&self, id: GoodsId) -> Result<Arc<Goods>, GoodsError> {
        self.by_id()
            .get(&id)
            .cloned()
            .ok_or(GoodsError::NotFound(id))
    }

    pub fn remove(&self, id: GoodsId) -> Option<Arc<Goods>> {
        self.by_id().remove(&id)
    }

    /// Goods of one owner, ordered by name.
    pub fn by_owner(&self, owner: UserId) -> Vec<Arc<Goods>> {
        let mut goods: Vec<_> = self
            .by_id()
            .values()
            .filter(|g| g.owner == owner)
            .cloned()
            .collect();
        goods.sort_by(|a, b| a.name.cmp(&b.name));
        goods
    }

    pub fn find(&self, owner: UserId, name: &str) -> Option<Arc<Goods>> {
        self.by_id()
            .values()
            .find(|g| g.owner == owner && g.name == name.trim())
            .cloned()
    }
}
