use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of a stock movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
pub enum StockDirection {
    #[serde(rename = "add")]
    #[strum(to_string = "add")]
    In,
    #[serde(rename = "remove")]
    #[strum(to_string = "remove")]
    Out,
}

/// Closed set of inventory movement kinds.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MovementType {
    PurchaseReceipt,
    Sale,
    CustomerReturn,
    ReturnToSupplier,
    Damage,
    TransferIn,
    TransferOut,
    CountIncrease,
    CountDecrease,
}

impl MovementType {
    /// The one mapping from movement kind to stock direction.
    pub fn direction(self) -> StockDirection {
        match self {
            MovementType::PurchaseReceipt
            | MovementType::CustomerReturn
            | MovementType::TransferIn
            | MovementType::CountIncrease => StockDirection::In,
            MovementType::Sale
            | MovementType::ReturnToSupplier
            | MovementType::Damage
            | MovementType::TransferOut
            | MovementType::CountDecrease => StockDirection::Out,
        }
    }
}

/// Who and what caused a stock adjustment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentContext {
    pub purchase_order_id: Option<Uuid>,
    pub user_id: Uuid,
    pub reason: Option<String>,
}

/// An instruction for the inventory subsystem.
///
/// `id` is stable for the lifetime of the instruction so the receiver can
/// apply it exactly once even when it is delivered more than once.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjustment {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Always positive; the sign lives in `direction`.
    pub quantity: i32,
    pub direction: StockDirection,
    pub movement: MovementType,
    pub context: AdjustmentContext,
}

impl StockAdjustment {
    pub fn new(
        product_id: Uuid,
        quantity: i32,
        movement: MovementType,
        context: AdjustmentContext,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            product_id,
            quantity,
            direction: movement.direction(),
            movement,
            context,
        }
    }

    /// Signed change in on-hand units.
    pub fn signed_quantity(&self) -> i64 {
        match self.direction {
            StockDirection::In => i64::from(self.quantity),
            StockDirection::Out => -i64::from(self.quantity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_movement_maps_to_a_direction() {
        let inbound: Vec<_> = MovementType::iter()
            .filter(|m| m.direction() == StockDirection::In)
            .collect();
        assert!(inbound.contains(&MovementType::PurchaseReceipt));
        assert!(!inbound.contains(&MovementType::Sale));
    }

    #[test]
    fn signed_quantity_follows_direction() {
        let ctx = AdjustmentContext {
            purchase_order_id: None,
            user_id: Uuid::new_v4(),
            reason: None,
        };
        let receipt = StockAdjustment::new(Uuid::new_v4(), 5, MovementType::PurchaseReceipt, ctx.clone());
        let sale = StockAdjustment::new(Uuid::new_v4(), 5, MovementType::Sale, ctx);

        assert_eq!(receipt.signed_quantity(), 5);
        assert_eq!(sale.signed_quantity(), -5);
        assert_eq!(receipt.direction.to_string(), "add");
    }
}
