//! Aggregate ranking rows returned by the aggregator and the read API.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::id::{ProductId, UserId};

/// A user ranked by the sum of their carts' discounted totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSpender {
    pub user_id: UserId,
    pub name: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_spend: Decimal,
}

/// A product ranked by the quantity sold across all cart lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopSeller {
    pub product_id: ProductId,
    pub name: String,
    pub total_quantity_sold: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_top_spender_wire_format() {
        let row = TopSpender {
            user_id: UserId::new(1),
            name: "Emily Johnson".to_owned(),
            total_spend: Decimal::new(15000, 2),
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"userId": 1, "name": "Emily Johnson", "totalSpend": 150.0})
        );
    }

    #[test]
    fn test_top_seller_wire_format() {
        let row = TopSeller {
            product_id: ProductId::new(144),
            name: "Cricket Helmet".to_owned(),
            total_quantity_sold: 12,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"productId": 144, "name": "Cricket Helmet", "totalQuantitySold": 12})
        );
    }
}
