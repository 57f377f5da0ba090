//! Turns a source order into the order placed on destinations.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::models::{Order, OrderSpec, OrderType};

use super::{ExecutionStyle, ReplicationConfig};

/// Why a source order could not be turned into a copy.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("Order {order_id}: copied quantity {quantity} is not positive")]
    InvalidQuantity { order_id: String, quantity: Decimal },

    #[error("Order {order_id}: venue reported an unparseable quantity")]
    MalformedQuantity { order_id: String },

    #[error("Order {order_id}: {order_type} copy needs a price but the source has none")]
    MissingPrice { order_id: String, order_type: String },
}

/// Scales and normalizes source orders. Pure: the same order and
/// configuration always give the same spec.
#[derive(Debug, Clone)]
pub struct OrderTransformer {
    ratio: Decimal,
    execution: ExecutionStyle,
    quantity_decimals: Option<u32>,
}

impl OrderTransformer {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self {
            ratio: config.ratio,
            execution: config.execution,
            quantity_decimals: config.quantity_decimals,
        }
    }

    pub fn transform(&self, source: &Order) -> Result<OrderSpec, TransformError> {
        let Some(source_quantity) = source.quantity else {
            return Err(TransformError::MalformedQuantity {
                order_id: source.id.clone(),
            });
        };

        let mut quantity = source_quantity * self.ratio;
        if let Some(dp) = self.quantity_decimals {
            quantity = quantity.round_dp_with_strategy(dp, RoundingStrategy::ToZero);
        }
        if quantity <= Decimal::ZERO {
            return Err(TransformError::InvalidQuantity {
                order_id: source.id.clone(),
                quantity,
            });
        }

        let (order_type, price) = match self.execution {
            ExecutionStyle::Market => (OrderType::Market, None),
            ExecutionStyle::Mirror if source.order_type.requires_price() => {
                let Some(price) = source.price else {
                    return Err(TransformError::MissingPrice {
                        order_id: source.id.clone(),
                        order_type: source.order_type.to_string(),
                    });
                };
                (source.order_type.clone(), Some(price))
            }
            ExecutionStyle::Mirror => (source.order_type.clone(), None),
        };

        Ok(OrderSpec {
            symbol: source.symbol.clone(),
            side: source.side,
            order_type,
            quantity,
            price,
            client_order_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::market_order;
    use crate::models::OrderSide;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn transformer(ratio: Decimal, execution: ExecutionStyle) -> OrderTransformer {
        OrderTransformer::new(&ReplicationConfig {
            ratio,
            execution,
            ..Default::default()
        })
    }

    #[test]
    fn test_scales_and_preserves_side_and_symbol() {
        let t = transformer(dec!(2), ExecutionStyle::Market);
        let mut source = market_order("1", "XYZUSDT", dec!(1.0));
        source.side = OrderSide::Sell;

        let spec = t.transform(&source).unwrap();
        assert_eq!(spec.quantity, dec!(2.0));
        assert_eq!(spec.side, OrderSide::Sell);
        assert_eq!(spec.symbol, "XYZUSDT");
        assert_eq!(spec.order_type, OrderType::Market);
        assert_eq!(spec.client_order_id, None);
    }

    #[test]
    fn test_scale_is_linear() {
        for (qty, ratio) in [
            (dec!(0.003), dec!(0.5)),
            (dec!(5), dec!(1)),
            (dec!(12.25), dec!(3.2)),
        ] {
            let spec = transformer(ratio, ExecutionStyle::Market)
                .transform(&market_order("1", "BTCUSDT", qty))
                .unwrap();
            assert_eq!(spec.quantity, qty * ratio);
        }
    }

    #[test]
    fn test_market_style_drops_limit_price() {
        let mut source = market_order("1", "BTCUSDT", dec!(1));
        source.order_type = OrderType::Limit;
        source.price = Some(dec!(42000));

        let spec = transformer(dec!(1), ExecutionStyle::Market)
            .transform(&source)
            .unwrap();
        assert_eq!(spec.order_type, OrderType::Market);
        assert_eq!(spec.price, None);
    }

    #[test]
    fn test_mirror_style_copies_limit_price_unmodified() {
        let mut source = market_order("1", "BTCUSDT", dec!(1));
        source.order_type = OrderType::Limit;
        source.price = Some(dec!(42000.10));

        let spec = transformer(dec!(3), ExecutionStyle::Mirror)
            .transform(&source)
            .unwrap();
        assert_eq!(spec.order_type, OrderType::Limit);
        assert_eq!(spec.price, Some(dec!(42000.10)));
        assert_eq!(spec.quantity, dec!(3));
    }

    #[test]
    fn test_mirror_style_market_source_has_no_price() {
        let mut source = market_order("1", "BTCUSDT", dec!(1));
        source.price = Some(dec!(41000));

        let spec = transformer(dec!(1), ExecutionStyle::Mirror)
            .transform(&source)
            .unwrap();
        assert_eq!(spec.order_type, OrderType::Market);
        assert_eq!(spec.price, None);
    }

    #[test]
    fn test_mirror_limit_without_price_fails() {
        let mut source = market_order("1", "BTCUSDT", dec!(1));
        source.order_type = OrderType::Limit;

        let err = transformer(dec!(1), ExecutionStyle::Mirror)
            .transform(&source)
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingPrice { .. }));
    }

    #[test]
    fn test_zero_quantity_is_invalid() {
        let err = transformer(dec!(2), ExecutionStyle::Market)
            .transform(&market_order("9", "BTCUSDT", dec!(0)))
            .unwrap_err();
        assert_eq!(
            err,
            TransformError::InvalidQuantity {
                order_id: "9".to_string(),
                quantity: dec!(0)
            }
        );
    }

    #[test]
    fn test_truncation_to_zero_is_invalid() {
        let t = OrderTransformer::new(&ReplicationConfig {
            ratio: dec!(0.1),
            quantity_decimals: Some(3),
            ..Default::default()
        });

        let spec = t.transform(&market_order("1", "BTCUSDT", dec!(0.0199))).unwrap();
        assert_eq!(spec.quantity, dec!(0.001));

        let err = t.transform(&market_order("2", "BTCUSDT", dec!(0.009))).unwrap_err();
        assert!(matches!(err, TransformError::InvalidQuantity { .. }));
    }

    #[test]
    fn test_malformed_quantity() {
        let mut source = market_order("1", "BTCUSDT", dec!(1));
        source.quantity = None;

        let err = transformer(dec!(1), ExecutionStyle::Market)
            .transform(&source)
            .unwrap_err();
        assert!(matches!(err, TransformError::MalformedQuantity { .. }));
    }

    proptest! {
        /// Copies scale linearly with the source quantity and keep its side
        /// and symbol.
        #[test]
        fn transform_is_linear_and_keeps_identity(
            a in 1i64..10_000_000,
            b in 1i64..10_000_000,
            r in 1i64..10_000,
            sell in any::<bool>(),
            symbol in "[A-Z]{2,6}USDT",
        ) {
            let ratio = Decimal::new(r, 2);
            let t = transformer(ratio, ExecutionStyle::Market);
            let side = if sell { OrderSide::Sell } else { OrderSide::Buy };
            let copy_of = |qty: Decimal| {
                let mut source = market_order("1", &symbol, qty);
                source.side = side;
                t.transform(&source)
            };

            let qa = Decimal::new(a, 3);
            let qb = Decimal::new(b, 3);
            let spec_a = copy_of(qa).unwrap();
            let spec_b = copy_of(qb).unwrap();
            let spec_sum = copy_of(qa + qb).unwrap();

            prop_assert_eq!(spec_a.quantity, qa * ratio);
            prop_assert_eq!(spec_sum.quantity, spec_a.quantity + spec_b.quantity);
            prop_assert_eq!(spec_a.side, side);
            prop_assert_eq!(&spec_a.symbol, &symbol);
            prop_assert_eq!(spec_a.order_type, OrderType::Market);
        }
    }
}
