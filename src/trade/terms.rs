use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_sol_types::SolValue;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Side, TradeError, TradeIntent};

const BPS: u64 = 10_000;
const X18: u32 = 18;

/// Decimal places that price and amount are scaled to before hashing.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct HashPrecision {
    #[serde(default = "HashPrecision::default_price_decimals")]
    pub price_decimals: u32,
    #[serde(default = "HashPrecision::default_amount_decimals")]
    pub amount_decimals: u32,
}

impl HashPrecision {
    fn default_price_decimals() -> u32 {
        2
    }

    fn default_amount_decimals() -> u32 {
        4
    }
}

impl Default for HashPrecision {
    fn default() -> Self {
        Self {
            price_decimals: Self::default_price_decimals(),
            amount_decimals: Self::default_amount_decimals(),
        }
    }
}

/// Token pair that trades settle in. Price is quoted in `quote_token` per one `base_token`.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct Market {
    pub pair: String,
    pub base_token: Address,
    pub quote_token: Address,
    pub base_decimals: u32,
    pub quote_decimals: u32,
}

/// Token leg of an `executeTrade` call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Settlement {
    pub token_in: Address,
    pub amount_in: U256,
    pub min_amount_out: U256,
}

/// Integer form of an intent. Everything sent to the chain or hashed comes from here, floats never
/// reach the hash.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OrderTerms {
    pub order_hash: B256,
    pub scaled_price: U256,
    pub scaled_amount: U256,
    pub price_x18: U256,
    pub settlement: Option<Settlement>,
}

/// Scales `value` by `10^decimals` and truncates toward zero. `None` for negative values or
/// overflow.
pub fn to_fixed(value: Decimal, decimals: u32) -> Option<U256> {
    if value.is_sign_negative() && !value.is_zero() {
        return None;
    }
    let mantissa = u128::try_from(value.mantissa()).ok()?;
    let ten = U256::from(10u8);
    let scaled = U256::from(mantissa).checked_mul(ten.checked_pow(U256::from(decimals))?)?;
    Some(scaled / ten.checked_pow(U256::from(value.scale()))?)
}

/// keccak256 over the packed encoding of `(string id, string side, uint256 price, uint256 amount)`.
pub fn order_hash(id: &str, side: Side, scaled_price: U256, scaled_amount: U256) -> B256 {
    let packed = (
        id.to_string(),
        side.as_str().to_string(),
        scaled_price,
        scaled_amount,
    )
        .abi_encode_packed();
    keccak256(packed)
}

fn invalid(msg: impl Into<String>) -> TradeError {
    TradeError::InvalidIntent(msg.into())
}

fn with_slippage(expected: U256, max_slippage_bps: Option<u32>) -> U256 {
    match max_slippage_bps {
        Some(bps) => {
            let keep = BPS.saturating_sub(bps as u64);
            expected * U256::from(keep) / U256::from(BPS)
        }
        None => U256::ZERO,
    }
}

impl OrderTerms {
    pub fn build(
        intent: &TradeIntent,
        precision: HashPrecision,
        market: Option<&Market>,
        max_slippage_bps: Option<u32>,
    ) -> Result<Self, TradeError> {
        if intent.price <= Decimal::ZERO {
            return Err(invalid("price must be positive"));
        }
        if intent.amount <= Decimal::ZERO {
            return Err(invalid("amount must be positive"));
        }

        let scaled_price = to_fixed(intent.price, precision.price_decimals)
            .ok_or_else(|| invalid("price out of range"))?;
        let scaled_amount = to_fixed(intent.amount, precision.amount_decimals)
            .ok_or_else(|| invalid("amount out of range"))?;
        let price_x18 = to_fixed(intent.price, X18).ok_or_else(|| invalid("price out of range"))?;

        let settlement = match market {
            Some(market) => Some(Self::settle(intent, market, max_slippage_bps)?),
            None => None,
        };

        Ok(Self {
            order_hash: order_hash(&intent.id, intent.side, scaled_price, scaled_amount),
            scaled_price,
            scaled_amount,
            price_x18,
            settlement,
        })
    }

    fn settle(
        intent: &TradeIntent,
        market: &Market,
        max_slippage_bps: Option<u32>,
    ) -> Result<Settlement, TradeError> {
        if let Some(pair) = &intent.pair {
            if pair != &market.pair {
                return Err(invalid(format!("unknown pair {pair}")));
            }
        }

        let total = intent
            .price
            .checked_mul(intent.amount)
            .ok_or_else(|| invalid("total out of range"))?;
        let base = to_fixed(intent.amount, market.base_decimals)
            .ok_or_else(|| invalid("amount out of range"))?;
        let quote =
            to_fixed(total, market.quote_decimals).ok_or_else(|| invalid("total out of range"))?;

        let (token_in, amount_in, expected_out) = match intent.side {
            Side::Buy => (market.quote_token, quote, base),
            Side::Sell => (market.base_token, base, quote),
        };
        if amount_in.is_zero() {
            return Err(invalid("trade rounds to zero"));
        }

        Ok(Settlement {
            token_in,
            amount_in,
            min_amount_out: with_slippage(expected_out, max_slippage_bps),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use alloy_primitives::{keccak256, Address, U256};
    use rust_decimal::Decimal;

    use super::{order_hash, to_fixed, HashPrecision, Market, OrderTerms};
    use crate::trade::{Side, TradeError, TradeIntent};

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn market() -> Market {
        Market {
            pair: "ETH/USDC".to_string(),
            base_token: Address::repeat_byte(0xee),
            quote_token: Address::repeat_byte(0xcc),
            base_decimals: 18,
            quote_decimals: 6,
        }
    }

    #[test]
    fn test_that_to_fixed_truncates() {
        assert_eq!(to_fixed(dec("2410.00"), 2), Some(U256::from(241000)));
        assert_eq!(to_fixed(dec("2410.019"), 2), Some(U256::from(241001)));
        assert_eq!(to_fixed(dec("4.5"), 4), Some(U256::from(45000)));
        assert_eq!(to_fixed(dec("0.00009"), 4), Some(U256::ZERO));
        assert_eq!(
            to_fixed(dec("4.5"), 18),
            Some(U256::from(4_500_000_000_000_000_000u128))
        );
        assert_eq!(to_fixed(dec("-1"), 2), None);
    }

    #[test]
    fn test_that_order_hash_matches_packed_layout() {
        let mut packed = b"abc123".to_vec();
        packed.extend_from_slice(b"buy");
        packed.extend_from_slice(&U256::from(241000).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(45000).to_be_bytes::<32>());

        let hash = order_hash("abc123", Side::Buy, U256::from(241000), U256::from(45000));
        assert_eq!(hash, keccak256(&packed));
    }

    #[test]
    fn test_that_order_hash_is_deterministic_and_sensitive() {
        let precision = HashPrecision::default();
        let intent = TradeIntent::buy("abc", dec("2410.00"), dec("4.5"));
        let first = OrderTerms::build(&intent, precision, None, None).unwrap();
        let second = OrderTerms::build(&intent.clone(), precision, None, None).unwrap();
        assert_eq!(first.order_hash, second.order_hash);

        let price_tick = TradeIntent::buy("abc", dec("2410.01"), dec("4.5"));
        let amount_tick = TradeIntent::buy("abc", dec("2410.00"), dec("4.5001"));
        let other_side = TradeIntent::sell("abc", dec("2410.00"), dec("4.5"));
        let other_id = TradeIntent::buy("abd", dec("2410.00"), dec("4.5"));
        for changed in [price_tick, amount_tick, other_side, other_id] {
            let terms = OrderTerms::build(&changed, precision, None, None).unwrap();
            assert_ne!(terms.order_hash, first.order_hash);
        }

        //Digits below the hash precision do not change the identity
        let sub_unit = TradeIntent::buy("abc", dec("2410.001"), dec("4.50001"));
        let terms = OrderTerms::build(&sub_unit, precision, None, None).unwrap();
        assert_eq!(terms.order_hash, first.order_hash);
    }

    #[test]
    fn test_that_buy_settles_in_quote() {
        let intent = TradeIntent::buy("x", dec("2400"), dec("0.5"));
        let terms = OrderTerms::build(&intent, HashPrecision::default(), Some(&market()), Some(100))
            .unwrap();
        let leg = terms.settlement.unwrap();
        assert_eq!(leg.token_in, Address::repeat_byte(0xcc));
        assert_eq!(leg.amount_in, U256::from(1_200_000_000u64));
        //0.5 ETH less 1%
        assert_eq!(
            leg.min_amount_out,
            U256::from(495_000_000_000_000_000u128)
        );
        assert_eq!(
            terms.price_x18,
            U256::from(2400u64) * U256::from(10u64).pow(U256::from(18))
        );
    }

    #[test]
    fn test_that_sell_settles_in_base() {
        let intent = TradeIntent::sell("x", dec("2400"), dec("0.5")).with_pair("ETH/USDC");
        let terms =
            OrderTerms::build(&intent, HashPrecision::default(), Some(&market()), None).unwrap();
        let leg = terms.settlement.unwrap();
        assert_eq!(leg.token_in, Address::repeat_byte(0xee));
        assert_eq!(leg.amount_in, U256::from(500_000_000_000_000_000u128));
        assert_eq!(leg.min_amount_out, U256::ZERO);
    }

    #[test]
    fn test_that_bad_intents_are_rejected() {
        let precision = HashPrecision::default();
        let zero = TradeIntent::buy("x", dec("2400"), dec("0"));
        assert!(matches!(
            OrderTerms::build(&zero, precision, None, None),
            Err(TradeError::InvalidIntent(_))
        ));

        let negative = TradeIntent::buy("x", dec("-1"), dec("1"));
        assert!(matches!(
            OrderTerms::build(&negative, precision, None, None),
            Err(TradeError::InvalidIntent(_))
        ));

        let wrong_pair = TradeIntent::buy("x", dec("2400"), dec("1")).with_pair("BTC/USDC");
        assert!(matches!(
            OrderTerms::build(&wrong_pair, precision, Some(&market()), None),
            Err(TradeError::InvalidIntent(_))
        ));
    }
}
