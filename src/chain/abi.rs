//! Contract bindings for the lane manager and the ERC-20 tokens it settles in.
use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::{sol, SolCall};

use super::TradeCall;

sol! {
    #[derive(Debug, PartialEq, Eq)]
    interface ILaneManager {
        function executeTrade(uint256 laneId, uint256 expectedNonce, bytes32 orderHash, address tokenIn, uint256 amountIn, uint256 minAmountOut) external;
        function getAllNonces() external view returns (uint256[]);
        function laneNonces(uint256 laneId) external view returns (uint256);
        function initializePool(address quoteToken, address baseToken, uint256 priceX18) external;
        function addLiquidity(address token, uint256 amount) external;
        function removeLiquidity(address token, uint256 amount) external;
        function userLiquidity(address user, address token) external view returns (uint256);
    }

    #[derive(Debug, PartialEq, Eq)]
    interface IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
        function mint(address to, uint256 amount) external;
    }
}

pub fn execute_trade(call: &TradeCall) -> Bytes {
    let (token_in, amount_in, min_amount_out) = match call.settlement {
        Some(leg) => (leg.token_in, leg.amount_in, leg.min_amount_out),
        None => (Address::ZERO, U256::ZERO, U256::ZERO),
    };
    ILaneManager::executeTradeCall {
        laneId: U256::from(call.lane_id),
        expectedNonce: U256::from(call.nonce),
        orderHash: call.order_hash,
        tokenIn: token_in,
        amountIn: amount_in,
        minAmountOut: min_amount_out,
    }
    .abi_encode()
    .into()
}

pub fn get_all_nonces() -> Bytes {
    ILaneManager::getAllNoncesCall {}.abi_encode().into()
}

pub fn allowance(owner: Address, spender: Address) -> Bytes {
    IERC20::allowanceCall { owner, spender }.abi_encode().into()
}

pub fn approve(spender: Address, amount: U256) -> Bytes {
    IERC20::approveCall { spender, amount }.abi_encode().into()
}

pub fn balance_of(account: Address) -> Bytes {
    IERC20::balanceOfCall { account }.abi_encode().into()
}

pub fn mint(to: Address, amount: U256) -> Bytes {
    IERC20::mintCall { to, amount }.abi_encode().into()
}

pub fn initialize_pool(quote_token: Address, base_token: Address, price_x18: U256) -> Bytes {
    ILaneManager::initializePoolCall {
        quoteToken: quote_token,
        baseToken: base_token,
        priceX18: price_x18,
    }
    .abi_encode()
    .into()
}

pub fn add_liquidity(token: Address, amount: U256) -> Bytes {
    ILaneManager::addLiquidityCall { token, amount }
        .abi_encode()
        .into()
}

pub fn remove_liquidity(token: Address, amount: U256) -> Bytes {
    ILaneManager::removeLiquidityCall { token, amount }
        .abi_encode()
        .into()
}

pub fn user_liquidity(user: Address, token: Address) -> Bytes {
    ILaneManager::userLiquidityCall { user, token }
        .abi_encode()
        .into()
}

pub fn decode_nonces(data: &[u8]) -> Result<Vec<U256>, alloy_sol_types::Error> {
    Ok(ILaneManager::getAllNoncesCall::abi_decode_returns(data, true)?._0)
}

pub fn decode_uint(data: &[u8]) -> Result<U256, alloy_sol_types::Error> {
    //Every uint256 view here has the same single-word return layout
    Ok(IERC20::allowanceCall::abi_decode_returns(data, true)?._0)
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256, U256};
    use alloy_sol_types::{SolCall, SolInterface};

    use super::{execute_trade, ILaneManager};
    use crate::chain::TradeCall;
    use crate::trade::Settlement;

    #[test]
    fn test_that_execute_trade_carries_lane_sequencing() {
        let call = TradeCall {
            lane_id: 3,
            nonce: 11,
            order_hash: B256::repeat_byte(9),
            settlement: Some(Settlement {
                token_in: Address::repeat_byte(1),
                amount_in: U256::from(500),
                min_amount_out: U256::from(4),
            }),
        };
        let data = execute_trade(&call);
        assert_eq!(&data[..4], ILaneManager::executeTradeCall::SELECTOR.as_slice());

        match ILaneManager::ILaneManagerCalls::abi_decode(&data, true).unwrap() {
            ILaneManager::ILaneManagerCalls::executeTrade(decoded) => {
                assert_eq!(decoded.laneId, U256::from(3));
                assert_eq!(decoded.expectedNonce, U256::from(11));
                assert_eq!(decoded.orderHash, B256::repeat_byte(9));
                assert_eq!(decoded.tokenIn, Address::repeat_byte(1));
                assert_eq!(decoded.amountIn, U256::from(500));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
