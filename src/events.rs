use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);

    event Swap(
        address indexed sender,
        address indexed recipient,
        int256 amount0,
        int256 amount1,
        uint160 sqrtPriceX96,
        uint128 liquidity,
        int24 tick
    );

    event PoolCreated(
        address indexed token0,
        address indexed token1,
        uint24 indexed fee,
        int24 tickSpacing,
        address pool
    );

    event TokensPurchased(
        address indexed purchaser,
        address indexed beneficiary,
        uint256 value,
        uint256 amount
    );

    function balanceOf(address account) external view returns (uint256);
    function totalSupply() external view returns (uint256);
    function decimals() external view returns (uint8);
    function symbol() external view returns (string);
    function token0() external view returns (address);
    function staked(address account) external view returns (uint256);
}

pub fn decode_transfer_event(log: &Log) -> anyhow::Result<Transfer> {
    let log_data = log.data();
    let decoded = Transfer::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}

pub fn decode_swap_event(log: &Log) -> anyhow::Result<Swap> {
    let log_data = log.data();
    let decoded = Swap::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}

pub fn decode_pool_created_event(log: &Log) -> anyhow::Result<PoolCreated> {
    let log_data = log.data();
    let decoded = PoolCreated::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}

pub fn decode_tokens_purchased_event(log: &Log) -> anyhow::Result<TokensPurchased> {
    let log_data = log.data();
    let decoded = TokensPurchased::decode_raw_log(log.topics(), &log_data.data)?;
    Ok(decoded)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use alloy_primitives::{Address, B256, I256, U256};

    #[test]
    fn test_decode_transfer_roundtrip_from_rpc_log() {
        let token = Address::repeat_byte(0x11);
        let from = Address::repeat_byte(0x22);
        let to = Address::repeat_byte(0x33);
        let log = transfer_log(token, from, to, 42, B256::repeat_byte(1), 0);

        let decoded = decode_transfer_event(&log).unwrap();
        assert_eq!(decoded.from, from);
        assert_eq!(decoded.to, to);
        assert_eq!(decoded.value, U256::from(42));
    }

    #[test]
    fn test_swap_log_does_not_decode_as_transfer() {
        let swap = Swap {
            sender: Address::repeat_byte(1),
            recipient: Address::repeat_byte(2),
            amount0: I256::try_from(-5i64).unwrap(),
            amount1: I256::try_from(7i64).unwrap(),
            sqrtPriceX96: Default::default(),
            liquidity: 0,
            tick: Default::default(),
        };
        let log = rpc_log(Address::repeat_byte(9), &swap, B256::ZERO, 0);

        assert!(decode_transfer_event(&log).is_err());
        let decoded = decode_swap_event(&log).unwrap();
        assert!(decoded.amount0.is_negative());
        assert!(decoded.amount1.is_positive());
    }
}
