//! Relay-fee and dust policy.

use bitcoin::blockdata::transaction::TxOut;

use crate::def::MAX_MONEY;
use crate::errors::*;
use crate::txsizes::P2PKH_OUTPUT_SIZE;

/// An amount in satoshi. Negative values show up transiently in fee
/// arithmetic, never in outputs.
pub type Amount = i64;

/// Default minimum relay fee rate, satoshi per 1000 virtual bytes.
pub const DEFAULT_RELAY_FEE_PER_KB: Amount = 1000;

/// Litecoin relays dust at ten times the minimum relay rate.
const DUST_RELAY_SCALE: i64 = 10;

/// Average size of an input redeeming a compressed-key P2PKH output. The
/// dust test uses the average rather than the worst case.
const DUST_REDEEM_INPUT_SIZE: usize = 148;

/// Network cost of creating and later spending an output, modeled as a
/// P2PKH output and its redeeming input (the most common shape) whatever
/// the actual script is.
const DUST_SPEND_COST: i64 = (P2PKH_OUTPUT_SIZE + DUST_REDEEM_INPUT_SIZE) as i64;

/// Fee for a transaction of `size` virtual bytes at `relay_fee_per_kb`:
/// the rate applied per 1000 vbytes, rounded up, clamped to the supply
/// cap. Rounding down could undershoot the relay minimum.
pub fn fee_for_serialize_size(relay_fee_per_kb: Amount, size: usize) -> Amount {
    match relay_fee_per_kb.checked_mul(size as i64) {
        Some(total) => (total / 1000 + (total % 1000 != 0) as i64).min(MAX_MONEY),
        None => MAX_MONEY,
    }
}

/// Whether an output of `amount` costs more to spend than it is worth at
/// the given relay rate. At 1000 sat/kvB the threshold falls between 5459
/// and 5460 satoshi.
pub fn is_dust_amount(amount: Amount, relay_fee_per_kb: Amount) -> bool {
    amount.saturating_mul(1000) / (3 * DUST_SPEND_COST)
        < relay_fee_per_kb.saturating_mul(DUST_RELAY_SCALE)
}

/// Dust check for a concrete output. Provably unspendable outputs count as
/// dust regardless of value.
pub fn is_dust_output(output: &TxOut, relay_fee_per_kb: Amount) -> bool {
    if output.script_pubkey.is_provably_unspendable() {
        return true;
    }
    is_dust_amount(output.value as Amount, relay_fee_per_kb)
}

/// Sanity checks for one output of a transaction under construction.
pub fn check_output(output: &TxOut, relay_fee_per_kb: Amount) -> Result<()> {
    if output.value > MAX_MONEY as u64 {
        bail!(ErrorKind::Validation(format!(
            "transaction output amount of {} exceeds the supply cap",
            output.value
        )));
    }
    if is_dust_output(output, relay_fee_per_kb) {
        bail!(ErrorKind::Validation(format!(
            "transaction output is dust at fee rate {}",
            relay_fee_per_kb
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::blockdata::script::Script;
    use crate::txsizes::P2PKH_PK_SCRIPT_SIZE;

    #[test]
    fn test_fee_rounds_up() {
        assert_eq!(fee_for_serialize_size(1000, 193), 193);
        assert_eq!(fee_for_serialize_size(2550, 193), 493);
        assert_eq!(fee_for_serialize_size(1, 1), 1);
        assert_eq!(fee_for_serialize_size(0, 1000), 0);
        assert_eq!(fee_for_serialize_size(1000, 0), 0);
    }

    #[test]
    fn test_fee_clamped_to_supply_cap() {
        assert_eq!(fee_for_serialize_size(i64::MAX, 2), MAX_MONEY);
        assert_eq!(fee_for_serialize_size(MAX_MONEY, 1_000_000), MAX_MONEY);
    }

    #[test]
    fn test_dust_threshold_at_default_rate() {
        assert!(is_dust_amount(5459, 1000));
        assert!(!is_dust_amount(5460, 1000));
        assert!(is_dust_amount(0, 1000));
        assert!(is_dust_amount(-1, 1000));
    }

    #[test]
    fn test_dust_threshold_scales_with_rate() {
        assert!(is_dust_amount(13920, 2550));
        assert!(!is_dust_amount(13930, 2550));
    }

    #[test]
    fn test_nothing_is_dust_at_zero_rate() {
        assert!(!is_dust_amount(1, 0));
        assert!(!is_dust_amount(0, 0));
    }

    #[test]
    fn test_unspendable_output_is_dust() {
        let op_return = TxOut {
            value: 100_000_000,
            script_pubkey: Script::from(vec![0x6a]),
        };
        assert!(is_dust_output(&op_return, 0));
    }

    #[test]
    fn test_check_output() {
        let good = TxOut {
            value: 100_000,
            script_pubkey: Script::from(vec![0u8; P2PKH_PK_SCRIPT_SIZE]),
        };
        assert!(check_output(&good, 1000).is_ok());

        let dust = TxOut {
            value: 100,
            script_pubkey: Script::from(vec![0u8; P2PKH_PK_SCRIPT_SIZE]),
        };
        assert!(check_output(&dust, 1000).is_err());

        let oversized = TxOut {
            value: MAX_MONEY as u64 + 1,
            script_pubkey: Script::from(vec![0u8; P2PKH_PK_SCRIPT_SIZE]),
        };
        assert!(check_output(&oversized, 1000).is_err());
    }
}
