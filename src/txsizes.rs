//! Worst-case serialize-size estimation for unsigned transactions.
//!
//! Fees have to be decided before signatures exist, so every estimate here
//! assumes maximum-length signatures. Estimates may overshoot the final
//! signed size by a byte or two per input; they never undershoot.

use bitcoin::blockdata::transaction::TxOut;
use bitcoin::consensus::encode::VarInt;

/// Signature script spending a P2PKH output: a push of a maximum-length
/// DER signature (72 bytes plus the sighash byte) and a push of a
/// compressed public key.
pub const REDEEM_P2PKH_SIG_SCRIPT_SIZE: usize = 1 + 73 + 1 + 33;

/// OP_DUP OP_HASH160 OP_DATA_20 <hash> OP_EQUALVERIFY OP_CHECKSIG.
pub const P2PKH_PK_SCRIPT_SIZE: usize = 1 + 1 + 1 + 20 + 1 + 1;

/// OP_0 OP_DATA_20 <key hash>.
pub const P2WPKH_PK_SCRIPT_SIZE: usize = 1 + 1 + 20;

/// Serialized input spending a P2PKH output: previous outpoint (36),
/// script length, signature script, sequence (4).
pub const REDEEM_P2PKH_INPUT_SIZE: usize = 32 + 4 + 1 + REDEEM_P2PKH_SIG_SCRIPT_SIZE + 4;

/// Serialized input spending a native witness output; the signature script
/// is empty.
pub const REDEEM_P2WPKH_INPUT_SIZE: usize = 32 + 4 + 1 + 4;

/// Witness stack spending a P2WPKH output: item count, maximum-length
/// signature, compressed public key. Counted in weight units.
pub const REDEEM_P2WPKH_INPUT_WITNESS_WEIGHT: usize = 1 + 1 + 73 + 1 + 33;

/// The signature script of a nested P2WPKH spend is a single push of the
/// 22-byte witness program.
pub const REDEEM_NESTED_P2WPKH_SCRIPT_SIZE: usize = 1 + 1 + 1 + 20;
pub const REDEEM_NESTED_P2WPKH_INPUT_SIZE: usize =
    32 + 4 + 1 + REDEEM_NESTED_P2WPKH_SCRIPT_SIZE + 4;

/// Key-path taproot spends carry an empty signature script as well.
pub const REDEEM_P2TR_INPUT_SIZE: usize = 32 + 4 + 1 + 4;

/// Witness stack for a key-path taproot spend: item count plus a 64-byte
/// Schnorr signature.
pub const REDEEM_P2TR_WITNESS_WEIGHT: usize = 1 + 1 + 64;

/// Serialized size of a value (8) + script length + script.
pub const P2PKH_OUTPUT_SIZE: usize = 8 + 1 + P2PKH_PK_SCRIPT_SIZE;
pub const P2WPKH_OUTPUT_SIZE: usize = 8 + 1 + P2WPKH_PK_SCRIPT_SIZE;

fn compact_size_len(n: u64) -> usize {
    VarInt(n).len()
}

pub fn output_serialize_size(output: &TxOut) -> usize {
    let script_len = output.script_pubkey.len();
    8 + compact_size_len(script_len as u64) + script_len
}

pub fn sum_output_serialize_sizes(outputs: &[TxOut]) -> usize {
    outputs.iter().map(output_serialize_size).sum()
}

/// Worst-case serialize size of a non-witness transaction with
/// `input_count` P2PKH inputs, the given outputs and optionally one more
/// P2PKH change output.
pub fn estimate_serialize_size(input_count: usize, outputs: &[TxOut], add_change: bool) -> usize {
    let mut output_count = outputs.len() as u64;
    let mut change_size = 0;
    if add_change {
        change_size = P2PKH_OUTPUT_SIZE;
        output_count += 1;
    }
    8 + compact_size_len(input_count as u64)
        + compact_size_len(output_count)
        + input_count * REDEEM_P2PKH_INPUT_SIZE
        + sum_output_serialize_sizes(outputs)
        + change_size
}

/// Worst-case virtual size of a transaction spending the given mix of
/// input types, paying to `outputs`, and optionally carrying one change
/// output whose script is `change_script_size` bytes (0 for no change).
///
/// Weight is base size times three plus total size; virtual size is the
/// weight divided by four, rounded up.
pub fn estimate_virtual_size(
    p2pkh_inputs: usize,
    p2tr_inputs: usize,
    p2wpkh_inputs: usize,
    nested_p2wpkh_inputs: usize,
    outputs: &[TxOut],
    change_script_size: usize,
) -> usize {
    let mut output_count = outputs.len() as u64;
    let mut change_size = 0;
    if change_script_size > 0 {
        change_size = 8 + compact_size_len(change_script_size as u64) + change_script_size;
        output_count += 1;
    }
    let input_count = p2pkh_inputs + p2tr_inputs + p2wpkh_inputs + nested_p2wpkh_inputs;
    let base_size = 8
        + compact_size_len(input_count as u64)
        + compact_size_len(output_count)
        + p2pkh_inputs * REDEEM_P2PKH_INPUT_SIZE
        + p2tr_inputs * REDEEM_P2TR_INPUT_SIZE
        + p2wpkh_inputs * REDEEM_P2WPKH_INPUT_SIZE
        + nested_p2wpkh_inputs * REDEEM_NESTED_P2WPKH_INPUT_SIZE
        + sum_output_serialize_sizes(outputs)
        + change_size;

    let witness_inputs = p2tr_inputs + p2wpkh_inputs + nested_p2wpkh_inputs;
    if witness_inputs == 0 {
        return base_size;
    }
    // Segwit marker and flag, then one witness stack per witness input.
    let witness_size = 2
        + p2wpkh_inputs * REDEEM_P2WPKH_INPUT_WITNESS_WEIGHT
        + nested_p2wpkh_inputs * REDEEM_P2WPKH_INPUT_WITNESS_WEIGHT
        + p2tr_inputs * REDEEM_P2TR_WITNESS_WEIGHT;
    (base_size * 4 + witness_size + 3) / 4
}
