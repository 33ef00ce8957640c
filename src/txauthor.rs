//! Unsigned transaction construction.
//!
//! The tricky part is that the fee depends on the serialized size, the
//! size depends on whether a change output exists, and whether change is
//! worth adding depends on the fee. The selection loop therefore prices
//! the transaction without change, asks the input source to cover that,
//! and only then decides whether the leftover survives the dust test once
//! the change output's own cost is subtracted.

use bitcoin::blockdata::script::Script;
use bitcoin::blockdata::transaction::{Transaction, TxIn, TxOut};

use crate::def::{MAX_FEE_ESTIMATE_PASSES, MAX_MONEY, TX_VERSION};
use crate::errors::*;
use crate::txrules::{self, Amount};
use crate::txsizes;

/// One round of input selection. The contract is cumulative: every call
/// returns the inputs of the previous call plus whatever else is needed to
/// reach the new target, with `input_values` and `prev_scripts` parallel
/// to `inputs`.
pub struct SelectedInputs {
    pub total: Amount,
    pub inputs: Vec<TxIn>,
    pub input_values: Vec<Amount>,
    pub prev_scripts: Vec<Script>,
}

/// Source of a change script, consumed by the author. `new_script` runs at
/// most once, and only if a change output is actually attached;
/// `script_size` feeds the size estimate before that decision is made.
pub struct ChangeSource {
    pub new_script: Box<dyn FnOnce() -> Result<Script> + Send>,
    pub script_size: usize,
}

/// A fully selected, not yet signed transaction, with the per-input data a
/// signer needs kept parallel to `tx.input`.
pub struct UnsignedTransaction {
    pub tx: Transaction,
    pub prev_scripts: Vec<Script>,
    pub input_values: Vec<Amount>,
    pub total_input: Amount,
    /// Position of the change output in `tx.output`, if one was added.
    pub change_index: Option<usize>,
}

/// Build an unsigned transaction paying `outputs`, drawing on
/// `fetch_inputs` until the outputs and the relay fee are covered, and
/// appending a change output for the remainder unless it would be dust.
///
/// A zero `relay_fee_per_kb` waives the fee and opts out of change
/// entirely. Errors from `fetch_inputs` and from the change source
/// propagate to the caller unchanged.
pub fn new_unsigned_transaction<F>(
    outputs: Vec<TxOut>,
    relay_fee_per_kb: Amount,
    mut fetch_inputs: F,
    change_source: ChangeSource,
) -> Result<UnsignedTransaction>
where
    F: FnMut(Amount) -> Result<SelectedInputs>,
{
    validate_request(&outputs, relay_fee_per_kb)?;

    let target_amount: Amount = outputs.iter().map(|out| out.value as Amount).sum();

    // The opening estimate prices a transaction with no inputs at all;
    // each pass after that re-prices with the mix the source returned.
    let mut target_fee = txrules::fee_for_serialize_size(
        relay_fee_per_kb,
        txsizes::estimate_virtual_size(0, 0, 0, 0, &outputs, 0),
    );

    let mut passes = 0;
    let (selected, input_counts) = loop {
        passes += 1;
        if passes > MAX_FEE_ESTIMATE_PASSES {
            bail!(ErrorKind::Validation(
                "fee estimation did not converge; input source is not cumulative".to_string()
            ));
        }

        let selected = fetch_inputs(target_amount + target_fee)?;
        if selected.total < target_amount + target_fee {
            bail!(ErrorKind::InsufficientInputs(
                target_amount + target_fee,
                selected.total
            ));
        }
        if selected.inputs.len() != selected.input_values.len()
            || selected.inputs.len() != selected.prev_scripts.len()
        {
            bail!(ErrorKind::Validation(format!(
                "input source returned {} inputs, {} values and {} scripts",
                selected.inputs.len(),
                selected.input_values.len(),
                selected.prev_scripts.len()
            )));
        }

        let counts = count_script_classes(&selected.prev_scripts);
        let no_change_size = txsizes::estimate_virtual_size(
            counts.p2pkh,
            counts.p2tr,
            counts.p2wpkh,
            counts.nested,
            &outputs,
            0,
        );
        let no_change_fee = txrules::fee_for_serialize_size(relay_fee_per_kb, no_change_size);
        if selected.total - target_amount < no_change_fee {
            // The inputs grew the transaction past the old estimate; ask
            // again at the corrected target.
            target_fee = no_change_fee;
            continue;
        }
        break (selected, counts);
    };

    let with_change_size = txsizes::estimate_virtual_size(
        input_counts.p2pkh,
        input_counts.p2tr,
        input_counts.p2wpkh,
        input_counts.nested,
        &outputs,
        change_source.script_size,
    );
    let with_change_fee = txrules::fee_for_serialize_size(relay_fee_per_kb, with_change_size);
    let change_amount = selected.total - target_amount - with_change_fee;

    let mut tx = Transaction {
        version: TX_VERSION,
        lock_time: 0,
        input: selected.inputs,
        output: outputs,
    };

    // A zero relay rate opted out of change; otherwise attach the
    // remainder unless it is not worth its own spend cost, in which case
    // it rides along as extra fee.
    let mut change_index = None;
    if relay_fee_per_kb > 0 && !txrules::is_dust_amount(change_amount, relay_fee_per_kb) {
        let change_script = (change_source.new_script)()?;
        tx.output.push(TxOut {
            value: change_amount as u64,
            script_pubkey: change_script,
        });
        change_index = Some(tx.output.len() - 1);
    }

    Ok(UnsignedTransaction {
        tx,
        prev_scripts: selected.prev_scripts,
        input_values: selected.input_values,
        total_input: selected.total,
        change_index,
    })
}

fn validate_request(outputs: &[TxOut], relay_fee_per_kb: Amount) -> Result<()> {
    if outputs.is_empty() {
        bail!(ErrorKind::Validation(
            "transaction has no outputs".to_string()
        ));
    }
    if relay_fee_per_kb < 0 {
        bail!(ErrorKind::Validation(format!(
            "negative relay fee rate {}",
            relay_fee_per_kb
        )));
    }
    for output in outputs {
        // Paying to dust is the caller's prerogative; only the amount
        // range is enforced here.
        if output.value > MAX_MONEY as u64 {
            bail!(ErrorKind::Validation(format!(
                "transaction output amount of {} exceeds the supply cap",
                output.value
            )));
        }
    }
    Ok(())
}

struct ScriptClassCounts {
    p2pkh: usize,
    p2tr: usize,
    p2wpkh: usize,
    nested: usize,
}

fn count_script_classes(scripts: &[Script]) -> ScriptClassCounts {
    let mut counts = ScriptClassCounts {
        p2pkh: 0,
        p2tr: 0,
        p2wpkh: 0,
        nested: 0,
    };
    for script in scripts {
        if script.is_p2sh() {
            // P2SH previous outputs are assumed to be nested P2WPKH; this
            // wallet produces no other P2SH shape.
            counts.nested += 1;
        } else if script.is_v0_p2wpkh() {
            counts.p2wpkh += 1;
        } else if script.is_v1_p2tr() {
            counts.p2tr += 1;
        } else {
            counts.p2pkh += 1;
        }
    }
    counts
}
