//! Per-transaction name validation.

use std::fmt;

use nmcd_consensus::constants::{
    MAX_NAME_LENGTH, MAX_RAND_LENGTH, MAX_VALUE_LENGTH, MEMPOOL_HEIGHT, MIN_FIRSTUPDATE_DEPTH,
    NAME_NEW_HASH_LENGTH,
};
use nmcd_consensus::ChainParams;
use nmcd_primitives::transaction::Transaction;
use nmcd_script::names::{name_commitment, parse_name_script, NameOp, NameScript};

use crate::data::is_expired;
use crate::view::{Coin, NameView, NameViewError};

/// Validation is for mempool admission: skip the commitment maturity check.
pub const NAME_CHECK_MEMPOOL: u32 = 1 << 0;

#[derive(Debug, Eq, PartialEq)]
pub enum NameCheckError {
    InputCoinMissing,
    MultipleNameInputs,
    MultipleNameOutputs,
    NonNameTxHasNameIo,
    NameTxWithoutNameOutput,
    GreedyName,
    NewWithNameInput,
    HashWrongSize,
    NameTooLong,
    ValueTooLong,
    RandTooLong,
    UpdateWithoutNameInput,
    UpdateWithNonUpdateInput,
    UpdateNameMismatch,
    UpdateOfExpiredName,
    FirstUpdateOnNonNameNew,
    FirstUpdateNotMature,
    FirstUpdateHashMismatch,
    FirstUpdateOnActiveName,
    View(String),
}

impl fmt::Display for NameCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameCheckError::InputCoinMissing => write!(f, "failed to fetch input coins"),
            NameCheckError::MultipleNameInputs => write!(f, "multiple name inputs"),
            NameCheckError::MultipleNameOutputs => write!(f, "multiple name outputs"),
            NameCheckError::NonNameTxHasNameIo => {
                write!(f, "non-name tx has name inputs or outputs")
            }
            NameCheckError::NameTxWithoutNameOutput => write!(f, "name tx has no name output"),
            NameCheckError::GreedyName => write!(f, "greedy name"),
            NameCheckError::NewWithNameInput => write!(f, "commitment with previous name input"),
            NameCheckError::HashWrongSize => write!(f, "commitment hash has wrong size"),
            NameCheckError::NameTooLong => write!(f, "name too long"),
            NameCheckError::ValueTooLong => write!(f, "value too long"),
            NameCheckError::RandTooLong => write!(f, "rand value too large"),
            NameCheckError::UpdateWithoutNameInput => {
                write!(f, "update without previous name input")
            }
            NameCheckError::UpdateWithNonUpdateInput => {
                write!(f, "update with prev input that is no update")
            }
            NameCheckError::UpdateNameMismatch => write!(f, "name mismatch to prev tx"),
            NameCheckError::UpdateOfExpiredName => write!(f, "trying to update an expired name"),
            NameCheckError::FirstUpdateOnNonNameNew => {
                write!(f, "registration with non-commitment prev tx")
            }
            NameCheckError::FirstUpdateNotMature => {
                write!(f, "commitment is not mature for registration")
            }
            NameCheckError::FirstUpdateHashMismatch => write!(f, "commitment hash mismatch"),
            NameCheckError::FirstUpdateOnActiveName => {
                write!(f, "registration of an unexpired name")
            }
            NameCheckError::View(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for NameCheckError {}

impl From<NameViewError> for NameCheckError {
    fn from(err: NameViewError) -> Self {
        NameCheckError::View(err.to_string())
    }
}

/// Decide whether the transaction's name operation (if any) is valid when
/// mined at `height` against the given view.  Pure: never mutates state.
pub fn check_name_transaction(
    tx: &Transaction,
    height: u32,
    view: &dyn NameView,
    params: &ChainParams,
    flags: u32,
) -> Result<(), NameCheckError> {
    let mempool = flags & NAME_CHECK_MEMPOOL != 0;

    /* Historic relics short-circuit the whole check.  */
    if params.is_historic_bug(&tx.txid(), height).is_some() {
        return Ok(());
    }

    /* Locate inputs and outputs carrying name scripts.  At most one of
       each may be present.  */

    let mut name_in: Option<(NameScript, Coin)> = None;
    for input in &tx.vin {
        let coin = view
            .get_coin(&input.prevout)?
            .ok_or(NameCheckError::InputCoinMissing)?;
        if let Some(op) = parse_name_script(&coin.script_pubkey) {
            if name_in.is_some() {
                return Err(NameCheckError::MultipleNameInputs);
            }
            name_in = Some((op, coin));
        }
    }

    let mut name_out: Option<(usize, NameScript)> = None;
    for (index, output) in tx.vout.iter().enumerate() {
        if let Some(op) = parse_name_script(&output.script_pubkey) {
            if name_out.is_some() {
                return Err(NameCheckError::MultipleNameOutputs);
            }
            name_out = Some((index, op));
        }
    }

    /* A transaction without the name version marker must carry no name
       inputs or outputs at all.  */

    if !tx.is_name_tx() {
        if name_in.is_some() || name_out.is_some() {
            return Err(NameCheckError::NonNameTxHasNameIo);
        }
        return Ok(());
    }

    let (out_index, out_op) = name_out.ok_or(NameCheckError::NameTxWithoutNameOutput)?;

    if tx.vout[out_index].value < params.min_name_coin_amount(height) {
        return Err(NameCheckError::GreedyName);
    }

    /* Commitments are easy and different from the update operations.  */

    if let NameOp::NameNew { hash } = &out_op.op {
        if name_in.is_some() {
            return Err(NameCheckError::NewWithNameInput);
        }
        if hash.len() != NAME_NEW_HASH_LENGTH {
            return Err(NameCheckError::HashWrongSize);
        }
        return Ok(());
    }

    /* Both update operations spend a previous name input.  */

    let (in_op, in_coin) = name_in.ok_or(NameCheckError::UpdateWithoutNameInput)?;
    let name = match &out_op.op {
        NameOp::NameFirstUpdate { name, .. } | NameOp::NameUpdate { name, .. } => name.as_slice(),
        NameOp::NameNew { .. } => unreachable!("commitments handled above"),
    };

    if name.len() > MAX_NAME_LENGTH {
        return Err(NameCheckError::NameTooLong);
    }
    if out_op.op.value().unwrap_or_default().len() > MAX_VALUE_LENGTH {
        return Err(NameCheckError::ValueTooLong);
    }

    if let NameOp::NameUpdate { .. } = &out_op.op {
        if !in_op.op.is_any_update() {
            return Err(NameCheckError::UpdateWithNonUpdateInput);
        }
        if in_op.op.name() != Some(name) {
            return Err(NameCheckError::UpdateNameMismatch);
        }

        /* Expired names have left the UTXO set, so the coin fetch above
           would already have failed; enforcing this here as well keeps the
           rule independent of that collaborator.  */
        if is_expired(in_coin.height, height, params) {
            return Err(NameCheckError::UpdateOfExpiredName);
        }

        return Ok(());
    }

    let NameOp::NameFirstUpdate { rand, .. } = &out_op.op else {
        unreachable!("updates handled above");
    };

    let NameOp::NameNew { hash } = &in_op.op else {
        return Err(NameCheckError::FirstUpdateOnNonNameNew);
    };

    /* Commitment maturity is enforced everywhere except pure mempool
       admission.  The reveal may ride in the commit depth's final block:
       a commitment in block h is spendable from block h + 11 on, putting
       twelve blocks between the two inclusive.  */
    if !mempool
        && (in_coin.height == MEMPOOL_HEIGHT
            || u64::from(in_coin.height) + u64::from(MIN_FIRSTUPDATE_DEPTH)
                > u64::from(height) + 1)
    {
        return Err(NameCheckError::FirstUpdateNotMature);
    }

    if rand.len() > MAX_RAND_LENGTH {
        return Err(NameCheckError::RandTooLong);
    }

    if name_commitment(rand, name).as_slice() != hash.as_slice() {
        return Err(NameCheckError::FirstUpdateHashMismatch);
    }

    if let Some(old) = view.get_name(name)? {
        if !is_expired(old.height, height, params) {
            return Err(NameCheckError::FirstUpdateOnActiveName);
        }
    }

    /* Miners cannot create blocks with conflicting registrations: the block
       view applies transactions in order, so the second one trips the
       active-name check above.  */

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    use nmcd_consensus::constants::NAME_TX_VERSION;
    use nmcd_consensus::{chain_params, Network};
    use nmcd_primitives::outpoint::OutPoint;
    use nmcd_primitives::transaction::{TxIn, TxOut};
    use nmcd_script::names::{build_name_firstupdate, build_name_new, build_name_update};

    use crate::data::{Name, NameData, NameHistory};

    #[derive(Default)]
    struct MockView {
        coins: BTreeMap<OutPoint, Coin>,
        names: BTreeMap<Name, NameData>,
    }

    impl NameView for MockView {
        fn get_coin(&self, outpoint: &OutPoint) -> Result<Option<Coin>, NameViewError> {
            Ok(self.coins.get(outpoint).cloned())
        }

        fn get_name(&self, name: &[u8]) -> Result<Option<NameData>, NameViewError> {
            Ok(self.names.get(name).cloned())
        }

        fn get_name_history(&self, _name: &[u8]) -> Result<Option<NameHistory>, NameViewError> {
            Ok(None)
        }

        fn names_for_height(&self, _height: u32) -> Result<BTreeSet<Name>, NameViewError> {
            Ok(BTreeSet::new())
        }
    }

    fn test_params() -> ChainParams {
        let mut params = chain_params(Network::Regtest);
        params.fixed_name_expiration = Some(100);
        params.min_name_coin_amount = 10_000;
        params
    }

    fn addr(tag: u8) -> Vec<u8> {
        let mut script = vec![0x76, 0xa9, 0x14];
        script.extend_from_slice(&[tag; 20]);
        script.extend_from_slice(&[0x88, 0xac]);
        script
    }

    fn outpoint(tag: u8) -> OutPoint {
        OutPoint {
            hash: [tag; 32],
            index: 0,
        }
    }

    fn name_tx(prevout: OutPoint, script_pubkey: Vec<u8>, value: i64) -> Transaction {
        Transaction {
            version: NAME_TX_VERSION,
            vin: vec![TxIn {
                prevout,
                script_sig: Vec::new(),
                sequence: u32::MAX,
            }],
            vout: vec![TxOut {
                value,
                script_pubkey,
            }],
            lock_time: 0,
        }
    }

    fn seed_coin(view: &mut MockView, prevout: &OutPoint, script: Vec<u8>, height: u32) {
        view.coins.insert(
            prevout.clone(),
            Coin {
                value: 10_000,
                script_pubkey: script,
                height,
            },
        );
    }

    const RAND: &[u8] = b"xxxxxxxxxxxxxxxxxxxx";

    /// A commitment at `new_height` plus a reveal transaction for `name`.
    fn firstupdate_setup(view: &mut MockView, name: &[u8], new_height: u32) -> Transaction {
        let prev = outpoint(0x01);
        let hash = name_commitment(RAND, name);
        seed_coin(view, &prev, build_name_new(&addr(1), &hash), new_height);
        name_tx(
            prev,
            build_name_firstupdate(&addr(2), name, b"v1", RAND),
            10_000,
        )
    }

    #[test]
    fn plain_payment_passes() {
        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let mut tx = name_tx(prev, addr(3), 10_000);
        tx.version = 1;
        check_name_transaction(&tx, 10, &view, &test_params(), 0).expect("valid");
    }

    #[test]
    fn non_name_tx_with_name_output_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let mut tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 10_000);
        tx.version = 1;
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &test_params(), 0),
            Err(NameCheckError::NonNameTxHasNameIo)
        );
    }

    #[test]
    fn name_tx_without_name_output_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let tx = name_tx(prev, addr(3), 10_000);
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &test_params(), 0),
            Err(NameCheckError::NameTxWithoutNameOutput)
        );
    }

    #[test]
    fn multiple_name_outputs_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let mut tx = name_tx(prev, build_name_new(&addr(2), &[0u8; 20]), 10_000);
        tx.vout.push(TxOut {
            value: 10_000,
            script_pubkey: build_name_new(&addr(3), &[1u8; 20]),
        });
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &test_params(), 0),
            Err(NameCheckError::MultipleNameOutputs)
        );
    }

    #[test]
    fn name_new_accepts_and_checks_hash_size() {
        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let tx = name_tx(prev.clone(), build_name_new(&addr(2), &[0u8; 20]), 10_000);
        check_name_transaction(&tx, 10, &view, &test_params(), 0).expect("valid");

        // A 19-byte operand is shaped like a commitment but fails the size rule.
        let mut short = vec![0x51, 19];
        short.extend_from_slice(&[0u8; 19]);
        short.push(0x6d);
        short.extend_from_slice(&addr(2));
        let tx = name_tx(prev, short, 10_000);
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &test_params(), 0),
            Err(NameCheckError::HashWrongSize)
        );
    }

    #[test]
    fn greedy_name_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x01);
        seed_coin(
            &mut view,
            &prev,
            build_name_update(&addr(1), b"d/a", b"v0"),
            10,
        );
        let tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 9_999);
        assert_eq!(
            check_name_transaction(&tx, 20, &view, &test_params(), 0),
            Err(NameCheckError::GreedyName)
        );
    }

    #[test]
    fn full_registration_accepted() {
        let mut view = MockView::default();
        let tx = firstupdate_setup(&mut view, b"d/a", 10);
        check_name_transaction(&tx, 21, &view, &test_params(), 0).expect("valid");
    }

    #[test]
    fn immature_registration_rejected_outside_mempool() {
        let mut view = MockView::default();
        let tx = firstupdate_setup(&mut view, b"d/a", 10);
        // Commitment at height 10 needs height >= 21; 20 is one short.
        assert_eq!(
            check_name_transaction(&tx, 20, &view, &test_params(), 0),
            Err(NameCheckError::FirstUpdateNotMature)
        );
        check_name_transaction(&tx, 20, &view, &test_params(), NAME_CHECK_MEMPOOL)
            .expect("mempool admission skips maturity");
    }

    #[test]
    fn registration_hash_mismatch_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x01);
        let hash = name_commitment(RAND, b"d/other");
        seed_coin(&mut view, &prev, build_name_new(&addr(1), &hash), 5);
        let tx = name_tx(
            prev,
            build_name_firstupdate(&addr(2), b"d/a", b"v1", RAND),
            10_000,
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &test_params(), 0),
            Err(NameCheckError::FirstUpdateHashMismatch)
        );
    }

    #[test]
    fn registration_of_active_name_rejected() {
        let mut view = MockView::default();
        let tx = firstupdate_setup(&mut view, b"d/a", 5);
        view.names.insert(
            b"d/a".to_vec(),
            NameData {
                value: b"taken".to_vec(),
                height: 18,
                prevout: outpoint(0x07),
                address: addr(7),
            },
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &test_params(), 0),
            Err(NameCheckError::FirstUpdateOnActiveName)
        );

        // Once the old registration has expired the name is free again.
        view.names.get_mut(b"d/a".as_slice()).expect("row").height = 1;
        let mut params = test_params();
        params.fixed_name_expiration = Some(10);
        check_name_transaction(&tx, 21, &view, &params, 0).expect("valid");
    }

    #[test]
    fn registration_spending_non_commitment_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x01);
        seed_coin(
            &mut view,
            &prev,
            build_name_update(&addr(1), b"d/a", b"v0"),
            5,
        );
        let tx = name_tx(
            prev,
            build_name_firstupdate(&addr(2), b"d/a", b"v1", RAND),
            10_000,
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &test_params(), 0),
            Err(NameCheckError::FirstUpdateOnNonNameNew)
        );
    }

    #[test]
    fn oversized_rand_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x01);
        let rand = vec![0x5a; 21];
        let hash = name_commitment(&rand, b"d/a");
        seed_coin(&mut view, &prev, build_name_new(&addr(1), &hash), 5);
        let tx = name_tx(
            prev,
            build_name_firstupdate(&addr(2), b"d/a", b"v1", &rand),
            10_000,
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &test_params(), 0),
            Err(NameCheckError::RandTooLong)
        );
    }

    #[test]
    fn oversized_name_and_value_rejected() {
        let params = test_params();

        let mut view = MockView::default();
        let long_name = vec![b'a'; MAX_NAME_LENGTH + 1];
        let prev = outpoint(0x01);
        let hash = name_commitment(RAND, &long_name);
        seed_coin(&mut view, &prev, build_name_new(&addr(1), &hash), 5);
        let tx = name_tx(
            prev,
            build_name_firstupdate(&addr(2), &long_name, b"v1", RAND),
            10_000,
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &params, 0),
            Err(NameCheckError::NameTooLong)
        );

        let mut view = MockView::default();
        let prev = outpoint(0x02);
        seed_coin(
            &mut view,
            &prev,
            build_name_update(&addr(1), b"d/a", b"v0"),
            10,
        );
        let long_value = vec![0x61; MAX_VALUE_LENGTH + 1];
        let tx = name_tx(
            prev,
            build_name_update(&addr(2), b"d/a", &long_value),
            10_000,
        );
        assert_eq!(
            check_name_transaction(&tx, 21, &view, &params, 0),
            Err(NameCheckError::ValueTooLong)
        );
    }

    #[test]
    fn update_requires_matching_name_input() {
        let params = test_params();

        let mut view = MockView::default();
        let prev = outpoint(0x09);
        seed_coin(&mut view, &prev, addr(9), 1);
        let tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 10_000);
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &params, 0),
            Err(NameCheckError::UpdateWithoutNameInput)
        );

        let mut view = MockView::default();
        let prev = outpoint(0x01);
        seed_coin(
            &mut view,
            &prev,
            build_name_new(&addr(1), &[0u8; 20]),
            1,
        );
        let tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 10_000);
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &params, 0),
            Err(NameCheckError::UpdateWithNonUpdateInput)
        );

        let mut view = MockView::default();
        let prev = outpoint(0x01);
        seed_coin(
            &mut view,
            &prev,
            build_name_update(&addr(1), b"d/other", b"v0"),
            1,
        );
        let tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 10_000);
        assert_eq!(
            check_name_transaction(&tx, 10, &view, &params, 0),
            Err(NameCheckError::UpdateNameMismatch)
        );
    }

    #[test]
    fn update_of_expired_name_rejected() {
        let mut view = MockView::default();
        let prev = outpoint(0x01);
        seed_coin(
            &mut view,
            &prev,
            build_name_update(&addr(1), b"d/a", b"v0"),
            10,
        );
        let tx = name_tx(prev, build_name_update(&addr(2), b"d/a", b"v"), 10_000);
        // Last update at 10, depth 100: dead from height 110 on.
        assert_eq!(
            check_name_transaction(&tx, 110, &view, &test_params(), 0),
            Err(NameCheckError::UpdateOfExpiredName)
        );
        check_name_transaction(&tx, 109, &view, &test_params(), 0).expect("still alive");
    }

    #[test]
    fn historic_bug_short_circuits() {
        let view = MockView::default();
        // No coins seeded: the fetch would fail if the check ran.
        let tx = name_tx(outpoint(0x01), build_name_update(&addr(2), b"d/a", b"v"), 1);
        let txid = tx.txid();
        let mut params = test_params();
        params.insert_historic_bug(105, txid, nmcd_consensus::BugType::FullyApply);
        check_name_transaction(&tx, 105, &view, &params, 0).expect("bug exemption");
        assert_eq!(
            check_name_transaction(&tx, 106, &view, &params, 0),
            Err(NameCheckError::InputCoinMissing)
        );
    }
}
