use std::collections::BTreeSet;
use std::sync::Arc;

use nmcd_chainstate::state::{ChainOptions, ChainState, ChainStateError};
use nmcd_chainstate::query::{name_filter, name_history, name_scan, name_show};
use nmcd_consensus::constants::NAME_TX_VERSION;
use nmcd_consensus::{chain_params, ChainParams, Hash256, Network};
use nmcd_names::{Name, NameCheckError};
use nmcd_primitives::block::{compute_merkle_root, Block, BlockHeader};
use nmcd_primitives::outpoint::OutPoint;
use nmcd_primitives::transaction::{Transaction, TxIn, TxOut};
use nmcd_script::names::{
    build_name_firstupdate, build_name_new, build_name_update, name_commitment,
};
use nmcd_storage::memory::MemoryStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn test_params() -> ChainParams {
    let mut params = chain_params(Network::Regtest);
    params.fixed_name_expiration = Some(100);
    params.min_name_coin_amount = 10_000;
    params
}

fn p2pkh(tag: u8) -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[tag; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

fn coinbase(height: u32) -> Transaction {
    Transaction {
        version: 1,
        vin: vec![TxIn {
            prevout: OutPoint::null(),
            script_sig: height.to_le_bytes().to_vec(),
            sequence: u32::MAX,
        }],
        vout: vec![TxOut {
            value: 50_000_000,
            script_pubkey: p2pkh(0xcb),
        }],
        lock_time: 0,
    }
}

fn name_tx(prev: OutPoint, script_pubkey: Vec<u8>, value: i64) -> Transaction {
    Transaction {
        version: NAME_TX_VERSION,
        vin: vec![TxIn {
            prevout: prev,
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

fn make_block(prev: Hash256, height: u32, mut extra: Vec<Transaction>) -> Block {
    let mut transactions = vec![coinbase(height)];
    transactions.append(&mut extra);
    let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid()).collect();
    Block {
        header: BlockHeader {
            version: 2,
            prev_block: prev,
            merkle_root: compute_merkle_root(&txids),
            time: 1_400_000_000 + height,
            bits: 0x207f_ffff,
            nonce: height,
            auxpow: None,
        },
        transactions,
    }
}

struct Harness {
    chainstate: ChainState<MemoryStore>,
    blocks: Vec<Block>,
    tip: Hash256,
    height: u32,
}

impl Harness {
    fn new(options: ChainOptions) -> Self {
        let store = Arc::new(MemoryStore::new());
        let chainstate =
            ChainState::with_options(store, test_params(), options).expect("chainstate");
        let mut harness = Self {
            chainstate,
            blocks: Vec::new(),
            tip: [0u8; 32],
            height: 0,
        };
        harness.connect(Vec::new()).expect("genesis");
        harness
    }

    fn next_height(&self) -> u32 {
        if self.blocks.is_empty() {
            0
        } else {
            self.height + 1
        }
    }

    /// Try to connect one block carrying `extra` transactions; on success
    /// the block becomes the tip.
    fn connect(&mut self, extra: Vec<Transaction>) -> Result<BTreeSet<Name>, ChainStateError> {
        let height = self.next_height();
        let block = make_block(self.tip, height, extra);
        let outcome = self.chainstate.connect_block(&block, height)?;
        self.chainstate.commit_batch(outcome.batch)?;
        self.tip = block.header.hash();
        self.height = height;
        self.blocks.push(block);
        Ok(outcome.expired)
    }

    /// Connect coinbase-only filler blocks up to and including `height`.
    fn advance_to(&mut self, height: u32) {
        while self.height < height {
            self.connect(Vec::new()).expect("filler block");
        }
    }

    fn disconnect_tip(&mut self) -> BTreeSet<Name> {
        let block = self.blocks.pop().expect("tip block");
        let outcome = self.chainstate.disconnect_block(&block).expect("disconnect");
        self.chainstate.commit_batch(outcome.batch).expect("commit");
        self.height -= 1;
        self.tip = block.header.prev_block;
        outcome.unexpired
    }

    fn coinbase_outpoint(&self, height: u32) -> OutPoint {
        OutPoint {
            hash: self.blocks[height as usize].transactions[0].txid(),
            index: 0,
        }
    }
}

const RAND: &[u8] = b"xxxxxxxxxxxxxxxxxxxx";

fn rand_salt(seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..20).map(|_| rng.gen()).collect()
}

/// Registers `name` with the commitment mined at `new_height` and the
/// reveal at `new_height + 11`.  Returns the reveal transaction.
fn register_name(harness: &mut Harness, name: &[u8], new_height: u32) -> Transaction {
    harness.advance_to(new_height - 1);
    let funding = harness.coinbase_outpoint(1);
    let hash = name_commitment(RAND, name);
    let tx_new = name_tx(funding, build_name_new(&p2pkh(1), &hash), 10_000);
    let new_outpoint = OutPoint {
        hash: tx_new.txid(),
        index: 0,
    };
    harness.connect(vec![tx_new]).expect("commitment block");
    assert_eq!(harness.height, new_height);

    harness.advance_to(new_height + 10);
    let tx_first = name_tx(
        new_outpoint,
        build_name_firstupdate(&p2pkh(2), name, b"v1", RAND),
        10_000,
    );
    harness.connect(vec![tx_first.clone()]).expect("reveal block");
    tx_first
}

#[test]
fn full_registration() {
    let mut harness = Harness::new(ChainOptions::default());
    let tx_first = register_name(&mut harness, b"d/a", 10);
    assert_eq!(harness.height, 21);

    let data = harness
        .chainstate
        .get_name(b"d/a")
        .expect("get")
        .expect("row");
    assert_eq!(data.value, b"v1");
    assert_eq!(data.height, 21);
    assert_eq!(
        data.prevout,
        OutPoint {
            hash: tx_first.txid(),
            index: 0,
        }
    );
    assert_eq!(data.address, p2pkh(2));
    assert_eq!(
        harness
            .chainstate
            .get_names_for_height(21)
            .expect("scan"),
        BTreeSet::from([b"d/a".to_vec()])
    );
}

#[test]
fn immature_reveal_rejected() {
    let mut harness = Harness::new(ChainOptions::default());
    harness.advance_to(9);
    let funding = harness.coinbase_outpoint(1);
    let hash = name_commitment(RAND, b"d/a");
    let tx_new = name_tx(funding, build_name_new(&p2pkh(1), &hash), 10_000);
    let new_outpoint = OutPoint {
        hash: tx_new.txid(),
        index: 0,
    };
    harness.connect(vec![tx_new]).expect("commitment block");

    harness.advance_to(19);
    let tx_first = name_tx(
        new_outpoint,
        build_name_firstupdate(&p2pkh(2), b"d/a", b"v1", RAND),
        10_000,
    );
    let err = harness.connect(vec![tx_first]).expect_err("too early");
    match err {
        ChainStateError::Validation { error, .. } => {
            assert_eq!(error, NameCheckError::FirstUpdateNotMature);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn greedy_name_rejected() {
    let mut harness = Harness::new(ChainOptions::default());
    let tx_first = register_name(&mut harness, b"d/a", 10);

    let tx_upd = name_tx(
        OutPoint {
            hash: tx_first.txid(),
            index: 0,
        },
        build_name_update(&p2pkh(3), b"d/a", b"v"),
        9_999,
    );
    let err = harness.connect(vec![tx_upd]).expect_err("greedy");
    match err {
        ChainStateError::Validation { error, .. } => {
            assert_eq!(error, NameCheckError::GreedyName);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn update_then_expire_then_disconnect() {
    let mut harness = Harness::new(ChainOptions::default());
    let tx_first = register_name(&mut harness, b"d/a", 10);

    harness.advance_to(49);
    let tx_upd = name_tx(
        OutPoint {
            hash: tx_first.txid(),
            index: 0,
        },
        build_name_update(&p2pkh(3), b"d/a", b"v2"),
        10_000,
    );
    harness.connect(vec![tx_upd.clone()]).expect("update block");
    assert_eq!(harness.height, 50);

    let upd_outpoint = OutPoint {
        hash: tx_upd.txid(),
        index: 0,
    };

    /* Alive all the way to the boundary.  */
    harness.advance_to(149);
    assert!(harness
        .chainstate
        .get_name(b"d/a")
        .expect("get")
        .is_some());
    assert!(harness
        .chainstate
        .utxo_entry(&upd_outpoint)
        .expect("get")
        .is_some());

    /* Connecting height 150 expires the name: row, expiry entry and coin
       all disappear.  */
    let expired = harness.connect(Vec::new()).expect("expiry block");
    assert_eq!(expired, BTreeSet::from([b"d/a".to_vec()]));
    assert!(harness.chainstate.get_name(b"d/a").expect("get").is_none());
    assert!(harness
        .chainstate
        .get_names_for_height(50)
        .expect("scan")
        .is_empty());
    assert!(harness
        .chainstate
        .utxo_entry(&upd_outpoint)
        .expect("get")
        .is_none());

    /* Disconnecting the expiry block restores all three.  */
    let unexpired = harness.disconnect_tip();
    assert_eq!(unexpired, BTreeSet::from([b"d/a".to_vec()]));
    let data = harness
        .chainstate
        .get_name(b"d/a")
        .expect("get")
        .expect("row");
    assert_eq!(data.value, b"v2");
    assert_eq!(data.height, 50);
    assert_eq!(data.prevout, upd_outpoint);
    assert_eq!(
        harness
            .chainstate
            .get_names_for_height(50)
            .expect("scan"),
        BTreeSet::from([b"d/a".to_vec()])
    );
    assert!(harness
        .chainstate
        .utxo_entry(&upd_outpoint)
        .expect("get")
        .is_some());
}

#[test]
fn expired_name_can_be_reregistered() {
    let mut harness = Harness::new(ChainOptions::default());
    register_name(&mut harness, b"d/a", 10);

    /* Expire at 121 (registered at 21, depth 100).  */
    harness.advance_to(121);
    assert!(harness.chainstate.get_name(b"d/a").expect("get").is_none());

    /* A fresh commit-reveal for the same name goes through.  */
    harness.advance_to(129);
    let funding = harness.coinbase_outpoint(2);
    let rand2 = &rand_salt(0x5eed_0001);
    let hash = name_commitment(rand2, b"d/a");
    let tx_new = name_tx(funding, build_name_new(&p2pkh(4), &hash), 10_000);
    let new_outpoint = OutPoint {
        hash: tx_new.txid(),
        index: 0,
    };
    harness.connect(vec![tx_new]).expect("commitment block");

    harness.advance_to(140);
    let tx_first = name_tx(
        new_outpoint,
        build_name_firstupdate(&p2pkh(5), b"d/a", b"again", rand2),
        10_000,
    );
    harness.connect(vec![tx_first]).expect("reveal block");

    let data = harness
        .chainstate
        .get_name(b"d/a")
        .expect("get")
        .expect("row");
    assert_eq!(data.value, b"again");
    assert_eq!(data.height, 141);
}

#[test]
fn queries_report_expiry_counters() {
    let mut harness = Harness::new(ChainOptions::default());
    register_name(&mut harness, b"d/a", 10);
    harness.advance_to(30);

    let info = name_show(&harness.chainstate, b"d/a")
        .expect("query")
        .expect("record");
    assert_eq!(info.name, "d/a");
    assert_eq!(info.value, "v1");
    assert_eq!(info.height, 21);
    assert_eq!(info.expires_in, 21 + 100 - 30);
    assert!(!info.expired);

    assert_eq!(name_show(&harness.chainstate, b"d/none").expect("query"), None);

    let interrupt = std::sync::atomic::AtomicBool::new(false);
    let scanned = name_scan(&harness.chainstate, b"", 10, &interrupt).expect("scan");
    assert_eq!(scanned.len(), 1);
    assert_eq!(scanned[0], info);

    let filtered = name_filter(&harness.chainstate, b"d/", 0, &interrupt).expect("filter");
    assert_eq!(filtered.len(), 1);
    let filtered = name_filter(&harness.chainstate, b"zz", 0, &interrupt).expect("filter");
    assert!(filtered.is_empty());
}

#[test]
fn history_tracks_updates_when_enabled() {
    let mut harness = Harness::new(ChainOptions {
        name_history: true,
        check_name_db: None,
    });
    let tx_first = register_name(&mut harness, b"d/a", 10);

    harness.advance_to(29);
    let tx_upd = name_tx(
        OutPoint {
            hash: tx_first.txid(),
            index: 0,
        },
        build_name_update(&p2pkh(3), b"d/a", b"v2"),
        10_000,
    );
    harness.connect(vec![tx_upd]).expect("update block");

    let history = harness
        .chainstate
        .get_name_history(b"d/a")
        .expect("get")
        .expect("row");
    assert_eq!(history.entries().len(), 1);
    assert_eq!(history.entries()[0].value, b"v1");
    assert_eq!(history.entries()[0].height, 21);

    let infos = name_history(&harness.chainstate, b"d/a").expect("query");
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].value, "v1");
    assert_eq!(infos[1].value, "v2");

    /* Disconnecting the update pops the stack again.  */
    harness.disconnect_tip();
    let history = harness.chainstate.get_name_history(b"d/a").expect("get");
    assert!(history.map(|h| h.is_empty()).unwrap_or(true));
}

#[test]
fn history_flag_mismatch_detected_on_reopen() {
    let store = Arc::new(MemoryStore::new());
    ChainState::with_options(
        Arc::clone(&store),
        test_params(),
        ChainOptions {
            name_history: true,
            check_name_db: None,
        },
    )
    .expect("first open");

    let err = ChainState::with_options(store, test_params(), ChainOptions::default())
        .expect_err("flag mismatch");
    assert!(matches!(err, ChainStateError::CorruptIndex(_)));
}

#[test]
fn conflicting_registration_in_block_rejected() {
    let mut harness = Harness::new(ChainOptions::default());
    register_name(&mut harness, b"d/a", 10);

    /* A second reveal for the same name against its own commitment fails
       while the first registration is alive.  */
    harness.advance_to(39);
    let funding = harness.coinbase_outpoint(3);
    let rand2 = &rand_salt(0x5eed_0002);
    let hash = name_commitment(rand2, b"d/a");
    let tx_new = name_tx(funding, build_name_new(&p2pkh(6), &hash), 10_000);
    let new_outpoint = OutPoint {
        hash: tx_new.txid(),
        index: 0,
    };
    harness.connect(vec![tx_new]).expect("commitment block");

    harness.advance_to(60);
    let tx_first = name_tx(
        new_outpoint,
        build_name_firstupdate(&p2pkh(7), b"d/a", b"mine", rand2),
        10_000,
    );
    let err = harness.connect(vec![tx_first]).expect_err("name taken");
    match err {
        ChainStateError::Validation { error, .. } => {
            assert_eq!(error, NameCheckError::FirstUpdateOnActiveName);
        }
        other => panic!("unexpected error {other}"),
    }
}
