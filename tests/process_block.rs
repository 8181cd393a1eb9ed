//! Block processing scenarios
//!
//! End-to-end tests driving `BlockChain::process_block` over in-memory and
//! sled-backed stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pc_core::chain::{BlockChain, ChainError};
use pc_core::consensus::{
    compact_to_big, BehaviorFlags, Block, BlockHeader, DefaultSanityChecker, ErrorCode,
    FixedTimeSource, Transaction,
};
use pc_core::crypto::Hash;
use pc_core::params::{Checkpoint, Params};
use pc_core::storage::{BlockStore, MemoryStore, SledStore, StoreError};

const SPACING: u64 = 600;

fn genesis_time(params: &Params) -> u64 {
    params.genesis_block.header.timestamp
}

/// Chain on a memory store whose clock sits far after genesis
fn new_chain(params: Params) -> (BlockChain, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(FixedTimeSource::new(genesis_time(&params) + 10_000_000));
    let chain = BlockChain::with_components(
        params,
        store.clone(),
        clock,
        Arc::new(DefaultSanityChecker),
    )
    .unwrap();
    (chain, store)
}

/// Memory store whose main-chain updates start failing on demand
struct FlakyStore {
    inner: MemoryStore,
    /// Main-chain updates left before failing, `usize::MAX` for no limit
    allowed: AtomicUsize,
}

impl FlakyStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            allowed: AtomicUsize::new(usize::MAX),
        }
    }

    fn fail_after(&self, updates: usize) {
        self.allowed.store(updates, Ordering::SeqCst);
    }

    fn heal(&self) {
        self.allowed.store(usize::MAX, Ordering::SeqCst);
    }

    fn update(&self) -> Result<(), StoreError> {
        match self.allowed.load(Ordering::SeqCst) {
            0 => Err(StoreError::Corrupt("injected failure".to_string())),
            usize::MAX => Ok(()),
            n => {
                self.allowed.store(n - 1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

impl BlockStore for FlakyStore {
    fn has_block(&self, hash: &Hash) -> Result<bool, StoreError> {
        self.inner.has_block(hash)
    }

    fn fetch_block(&self, hash: &Hash) -> Result<Option<Block>, StoreError> {
        self.inner.fetch_block(hash)
    }

    fn height_by_hash(&self, hash: &Hash) -> Result<u32, StoreError> {
        self.inner.height_by_hash(hash)
    }

    fn hash_at_height(&self, height: u32) -> Result<Option<Hash>, StoreError> {
        self.inner.hash_at_height(height)
    }

    fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        self.inner.put_block(block)
    }

    fn connect_block(&self, hash: &Hash, height: u32) -> Result<(), StoreError> {
        self.update()?;
        self.inner.connect_block(hash, height)
    }

    fn reorganize(&self, detach: &[Hash], attach: &[(Hash, u32)]) -> Result<(), StoreError> {
        self.update()?;
        self.inner.reorganize(detach, attach)
    }

    fn best_tip(&self) -> Result<Option<(Hash, u32)>, StoreError> {
        self.inner.best_tip()
    }
}

fn flaky_chain(params: Params) -> (BlockChain, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let clock = Arc::new(FixedTimeSource::new(genesis_time(&params) + 10_000_000));
    let chain = BlockChain::with_components(
        params,
        store.clone(),
        clock,
        Arc::new(DefaultSanityChecker),
    )
    .unwrap();
    (chain, store)
}

fn build_block(prev: Hash, version: i32, timestamp: u64, bits: u32, tag: &[u8]) -> Block {
    let coinbase = Transaction::coinbase(0, 0, tag.to_vec());
    let mut block = Block::new(
        BlockHeader::new(version, prev, Hash::zero(), timestamp, bits, 0),
        vec![coinbase],
    );
    block.header.merkle_root = block.compute_merkle_root();
    block
}

/// Search nonces until the block meets its own target
fn solve(params: &Params, block: &mut Block, height: u32) {
    let algorithm = params.algorithm_for(block.header.version, height).unwrap();
    let target = compact_to_big(block.header.bits).unwrap();
    while algorithm.pow.hash_header(&block.header).to_u256() > target {
        block.header.nonce += 1;
    }
}

/// Unsolved next block on the chain's best tip carrying the required bits
fn template_block(chain: &BlockChain, algorithm: &str, tag: &[u8]) -> (Block, u32) {
    let params = chain.params();
    let tip = chain.best_hash();
    let tip_node = chain.lookup_node(&tip).unwrap();
    let height = tip_node.height + 1;
    let spec = params.algorithm_by_name(algorithm, height).unwrap();
    let (bits, _) = chain
        .calc_next_required_difficulty(0, &tip, algorithm, false)
        .unwrap();

    (build_block(tip, spec.version, tip_node.timestamp + SPACING, bits, tag), height)
}

/// Valid next block on the chain's best tip for `algorithm`
fn next_block(chain: &BlockChain, algorithm: &str, tag: &[u8]) -> Block {
    let (mut block, height) = template_block(chain, algorithm, tag);
    solve(chain.params(), &mut block, height);
    block
}

fn extend(chain: &BlockChain, count: usize) -> Vec<Block> {
    (0..count)
        .map(|i| {
            let algorithm = if i % 3 == 2 { "blake2b" } else { "sha256d" };
            let block = next_block(chain, algorithm, format!("block {i}").as_bytes());
            let outcome = chain.process_block(&block, BehaviorFlags::NONE, 0).unwrap();
            assert!(outcome.is_main_chain);
            assert!(!outcome.is_orphan);
            block
        })
        .collect()
}

#[test]
fn test_duplicate_blocks_rejected() {
    let (chain, store) = new_chain(Params::regtest());
    let blocks = extend(&chain, 2);
    let before = chain.snapshot();
    let stored = store.block_count();

    let err = chain
        .process_block(&blocks[1], BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::DuplicateBlock));

    let err = chain
        .process_block(&chain.params().genesis_block.clone(), BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::DuplicateBlock));

    // rejected duplicates leave the graph, the pool and the store as they were
    let after = chain.snapshot();
    assert_eq!(after.block_count, before.block_count);
    assert_eq!(after.orphan_count, before.orphan_count);
    assert_eq!(chain.orphan_count(), 0);
    assert_eq!(after.best_hash, before.best_hash);
    assert_eq!(chain.best_height(), 2);
    assert_eq!(store.block_count(), stored);
}

#[test]
fn test_duplicate_orphan_rejected() {
    let (source, _) = new_chain(Params::regtest());
    let blocks = extend(&source, 2);

    let (chain, _) = new_chain(Params::regtest());
    let outcome = chain.process_block(&blocks[1], BehaviorFlags::NONE, 2).unwrap();
    assert!(outcome.is_orphan);
    assert!(!outcome.is_main_chain);

    let err = chain
        .process_block(&blocks[1], BehaviorFlags::NONE, 2)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::DuplicateBlock));
    assert_eq!(chain.orphan_count(), 1);
}

#[test]
fn test_reverse_order_delivery_resolves_all_orphans() {
    let (source, _) = new_chain(Params::regtest());
    let blocks = extend(&source, 12);

    let (chain, store) = new_chain(Params::regtest());
    for (i, block) in blocks.iter().enumerate().skip(1).rev() {
        let outcome = chain
            .process_block(block, BehaviorFlags::NONE, i as u32 + 1)
            .unwrap();
        assert!(outcome.is_orphan);
    }
    assert_eq!(chain.orphan_count(), 11);
    assert!(chain.is_known_orphan(&blocks[5].hash()));
    assert_eq!(chain.orphan_root(&blocks[11].hash()), blocks[1].hash());

    let outcome = chain.process_block(&blocks[0], BehaviorFlags::NONE, 1).unwrap();
    assert!(outcome.is_main_chain);

    assert_eq!(chain.orphan_count(), 0);
    assert_eq!(chain.best_hash(), source.best_hash());
    assert_eq!(chain.best_height(), 12);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(store.height_by_hash(&block.hash()).unwrap(), i as u32 + 1);
    }
}

#[test]
fn test_orphan_with_bad_proof_of_work_dropped_on_release() {
    let (source, _) = new_chain(Params::regtest());
    let blocks = extend(&source, 2);

    // an unsolved sibling of blocks[1] that fails its hash check
    let params = Params::regtest();
    let mut bad = blocks[1].clone();
    let algorithm = params.algorithm_for(bad.header.version, 2).unwrap();
    let target = compact_to_big(bad.header.bits).unwrap();
    while algorithm.pow.hash_header(&bad.header).to_u256() <= target {
        bad.header.nonce += 1;
    }

    let (chain, _) = new_chain(params);
    assert!(chain.process_block(&bad, BehaviorFlags::NONE, 2).unwrap().is_orphan);
    let outcome = chain.process_block(&blocks[0], BehaviorFlags::NONE, 1).unwrap();
    assert!(outcome.is_main_chain);

    assert_eq!(chain.orphan_count(), 0);
    assert_eq!(chain.best_hash(), blocks[0].hash());
    assert!(chain.lookup_node(&bad.hash()).is_none());
}

#[test]
fn test_unexpected_difficulty_rejected() {
    let (chain, _) = new_chain(Params::regtest());
    extend(&chain, 3);

    let mut block = next_block(&chain, "sha256d", b"wrong bits");
    block.header.bits = 0x1f00ffff;
    let height = chain.best_height() + 1;
    solve(chain.params(), &mut block, height);

    let err = chain
        .process_block(&block, BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::UnexpectedDifficulty));

    // FAST_ADD trusts the claimed target
    let outcome = chain.process_block(&block, BehaviorFlags::FAST_ADD, 0).unwrap();
    assert!(outcome.is_main_chain);
}

#[test]
fn test_timestamp_before_median_rejected() {
    let (chain, _) = new_chain(Params::regtest());
    extend(&chain, 4);

    let mut block = next_block(&chain, "sha256d", b"stale");
    block.header.timestamp = chain.median_time_past();
    let height = chain.best_height() + 1;
    solve(chain.params(), &mut block, height);

    let err = chain
        .process_block(&block, BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::TimeTooOld));
}

#[test]
fn test_checkpoint_bounds_orphans() {
    const BITS: u32 = 0x1d00ffff;
    let mut params = Params::regtest();
    let flags = BehaviorFlags::FAST_ADD | BehaviorFlags::NO_POW_CHECK;

    let mut blocks = Vec::with_capacity(1000);
    let mut prev = params.genesis_hash;
    for height in 1..=1000u64 {
        let block = build_block(
            prev,
            2,
            genesis_time(&params) + height * SPACING,
            BITS,
            format!("h{height}").as_bytes(),
        );
        prev = block.hash();
        blocks.push(block);
    }
    let checkpoint = &blocks[999];
    let checkpoint_time = checkpoint.header.timestamp;
    params.checkpoints = vec![Checkpoint {
        height: 1000,
        hash: checkpoint.hash(),
    }];

    let (chain, _) = new_chain(params);
    for block in &blocks {
        assert!(chain.process_block(block, flags, 0).unwrap().is_main_chain);
    }
    assert_eq!(chain.best_height(), 1000);

    let unknown_parent = Hash([0xab; 32]);

    let early = build_block(unknown_parent, 2, checkpoint_time - 1, BITS, b"early");
    let err = chain
        .process_block(&early, BehaviorFlags::NO_POW_CHECK, 1050)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::CheckpointTimeTooOld));

    // ten times the checkpoint target, only four times is reachable in one second
    let easy = build_block(unknown_parent, 2, checkpoint_time + 1, 0x1d09fff6, b"easy");
    let err = chain
        .process_block(&easy, BehaviorFlags::NO_POW_CHECK, 1050)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::DifficultyTooLow));

    let reachable = build_block(unknown_parent, 2, checkpoint_time + 1, 0x1d01fffe, b"reachable");
    let outcome = chain
        .process_block(&reachable, BehaviorFlags::NO_POW_CHECK, 1050)
        .unwrap();
    assert!(outcome.is_orphan);

    let outcome = chain
        .process_block(&easy, BehaviorFlags::NO_POW_CHECK | BehaviorFlags::FAST_ADD, 1050)
        .unwrap();
    assert!(outcome.is_orphan);
    assert_eq!(chain.orphan_count(), 2);
}

#[test]
fn test_checkpoint_mismatch_rejected() {
    let (source, _) = new_chain(Params::regtest());
    let blocks = extend(&source, 3);

    let mut params = Params::regtest();
    params.checkpoints = vec![Checkpoint {
        height: 2,
        hash: Hash([0x42; 32]),
    }];
    let (chain, _) = new_chain(params);
    chain.process_block(&blocks[0], BehaviorFlags::NONE, 0).unwrap();
    let err = chain
        .process_block(&blocks[1], BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::BadCheckpoint));
    assert_eq!(chain.best_height(), 1);
}

#[test]
fn test_reorganization_to_heavier_branch() {
    let params = Params::regtest();
    let (chain, store) = new_chain(params.clone());
    let bits = params.pow_limit_bits;
    let start = genesis_time(&params);

    let mut a1 = build_block(params.genesis_hash, 2, start + 600, bits, b"a1");
    solve(&params, &mut a1, 1);
    let mut a2 = build_block(a1.hash(), 2, start + 1200, bits, b"a2");
    solve(&params, &mut a2, 2);
    for block in [&a1, &a2] {
        assert!(chain.process_block(block, BehaviorFlags::FAST_ADD, 0).unwrap().is_main_chain);
    }

    let mut b1 = build_block(params.genesis_hash, 2, start + 700, bits, b"b1");
    solve(&params, &mut b1, 1);
    let mut b2 = build_block(b1.hash(), 2, start + 1300, bits, b"b2");
    solve(&params, &mut b2, 2);
    let mut b3 = build_block(b2.hash(), 2, start + 1900, bits, b"b3");
    solve(&params, &mut b3, 3);

    // equal work stays on the first-seen branch
    for block in [&b1, &b2] {
        let outcome = chain.process_block(block, BehaviorFlags::FAST_ADD, 0).unwrap();
        assert!(!outcome.is_main_chain);
        assert!(!outcome.is_orphan);
    }
    assert_eq!(chain.best_hash(), a2.hash());

    let outcome = chain.process_block(&b3, BehaviorFlags::FAST_ADD, 0).unwrap();
    assert!(outcome.is_main_chain);
    assert_eq!(chain.best_hash(), b3.hash());
    assert_eq!(chain.best_height(), 3);

    assert_eq!(store.hash_at_height(1).unwrap(), Some(b1.hash()));
    assert_eq!(store.hash_at_height(2).unwrap(), Some(b2.hash()));
    assert!(matches!(
        store.height_by_hash(&a2.hash()),
        Err(StoreError::NotInMainChain(_))
    ));
    assert_eq!(store.best_tip().unwrap(), Some((b3.hash(), 3)));
    // detached blocks stay in the graph
    assert!(chain.have_block(&a2.hash()).unwrap());
}

#[test]
fn test_unknown_algorithm_rejected() {
    let mut params = Params::regtest();
    params.hard_forks[1].activation_height = 1;
    params.hard_forks[1].averaging_floor = 0;
    let (chain, _) = new_chain(params.clone());

    let block = build_block(params.genesis_hash, 99, genesis_time(&params) + 600, params.pow_limit_bits, b"?");
    let err = chain
        .process_block(&block, BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert_eq!(err.rule_code(), Some(ErrorCode::UnknownAlgorithm));

    let err = chain
        .calc_next_required_difficulty(0, &params.genesis_hash, "scrypt", false)
        .unwrap_err();
    assert!(matches!(err, ChainError::UnknownAlgorithm { .. }));

    // every Plan9 algorithm can mine the first block after activation
    for name in ["blake3", "keccak", "shake256"] {
        let block = next_block(&chain, name, name.as_bytes());
        assert!(chain.process_block(&block, BehaviorFlags::NONE, 0).unwrap().is_main_chain);
    }
    assert_eq!(chain.best_height(), 3);
}

#[test]
fn test_difficulty_floor_without_history() {
    let params = Params::regtest();
    let (chain, _) = new_chain(params.clone());

    for name in ["sha256d", "blake2b"] {
        let (bits, adjustment) = chain
            .calc_next_required_difficulty(0, &params.genesis_hash, name, true)
            .unwrap();
        assert_eq!(bits, params.algorithm_by_name(name, 1).unwrap().pow_limit_bits);
        assert_eq!(adjustment, 1.0);
    }
}

#[test]
fn test_sled_chain_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let params = Params::regtest();
    let clock = Arc::new(FixedTimeSource::new(genesis_time(&params) + 10_000_000));

    let (tip, height) = {
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let chain = BlockChain::with_components(
            params.clone(),
            store.clone(),
            clock.clone(),
            Arc::new(DefaultSanityChecker),
        )
        .unwrap();
        extend(&chain, 5);
        store.flush().unwrap();
        (chain.best_hash(), chain.best_height())
    };

    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    let chain = BlockChain::with_components(params, store, clock, Arc::new(DefaultSanityChecker)).unwrap();
    assert_eq!(chain.best_hash(), tip);
    assert_eq!(chain.best_height(), height);

    // the reloaded chain keeps validating new blocks
    extend(&chain, 2);
    assert_eq!(chain.best_height(), height + 2);
}

#[test]
fn test_side_chain_leftovers_count_as_absent_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let params = Params::regtest();
    let clock = Arc::new(FixedTimeSource::new(genesis_time(&params) + 10_000_000));
    let bits = params.pow_limit_bits;
    let start = genesis_time(&params);

    let mut side = build_block(params.genesis_hash, 2, start + 600, bits, b"side");
    solve(&params, &mut side, 1);
    let mut orphaned = build_block(side.hash(), 2, start + 1200, bits, b"side child");
    solve(&params, &mut orphaned, 2);

    {
        let store = Arc::new(SledStore::open(dir.path()).unwrap());
        let chain = BlockChain::with_components(
            params.clone(),
            store.clone(),
            clock.clone(),
            Arc::new(DefaultSanityChecker),
        )
        .unwrap();
        let mut main = build_block(params.genesis_hash, 2, start + 500, bits, b"main");
        solve(&params, &mut main, 1);
        chain.process_block(&main, BehaviorFlags::FAST_ADD, 0).unwrap();
        let outcome = chain.process_block(&side, BehaviorFlags::FAST_ADD, 0).unwrap();
        assert!(!outcome.is_main_chain);
        store.flush().unwrap();
    }

    let store = Arc::new(SledStore::open(dir.path()).unwrap());
    assert!(store.has_block(&side.hash()).unwrap());
    let chain = BlockChain::with_components(params, store, clock, Arc::new(DefaultSanityChecker)).unwrap();
    assert!(!chain.have_block(&side.hash()).unwrap());

    // the side block is processed again rather than reported as a duplicate
    let outcome = chain.process_block(&side, BehaviorFlags::FAST_ADD, 0).unwrap();
    assert!(!outcome.is_main_chain);
    assert!(!outcome.is_orphan);
    let outcome = chain.process_block(&orphaned, BehaviorFlags::FAST_ADD, 0).unwrap();
    assert!(outcome.is_main_chain);
    assert_eq!(chain.best_height(), 2);
}

#[test]
fn test_slow_plan9_algorithm_keeps_mining_on_mainnet() {
    let mut params = Params::mainnet();
    params.hard_forks[1].activation_height = 1;
    params.hard_forks[1].averaging_floor = 0;
    let floor_bits = params.algorithm_by_name("blake2b", 1).unwrap().pow_limit_bits;
    let floor = compact_to_big(floor_bits).unwrap();
    let (chain, _) = new_chain(params);

    // blake2b aims for 27 seconds per block, these arrive every 600
    for i in 0..8 {
        let (block, _) = template_block(&chain, "blake2b", format!("slow {i}").as_bytes());
        assert!(compact_to_big(block.header.bits).unwrap() <= floor);
        let outcome = chain
            .process_block(&block, BehaviorFlags::NO_POW_CHECK, 0)
            .unwrap();
        assert!(outcome.is_main_chain);
    }
    assert_eq!(chain.best_height(), 8);

    let (bits, adjustment) = chain
        .calc_next_required_difficulty(0, &chain.best_hash(), "blake2b", false)
        .unwrap();
    assert!(adjustment > 1.0);
    assert_eq!(bits, floor_bits);
}

#[test]
fn test_failed_connect_leaves_no_trace() {
    let (chain, store) = flaky_chain(Params::regtest());
    extend(&chain, 2);
    let block = next_block(&chain, "sha256d", b"unlucky");
    let before = chain.snapshot();

    store.fail_after(0);
    let err = chain
        .process_block(&block, BehaviorFlags::NONE, 0)
        .unwrap_err();
    assert!(matches!(err, ChainError::Store(_)));

    assert!(chain.lookup_node(&block.hash()).is_none());
    assert!(!chain.have_block(&block.hash()).unwrap());
    assert_eq!(chain.snapshot().block_count, before.block_count);
    assert_eq!(chain.best_hash(), before.best_hash);
    assert_eq!(store.best_tip().unwrap(), Some((before.best_hash, 2)));

    // once the store recovers the same block goes through
    store.heal();
    let outcome = chain.process_block(&block, BehaviorFlags::NONE, 0).unwrap();
    assert!(outcome.is_main_chain);
    assert_eq!(chain.best_hash(), block.hash());
    assert_eq!(chain.best_height(), 3);
}

#[test]
fn test_store_failure_in_orphan_cascade_is_returned() {
    let (source, _) = new_chain(Params::regtest());
    let blocks = extend(&source, 3);

    let (chain, store) = flaky_chain(Params::regtest());
    for (i, block) in blocks.iter().enumerate().skip(1).rev() {
        assert!(chain
            .process_block(block, BehaviorFlags::NONE, i as u32 + 1)
            .unwrap()
            .is_orphan);
    }
    assert_eq!(chain.orphan_count(), 2);

    // the parent connects, its released child does not
    store.fail_after(1);
    let err = chain
        .process_block(&blocks[0], BehaviorFlags::NONE, 1)
        .unwrap_err();
    assert!(matches!(err, ChainError::Store(_)));
    assert_eq!(chain.best_hash(), blocks[0].hash());
    assert!(chain.lookup_node(&blocks[1].hash()).is_none());
    assert!(!chain.is_known_orphan(&blocks[1].hash()));
    // the grandchild still waits on the child
    assert!(chain.is_known_orphan(&blocks[2].hash()));

    store.heal();
    let outcome = chain.process_block(&blocks[1], BehaviorFlags::NONE, 0).unwrap();
    assert!(outcome.is_main_chain);
    assert_eq!(chain.orphan_count(), 0);
    assert_eq!(chain.best_hash(), source.best_hash());
    assert_eq!(chain.best_height(), 3);
}

#[test]
fn test_failed_reorganization_keeps_old_branch() {
    let params = Params::regtest();
    let (chain, store) = flaky_chain(params.clone());
    let bits = params.pow_limit_bits;
    let start = genesis_time(&params);

    let mut a1 = build_block(params.genesis_hash, 2, start + 600, bits, b"a1");
    solve(&params, &mut a1, 1);
    let mut a2 = build_block(a1.hash(), 2, start + 1200, bits, b"a2");
    solve(&params, &mut a2, 2);
    let mut b1 = build_block(params.genesis_hash, 2, start + 700, bits, b"b1");
    solve(&params, &mut b1, 1);
    let mut b2 = build_block(b1.hash(), 2, start + 1300, bits, b"b2");
    solve(&params, &mut b2, 2);
    let mut b3 = build_block(b2.hash(), 2, start + 1900, bits, b"b3");
    solve(&params, &mut b3, 3);

    for block in [&a1, &a2, &b1, &b2] {
        chain.process_block(block, BehaviorFlags::FAST_ADD, 0).unwrap();
    }
    assert_eq!(chain.best_hash(), a2.hash());

    store.fail_after(0);
    let err = chain
        .process_block(&b3, BehaviorFlags::FAST_ADD, 0)
        .unwrap_err();
    assert!(matches!(err, ChainError::Store(_)));

    // neither the graph nor the store moved to the new branch
    assert_eq!(chain.best_hash(), a2.hash());
    assert_eq!(chain.best_height(), 2);
    assert!(chain.lookup_node(&b3.hash()).is_none());
    assert_eq!(store.best_tip().unwrap(), Some((a2.hash(), 2)));
    assert_eq!(store.hash_at_height(1).unwrap(), Some(a1.hash()));
    assert!(matches!(
        store.height_by_hash(&b1.hash()),
        Err(StoreError::NotInMainChain(_))
    ));

    store.heal();
    assert!(chain.process_block(&b3, BehaviorFlags::FAST_ADD, 0).unwrap().is_main_chain);
    assert_eq!(store.best_tip().unwrap(), Some((b3.hash(), 3)));
    assert_eq!(store.hash_at_height(1).unwrap(), Some(b1.hash()));
}
