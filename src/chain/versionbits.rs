//! Version-bits deployments and unknown rule detection
//!
//! Miners signal readiness for a soft fork by setting a bit in the header
//! version under the `001` top-bits marker. Named deployments come from the
//! network parameters; every other bit is watched so operators learn when
//! rules this node does not know about are activating.

use tracing::warn;

use crate::chain::threshold::{threshold_state, ConditionChecker, ThresholdCache, ThresholdState};
use crate::chain::{BlockIndex, ChainError, NodeId};
use crate::crypto::Hash;
use crate::params::{Deployment, Params};

/// Marker that a header version carries version bits
pub const VB_TOP_BITS: u32 = 0x2000_0000;
/// Mask selecting the marker bits
pub const VB_TOP_MASK: u32 = 0xe000_0000;
/// Number of bits available for deployments
pub const VB_NUM_BITS: u8 = 29;

fn signals_bit(version: i32, bit: u8) -> bool {
    let version = version as u32;
    version & VB_TOP_MASK == VB_TOP_BITS && version & (1u32 << bit) != 0
}

/// Voting rules of a named deployment
pub struct DeploymentChecker<'a> {
    params: &'a Params,
    deployment: &'a Deployment,
}

impl<'a> DeploymentChecker<'a> {
    pub fn new(params: &'a Params, deployment: &'a Deployment) -> Self {
        Self { params, deployment }
    }
}

impl ConditionChecker for DeploymentChecker<'_> {
    fn begin_time(&self) -> u64 {
        self.deployment.start_time
    }

    fn end_time(&self) -> u64 {
        self.deployment.expire_time
    }

    fn threshold(&self) -> u32 {
        self.params.rule_change_activation_threshold
    }

    fn window(&self) -> u32 {
        self.params.miner_confirmation_window
    }

    fn condition(&mut self, index: &BlockIndex, node: NodeId) -> Result<bool, ChainError> {
        Ok(signals_bit(index.node(node).version, self.deployment.bit))
    }
}

/// Watches a bit for signalling that no known deployment explains
///
/// Always votable and never expires.
pub struct BitConditionChecker<'a> {
    params: &'a Params,
    bit: u8,
    deployment_caches: &'a mut [ThresholdCache],
}

impl<'a> BitConditionChecker<'a> {
    pub fn new(params: &'a Params, bit: u8, deployment_caches: &'a mut [ThresholdCache]) -> Self {
        Self {
            params,
            bit,
            deployment_caches,
        }
    }
}

impl ConditionChecker for BitConditionChecker<'_> {
    fn begin_time(&self) -> u64 {
        0
    }

    fn end_time(&self) -> u64 {
        u64::MAX
    }

    fn threshold(&self) -> u32 {
        self.params.rule_change_activation_threshold
    }

    fn window(&self) -> u32 {
        self.params.miner_confirmation_window
    }

    fn condition(&mut self, index: &BlockIndex, node: NodeId) -> Result<bool, ChainError> {
        if !signals_bit(index.node(node).version, self.bit) {
            return Ok(false);
        }
        let expected = next_block_version(self.params, index, &mut *self.deployment_caches, index.parent(node))?;
        Ok(expected as u32 & (1u32 << self.bit) == 0)
    }
}

/// Version a block following `prev` is expected to carry
pub fn next_block_version(
    params: &Params,
    index: &BlockIndex,
    deployment_caches: &mut [ThresholdCache],
    prev: Option<NodeId>,
) -> Result<i32, ChainError> {
    let mut version = VB_TOP_BITS;
    for (deployment, cache) in params.deployments.iter().zip(deployment_caches.iter_mut()) {
        let mut checker = DeploymentChecker::new(params, deployment);
        let state = threshold_state(index, prev, &mut checker, cache)?;
        if matches!(state, ThresholdState::Started | ThresholdState::LockedIn) {
            version |= 1u32 << deployment.bit;
        }
    }
    Ok(version as i32)
}

/// Outcome of one unknown-rule warning pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UnknownRuleReport {
    /// Bit whose activation triggered the one-time warning in this pass
    pub newly_activated: Option<u8>,
    /// Locked-in bits and the blocks left until they activate
    pub locked_in: Vec<(u8, u32)>,
}

/// Threshold caches of one chain instance
#[derive(Debug)]
pub struct VersionBits {
    deployment_caches: Vec<ThresholdCache>,
    warning_caches: Vec<ThresholdCache>,
    unknown_rules_warned: bool,
}

impl VersionBits {
    pub fn new(params: &Params) -> Self {
        Self {
            deployment_caches: vec![ThresholdCache::new(); params.deployments.len()],
            warning_caches: vec![ThresholdCache::new(); VB_NUM_BITS as usize],
            unknown_rules_warned: false,
        }
    }

    pub fn next_block_version(
        &mut self,
        params: &Params,
        index: &BlockIndex,
        prev: Option<NodeId>,
    ) -> Result<i32, ChainError> {
        next_block_version(params, index, &mut self.deployment_caches, prev)
    }

    /// State of the named deployment for the block after `prev`
    pub fn deployment_state(
        &mut self,
        params: &Params,
        index: &BlockIndex,
        prev: Option<NodeId>,
        name: &str,
    ) -> Option<Result<ThresholdState, ChainError>> {
        let position = params.deployments.iter().position(|d| d.name == name)?;
        let mut checker = DeploymentChecker::new(params, &params.deployments[position]);
        Some(threshold_state(
            index,
            prev,
            &mut checker,
            &mut self.deployment_caches[position],
        ))
    }

    /// Warn about unknown rules that are active or about to activate at `node`
    ///
    /// The activation warning is logged once per chain instance. Lock-in
    /// notices repeat for every block of the lock-in window.
    pub fn warn_unknown_rule_activations(
        &mut self,
        params: &Params,
        index: &BlockIndex,
        node: NodeId,
    ) -> Result<UnknownRuleReport, ChainError> {
        let mut report = UnknownRuleReport::default();
        let parent = index.parent(node);
        let height = index.node(node).height;

        for bit in 0..VB_NUM_BITS {
            let mut checker = BitConditionChecker::new(params, bit, &mut self.deployment_caches);
            let state = threshold_state(index, parent, &mut checker, &mut self.warning_caches[bit as usize])?;

            match state {
                ThresholdState::Active if !self.unknown_rules_warned => {
                    warn!(bit, "Unknown new rules activated");
                    self.unknown_rules_warned = true;
                    report.newly_activated = Some(bit);
                }
                ThresholdState::LockedIn => {
                    let window = params.miner_confirmation_window;
                    let remaining = window - height % window;
                    warn!(bit, remaining, "Unknown new rules are about to activate");
                    report.locked_in.push((bit, remaining));
                }
                _ => {}
            }
        }
        Ok(report)
    }

    pub fn unknown_rules_warned(&self) -> bool {
        self.unknown_rules_warned
    }

    /// Drop every cached state for a block leaving the main chain
    pub fn evict(&mut self, hash: &Hash) {
        for cache in self.deployment_caches.iter_mut().chain(self.warning_caches.iter_mut()) {
            cache.evict(hash);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::BlockHeader;

    fn small_window_params() -> Params {
        let mut params = Params::regtest();
        params.miner_confirmation_window = 10;
        params.rule_change_activation_threshold = 8;
        params
    }

    fn build(index: &mut BlockIndex, versions: impl IntoIterator<Item = i32>) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut prev = Hash::zero();
        let mut parent = None;
        for (i, version) in versions.into_iter().enumerate() {
            let h = BlockHeader::new(version, prev, Hash::zero(), 1_000 + 60 * i as u64, 0x207fffff, 0);
            let id = index.insert(&h, parent);
            prev = h.hash();
            parent = Some(id);
            ids.push(id);
        }
        ids
    }

    #[test]
    fn test_next_block_version_sets_started_bits() {
        let params = small_window_params();
        let mut index = BlockIndex::new();
        let ids = build(&mut index, std::iter::repeat(2).take(25));
        let mut vb = VersionBits::new(&params);

        // before the first window completes nothing has started
        let early = vb.next_block_version(&params, &index, Some(ids[5])).unwrap();
        assert_eq!(early as u32, VB_TOP_BITS);

        // regtest deployments start at time 0, so both bits are signalled
        let version = vb.next_block_version(&params, &index, Some(ids[24])).unwrap() as u32;
        assert_eq!(version, VB_TOP_BITS | (1 << 28) | 1);
        assert_eq!(
            vb.deployment_state(&params, &index, Some(ids[24]), "csv").unwrap().unwrap(),
            ThresholdState::Started
        );
        assert!(vb.deployment_state(&params, &index, Some(ids[24]), "nope").is_none());
    }

    #[test]
    fn test_deployment_locks_in_and_activates() {
        let params = small_window_params();
        let mut index = BlockIndex::new();
        let signalling = (VB_TOP_BITS | 1) as i32;
        let ids = build(&mut index, std::iter::repeat(signalling).take(40));
        let mut vb = VersionBits::new(&params);

        let state = |vb: &mut VersionBits, id| {
            vb.deployment_state(&params, &index, Some(id), "csv").unwrap().unwrap()
        };
        assert_eq!(state(&mut vb, ids[9]), ThresholdState::Started);
        assert_eq!(state(&mut vb, ids[19]), ThresholdState::LockedIn);
        assert_eq!(state(&mut vb, ids[29]), ThresholdState::Active);
    }

    #[test]
    fn test_unknown_bit_warning_fires_once() {
        let params = small_window_params();
        let mut index = BlockIndex::new();
        // bit 5 is not a known deployment
        let unknown = (VB_TOP_BITS | (1 << 5)) as i32;
        let ids = build(&mut index, std::iter::repeat(unknown).take(50));
        let mut vb = VersionBits::new(&params);

        let mut activations = 0;
        let mut lock_in_notices = 0;
        for &id in &ids {
            let report = vb.warn_unknown_rule_activations(&params, &index, id).unwrap();
            if let Some(bit) = report.newly_activated {
                assert_eq!(bit, 5);
                activations += 1;
            }
            for (bit, remaining) in report.locked_in {
                assert_eq!(bit, 5);
                assert!(remaining >= 1 && remaining <= params.miner_confirmation_window);
                lock_in_notices += 1;
            }
        }
        assert_eq!(activations, 1);
        assert_eq!(lock_in_notices, 10);
        assert!(vb.unknown_rules_warned());
    }

    #[test]
    fn test_known_bit_is_not_unknown() {
        let params = small_window_params();
        let mut index = BlockIndex::new();
        // csv bit is expected while started, so signalling it is not suspicious
        let csv = (VB_TOP_BITS | 1) as i32;
        let ids = build(&mut index, std::iter::repeat(csv).take(30));
        let mut vb = VersionBits::new(&params);

        for &id in &ids {
            let report = vb.warn_unknown_rule_activations(&params, &index, id).unwrap();
            assert_eq!(report, UnknownRuleReport::default());
        }
        assert!(!vb.unknown_rules_warned());
    }

    #[test]
    fn test_evict_clears_caches() {
        let params = small_window_params();
        let mut index = BlockIndex::new();
        let ids = build(&mut index, std::iter::repeat(2).take(25));
        let mut vb = VersionBits::new(&params);
        vb.next_block_version(&params, &index, Some(ids[24])).unwrap();

        let hash = index.node(ids[19]).hash;
        assert!(vb.deployment_caches[0].lookup(&hash).is_some());
        vb.evict(&hash);
        assert!(vb.deployment_caches[0].lookup(&hash).is_none());
    }
}
