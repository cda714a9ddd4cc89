//! Batch planning
//!
//! Partitions the VM set into batches for the worker pool. Every strategy
//! returns each input VM in exactly one batch.

use crate::constants::MAX_BATCHES_PER_WORKER;
use crate::models::InventoryObject;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How VMs are distributed across batches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Contiguous chunks in input order
    RoundRobin,
    /// Powered-on and other VMs spread evenly across batches
    PowerStateBalanced,
    /// VMs sorted by estimated cost and dealt across batches
    ComplexityBalanced,
}

impl Strategy {
    pub const NAMES: [&'static str; 3] =
        ["round-robin", "power-state-balanced", "complexity-balanced"];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::RoundRobin => "round-robin",
            Strategy::PowerStateBalanced => "power-state-balanced",
            Strategy::ComplexityBalanced => "complexity-balanced",
        };
        f.write_str(name)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Ok(Strategy::RoundRobin),
            "power-state-balanced" | "powerstatebalanced" => Ok(Strategy::PowerStateBalanced),
            "complexity-balanced" | "complexitybalanced" => Ok(Strategy::ComplexityBalanced),
            other => Err(format!(
                "Unknown strategy '{}'. Expected one of: {}",
                other,
                Strategy::NAMES.join(", ")
            )),
        }
    }
}

/// A group of VMs processed by one worker
#[derive(Debug, Clone)]
pub struct Batch {
    pub id: usize,
    pub vms: Vec<InventoryObject>,
    /// Sum of the VMs' complexity scores
    pub complexity: f64,
}

impl Batch {
    fn new(id: usize, vms: Vec<InventoryObject>) -> Self {
        let complexity = vms.iter().map(complexity_score).sum();
        Self { id, vms, complexity }
    }

    pub fn len(&self) -> usize {
        self.vms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vms.is_empty()
    }
}

/// Estimated processing cost of one VM
pub fn complexity_score(vm: &InventoryObject) -> f64 {
    let power = if vm.is_powered_on() { 0.5 } else { 0.0 };
    1.0 + power + 0.1 * vm.tags.len() as f64
}

/// Split `vms` into batches of roughly `batch_size` using `strategy`
pub fn plan(vms: Vec<InventoryObject>, batch_size: usize, strategy: Strategy) -> Vec<Batch> {
    if vms.is_empty() {
        return Vec::new();
    }
    let batch_size = batch_size.max(1);
    let total_batches = vms.len().div_ceil(batch_size);

    let groups = match strategy {
        Strategy::RoundRobin => chunk(vms, batch_size),
        Strategy::PowerStateBalanced => power_state_balanced(vms, total_batches),
        Strategy::ComplexityBalanced => complexity_balanced(vms, total_batches),
    };

    groups
        .into_iter()
        .filter(|group| !group.is_empty())
        .enumerate()
        .map(|(id, group)| Batch::new(id + 1, group))
        .collect()
}

fn chunk(vms: Vec<InventoryObject>, size: usize) -> Vec<Vec<InventoryObject>> {
    let mut groups = Vec::new();
    let mut iter = vms.into_iter().peekable();
    while iter.peek().is_some() {
        groups.push(iter.by_ref().take(size).collect());
    }
    groups
}

fn power_state_balanced(vms: Vec<InventoryObject>, total_batches: usize) -> Vec<Vec<InventoryObject>> {
    let (on, other): (Vec<_>, Vec<_>) = vms.into_iter().partition(InventoryObject::is_powered_on);
    let on_share = on.len().div_ceil(total_batches).max(1);
    let other_share = other.len().div_ceil(total_batches).max(1);

    let mut on = on.into_iter();
    let mut other = other.into_iter();
    let mut groups: Vec<Vec<InventoryObject>> = (0..total_batches)
        .map(|_| {
            let mut group: Vec<_> = on.by_ref().take(on_share).collect();
            group.extend(other.by_ref().take(other_share));
            group
        })
        .collect();

    // Shares are rounded up, so nothing should remain; keep any leftovers
    let rest: Vec<_> = on.chain(other).collect();
    if !rest.is_empty() {
        groups.push(rest);
    }
    groups
}

fn complexity_balanced(vms: Vec<InventoryObject>, total_batches: usize) -> Vec<Vec<InventoryObject>> {
    let mut scored: Vec<(f64, InventoryObject)> =
        vms.into_iter().map(|vm| (complexity_score(&vm), vm)).collect();
    scored.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut groups: Vec<Vec<InventoryObject>> = vec![Vec::new(); total_batches];
    for (index, (_, vm)) in scored.into_iter().enumerate() {
        groups[index % total_batches].push(vm);
    }
    groups
}

/// Batch size and strategy suited to an inventory of `total_vms`
///
/// The number of batches never exceeds `MAX_BATCHES_PER_WORKER` per
/// thread; the batch size grows instead.
pub fn recommend_settings(total_vms: usize, max_threads: usize) -> (usize, Strategy) {
    let threads = max_threads.max(1);
    let (base_size, strategy) = if total_vms < 100 {
        (10, Strategy::RoundRobin)
    } else if total_vms > 500 {
        (50, Strategy::ComplexityBalanced)
    } else {
        (25, Strategy::PowerStateBalanced)
    };

    let max_batches = threads * MAX_BATCHES_PER_WORKER;
    let size = base_size.max(total_vms.div_ceil(max_batches));
    (size.max(1), strategy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PowerState;
    use std::collections::BTreeSet;

    fn inventory(count: usize) -> Vec<InventoryObject> {
        (0..count)
            .map(|i| {
                let power = if i % 3 == 0 {
                    PowerState::PoweredOff
                } else {
                    PowerState::PoweredOn
                };
                let mut vm = InventoryObject::vm(format!("vm-{i}"), format!("VM{i:04}"), power);
                for t in 0..(i % 4) {
                    vm = vm.with_tag("App", &format!("T{t}"));
                }
                vm
            })
            .collect()
    }

    fn assert_complete(input: &[InventoryObject], batches: &[Batch]) {
        let expected: BTreeSet<&str> = input.iter().map(|vm| vm.id.as_str()).collect();
        let planned: Vec<&str> = batches
            .iter()
            .flat_map(|b| b.vms.iter().map(|vm| vm.id.as_str()))
            .collect();
        assert_eq!(planned.len(), input.len(), "duplicates or omissions");
        assert_eq!(planned.into_iter().collect::<BTreeSet<_>>(), expected);
        assert!(batches.iter().all(|b| !b.is_empty()));
    }

    #[test]
    fn test_every_strategy_covers_input_exactly() {
        let strategies = [
            Strategy::RoundRobin,
            Strategy::PowerStateBalanced,
            Strategy::ComplexityBalanced,
        ];
        for count in [1, 2, 7, 10, 33, 100, 257] {
            for size in [1, 3, 10, 50, 500] {
                for strategy in strategies {
                    let vms = inventory(count);
                    let batches = plan(vms.clone(), size, strategy);
                    assert_complete(&vms, &batches);
                }
            }
        }
    }

    #[test]
    fn test_empty_input_plans_nothing() {
        assert!(plan(Vec::new(), 10, Strategy::RoundRobin).is_empty());
    }

    #[test]
    fn test_round_robin_keeps_input_order() {
        let batches = plan(inventory(7), 3, Strategy::RoundRobin);
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[1].vms[0].id, "vm-3");
        assert_eq!(batches[0].id, 1);
    }

    #[test]
    fn test_power_state_balanced_spreads_powered_on() {
        let batches = plan(inventory(30), 10, Strategy::PowerStateBalanced);
        assert_eq!(batches.len(), 3);
        for batch in &batches {
            let on = batch.vms.iter().filter(|vm| vm.is_powered_on()).count();
            assert!((6..=7).contains(&on), "unbalanced batch: {on} powered on");
        }
    }

    #[test]
    fn test_complexity_balanced_spreads_cost() {
        let batches = plan(inventory(40), 10, Strategy::ComplexityBalanced);
        let costs: Vec<f64> = batches.iter().map(|b| b.complexity).collect();
        let max = costs.iter().cloned().fold(f64::MIN, f64::max);
        let min = costs.iter().cloned().fold(f64::MAX, f64::min);
        assert!(max - min < 2.0, "costs too uneven: {costs:?}");
    }

    #[test]
    fn test_complexity_score() {
        let vm = InventoryObject::vm("vm-1", "A", PowerState::PoweredOn)
            .with_tag("App", "X")
            .with_tag("App", "Y");
        assert!((complexity_score(&vm) - 1.7).abs() < 1e-9);
        let off = InventoryObject::vm("vm-2", "B", PowerState::PoweredOff);
        assert!((complexity_score(&off) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_recommend_settings() {
        assert_eq!(recommend_settings(50, 4), (10, Strategy::RoundRobin));
        assert_eq!(recommend_settings(300, 4), (25, Strategy::PowerStateBalanced));
        assert_eq!(recommend_settings(600, 10), (50, Strategy::ComplexityBalanced));

        // 5000 VMs on 2 threads: at most 8 batches
        let (size, strategy) = recommend_settings(5000, 2);
        assert_eq!(strategy, Strategy::ComplexityBalanced);
        assert_eq!(size, 625);
        assert!(5000usize.div_ceil(size) <= 8);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("round-robin".parse::<Strategy>().unwrap(), Strategy::RoundRobin);
        assert_eq!("PowerStateBalanced".parse::<Strategy>().unwrap(), Strategy::PowerStateBalanced);
        assert_eq!("complexity_balanced".parse::<Strategy>().unwrap(), Strategy::ComplexityBalanced);
        assert!("random".parse::<Strategy>().is_err());
    }
}
