// Agreement - Pure predicates behind the sync barriers

use crate::rpc::{ChainTip, RpcError};
use std::collections::BTreeSet;
use std::fmt::Display;

/// All tips identical in height and hash; an empty set never agrees
pub fn tips_agree(tips: &[ChainTip]) -> bool {
    match tips.split_first() {
        Some((first, rest)) => rest.iter().all(|t| t == first),
        None => false,
    }
}

/// All pools contain exactly the same hashes; an empty set never agrees
pub fn mempools_agree(pools: &[BTreeSet<String>]) -> bool {
    match pools.split_first() {
        Some((first, rest)) => rest.iter().all(|p| p == first),
        None => false,
    }
}

/// Every observation succeeded
pub fn collect_ok<T: Clone>(observations: &[Result<T, RpcError>]) -> Option<Vec<T>> {
    observations.iter().map(|o| o.as_ref().ok().cloned()).collect()
}

/// One line per node, for timeout reports
pub fn describe<T: Display>(indices: &[usize], observations: &[Result<T, RpcError>]) -> String {
    indices
        .iter()
        .zip(observations)
        .map(|(i, o)| match o {
            Ok(value) => format!("node{}: {}", i, value),
            Err(e) => format!("node{}: error ({})", i, e),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Mempool summary for reports
pub struct PoolView<'a>(pub &'a BTreeSet<String>);

impl Display for PoolView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} pending", self.0.len())?;
        if !self.0.is_empty() {
            let shown: Vec<&str> = self.0.iter().take(3).map(|h| h.as_str()).collect();
            write!(f, " [{}{}]", shown.join(" "), if self.0.len() > 3 { " ..." } else { "" })?;
        }
        Ok(())
    }
}
