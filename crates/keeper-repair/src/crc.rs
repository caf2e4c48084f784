//! Grouping of replica metas by checksum and the majority vote over groups.

use keeper_types::ReplicaFileMeta;
use keeper_types::events::{ReplicaDetail, UndecidableReason};

/// Replica metas that reported the same checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcGroup {
    /// The shared checksum.
    pub crc: u32,
    /// Number of metas in the group.
    pub count: usize,
    /// The first meta seen with this checksum.
    pub meta: ReplicaFileMeta,
    /// Addresses of every member, in the order they were seen.
    pub addrs: Vec<String>,
}

impl CrcGroup {
    fn new(meta: &ReplicaFileMeta) -> Self {
        Self {
            crc: meta.crc,
            count: 1,
            meta: meta.clone(),
            addrs: vec![meta.addr.clone()],
        }
    }

    /// Breakdown line for this group, keyed by its representative address.
    pub fn detail(&self) -> ReplicaDetail {
        ReplicaDetail {
            addr: self.meta.addr.clone(),
            count: self.count,
            crc: self.crc,
            size: self.meta.size,
        }
    }
}

/// Group metas by checksum, keeping groups in first-seen order.
pub fn group_by_crc<'a, I>(metas: I) -> Vec<CrcGroup>
where
    I: IntoIterator<Item = &'a ReplicaFileMeta>,
{
    let mut groups: Vec<CrcGroup> = Vec::new();
    for meta in metas {
        match groups.iter_mut().find(|g| g.crc == meta.crc) {
            Some(group) => {
                group.count += 1;
                group.addrs.push(meta.addr.clone());
            }
            None => groups.push(CrcGroup::new(meta)),
        }
    }
    groups
}

/// Outcome of the majority vote over CRC groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrcVote {
    /// The group at this index strictly outnumbers every other group.
    Majority(usize),
    /// No group can be trusted over the others.
    Undecidable(UndecidableReason),
}

/// Pick the group with the highest count.
///
/// A top count of one (or no groups at all) means every replica disagrees.
/// A top count reached by more than one group is a tie and decides nothing.
pub fn vote(groups: &[CrcGroup]) -> CrcVote {
    let top = groups.iter().map(|g| g.count).max().unwrap_or(0);
    if top <= 1 {
        return CrcVote::Undecidable(UndecidableReason::AllDiffer);
    }

    let mut leaders = groups.iter().enumerate().filter(|(_, g)| g.count == top);
    match (leaders.next(), leaders.next()) {
        (Some((index, _)), None) => CrcVote::Majority(index),
        _ => CrcVote::Undecidable(UndecidableReason::TiedMajority),
    }
}
