// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::desc::{ImageDescNode, ImageId};
use crate::memmap::MemoryMap;
use log::debug;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("the image chain is empty")]
    Empty,
    #[error("the end-of-chain id cannot name an image")]
    SentinelId,
    #[error("{0} is described more than once")]
    DuplicateId(ImageId),
    #[error("{id} hands off to {next}, which is not in the chain")]
    DanglingNext { id: ImageId, next: ImageId },
    #[error("chain head {0} is not in the chain")]
    UnknownHead(ImageId),
    #[error("chain from {head} does not end within {limit} hand-offs")]
    NoTermination { head: ImageId, limit: usize },
    #[error("{0} is not reachable from the chain head")]
    Orphaned(ImageId),
    #[error("no memory region configured for {0}")]
    MissingRegion(ImageId),
    #[error("region for {0} is empty or larger than 4 GiB")]
    EmptyRegion(ImageId),
    #[error(
        "{id} loads at {load_base:#x} with max size {max_size:#x}, \
         but its region is {base:#x}..{limit:#x}"
    )]
    RegionMismatch {
        id: ImageId,
        load_base: u64,
        max_size: u32,
        base: u64,
        limit: u64,
    },
}

/// Supplies part of the image chain. Several providers together describe
/// the whole boot flow.
pub trait FragmentProvider {
    fn name(&self) -> &str;

    fn fragment(&self, map: &MemoryMap) -> Result<Vec<ImageDescNode>, ChainError>;
}

/// Collects chain fragments and turns them into an [`ImageChain`] once
/// they form a single well-formed path.
#[derive(Debug, Default)]
pub struct ChainBuilder {
    nodes: Vec<ImageDescNode>,
    head: Option<ImageId>,
}

impl ChainBuilder {
    pub fn new() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn register_chain_fragment<I>(&mut self, nodes: I) -> &mut ChainBuilder
    where
        I: IntoIterator<Item = ImageDescNode>,
    {
        self.nodes.extend(nodes);
        self
    }

    pub fn register_provider(
        &mut self,
        provider: &dyn FragmentProvider,
        map: &MemoryMap,
    ) -> Result<&mut ChainBuilder, ChainError> {
        let nodes = provider.fragment(map)?;
        debug!(
            "BL2: {} contributes {} image(s)",
            provider.name(),
            nodes.len()
        );
        Ok(self.register_chain_fragment(nodes))
    }

    /// Overrides the head. Without this the first registered node is the
    /// head.
    pub fn set_head(&mut self, id: ImageId) -> &mut ChainBuilder {
        self.head = Some(id);
        self
    }

    pub fn nodes(&self) -> &[ImageDescNode] {
        &self.nodes
    }

    /// Checks the registered nodes form exactly one path from the head to
    /// [`ImageId::INVALID`] and that every node matches its memory region.
    /// Returns the head.
    pub fn validate(&self, map: &MemoryMap) -> Result<ImageId, ChainError> {
        let first = self.nodes.first().ok_or(ChainError::Empty)?;

        let mut ids = HashSet::new();
        for node in &self.nodes {
            if node.id.is_sentinel() {
                return Err(ChainError::SentinelId);
            }
            if !ids.insert(node.id) {
                return Err(ChainError::DuplicateId(node.id));
            }
            check_region(node, map)?;
        }

        for node in &self.nodes {
            if !node.next.is_sentinel() && !ids.contains(&node.next) {
                return Err(ChainError::DanglingNext {
                    id: node.id,
                    next: node.next,
                });
            }
        }

        let head = self.head.unwrap_or(first.id);
        if !ids.contains(&head) {
            return Err(ChainError::UnknownHead(head));
        }

        let limit = self.nodes.len();
        let mut visited = HashSet::new();
        let mut cur = head;
        while !cur.is_sentinel() {
            if visited.len() == limit || !visited.insert(cur) {
                return Err(ChainError::NoTermination { head, limit });
            }
            cur = self.find(cur).map(|n| n.next).unwrap_or(ImageId::INVALID);
        }

        if let Some(orphan) = self.nodes.iter().find(|n| !visited.contains(&n.id)) {
            return Err(ChainError::Orphaned(orphan.id));
        }

        Ok(head)
    }

    pub fn build(self, map: &MemoryMap) -> Result<ImageChain, ChainError> {
        let head = self.validate(map)?;
        Ok(ImageChain {
            nodes: self.nodes,
            head,
        })
    }

    fn find(&self, id: ImageId) -> Option<&ImageDescNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

fn check_region(node: &ImageDescNode, map: &MemoryMap) -> Result<(), ChainError> {
    let region = map
        .region(node.id)
        .ok_or(ChainError::MissingRegion(node.id))?;
    let size = region.size().ok_or(ChainError::EmptyRegion(node.id))?;
    if node.image.load_base != region.base || node.image.max_size != size {
        return Err(ChainError::RegionMismatch {
            id: node.id,
            load_base: node.image.load_base,
            max_size: node.image.max_size,
            base: region.base,
            limit: region.limit,
        });
    }
    Ok(())
}

/// A validated image chain. Only [`ChainBuilder::build`] creates one.
#[derive(Debug, Clone)]
pub struct ImageChain {
    nodes: Vec<ImageDescNode>,
    head: ImageId,
}

impl ImageChain {
    pub fn head(&self) -> ImageId {
        self.head
    }

    pub fn get(&self, id: ImageId) -> Option<&ImageDescNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in hand-off order starting at `start`. Empty if `start` is
    /// not part of the chain.
    pub fn walk(&self, start: ImageId) -> Walk<'_> {
        Walk {
            chain: self,
            cur: start,
            left: self.nodes.len(),
        }
    }
}

pub struct Walk<'a> {
    chain: &'a ImageChain,
    cur: ImageId,
    left: usize,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a ImageDescNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        let node = self.chain.get(self.cur)?;
        self.left -= 1;
        self.cur = node.next;
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memmap::Region;

    fn map(ids: &[u32]) -> MemoryMap {
        ids.iter().fold(MemoryMap::new(0x1000), |m, &id| {
            let base = u64::from(id) * 0x1_0000;
            m.with_region(ImageId(id), base, base + 0x8000)
        })
    }

    fn node(map: &MemoryMap, id: u32, next: ImageId) -> ImageDescNode {
        let region = map.region(ImageId(id)).copied().unwrap_or(Region::new(0, 0));
        ImageDescNode::new(ImageId(id), &region).next(next)
    }

    fn linear(map: &MemoryMap, ids: &[u32]) -> Vec<ImageDescNode> {
        ids.iter()
            .enumerate()
            .map(|(i, &id)| {
                let next = ids.get(i + 1).map_or(ImageId::INVALID, |&n| ImageId(n));
                node(map, id, next)
            })
            .collect()
    }

    #[test]
    fn linear_chain_walks_every_node_once() {
        let m = map(&[1, 2, 3, 4, 5]);
        let mut b = ChainBuilder::new();
        b.register_chain_fragment(linear(&m, &[3, 1]))
            .register_chain_fragment(linear(&m, &[5, 2, 4]));
        // Stitch the fragments together.
        b.nodes[1].next = ImageId(5);
        let chain = b.build(&m).unwrap();

        let order: Vec<_> = chain.walk(chain.head()).map(|n| n.id.0).collect();
        assert_eq!(order, vec![3, 1, 5, 2, 4]);
        let unique: HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), chain.len());
        assert_eq!(chain.walk(ImageId(2)).count(), 2);
        assert_eq!(chain.walk(ImageId(9)).count(), 0);
    }

    #[test]
    fn empty_chain_is_rejected() {
        assert_eq!(
            ChainBuilder::new().validate(&map(&[])),
            Err(ChainError::Empty)
        );
    }

    #[test]
    fn sentinel_and_duplicate_ids_are_rejected() {
        let m = map(&[1, 2]).with_region(ImageId::INVALID, 0, 0x10);
        let mut b = ChainBuilder::new();
        b.register_chain_fragment(linear(&m, &[1, 2]))
            .register_chain_fragment([node(&m, 0xFFFF_FFFF, ImageId::INVALID)]);
        assert_eq!(b.validate(&m), Err(ChainError::SentinelId));

        let mut b = ChainBuilder::new();
        b.register_chain_fragment(linear(&m, &[1, 2]))
            .register_chain_fragment(linear(&m, &[2]));
        assert_eq!(b.validate(&m), Err(ChainError::DuplicateId(ImageId(2))));
    }

    #[test]
    fn dangling_next_is_rejected() {
        let m = map(&[1, 2]);
        let mut b = ChainBuilder::new();
        b.register_chain_fragment([node(&m, 1, ImageId(2)), node(&m, 2, ImageId(7))]);
        assert_eq!(
            b.validate(&m),
            Err(ChainError::DanglingNext {
                id: ImageId(2),
                next: ImageId(7)
            })
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let m = map(&[1, 2, 3]);
        let mut b = ChainBuilder::new();
        b.register_chain_fragment([
            node(&m, 1, ImageId(2)),
            node(&m, 2, ImageId(3)),
            node(&m, 3, ImageId(1)),
        ]);
        assert_eq!(
            b.validate(&m),
            Err(ChainError::NoTermination {
                head: ImageId(1),
                limit: 3
            })
        );
    }

    #[test]
    fn unreachable_nodes_are_rejected() {
        let m = map(&[1, 2, 3]);
        let mut b = ChainBuilder::new();
        b.register_chain_fragment([
            node(&m, 1, ImageId(3)),
            node(&m, 2, ImageId(3)),
            node(&m, 3, ImageId::INVALID),
        ]);
        assert_eq!(b.validate(&m), Err(ChainError::Orphaned(ImageId(2))));

        let mut b = ChainBuilder::new();
        b.register_chain_fragment(linear(&m, &[1, 2, 3])).set_head(ImageId(2));
        assert_eq!(b.validate(&m), Err(ChainError::Orphaned(ImageId(1))));
        b.set_head(ImageId(8));
        assert_eq!(b.validate(&m), Err(ChainError::UnknownHead(ImageId(8))));
    }

    #[test]
    fn node_must_match_its_region() {
        let m = map(&[1, 2]);
        let mut bad = linear(&m, &[1, 2]);
        bad[1].image.max_size += 4;
        let mut b = ChainBuilder::new();
        b.register_chain_fragment(bad);
        assert_eq!(
            b.validate(&m),
            Err(ChainError::RegionMismatch {
                id: ImageId(2),
                load_base: 0x2_0000,
                max_size: 0x8004,
                base: 0x2_0000,
                limit: 0x2_8000,
            })
        );

        let mut b = ChainBuilder::new();
        b.register_chain_fragment(linear(&m, &[1, 2]));
        let missing = MemoryMap::new(0).with_region(ImageId(1), 0x1_0000, 0x1_8000);
        assert_eq!(b.validate(&missing), Err(ChainError::MissingRegion(ImageId(2))));

        let empty = map(&[1]).with_region(ImageId(2), 0x2_0000, 0x2_0000);
        assert_eq!(b.validate(&empty), Err(ChainError::EmptyRegion(ImageId(2))));
    }
}
