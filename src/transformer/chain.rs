//! A built chain of revisions to visit between two endpoints.

use crate::rid::Rid;

/// The ordered sequence of revisions to walk from one endpoint to
/// another, inclusive of both. Direction is implicit in the order: a
/// chain from an older to a newer revision walks forward through the
/// intervening timeline, and vice versa. Built once by
/// `TransformerEngine::build_chain` and reused for both the request and
/// (reversed) response legs of a transform.
#[derive(Debug, Clone)]
pub struct TransformerChain {
    versions: Vec<Rid>,
}

impl TransformerChain {
    pub fn new(versions: Vec<Rid>) -> Self {
        Self { versions }
    }

    pub fn empty(at: Rid) -> Self {
        Self { versions: vec![at] }
    }

    pub fn from(&self) -> &Rid {
        self.versions.first().expect("chain is never empty of versions")
    }

    pub fn to(&self) -> &Rid {
        self.versions.last().expect("chain is never empty of versions")
    }

    pub fn versions(&self) -> &[Rid] {
        &self.versions
    }

    /// Adjacent (u, v) pairs to visit in order.
    pub fn steps(&self) -> impl Iterator<Item = (&Rid, &Rid)> {
        self.versions.windows(2).map(|w| (&w[0], &w[1]))
    }

    /// Number of adjacency hops (0 for a same-revision chain).
    pub fn len(&self) -> usize {
        self.versions.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
