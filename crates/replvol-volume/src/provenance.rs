//! Run-length provenance descriptors returned by reads

/// A run of bytes produced by the same write generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvenanceExtent {
    pub io_num: u64,
    /// Bytes of the read range covered by this run
    pub length: u64,
}

/// Ordered, merged provenance of a read range
///
/// Adjacent runs never share an `io_num`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceList {
    extents: Vec<ProvenanceExtent>,
}

impl ProvenanceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `length` bytes written by `io_num`, extending the last run when
    /// it carries the same value
    pub fn push(&mut self, io_num: u64, length: u64) {
        match self.extents.last_mut() {
            Some(last) if last.io_num == io_num => last.length += length,
            _ => self.extents.push(ProvenanceExtent { io_num, length }),
        }
    }

    pub fn extents(&self) -> &[ProvenanceExtent] {
        &self.extents
    }

    pub fn len(&self) -> usize {
        self.extents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extents.is_empty()
    }

    /// Sum of all run lengths
    pub fn total_len(&self) -> u64 {
        self.extents.iter().map(|e| e.length).sum()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProvenanceExtent> {
        self.extents.iter()
    }
}

impl IntoIterator for ProvenanceList {
    type Item = ProvenanceExtent;
    type IntoIter = std::vec::IntoIter<ProvenanceExtent>;

    fn into_iter(self) -> Self::IntoIter {
        self.extents.into_iter()
    }
}

impl<'a> IntoIterator for &'a ProvenanceList {
    type Item = &'a ProvenanceExtent;
    type IntoIter = std::slice::Iter<'a, ProvenanceExtent>;

    fn into_iter(self) -> Self::IntoIter {
        self.extents.iter()
    }
}
