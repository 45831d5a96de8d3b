//! Most recently observed sample per tag.

use std::collections::HashMap;

use super::{Tag, TagSample};

/// Last-value cache. Holds at most one sample per tag, metadata included;
/// newer samples replace older ones unconditionally.
#[derive(Debug, Default)]
pub struct ValueCache {
    samples: HashMap<Tag, TagSample>,
}

impl ValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample` as the latest for `tag`.
    pub fn record(&mut self, tag: &Tag, sample: TagSample) {
        match self.samples.get_mut(tag) {
            Some(slot) => *slot = sample,
            None => {
                self.samples.insert(tag.clone(), sample);
            }
        }
    }

    pub fn latest(&self, tag: &Tag) -> Option<&TagSample> {
        self.samples.get(tag)
    }

    /// Drop the cached sample for `tag`, returning it if one existed.
    pub fn evict(&mut self, tag: &Tag) -> Option<TagSample> {
        self.samples.remove(tag)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.samples.contains_key(tag)
    }
}
