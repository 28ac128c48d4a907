// ---------------------------------------------------------------------------
// TagSpace — fixed, ordered tag vocabulary
// ---------------------------------------------------------------------------
//
// Built once from the full candidate tag set: sorted lexicographically and
// deduplicated, so index assignment is reproducible across restarts. Never
// mutated afterwards; tags outside the space are a soft error at the call
// sites that encounter them.
// ---------------------------------------------------------------------------

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TagSpace {
	tags: Vec<String>,
	index: HashMap<String, usize>,
}

impl TagSpace {
	/// Build the vocabulary from an arbitrary tag collection.
	/// Ordering is lexicographic; duplicates collapse to one entry.
	pub fn new<I, S>(tags: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut tags: Vec<String> = tags.into_iter().map(Into::into).collect();
		tags.sort();
		tags.dedup();

		let index = tags
			.iter()
			.enumerate()
			.map(|(i, tag)| (tag.clone(), i))
			.collect();

		Self { tags, index }
	}

	pub fn len(&self) -> usize {
		self.tags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.tags.is_empty()
	}

	/// Stable index of a tag, or `None` for tags outside the vocabulary.
	pub fn index_of(&self, tag: &str) -> Option<usize> {
		self.index.get(tag).copied()
	}

	pub fn tag_at(&self, index: usize) -> Option<&str> {
		self.tags.get(index).map(String::as_str)
	}

	/// All tags in vocabulary (index) order.
	pub fn tags(&self) -> &[String] {
		&self.tags
	}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ordering_is_lexicographic_and_deduplicated() {
		let space = TagSpace::new(["mountain", "beach", "desert", "beach"]);
		assert_eq!(space.len(), 3);
		assert_eq!(space.tags(), &["beach", "desert", "mountain"]);
	}

	#[test]
	fn index_is_bijective() {
		let space = TagSpace::new(["forest", "beach", "desert"]);
		for i in 0..space.len() {
			let tag = space.tag_at(i).unwrap();
			assert_eq!(space.index_of(tag), Some(i));
		}
	}

	#[test]
	fn construction_is_order_independent() {
		let a = TagSpace::new(["beach", "desert", "forest"]);
		let b = TagSpace::new(["forest", "beach", "desert"]);
		assert_eq!(a.tags(), b.tags());
	}

	#[test]
	fn unknown_tag_returns_none() {
		let space = TagSpace::new(["beach"]);
		assert_eq!(space.index_of("volcano"), None);
		assert!(space.tag_at(5).is_none());
	}

	#[test]
	fn empty_space() {
		let space = TagSpace::new(Vec::<String>::new());
		assert!(space.is_empty());
		assert_eq!(space.len(), 0);
	}
}
