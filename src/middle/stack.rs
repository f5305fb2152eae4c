//! Shadow operand stack
//!
//! A persistent list of the tags on the runtime operand stack. Pushing
//! and popping share structure, so snapshots taken at branch points and
//! loop frames are cheap clones.

use crate::middle::ir::Tag;
use std::rc::Rc;

#[derive(Debug)]
struct Node {
    tag: Tag,
    below: ShadowStack,
    depth: usize,
}

/// Compile-time image of the operand stack
#[derive(Debug, Clone, Default)]
pub struct ShadowStack(Option<Rc<Node>>);

impl ShadowStack {
    pub fn new() -> Self {
        Self(None)
    }

    pub fn depth(&self) -> usize {
        self.0.as_ref().map_or(0, |n| n.depth)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn top(&self) -> Option<&Tag> {
        self.0.as_ref().map(|n| &n.tag)
    }

    pub fn push(&self, tag: Tag) -> ShadowStack {
        let depth = self.depth() + 1;
        ShadowStack(Some(Rc::new(Node { tag, below: self.clone(), depth })))
    }

    /// The stack without its top entry
    pub fn pop(&self) -> Option<ShadowStack> {
        self.0.as_ref().map(|n| n.below.clone())
    }

    /// Tags from the top down
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        let mut current = self.0.as_deref();
        std::iter::from_fn(move || {
            let node = current?;
            current = node.below.0.as_deref();
            Some(&node.tag)
        })
    }

    /// True if both stacks hold the same tags
    pub fn same_shape(&self, other: &ShadowStack) -> bool {
        self.depth() == other.depth() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_push_pop_share_structure() {
        let empty = ShadowStack::new();
        let one = empty.push(Tag::I32);
        let two = one.push(Tag::Ref);

        assert_eq!(empty.depth(), 0);
        assert_eq!(two.depth(), 2);
        assert_eq!(two.top(), Some(&Tag::Ref));

        let popped = two.pop().unwrap();
        assert!(popped.same_shape(&one));
        // The snapshot is untouched
        assert_eq!(two.depth(), 2);
        assert!(empty.pop().is_none());
    }

    #[test]
    fn test_iter_top_down() {
        let s = ShadowStack::new().push(Tag::I32).push(Tag::Float).push(Tag::I1);
        let tags: Vec<&Tag> = s.iter().collect();
        assert_eq!(tags, vec![&Tag::I1, &Tag::Float, &Tag::I32]);
        assert!(!s.same_shape(&ShadowStack::new().push(Tag::I1)));
    }
}
