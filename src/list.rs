use std::{marker::PhantomData, ptr::NonNull};


/// Non-null pointer to `T`.
pub(crate) type Link<T> = Option<NonNull<T>>;

/// Pair of links embedded by value inside the owner.
///
/// An owner can be a member of several lists at once as long as each
/// membership has its own `Links` field. The list never allocates: it only
/// rewires the links of nodes that already live somewhere in memory (for us,
/// block headers written inside mapped regions).
pub(crate) struct Links<T> {
    /// Previous owner in the list
    pub prev: Link<T>,
    /// Next owner in the list
    pub next: Link<T>,
}

impl<T> Links<T> {
    pub const fn new() -> Self {
        Self { prev: None, next: None }
    }
}

/// Selects which embedded [`Links`] a [`List`] threads through.
///
/// This replaces the classic `container_of` trick: instead of going from a
/// link back to its owner by subtracting a field offset, the list stores
/// owner pointers and asks the adapter where the owner keeps its links.
pub(crate) trait Adapter {
    type Owner;

    /// Returns the links of `owner` used by this list.
    ///
    /// **SAFETY**: `owner` must point to a live, properly initialised owner.
    unsafe fn links(owner: NonNull<Self::Owner>) -> NonNull<Links<Self::Owner>>;
}

/// Intrusive doubly linked list.
///
/// Every operation is O(1) except the range forms, which are O(run) because
/// they count the nodes they move. Removing a node that is not a member of
/// this list corrupts both lists, so callers must track membership.
pub(crate) struct List<A: Adapter> {
    head: Link<A::Owner>,
    tail: Link<A::Owner>,
    len: usize,
    marker: PhantomData<A>,
}

pub(crate) struct Iter<'a, A: Adapter> {
    current: Link<A::Owner>,
    remaining: usize,
    marker: PhantomData<&'a List<A>>,
}

#[inline]
unsafe fn links_of<A: Adapter>(node: NonNull<A::Owner>) -> *mut Links<A::Owner> {
    unsafe { A::links(node).as_ptr() }
}

impl<A: Adapter> List<A> {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
            marker: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link<A::Owner> {
        self.head
    }

    #[cfg(test)]
    #[inline]
    pub fn last(&self) -> Link<A::Owner> {
        self.tail
    }

    #[cfg(test)]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Successor of `node` in this list.
    ///
    /// **SAFETY**: `node` must be a member of this list.
    #[inline]
    pub unsafe fn next(&self, node: NonNull<A::Owner>) -> Link<A::Owner> {
        unsafe { (*links_of::<A>(node)).next }
    }

    /// Predecessor of `node` in this list.
    ///
    /// **SAFETY**: `node` must be a member of this list.
    #[inline]
    pub unsafe fn prev(&self, node: NonNull<A::Owner>) -> Link<A::Owner> {
        unsafe { (*links_of::<A>(node)).prev }
    }

    /// Appends `node` at the tail of the list.
    ///
    /// **SAFETY**: `node` must be valid and not already a member of this list.
    pub unsafe fn push_back(&mut self, node: NonNull<A::Owner>) {
        unsafe { self.insert_before(None, node) }
    }

    /// Links `node` right before `before`, or at the tail when `before` is
    /// `None` (the end of the list plays the role of a sentinel).
    ///
    /// **SAFETY**: `before` must be a member of this list and `node` must not.
    pub unsafe fn insert_before(&mut self, before: Link<A::Owner>, node: NonNull<A::Owner>) {
        unsafe { self.splice_before(before, node, node, 1) }
    }

    /// Links `node` right after `after`.
    ///
    /// **SAFETY**: `after` must be a member of this list and `node` must not.
    pub unsafe fn insert_after(&mut self, after: NonNull<A::Owner>, node: NonNull<A::Owner>) {
        unsafe {
            let before = self.next(after);
            self.insert_before(before, node);
        }
    }

    /// Links the chain `first..=last` right before `before` (tail if `None`).
    ///
    /// The chain must already be linked internally through `next`/`prev`, as
    /// it is after [`List::unlink_range`]. `count` is the number of nodes in it.
    ///
    /// **SAFETY**: the chain must be a valid detached run of `count` nodes.
    pub unsafe fn splice_before(
        &mut self,
        before: Link<A::Owner>,
        first: NonNull<A::Owner>,
        last: NonNull<A::Owner>,
        count: usize,
    ) {
        unsafe {
            let prev = match before {
                Some(before) => (*links_of::<A>(before)).prev,
                None => self.tail,
            };

            (*links_of::<A>(first)).prev = prev;
            (*links_of::<A>(last)).next = before;

            match prev {
                Some(prev) => (*links_of::<A>(prev)).next = Some(first),
                None => self.head = Some(first),
            }

            match before {
                Some(before) => (*links_of::<A>(before)).prev = Some(last),
                None => self.tail = Some(last),
            }
        }

        self.len += count;
    }

    /// Unlinks `node` using only its own links.
    ///
    /// **SAFETY**: `node` must be a member of this list.
    pub unsafe fn remove(&mut self, node: NonNull<A::Owner>) {
        unsafe {
            self.unlink_range(node, node);
        }
    }

    /// Detaches the run `first..=last` and returns how many nodes it held.
    /// The run keeps its internal links so it can be spliced elsewhere.
    ///
    /// **SAFETY**: `first..=last` must be a contiguous run of this list.
    pub unsafe fn unlink_range(&mut self, first: NonNull<A::Owner>, last: NonNull<A::Owner>) -> usize {
        unsafe {
            let mut count = 1;
            let mut current = first;
            while current != last {
                current = (*links_of::<A>(current))
                    .next
                    .expect("range end is not reachable from its start");
                count += 1;
            }

            let prev = (*links_of::<A>(first)).prev;
            let next = (*links_of::<A>(last)).next;

            match prev {
                Some(prev) => (*links_of::<A>(prev)).next = next,
                None => self.head = next,
            }

            match next {
                Some(next) => (*links_of::<A>(next)).prev = prev,
                None => self.tail = prev,
            }

            (*links_of::<A>(first)).prev = None;
            (*links_of::<A>(last)).next = None;

            self.len -= count;
            count
        }
    }

    pub fn iter(&self) -> Iter<'_, A> {
        Iter {
            current: self.head,
            remaining: self.len,
            marker: PhantomData,
        }
    }
}

impl<'a, A: Adapter> Iterator for Iter<'a, A> {
    type Item = NonNull<A::Owner>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = (*links_of::<A>(node)).next;
        }
        self.remaining -= 1;

        Some(node)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<'a, A: Adapter> IntoIterator for &'a List<A> {
    type Item = NonNull<A::Owner>;
    type IntoIter = Iter<'a, A>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
