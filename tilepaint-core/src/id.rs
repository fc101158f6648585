//! # IDs
//! Layers, stores, and store generations all need identities that outlive moves and clones.
//! This is implemented in this module via the `FuzzID<T>` type, which generates unique IDs
//! namespaced by the type T. Order of IDs is not guaranteed.
//!
//! To get a process unique ID, simply use `FuzzID<YourNamespaceTy>`'s `Default` impl.

// Next available ID, by namespace. Only touched on allocation, so contention is a non-issue.
static ID_SERVER: parking_lot::Mutex<Option<hashbrown::HashMap<std::any::TypeId, u64>>> =
    parking_lot::const_mutex(None);

/// ID that is guarunteed unique within this execution of the program.
/// IDs with different types may share a value but should not be considered equal.
pub struct FuzzID<T: std::any::Any> {
    id: std::num::NonZeroU64,
    // Namespace marker
    _phantom: std::marker::PhantomData<fn() -> T>,
}
impl<T: std::any::Any> Clone for FuzzID<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T: std::any::Any> Copy for FuzzID<T> {}
impl<T: std::any::Any> PartialEq for FuzzID<T> {
    fn eq(&self, other: &Self) -> bool {
        // Namespace already checked at compile time.
        self.id == other.id
    }
}
impl<T: std::any::Any> Eq for FuzzID<T> {}
impl<T: std::any::Any> std::hash::Hash for FuzzID<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: std::any::Any> FuzzID<T> {
    /// Get the raw numeric value of this ID.
    /// IDs from differing namespaces may share the same numeric ID!
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id.get()
    }
    /// Allocate many IDs at once, with a single trip to the ID server.
    ///
    /// # Panics
    /// If the namespace has run out of IDs. At one billion allocations per second,
    /// that takes a few centuries.
    pub fn many(count: usize) -> impl ExactSizeIterator<Item = Self> {
        let count_u64 = count as u64;
        let start = {
            let mut server = ID_SERVER.lock();
            let next = server
                .get_or_insert_with(hashbrown::HashMap::new)
                .entry(std::any::TypeId::of::<T>())
                // ID of zero is invalid, start at one.
                .or_insert(1);
            let start = *next;
            let Some(after) = start.checked_add(count_u64) else {
                log::error!("{} ID overflow!", std::any::type_name::<T>());
                panic!("{} ID overflow!", std::any::type_name::<T>());
            };
            *next = after;
            start
        };
        (0..count).map(move |idx| {
            // Non-zero: start >= 1, and the range was checked for overflow above.
            let id = std::num::NonZeroU64::new(start + idx as u64).unwrap();
            FuzzID {
                id,
                _phantom: std::marker::PhantomData,
            }
        })
    }
}
impl<T: std::any::Any> Default for FuzzID<T> {
    fn default() -> Self {
        // Always yields exactly one.
        Self::many(1).next().unwrap()
    }
}
impl<T: std::any::Any> std::fmt::Display for FuzzID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // rsplit always yields at least one element, even for empty strings.
        let name = std::any::type_name::<T>().rsplit("::").next().unwrap_or("?");
        write!(f, "{name}#{}", self.id)
    }
}
impl<T: std::any::Any> std::fmt::Debug for FuzzID<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <FuzzID<T> as std::fmt::Display>::fmt(self, f)
    }
}
