//! Core data types shared across the dispatch pipeline (`spec.md` §3).

/// Total number of resource types the table is sized for.
///
/// `spec.md` describes this as "a finite closed set: Timer, GPIO, Sensor;
/// extensible by table size" — the table size is this constant.
pub const RESOURCE_TYPE_COUNT: usize = 3;

/// Resource-type tag, shared by events, dispatchers, and resource counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Timer,
    Gpio,
    Sensor,
}

impl ResourceType {
    /// All variants, in table-index order.
    pub const ALL: [ResourceType; RESOURCE_TYPE_COUNT] =
        [ResourceType::Timer, ResourceType::Gpio, ResourceType::Sensor];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            ResourceType::Timer => 0,
            ResourceType::Gpio => 1,
            ResourceType::Sensor => 2,
        }
    }

    /// Reverse of [`ResourceType::index`]; `None` for an out-of-range tag.
    ///
    /// Event records travel as raw `u32` tags (POD, byte-wise queueable per
    /// §3), so anything read back off the wire must be revalidated here
    /// before it is trusted as a table index.
    #[inline]
    pub fn from_index(idx: u32) -> Option<ResourceType> {
        match idx {
            0 => Some(ResourceType::Timer),
            1 => Some(ResourceType::Gpio),
            2 => Some(ResourceType::Sensor),
            _ => None,
        }
    }
}

/// Opaque module handle. Equality is by identity, matching §3's "equality by
/// handle" invariant for the guest module context.
///
/// `Core::register_module` derives this from [`crate::runtime::ModuleRef::identity`]
/// (the address of the guest-owned value the embedder passed in), so two
/// registrations of the same guest module instance produce the same
/// `ModuleId`; `ocre-core` never looks inside the value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u64);

impl ModuleId {
    pub const fn from_raw(raw: u64) -> Self {
        ModuleId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Fixed-size, plain-old-data event record as it travels through the queue
/// (`spec.md` §3). Only a subset of fields is live per `kind`; the rest are
/// zero-filled.
///
/// Carries `owner` per the §9 redesign: target selection is the event's own
/// field, populated by the producer at post time, rather than read off the
/// dispatching worker's ambient "current module" pointer.
#[derive(Debug, Clone, Copy)]
pub struct EventRecord {
    pub kind: ResourceType,
    pub owner: ModuleId,
    pub id: u32,
    pub port: u32,
    pub state: u32,
}

/// Producer-facing event, one variant per resource type, each carrying the
/// owning module. Converts to the flat [`EventRecord`] at `post_event` time —
/// the Rust-idiomatic analogue of the original's `ocre_event_t` tagged union
/// being flattened into `wasm_event_t`.
#[derive(Debug, Clone, Copy)]
pub enum PostedEvent {
    Timer { owner: ModuleId, id: u32 },
    Gpio { owner: ModuleId, id: u32, state: u32 },
    Sensor { owner: ModuleId, id: u32, port: u32, state: u32 },
}

impl PostedEvent {
    pub fn owner(&self) -> ModuleId {
        match *self {
            PostedEvent::Timer { owner, .. } => owner,
            PostedEvent::Gpio { owner, .. } => owner,
            PostedEvent::Sensor { owner, .. } => owner,
        }
    }
}

impl From<PostedEvent> for EventRecord {
    fn from(ev: PostedEvent) -> Self {
        match ev {
            PostedEvent::Timer { owner, id } => EventRecord {
                kind: ResourceType::Timer,
                owner,
                id,
                port: 0,
                state: 0,
            },
            PostedEvent::Gpio { owner, id, state } => EventRecord {
                kind: ResourceType::Gpio,
                owner,
                id,
                port: 0,
                state,
            },
            PostedEvent::Sensor { owner, id, port, state } => EventRecord {
                kind: ResourceType::Sensor,
                owner,
                id,
                port,
                state,
            },
        }
    }
}
