use crate::pool::PoolSlice;

/// Pool bytes accounted for every stored field record.
///
/// Records are charged from the end of the pool, so a request with many fields runs out
/// of pool space the same way one with long fields does.
pub(crate) const FIELD_RECORD_SIZE: usize = 4 * size_of::<usize>();

/// Origin of a request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Header,
    /// A field of the trailer section of a chunked request.
    Footer,
    Cookie,
    /// A `name[=value]` pair of the query string.
    GetArgument,
}

/// One `(kind, name, value)` entry of a request, both strings stored in the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Field {
    pub kind: FieldKind,
    pub name: PoolSlice,
    /// `None` only for query arguments without `=`.
    pub value: Option<PoolSlice>,
}

impl Field {
    pub fn new(kind: FieldKind, name: PoolSlice, value: Option<PoolSlice>) -> Self {
        Self { kind, name, value }
    }
}
