use std::sync::atomic::{AtomicU16, Ordering};

use super::PoolableConnection;

static IDENT: AtomicU16 = AtomicU16::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MockConnectionId(u16);

#[derive(Debug)]
pub(crate) struct MockConnection {
    open: bool,
    ident: MockConnectionId,
}

impl MockConnection {
    fn new(open: bool) -> Self {
        Self {
            open,
            ident: MockConnectionId(IDENT.fetch_add(1, Ordering::SeqCst)),
        }
    }

    pub(crate) fn open() -> Self {
        Self::new(true)
    }

    pub(crate) fn closed() -> Self {
        Self::new(false)
    }

    pub(crate) fn id(&self) -> MockConnectionId {
        self.ident
    }
}

impl PoolableConnection for MockConnection {
    fn is_open(&self) -> bool {
        self.open
    }
}
