use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::protocol::DataType;

/// Selects one of the two exchange tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Data this side serves to PULL requests
    Outbound,
    /// Data pushed by the peer
    Inbound,
}

#[derive(Debug, Default)]
struct Tables {
    outbound: HashMap<DataType, Vec<u8>>,
    inbound: HashMap<DataType, Vec<u8>>,
}

impl Tables {
    fn get_mut(&mut self, table: Table) -> &mut HashMap<DataType, Vec<u8>> {
        match table {
            Table::Outbound => &mut self.outbound,
            Table::Inbound => &mut self.inbound,
        }
    }
}

/// Per-session exchange tables shared between the application and the I/O loop.
///
/// Every key holds only its latest value.
#[derive(Debug, Default)]
pub struct ExchangeStore {
    tables: Mutex<Tables>,
}

impl ExchangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_outbound(&self, data_type: DataType, payload: Vec<u8>) {
        self.lock().outbound.insert(data_type, payload);
    }

    pub fn outbound(&self, data_type: DataType) -> Option<Vec<u8>> {
        self.lock().outbound.get(&data_type).cloned()
    }

    /// Store a pushed payload, returning the unread value it replaced
    pub fn store_inbound(&self, data_type: DataType, payload: Vec<u8>) -> Option<Vec<u8>> {
        self.lock().inbound.insert(data_type, payload)
    }

    pub fn read_inbound(&self, data_type: DataType, remove: bool) -> Option<Vec<u8>> {
        let mut tables = self.lock();
        if remove {
            tables.inbound.remove(&data_type)
        } else {
            tables.inbound.get(&data_type).cloned()
        }
    }

    pub fn contains(&self, data_type: DataType, table: Table) -> bool {
        self.lock().get_mut(table).contains_key(&data_type)
    }

    pub fn clear(&self, data_type: DataType, table: Table) -> Option<Vec<u8>> {
        self.lock().get_mut(table).remove(&data_type)
    }
}
