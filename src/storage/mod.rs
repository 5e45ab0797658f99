pub mod master_store;
pub mod table_io;

pub use master_store::{MasterLock, MasterStore};
pub use table_io::*;
