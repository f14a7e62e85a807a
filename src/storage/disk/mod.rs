pub mod async_disk;
pub mod direct_io;
