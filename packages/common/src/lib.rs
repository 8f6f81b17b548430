//! Storage primitives shared by the dedup workspace: content digests, the
//! sharded path scheme and the blob backend contract with its implementations.

pub mod storage;
