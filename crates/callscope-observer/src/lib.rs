//! Reference observer: accepts relay connections and surfaces the call
//! records they carry.

pub mod ingest;
